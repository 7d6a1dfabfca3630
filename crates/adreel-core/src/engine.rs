use std::{
    fmt,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::{
    sync::watch,
    time::{Instant, MissedTickBehavior},
};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::{
    animation::{DEFAULT_LEAD_MS, FrameState, SchedulerOptions},
    audio::{AudioClipPatch, AudioMixer, LoadReport, MixerError, RealtimeContext},
    cancel::CancellationToken,
    clock::{ClockError, ClockEvent, TickReport, TimelineClock, TimelineProperty, TimelineState},
    media::{
        AssetFetcher, AudioDecoder, ClockedMediaProvider, DecodedAudio, MediaBank, MediaProvider,
    },
    model::{
        AnimationDefinition, AnimationSet, AnimationSlot, AudioTrack, Color, DEFAULT_SAMPLE_RATE,
        ObjectKind, ObjectProps, Page, SceneObject, Timing,
    },
    easing, persistence,
};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("object not found: {0}")]
    ObjectNotFound(Uuid),
    #[error("audio clip not found: {0}")]
    ClipNotFound(Uuid),
    #[error("{slot:?} animation of {object_id} is fixed and cannot be edited")]
    FixedAnimation {
        object_id: Uuid,
        slot: AnimationSlot,
    },
    #[error("invalid timing: offset {offset_ms}ms, duration {duration_ms}ms")]
    InvalidTiming { offset_ms: f64, duration_ms: f64 },
    #[error(transparent)]
    Clock(#[from] ClockError),
    #[error("io error: {0}")]
    Io(String),
}

impl From<anyhow::Error> for EngineError {
    fn from(value: anyhow::Error) -> Self {
        Self::Io(format!("{value:#}"))
    }
}

impl From<MixerError> for EngineError {
    fn from(value: MixerError) -> Self {
        match value {
            MixerError::ClipNotFound(id) => Self::ClipNotFound(id),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddObjectRequest {
    pub name: String,
    pub kind: ObjectKind,
    pub width: f64,
    pub height: f64,
    #[serde(default)]
    pub props: ObjectProps,
    pub timing: Timing,
    #[serde(default)]
    pub animation: AnimationSet,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AnimationPatch {
    pub duration_ms: Option<f64>,
    pub easing: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddAudioRequest {
    pub url: String,
    pub name: String,
    pub duration: f64,
    #[serde(default)]
    pub offset: f64,
    #[serde(default)]
    pub trim: f64,
    pub timeline: Option<f64>,
    pub volume: Option<f32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineOptions {
    pub lead_ms: f64,
    pub sample_rate: u32,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            lead_ms: DEFAULT_LEAD_MS,
            sample_rate: DEFAULT_SAMPLE_RATE,
        }
    }
}

/// Editing and preview facade over the single active page.
pub struct Engine {
    page: Page,
    options: EngineOptions,
    clock: TimelineClock,
    mixer: AudioMixer,
    live: RealtimeContext,
    media_provider: Arc<dyn MediaProvider>,
    live_media: MediaBank,
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("page", &self.page)
            .field("options", &self.options)
            .field("clock", &self.clock)
            .field("mixer", &self.mixer)
            .field("live_media", &self.live_media.len())
            .finish_non_exhaustive()
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(Page::default())
    }
}

impl Engine {
    #[must_use]
    pub fn new(page: Page) -> Self {
        Self::with_options(page, EngineOptions::default())
    }

    #[must_use]
    pub fn with_options(page: Page, options: EngineOptions) -> Self {
        let scheduler = SchedulerOptions::for_page(&page, options.lead_ms);
        Self {
            clock: TimelineClock::new(page.duration_ms, scheduler),
            mixer: AudioMixer::from_tracks(&page.audios),
            live: RealtimeContext::new(options.sample_rate),
            media_provider: Arc::new(ClockedMediaProvider),
            live_media: MediaBank::default(),
            options,
            page,
        }
    }

    /// Media elements opened for video objects during live preview.
    #[must_use]
    pub fn with_media(mut self, provider: Arc<dyn MediaProvider>) -> Self {
        self.media_provider = provider;
        self
    }

    #[must_use]
    pub fn page(&self) -> &Page {
        &self.page
    }

    #[must_use]
    pub fn clock(&self) -> &TimelineClock {
        &self.clock
    }

    #[must_use]
    pub fn mixer(&self) -> &AudioMixer {
        &self.mixer
    }

    pub fn live_context_mut(&mut self) -> &mut RealtimeContext {
        &mut self.live
    }

    #[must_use]
    pub fn live_media(&self) -> &MediaBank {
        &self.live_media
    }

    #[must_use]
    pub fn options(&self) -> EngineOptions {
        self.options
    }

    #[must_use]
    pub fn scheduler_options(&self) -> SchedulerOptions {
        SchedulerOptions::for_page(&self.page, self.options.lead_ms)
    }

    #[instrument(skip(self), fields(width, height, duration_ms))]
    pub fn create_page(&mut self, width: u32, height: u32, fill: Color, duration_ms: f64) {
        self.replace_page(Page::new(width.max(1), height.max(1), fill, duration_ms));
    }

    /// Resets preview state for a new page. The media provider and audio
    /// selection subscribers carry over.
    #[instrument(skip(self, page), fields(objects = page.objects.len(), audios = page.audios.len()))]
    pub fn replace_page(&mut self, page: Page) {
        self.halt_preview();
        let scheduler = SchedulerOptions::for_page(&page, self.options.lead_ms);
        self.clock = TimelineClock::new(page.duration_ms, scheduler);
        self.mixer.replace_tracks(&page.audios);
        self.live = RealtimeContext::new(self.options.sample_rate);
        self.page = page;
        info!("page replaced");
    }

    #[instrument(skip(self, request), fields(name = %request.name, kind = request.kind.label()))]
    pub fn add_object(&mut self, request: AddObjectRequest) -> Result<SceneObject, EngineError> {
        let object = self.build_object(request)?;
        self.page.objects.push(object.clone());
        info!(object_id = %object.id, "object added");
        Ok(object)
    }

    /// Adds a clip-mask child that follows the parent's timing and entry/exit.
    #[instrument(skip(self, request), fields(parent_id = %parent_id, name = %request.name))]
    pub fn add_clip_mask(
        &mut self,
        parent_id: Uuid,
        request: AddObjectRequest,
    ) -> Result<SceneObject, EngineError> {
        let parent_timing = self
            .page
            .object(parent_id)
            .ok_or(EngineError::ObjectNotFound(parent_id))?
            .timing;
        let mut object = self.build_object(request)?;
        object.mask_of = Some(parent_id);
        object.timing = parent_timing;
        self.page.objects.push(object.clone());
        info!(object_id = %object.id, "clip mask added");
        Ok(object)
    }

    fn build_object(&self, request: AddObjectRequest) -> Result<SceneObject, EngineError> {
        validate_timing(request.timing)?;
        let mut object = SceneObject::new(
            request.name,
            request.kind,
            request.width.max(0.0),
            request.height.max(0.0),
            request.timing,
        );
        object.props = request.props;
        object.animation = request.animation;
        Ok(object)
    }

    /// Removes an object together with its clip-mask children.
    #[instrument(skip(self), fields(object_id = %object_id))]
    pub fn remove_object(&mut self, object_id: Uuid) -> Result<Vec<Uuid>, EngineError> {
        if self.page.object(object_id).is_none() {
            return Err(EngineError::ObjectNotFound(object_id));
        }

        let mut removed = vec![object_id];
        removed.extend(self.page.mask_children(object_id));
        self.page
            .objects
            .retain(|object| !removed.contains(&object.id));
        info!(removed = removed.len(), "object removed");
        Ok(removed)
    }

    #[instrument(skip(self), fields(object_id = %object_id))]
    pub fn set_timing(&mut self, object_id: Uuid, timing: Timing) -> Result<SceneObject, EngineError> {
        validate_timing(timing)?;
        let updated = {
            let object = self.object_mut(object_id)?;
            object.timing = timing;
            object.clone()
        };
        let masks = self.page.mask_children(object_id);
        for object in self
            .page
            .objects
            .iter_mut()
            .filter(|object| masks.contains(&object.id))
        {
            object.timing = timing;
        }
        info!(
            offset_ms = timing.offset_ms,
            duration_ms = timing.duration_ms,
            synced_masks = masks.len(),
            "object timing updated"
        );
        Ok(updated)
    }

    #[instrument(skip(self, props), fields(object_id = %object_id))]
    pub fn set_props(&mut self, object_id: Uuid, props: ObjectProps) -> Result<SceneObject, EngineError> {
        let object = self.object_mut(object_id)?;
        object.props = props;
        debug!("object props updated");
        Ok(object.clone())
    }

    /// Excluded objects stay in the page but are left out of exports.
    #[instrument(skip(self), fields(object_id = %object_id))]
    pub fn set_excluded(&mut self, object_id: Uuid, excluded: bool) -> Result<SceneObject, EngineError> {
        let object = self.object_mut(object_id)?;
        object.excluded = excluded;
        info!(excluded, "object export exclusion changed");
        Ok(object.clone())
    }

    #[instrument(skip(self, definition), fields(object_id = %object_id, kind = ?definition.kind))]
    pub fn set_animation(
        &mut self,
        object_id: Uuid,
        slot: AnimationSlot,
        definition: AnimationDefinition,
    ) -> Result<SceneObject, EngineError> {
        let object = self.object_mut(object_id)?;
        *object.animation.get_mut(slot) = definition;
        info!("animation set");
        Ok(object.clone())
    }

    /// Edits duration/easing of an existing definition; fixed definitions refuse.
    #[instrument(skip(self, patch), fields(object_id = %object_id))]
    pub fn patch_animation(
        &mut self,
        object_id: Uuid,
        slot: AnimationSlot,
        patch: AnimationPatch,
    ) -> Result<SceneObject, EngineError> {
        let object = self.object_mut(object_id)?;
        let definition = object.animation.get_mut(slot);
        if definition.fixed {
            warn!("rejected edit of fixed animation");
            return Err(EngineError::FixedAnimation { object_id, slot });
        }
        if let Some(duration_ms) = patch.duration_ms {
            definition.duration_ms = duration_ms.max(0.0);
        }
        if let Some(name) = patch.easing {
            if !easing::is_known(&name) {
                warn!(easing = %name, "unknown easing, playback will use linear");
            }
            definition.easing = name;
        }
        info!(
            duration_ms = definition.duration_ms,
            easing = %definition.easing,
            "animation patched"
        );
        Ok(object.clone())
    }

    fn object_mut(&mut self, object_id: Uuid) -> Result<&mut SceneObject, EngineError> {
        self.page
            .object_mut(object_id)
            .ok_or(EngineError::ObjectNotFound(object_id))
    }

    #[instrument(skip(self, request, buffer), fields(url = %request.url, name = %request.name))]
    pub fn add_audio(
        &mut self,
        request: AddAudioRequest,
        buffer: Option<Arc<DecodedAudio>>,
    ) -> AudioTrack {
        let mut track = AudioTrack::new(request.url, request.name, request.duration);
        track.offset = request.offset.max(0.0);
        track.trim = request.trim.max(0.0);
        if let Some(timeline) = request.timeline {
            track.timeline = timeline.max(0.0);
        }
        if let Some(volume) = request.volume {
            track.volume = volume.clamp(0.0, 1.0);
        }
        let stored = self.mixer.add(&track, buffer);
        self.sync_audio_tracks();
        stored
    }

    #[instrument(skip(self), fields(clip_id = %clip_id))]
    pub fn remove_audio(&mut self, clip_id: Uuid) -> Result<AudioTrack, EngineError> {
        let removed = self.mixer.delete(clip_id, &mut self.live)?;
        self.sync_audio_tracks();
        Ok(removed)
    }

    #[instrument(skip(self, patch), fields(clip_id = %clip_id))]
    pub fn patch_audio(&mut self, clip_id: Uuid, patch: &AudioClipPatch) -> Result<AudioTrack, EngineError> {
        let updated = self.mixer.update(clip_id, patch)?;
        self.sync_audio_tracks();
        Ok(updated)
    }

    #[instrument(skip(self, buffer), fields(clip_id = %clip_id))]
    pub fn attach_audio_buffer(
        &mut self,
        clip_id: Uuid,
        buffer: Arc<DecodedAudio>,
    ) -> Result<AudioTrack, EngineError> {
        let updated = self.mixer.attach(clip_id, buffer)?;
        self.sync_audio_tracks();
        Ok(updated)
    }

    /// Fetches and decodes every clip still missing a buffer, then stores
    /// the clamped clip bounds back on the page.
    #[instrument(skip_all)]
    pub async fn load_audio(
        &mut self,
        fetcher: &dyn AssetFetcher,
        decoder: &dyn AudioDecoder,
    ) -> LoadReport {
        let report = self.mixer.load(fetcher, decoder).await;
        if report.loaded > 0 {
            self.sync_audio_tracks();
        }
        report
    }

    pub fn select_audio(&mut self, clip_id: Option<Uuid>) -> Result<(), EngineError> {
        self.mixer.select(clip_id)?;
        Ok(())
    }

    #[must_use]
    pub fn subscribe_selected_audio(&self) -> watch::Receiver<Option<AudioTrack>> {
        self.mixer.subscribe_selected()
    }

    fn sync_audio_tracks(&mut self) {
        self.page.audios = self.mixer.tracks();
    }

    #[instrument(skip(self))]
    pub fn set_timeline(&mut self, property: TimelineProperty, seconds: f64) -> Result<(), EngineError> {
        self.clock.set(property, seconds)?;
        if property == TimelineProperty::Duration {
            self.page.duration_ms = self.clock.state().duration_ms;
        }
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn play(&mut self) -> Result<TickReport, EngineError> {
        self.clock.set_options(self.scheduler_options());
        let report = self.clock.play(&self.page)?;
        self.live_media.close();
        self.live_media = MediaBank::open(&self.page.objects, self.media_provider.as_ref());
        self.apply_media(&report.events).await;
        self.mixer.play(&mut self.live, self.clock.seek_seconds());
        Ok(report)
    }

    pub async fn tick(&mut self, delta_ms: f64) -> TickReport {
        let report = self.clock.tick(&self.page, delta_ms);
        self.apply_media(&report.events).await;
        if report.events.contains(&ClockEvent::Finished) {
            self.mixer.stop_all(&mut self.live);
        }
        report
    }

    /// Pauses playback; visible videos are left paused at the current seek.
    #[instrument(skip(self))]
    pub async fn pause(&mut self) -> TickReport {
        let report = self.clock.pause(&self.page);
        self.apply_media(&report.events).await;
        self.mixer.stop_all(&mut self.live);
        report
    }

    /// Pauses the clock when playing, closes live media and always stops
    /// live voices.
    pub fn halt_preview(&mut self) -> Option<TickReport> {
        let report = self.clock.is_playing().then(|| self.clock.pause(&self.page));
        self.live_media.close();
        self.mixer.stop_all(&mut self.live);
        report
    }

    async fn apply_media(&mut self, events: &[ClockEvent]) {
        if self.live_media.is_empty() {
            return;
        }
        if let Err(error) = self.live_media.apply(events).await {
            warn!(?error, "live media sync failed");
        }
    }

    /// Real-time preview loop: starts playback if needed and ticks every
    /// `period` until the timeline finishes or `stop` fires.
    pub async fn drive<F>(
        &mut self,
        period: Duration,
        stop: &CancellationToken,
        mut on_tick: F,
    ) -> Result<TimelineState, EngineError>
    where
        F: FnMut(&TickReport),
    {
        if !self.clock.is_playing() {
            let report = self.play().await?;
            on_tick(&report);
        }

        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut last = Instant::now();
        while self.clock.is_playing() {
            interval.tick().await;
            if stop.is_cancelled() {
                let report = self.pause().await;
                on_tick(&report);
                break;
            }

            let now = Instant::now();
            let delta_ms = now.duration_since(last).as_secs_f64() * 1_000.0;
            last = now;
            let report = self.tick(delta_ms).await;
            on_tick(&report);
        }

        let state = self.clock.state();
        info!(seek_ms = state.seek_ms, "preview loop ended");
        Ok(state)
    }

    pub fn stop_audio(&mut self) {
        self.mixer.stop_all(&mut self.live);
    }

    /// Scrub preview at the current seek.
    pub fn preview(&self) -> Result<FrameState, EngineError> {
        Ok(self.clock.preview(&self.page)?)
    }

    #[instrument(skip(self), fields(path = %path.display()))]
    pub fn save_page(&self, path: &Path) -> Result<(), EngineError> {
        persistence::save_page(path, &self.page)?;
        Ok(())
    }

    #[instrument(skip(self), fields(path = %path.display()))]
    pub fn load_page(&mut self, path: &Path) -> Result<Page, EngineError> {
        let page = persistence::load_page(path)?;
        self.replace_page(page.clone());
        Ok(page)
    }

    #[instrument(skip(self), fields(autosave_dir = %autosave_dir.display()))]
    pub fn autosave(&self, autosave_dir: &Path) -> Result<PathBuf, EngineError> {
        let autosave_path = persistence::autosave_page(&self.page, autosave_dir)?;
        Ok(autosave_path)
    }
}

fn validate_timing(timing: Timing) -> Result<(), EngineError> {
    let valid = timing.offset_ms.is_finite()
        && timing.duration_ms.is_finite()
        && timing.offset_ms >= 0.0
        && timing.duration_ms > 0.0;
    if valid {
        Ok(())
    } else {
        Err(EngineError::InvalidTiming {
            offset_ms: timing.offset_ms,
            duration_ms: timing.duration_ms,
        })
    }
}
