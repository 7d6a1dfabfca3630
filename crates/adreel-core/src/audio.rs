use std::{collections::BTreeMap, sync::Arc};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::{
    media::{AssetFetcher, AudioDecoder, AudioDemuxer, DecodedAudio, url_extension},
    model::{AudioTrack, SceneObject},
    time::{ms_to_seconds, samples_to_seconds, seconds_to_samples},
};

pub const MAX_FADE_IN_SECS: f64 = 2.0;
pub const FADE_OUT_TAIL_SECS: f64 = 0.05;
pub const EXPORT_CHANNELS: usize = 2;

pub type VoiceId = u64;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MixerError {
    #[error("audio clip not found: {0}")]
    ClipNotFound(Uuid),
}

/// Runtime audio clip. `trim` is the in-point inside the decoded buffer,
/// `timeline` the play length on the global timeline, `offset` its global start.
#[derive(Debug, Clone)]
pub struct AudioClip {
    pub id: Uuid,
    pub source_url: String,
    pub name: String,
    pub volume: f32,
    pub muted: bool,
    pub trim: f64,
    pub offset: f64,
    pub timeline: f64,
    pub duration: f64,
    pub buffer: Option<Arc<DecodedAudio>>,
    pub playing: bool,
    pub active_voice: Option<VoiceId>,
}

impl AudioClip {
    #[must_use]
    pub fn from_track(track: &AudioTrack) -> Self {
        Self {
            id: track.id,
            source_url: track.url.clone(),
            name: track.name.clone(),
            volume: track.volume.clamp(0.0, 1.0),
            muted: track.muted,
            trim: track.trim.max(0.0),
            offset: track.offset.max(0.0),
            timeline: track.timeline.max(0.0),
            duration: track.duration.max(0.0),
            buffer: None,
            playing: false,
            active_voice: None,
        }
    }

    #[must_use]
    pub fn to_track(&self) -> AudioTrack {
        AudioTrack {
            id: self.id,
            url: self.source_url.clone(),
            name: self.name.clone(),
            volume: self.volume,
            offset: self.offset,
            timeline: self.timeline,
            trim: self.trim,
            duration: self.duration,
            muted: self.muted,
        }
    }

    #[must_use]
    pub fn end(&self) -> f64 {
        self.offset + self.timeline
    }

    /// Loaded, unmuted and with a positive volume.
    #[must_use]
    pub fn is_audible(&self) -> bool {
        self.buffer.is_some() && !self.muted && self.volume > 0.0 && self.timeline > 0.0
    }

    /// Attaches a decoded buffer and clamps `trim + timeline` into it.
    pub fn attach_buffer(&mut self, buffer: Arc<DecodedAudio>) {
        let available = buffer.duration_secs();
        self.duration = available;
        self.trim = self.trim.clamp(0.0, available);
        self.timeline = self.timeline.min(available - self.trim).max(0.0);
        self.buffer = Some(buffer);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioClipPatch {
    pub name: Option<String>,
    pub volume: Option<f32>,
    pub muted: Option<bool>,
    pub trim: Option<f64>,
    pub offset: Option<f64>,
    pub timeline: Option<f64>,
}

/// Piecewise-linear gain over context time: ramps `0 → volume` over
/// `min(2s, timeline/2)` and back to zero over a short tail before the end.
#[derive(Debug, Clone, PartialEq)]
pub struct GainEnvelope {
    points: Vec<(f64, f32)>,
}

impl GainEnvelope {
    #[must_use]
    pub fn for_clip(start: f64, timeline: f64, volume: f32) -> Self {
        let end = start + timeline.max(0.0);
        let attack_end = start + MAX_FADE_IN_SECS.min(timeline / 2.0).max(0.0);
        let release_start = attack_end.max(end - FADE_OUT_TAIL_SECS);
        Self {
            points: vec![
                (start, 0.0),
                (attack_end, volume),
                (release_start, volume),
                (end, 0.0),
            ],
        }
    }

    #[must_use]
    pub fn points(&self) -> &[(f64, f32)] {
        &self.points
    }

    #[must_use]
    pub fn gain_at(&self, time: f64) -> f32 {
        let (Some(first), Some(last)) = (self.points.first(), self.points.last()) else {
            return 0.0;
        };
        if time <= first.0 {
            return first.1;
        }
        if time >= last.0 {
            return last.1;
        }

        for pair in self.points.windows(2) {
            let (t0, g0) = pair[0];
            let (t1, g1) = pair[1];
            if time >= t0 && time <= t1 {
                if t1 <= t0 {
                    return g1;
                }
                let progress = ((time - t0) / (t1 - t0)) as f32;
                return g0 + (g1 - g0) * progress;
            }
        }
        last.1
    }
}

/// One scheduled playback of a clip buffer. `start` is in context time and
/// `read_from` is the position inside the buffer at `start`.
#[derive(Debug, Clone)]
pub struct Voice {
    pub clip_id: Uuid,
    pub buffer: Arc<DecodedAudio>,
    pub start: f64,
    pub read_from: f64,
    pub duration: f64,
    pub envelope: GainEnvelope,
}

impl Voice {
    #[must_use]
    pub fn end(&self) -> f64 {
        self.start + self.duration
    }

    /// Adds this voice into `out` (planar), where `out` frame 0 sits at
    /// context frame `block_start`.
    fn mix_into(&self, out: &mut [Vec<f32>], block_start: u64, sample_rate: u32) {
        let Some(block_len) = out.first().map(Vec::len) else {
            return;
        };
        let rate = f64::from(sample_rate);
        let first = seconds_to_samples(self.start, sample_rate).max(block_start);
        let last = seconds_to_samples(self.end(), sample_rate).min(block_start + block_len as u64);
        if first >= last {
            return;
        }

        let source_rate = f64::from(self.buffer.sample_rate);
        for frame in first..last {
            let time = frame as f64 / rate;
            let source_time = self.read_from + (time - self.start);
            if source_time < 0.0 {
                continue;
            }
            let source_frame = (source_time * source_rate) as usize;
            let gain = self.envelope.gain_at(time);
            let index = (frame - block_start) as usize;
            for (channel, samples) in out.iter_mut().enumerate() {
                samples[index] += self.buffer.sample(channel, source_frame) * gain;
            }
        }
    }
}

/// Clock and voice scheduling surface shared by live and offline rendering.
pub trait AudioContext {
    fn sample_rate(&self) -> u32;
    /// Context time in seconds.
    fn current_time(&self) -> f64;
    fn schedule(&mut self, voice: Voice) -> VoiceId;
    fn stop(&mut self, id: VoiceId) -> bool;
}

/// Block-pull context for a host audio callback: every `pull` renders the next
/// block and advances the context clock by its length.
#[derive(Debug)]
pub struct RealtimeContext {
    sample_rate: u32,
    position: u64,
    voices: BTreeMap<VoiceId, Voice>,
    next_id: VoiceId,
}

impl RealtimeContext {
    #[must_use]
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            position: 0,
            voices: BTreeMap::new(),
            next_id: 1,
        }
    }

    #[must_use]
    pub fn active_voices(&self) -> usize {
        self.voices.len()
    }

    #[must_use]
    pub fn voice(&self, id: VoiceId) -> Option<&Voice> {
        self.voices.get(&id)
    }

    /// Renders `frames` frames of planar audio with `channels` channels.
    pub fn pull(&mut self, channels: usize, frames: usize) -> Vec<Vec<f32>> {
        let mut out = vec![vec![0.0; frames]; channels];
        for voice in self.voices.values() {
            voice.mix_into(&mut out, self.position, self.sample_rate);
        }
        self.position += frames as u64;

        let now = self.current_time();
        self.voices.retain(|_, voice| voice.end() > now);
        out
    }
}

impl AudioContext for RealtimeContext {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn current_time(&self) -> f64 {
        samples_to_seconds(self.position, self.sample_rate)
    }

    fn schedule(&mut self, voice: Voice) -> VoiceId {
        let id = self.next_id;
        self.next_id += 1;
        self.voices.insert(id, voice);
        id
    }

    fn stop(&mut self, id: VoiceId) -> bool {
        self.voices.remove(&id).is_some()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RenderedAudio {
    pub sample_rate: u32,
    pub channels: Vec<Vec<f32>>,
}

impl RenderedAudio {
    #[must_use]
    pub fn frames(&self) -> usize {
        self.channels.first().map_or(0, Vec::len)
    }

    #[must_use]
    pub fn duration_secs(&self) -> f64 {
        samples_to_seconds(self.frames() as u64, self.sample_rate)
    }
}

/// Non-real-time mixdown target; time starts at zero and nothing plays
/// until `render`.
#[derive(Debug)]
pub struct OfflineContext {
    channels: usize,
    sample_rate: u32,
    length: u64,
    voices: Vec<Voice>,
}

impl OfflineContext {
    #[must_use]
    pub fn new(channels: usize, sample_rate: u32, length: u64) -> Self {
        Self {
            channels,
            sample_rate,
            length,
            voices: Vec::new(),
        }
    }

    /// Sized for `min(longest audible clip end, timeline)`; `None` when no clip
    /// is audible.
    #[must_use]
    pub fn for_clips(clips: &[AudioClip], timeline_secs: f64, sample_rate: u32) -> Option<Self> {
        let longest_end = clips
            .iter()
            .filter(|clip| clip.is_audible())
            .map(AudioClip::end)
            .reduce(f64::max)?;
        let length = seconds_to_samples(longest_end.min(timeline_secs), sample_rate);
        if length == 0 {
            return None;
        }
        Some(Self::new(EXPORT_CHANNELS, sample_rate, length))
    }

    #[must_use]
    pub fn length(&self) -> u64 {
        self.length
    }

    #[must_use]
    pub fn channels(&self) -> usize {
        self.channels
    }

    #[must_use]
    pub fn voices(&self) -> &[Voice] {
        &self.voices
    }

    #[instrument(skip(self), fields(voices = self.voices.len(), length = self.length))]
    pub async fn render(self) -> RenderedAudio {
        let frames = usize::try_from(self.length).unwrap_or(usize::MAX);
        let mut out = vec![vec![0.0; frames]; self.channels];
        for voice in &self.voices {
            voice.mix_into(&mut out, 0, self.sample_rate);
            tokio::task::yield_now().await;
        }
        debug!(frames, "offline render complete");
        RenderedAudio {
            sample_rate: self.sample_rate,
            channels: out,
        }
    }
}

impl AudioContext for OfflineContext {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn current_time(&self) -> f64 {
        0.0
    }

    fn schedule(&mut self, voice: Voice) -> VoiceId {
        self.voices.push(voice);
        self.voices.len() as VoiceId
    }

    /// Offline voices always render to completion.
    fn stop(&mut self, _id: VoiceId) -> bool {
        false
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub loaded: usize,
    pub failed: Vec<Uuid>,
}

/// Owns the runtime audio clips of the page and schedules them onto a live
/// or offline context.
#[derive(Debug)]
pub struct AudioMixer {
    clips: Vec<AudioClip>,
    selected: watch::Sender<Option<AudioTrack>>,
}

impl Default for AudioMixer {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioMixer {
    #[must_use]
    pub fn new() -> Self {
        let (selected, _) = watch::channel(None);
        Self {
            clips: Vec::new(),
            selected,
        }
    }

    #[must_use]
    pub fn from_tracks(tracks: &[AudioTrack]) -> Self {
        let mut mixer = Self::new();
        mixer.clips = tracks.iter().map(AudioClip::from_track).collect();
        mixer
    }

    /// Swaps in the clips of another page. Selection subscribers stay
    /// attached and observe the selection being cleared.
    pub fn replace_tracks(&mut self, tracks: &[AudioTrack]) {
        self.clips = tracks.iter().map(AudioClip::from_track).collect();
        self.selected.send_replace(None);
    }

    #[must_use]
    pub fn clips(&self) -> &[AudioClip] {
        &self.clips
    }

    #[must_use]
    pub fn clip(&self, id: Uuid) -> Option<&AudioClip> {
        self.clips.iter().find(|clip| clip.id == id)
    }

    #[must_use]
    pub fn tracks(&self) -> Vec<AudioTrack> {
        self.clips.iter().map(AudioClip::to_track).collect()
    }

    #[instrument(skip(self, track, buffer), fields(clip_id = %track.id))]
    pub fn add(&mut self, track: &AudioTrack, buffer: Option<Arc<DecodedAudio>>) -> AudioTrack {
        let mut clip = AudioClip::from_track(track);
        if let Some(buffer) = buffer {
            clip.attach_buffer(buffer);
        }
        let stored = clip.to_track();
        self.clips.push(clip);
        info!(name = %stored.name, "audio clip added");
        stored
    }

    /// Removes a clip, stopping its active voice first.
    #[instrument(skip(self, ctx))]
    pub fn delete(&mut self, id: Uuid, ctx: &mut dyn AudioContext) -> Result<AudioTrack, MixerError> {
        let index = self
            .clips
            .iter()
            .position(|clip| clip.id == id)
            .ok_or(MixerError::ClipNotFound(id))?;
        let clip = self.clips.remove(index);
        if let Some(voice) = clip.active_voice {
            ctx.stop(voice);
        }
        if self.selected_id() == Some(id) {
            self.selected.send_replace(None);
        }
        info!("audio clip deleted");
        Ok(clip.to_track())
    }

    #[instrument(skip(self, patch))]
    pub fn update(&mut self, id: Uuid, patch: &AudioClipPatch) -> Result<AudioTrack, MixerError> {
        let clip = self
            .clips
            .iter_mut()
            .find(|clip| clip.id == id)
            .ok_or(MixerError::ClipNotFound(id))?;

        if let Some(name) = &patch.name {
            clip.name.clone_from(name);
        }
        if let Some(volume) = patch.volume {
            clip.volume = volume.clamp(0.0, 1.0);
        }
        if let Some(muted) = patch.muted {
            clip.muted = muted;
        }
        if let Some(offset) = patch.offset {
            clip.offset = offset.max(0.0);
        }
        if let Some(trim) = patch.trim {
            clip.trim = trim.max(0.0);
        }
        if let Some(timeline) = patch.timeline {
            clip.timeline = timeline.max(0.0);
        }
        if let Some(buffer) = clip.buffer.clone() {
            clip.attach_buffer(buffer);
        }

        let snapshot = clip.to_track();
        self.notify_selected(&snapshot);
        debug!(volume = snapshot.volume, offset = snapshot.offset, "audio clip updated");
        Ok(snapshot)
    }

    /// Attaches an already decoded buffer so `load` skips the clip.
    pub fn attach(&mut self, id: Uuid, buffer: Arc<DecodedAudio>) -> Result<AudioTrack, MixerError> {
        let clip = self
            .clips
            .iter_mut()
            .find(|clip| clip.id == id)
            .ok_or(MixerError::ClipNotFound(id))?;
        clip.attach_buffer(buffer);
        let snapshot = clip.to_track();
        self.notify_selected(&snapshot);
        Ok(snapshot)
    }

    pub fn select(&mut self, id: Option<Uuid>) -> Result<(), MixerError> {
        let snapshot = match id {
            Some(id) => Some(self.clip(id).ok_or(MixerError::ClipNotFound(id))?.to_track()),
            None => None,
        };
        self.selected.send_replace(snapshot);
        Ok(())
    }

    #[must_use]
    pub fn selected_id(&self) -> Option<Uuid> {
        self.selected.borrow().as_ref().map(|track| track.id)
    }

    /// Receiver observing the selected clip; refreshed whenever that clip is edited.
    #[must_use]
    pub fn subscribe_selected(&self) -> watch::Receiver<Option<AudioTrack>> {
        self.selected.subscribe()
    }

    fn notify_selected(&self, snapshot: &AudioTrack) {
        self.selected.send_if_modified(|selected| match selected {
            Some(current) if current.id == snapshot.id => {
                *current = snapshot.clone();
                true
            }
            _ => false,
        });
    }

    /// Fetches and decodes every clip without a buffer. Failures are logged
    /// and the clip stays unloaded.
    #[instrument(skip_all, fields(clips = self.clips.len()))]
    pub async fn load(
        &mut self,
        fetcher: &dyn AssetFetcher,
        decoder: &dyn AudioDecoder,
    ) -> LoadReport {
        let mut report = LoadReport::default();
        let mut loaded = Vec::new();
        for clip in self.clips.iter_mut().filter(|clip| clip.buffer.is_none()) {
            let decoded = match fetcher.fetch(&clip.source_url).await {
                Ok(bytes) => decoder.decode(bytes, url_extension(&clip.source_url)).await,
                Err(error) => Err(error),
            };
            match decoded {
                Ok(buffer) => {
                    clip.attach_buffer(Arc::new(buffer));
                    report.loaded += 1;
                    loaded.push(clip.to_track());
                }
                Err(error) => {
                    warn!(clip_id = %clip.id, url = %clip.source_url, ?error, "audio clip failed to load, skipping");
                    report.failed.push(clip.id);
                }
            }
        }
        for snapshot in &loaded {
            self.notify_selected(snapshot);
        }
        info!(loaded = report.loaded, failed = report.failed.len(), "audio clips loaded");
        report
    }

    /// Demuxes the embedded audio of video objects into clips positioned by
    /// the video's own offset, trim and duration. Unreadable videos are skipped.
    #[instrument(skip_all, fields(objects = objects.len()))]
    pub async fn extract(
        objects: &[SceneObject],
        fetcher: &dyn AssetFetcher,
        demuxer: &dyn AudioDemuxer,
    ) -> Vec<AudioClip> {
        let mut clips = Vec::new();
        for object in objects {
            let Some(video) = object.video() else {
                continue;
            };
            if !video.has_audio || object.excluded {
                continue;
            }

            let demuxed = match fetcher.fetch(&video.source_url).await {
                Ok(bytes) => {
                    demuxer
                        .demux_audio(bytes, url_extension(&video.source_url))
                        .await
                }
                Err(error) => Err(error),
            };
            let buffer = match demuxed {
                Ok(Some(buffer)) => buffer,
                Ok(None) => {
                    debug!(object_id = %object.id, "video carries no audio track");
                    continue;
                }
                Err(error) => {
                    warn!(object_id = %object.id, url = %video.source_url, ?error, "video audio extraction failed, skipping");
                    continue;
                }
            };

            let mut clip = AudioClip {
                id: object.id,
                source_url: video.source_url.clone(),
                name: object.name.clone(),
                volume: video.volume.clamp(0.0, 1.0),
                muted: video.muted,
                trim: ms_to_seconds(video.trim_ms),
                offset: ms_to_seconds(object.timing.offset_ms),
                timeline: ms_to_seconds(object.timing.duration_ms),
                duration: 0.0,
                buffer: None,
                playing: false,
                active_voice: None,
            };
            clip.attach_buffer(Arc::new(buffer));
            clips.push(clip);
        }
        info!(extracted = clips.len(), "video audio extracted");
        clips
    }

    /// Starts a voice for every audible clip at `now + offset`, reading from
    /// `max(seek, trim)`. Returns the number of voices started.
    #[instrument(skip(self, ctx))]
    pub fn play(&mut self, ctx: &mut dyn AudioContext, seek_secs: f64) -> usize {
        let now = ctx.current_time();
        let mut started = 0;
        for clip in &mut self.clips {
            if let Some(voice) = clip.active_voice.take() {
                ctx.stop(voice);
            }
            clip.playing = false;

            let Some(voice) = live_voice(clip, now, seek_secs) else {
                continue;
            };
            clip.active_voice = Some(ctx.schedule(voice));
            clip.playing = true;
            started += 1;
        }
        info!(started, "audio playback started");
        started
    }

    pub fn stop_all(&mut self, ctx: &mut dyn AudioContext) {
        let mut stopped = 0;
        for clip in &mut self.clips {
            if let Some(voice) = clip.active_voice.take() {
                ctx.stop(voice);
                stopped += 1;
            }
            clip.playing = false;
        }
        debug!(stopped, "audio voices stopped");
    }

    /// Schedules every audible clip onto an offline context starting at zero.
    #[instrument(skip_all, fields(clips = clips.len()))]
    pub fn record(clips: &[AudioClip], offline: &mut OfflineContext) -> usize {
        let length_secs = samples_to_seconds(offline.length(), offline.sample_rate());
        let mut scheduled = 0;
        for clip in clips.iter().filter(|clip| clip.is_audible()) {
            if clip.end() > length_secs {
                warn!(
                    clip_id = %clip.id,
                    clip_end = clip.end(),
                    length_secs,
                    "audio clip extends past the mix length and will be truncated"
                );
            }
            if let Some(voice) = clip_voice(clip, clip.offset, clip.trim) {
                offline.schedule(voice);
                scheduled += 1;
            }
        }
        scheduled
    }
}

fn live_voice(clip: &AudioClip, now: f64, seek_secs: f64) -> Option<Voice> {
    if !clip.is_audible() {
        return None;
    }
    clip_voice(clip, now + clip.offset, seek_secs.max(clip.trim))
}

fn clip_voice(clip: &AudioClip, start: f64, read_from: f64) -> Option<Voice> {
    let buffer = clip.buffer.clone()?;
    if clip.timeline <= 0.0 {
        return None;
    }
    Some(Voice {
        clip_id: clip.id,
        buffer,
        start,
        read_from,
        duration: clip.timeline,
        envelope: GainEnvelope::for_clip(start, clip.timeline, clip.volume),
    })
}
