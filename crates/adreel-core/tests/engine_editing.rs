use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use adreel_core::{
    AddAudioRequest, AddObjectRequest, AnimationPatch, AudioClipPatch, CancellationToken,
    ClockError, ClockEvent, DecodedAudio, Engine, EngineError, EngineOptions, MediaElement,
    MediaProvider, TimelineProperty,
    fixtures::{DEMO_LOGO_ID, DEMO_LOGO_MASK_ID, DEMO_MUSIC_ID, demo_engine, demo_page},
    model::{
        AnimationDefinition, AnimationKind, AnimationSet, AnimationSlot, Color, ObjectKind,
        ObjectProps, Page, SceneObject, ShapeData, ShapeKind, Timing, VideoData,
    },
};
use async_trait::async_trait;

#[derive(Debug, Clone, Copy, PartialEq)]
enum MediaCall {
    Play(f64),
    Pause,
    Seek(f64),
}

type MediaLog = Arc<Mutex<Vec<MediaCall>>>;

struct LoggedMedia {
    position_ms: f64,
    playing: bool,
    log: MediaLog,
}

impl LoggedMedia {
    fn record(&self, call: MediaCall) {
        self.log
            .lock()
            .expect("media log lock should not be poisoned")
            .push(call);
    }
}

#[async_trait]
impl MediaElement for LoggedMedia {
    fn play(&mut self, local_ms: f64) {
        self.position_ms = local_ms;
        self.playing = true;
        self.record(MediaCall::Play(local_ms));
    }

    fn pause(&mut self) {
        self.playing = false;
        self.record(MediaCall::Pause);
    }

    async fn seek(&mut self, local_ms: f64) -> anyhow::Result<()> {
        tokio::task::yield_now().await;
        self.position_ms = local_ms;
        self.record(MediaCall::Seek(local_ms));
        Ok(())
    }

    fn position_ms(&self) -> f64 {
        self.position_ms
    }

    fn is_playing(&self) -> bool {
        self.playing
    }
}

struct LoggedMediaProvider {
    log: MediaLog,
}

impl MediaProvider for LoggedMediaProvider {
    fn open(&self, _object: &SceneObject) -> anyhow::Result<Box<dyn MediaElement>> {
        Ok(Box::new(LoggedMedia {
            position_ms: 0.0,
            playing: false,
            log: Arc::clone(&self.log),
        }))
    }
}

fn rect_request(name: &str, timing: Timing) -> AddObjectRequest {
    AddObjectRequest {
        name: name.to_string(),
        kind: ObjectKind::Shape(ShapeData {
            shape: ShapeKind::Rect,
            corner_radius: 4.0,
        }),
        width: 300.0,
        height: 200.0,
        props: ObjectProps::at(10.0, 20.0, Color::rgb(1, 2, 3)),
        timing,
        animation: AnimationSet::default(),
    }
}

fn audio_request(url: &str) -> AddAudioRequest {
    AddAudioRequest {
        url: url.to_string(),
        name: url.to_string(),
        duration: 3.0,
        offset: 0.25,
        trim: 0.0,
        timeline: Some(2.0),
        volume: None,
    }
}

#[test]
fn masks_copy_and_follow_parent_timing() {
    let mut engine = Engine::new(Page::default());
    let parent = engine
        .add_object(rect_request("card", Timing::new(400.0, 1_600.0)))
        .expect("object should be added");
    let mask = engine
        .add_clip_mask(parent.id, rect_request("mask", Timing::new(0.0, 100.0)))
        .expect("mask should be added");
    assert_eq!(mask.mask_of, Some(parent.id));
    assert_eq!(mask.timing, parent.timing);

    let retimed = Timing::new(1_000.0, 500.0);
    engine
        .set_timing(parent.id, retimed)
        .expect("timing should update");
    assert_eq!(
        engine.page().object(mask.id).map(|object| object.timing),
        Some(retimed)
    );

    let removed = engine
        .remove_object(parent.id)
        .expect("removal should succeed");
    assert_eq!(removed, vec![parent.id, mask.id]);
    assert!(engine.page().objects.is_empty());
}

#[test]
fn unknown_objects_and_bad_timing_are_rejected() {
    let mut engine = Engine::new(demo_page());
    let missing = uuid::Uuid::new_v4();
    assert!(matches!(
        engine.remove_object(missing),
        Err(EngineError::ObjectNotFound(id)) if id == missing
    ));
    assert!(matches!(
        engine.add_clip_mask(missing, rect_request("mask", Timing::new(0.0, 10.0))),
        Err(EngineError::ObjectNotFound(_))
    ));

    for timing in [
        Timing::new(-1.0, 100.0),
        Timing::new(0.0, 0.0),
        Timing::new(f64::NAN, 100.0),
    ] {
        assert!(matches!(
            engine.set_timing(DEMO_LOGO_ID, timing),
            Err(EngineError::InvalidTiming { .. })
        ));
        assert!(matches!(
            engine.add_object(rect_request("bad", timing)),
            Err(EngineError::InvalidTiming { .. })
        ));
    }
    assert_eq!(engine.page().objects.len(), demo_page().objects.len());
}

#[test]
fn fixed_animations_refuse_patches() {
    let mut engine = Engine::new(demo_page());
    let patch = AnimationPatch {
        duration_ms: Some(900.0),
        easing: Some("linear".to_string()),
    };

    assert!(matches!(
        engine.patch_animation(DEMO_LOGO_ID, AnimationSlot::In, patch.clone()),
        Err(EngineError::FixedAnimation {
            slot: AnimationSlot::In,
            ..
        })
    ));

    let updated = engine
        .patch_animation(DEMO_LOGO_ID, AnimationSlot::Out, patch)
        .expect("exit animation should be editable");
    assert!((updated.animation.exit.duration_ms - 900.0).abs() < f64::EPSILON);
    assert_eq!(updated.animation.exit.easing, "linear");

    let replaced = engine
        .set_animation(
            DEMO_LOGO_ID,
            AnimationSlot::In,
            AnimationDefinition::new(AnimationKind::Fade, 200.0, "linear"),
        )
        .expect("definitions can always be replaced");
    assert!(!replaced.animation.entry.fixed);
}

#[test]
fn props_and_exclusion_are_stored_on_the_page() {
    let mut engine = Engine::new(demo_page());
    let props = ObjectProps::at(1.0, 2.0, Color::rgb(9, 9, 9));
    engine
        .set_props(DEMO_LOGO_MASK_ID, props.clone())
        .expect("props should update");
    engine
        .set_excluded(DEMO_LOGO_MASK_ID, true)
        .expect("exclusion should update");

    let mask = engine
        .page()
        .object(DEMO_LOGO_MASK_ID)
        .expect("mask should exist");
    assert_eq!(mask.props, props);
    assert!(mask.excluded);
}

#[test]
fn audio_edits_are_mirrored_into_the_page() {
    let mut engine = Engine::new(Page::default());
    let first = engine.add_audio(audio_request("a.wav"), None);
    let second = engine.add_audio(audio_request("b.wav"), None);
    assert_eq!(engine.page().audios.len(), 2);
    assert!((first.volume - 1.0).abs() < f32::EPSILON);
    assert!((first.timeline - 2.0).abs() < f64::EPSILON);

    engine
        .patch_audio(
            second.id,
            &AudioClipPatch {
                volume: Some(1.5),
                muted: Some(true),
                ..AudioClipPatch::default()
            },
        )
        .expect("patch should succeed");
    let stored = engine
        .page()
        .audios
        .iter()
        .find(|track| track.id == second.id)
        .expect("patched track should be stored");
    assert!((stored.volume - 1.0).abs() < f32::EPSILON);
    assert!(stored.muted);

    engine
        .remove_audio(first.id)
        .expect("removal should succeed");
    assert_eq!(engine.page().audios.len(), 1);
    assert!(matches!(
        engine.remove_audio(first.id),
        Err(EngineError::ClipNotFound(_))
    ));
}

#[test]
fn attached_buffers_clamp_the_stored_track() {
    let mut engine = Engine::new(Page::default());
    let track = engine.add_audio(audio_request("short.wav"), None);
    let buffer = Arc::new(DecodedAudio::new(48_000, vec![vec![0.1; 48_000]]));

    let updated = engine
        .attach_audio_buffer(track.id, buffer)
        .expect("attach should succeed");
    assert!((updated.duration - 1.0).abs() < 1e-9);
    assert!((updated.timeline - 1.0).abs() < 1e-9);
    assert_eq!(engine.page().audios[0], updated);
}

#[test]
fn selected_audio_watch_follows_engine_patches() {
    let mut engine = Engine::new(Page::default());
    let track = engine.add_audio(audio_request("a.wav"), None);
    engine
        .select_audio(Some(track.id))
        .expect("selection should succeed");
    let mut selected = engine.subscribe_selected_audio();

    engine
        .patch_audio(
            track.id,
            &AudioClipPatch {
                name: Some("Voiceover".to_string()),
                ..AudioClipPatch::default()
            },
        )
        .expect("patch should succeed");
    assert!(selected.has_changed().expect("sender should be alive"));
    assert_eq!(
        selected
            .borrow_and_update()
            .as_ref()
            .map(|track| track.name.clone()),
        Some("Voiceover".to_string())
    );
}

#[tokio::test]
async fn timeline_duration_updates_the_page_and_locks_while_playing() {
    let mut engine = Engine::new(demo_page());
    engine
        .set_timeline(TimelineProperty::Duration, 8.0)
        .expect("duration should update");
    assert!((engine.page().duration_ms - 8_000.0).abs() < f64::EPSILON);
    assert!(matches!(
        engine.set_timeline(TimelineProperty::Duration, 0.0),
        Err(EngineError::Clock(ClockError::InvalidDuration(_)))
    ));

    engine
        .set_timeline(TimelineProperty::Seek, 1.5)
        .expect("seek should update");
    let preview = engine.preview().expect("preview should build");
    assert!((preview.time_ms - 1_500.0).abs() < f64::EPSILON);

    engine.play().await.expect("play should start");
    assert!(matches!(
        engine.set_timeline(TimelineProperty::Seek, 0.0),
        Err(EngineError::Clock(ClockError::Playing(TimelineProperty::Seek)))
    ));
    engine.pause().await;
    engine
        .set_timeline(TimelineProperty::Seek, 0.0)
        .expect("seek should update after pause");
}

#[tokio::test]
async fn finishing_the_timeline_stops_every_voice() {
    let mut engine = demo_engine(EngineOptions::default()).expect("demo engine should build");
    engine.play().await.expect("play should start");
    assert!(
        engine
            .mixer()
            .clip(DEMO_MUSIC_ID)
            .is_some_and(|clip| clip.playing)
    );
    assert_eq!(engine.live_context_mut().active_voices(), 1);

    let mid = engine.tick(2_000.0).await;
    assert!(!mid.events.contains(&ClockEvent::Finished));
    let end = engine.tick(3_500.0).await;
    assert!(end.events.contains(&ClockEvent::Finished));
    assert!(!engine.clock().is_playing());
    assert_eq!(engine.live_context_mut().active_voices(), 0);
    assert!(engine.mixer().clips().iter().all(|clip| !clip.playing));
}

#[tokio::test]
async fn drive_plays_to_the_end_and_silences_audio() {
    let mut engine = demo_engine(EngineOptions::default()).expect("demo engine should build");
    engine
        .set_timeline(TimelineProperty::Duration, 0.06)
        .expect("duration should update");

    let mut finished = false;
    let mut ticks = 0;
    let state = engine
        .drive(Duration::from_millis(5), &CancellationToken::new(), |report| {
            ticks += 1;
            finished |= report.events.contains(&ClockEvent::Finished);
        })
        .await
        .expect("preview loop should run");

    assert!(finished);
    assert!(ticks > 1);
    assert!(!state.playing);
    assert!((state.seek_ms - 60.0).abs() < 1e-9);
    assert_eq!(engine.live_context_mut().active_voices(), 0);
}

#[tokio::test]
async fn drive_pauses_when_stopped() {
    let mut engine = demo_engine(EngineOptions::default()).expect("demo engine should build");
    let stop = CancellationToken::new();
    stop.cancel();

    let state = engine
        .drive(Duration::from_millis(5), &stop, |_| {})
        .await
        .expect("preview loop should run");
    assert!(!state.playing);
    assert!(state.seek_ms < 5_000.0);
    assert!(engine.mixer().clips().iter().all(|clip| !clip.playing));
}

#[tokio::test]
async fn replacing_the_page_resets_preview_state() {
    let mut engine = demo_engine(EngineOptions::default()).expect("demo engine should build");
    engine.play().await.expect("play should start");
    assert_eq!(engine.live_media().len(), 1);

    engine.create_page(0, 720, Color::BLACK, 3_000.0);
    assert!(!engine.clock().is_playing());
    assert_eq!(engine.page().width, 1);
    assert_eq!(engine.page().height, 720);
    assert!(engine.page().objects.is_empty());
    assert!(engine.mixer().clips().is_empty());
    assert!(engine.live_media().is_empty());
    assert!((engine.clock().state().duration_ms - 3_000.0).abs() < f64::EPSILON);
}

#[tokio::test]
async fn live_preview_plays_pauses_and_parks_video_media() {
    let clip = SceneObject::new(
        "clip",
        ObjectKind::Video(VideoData {
            source_url: "clip.mp4".to_string(),
            trim_ms: 500.0,
            ..VideoData::default()
        }),
        320.0,
        180.0,
        Timing::new(1_000.0, 2_000.0),
    );
    let clip_id = clip.id;
    let mut page = Page::new(1_080, 1_080, Color::WHITE, 5_000.0);
    page.objects.push(clip);
    let log = MediaLog::default();
    let mut engine = Engine::new(page).with_media(Arc::new(LoggedMediaProvider {
        log: Arc::clone(&log),
    }));

    engine.play().await.expect("play should start");
    assert_eq!(engine.live_media().len(), 1);
    engine.tick(1_200.0).await;
    assert!(
        engine
            .live_media()
            .get(clip_id)
            .is_some_and(|media| media.is_playing() && (media.position_ms() - 700.0).abs() < 1e-9)
    );

    engine.pause().await;
    assert!(
        engine
            .live_media()
            .get(clip_id)
            .is_some_and(|media| !media.is_playing())
    );

    engine.play().await.expect("play should resume");
    engine.tick(2_000.0).await;
    assert_eq!(
        *log.lock().expect("media log lock should not be poisoned"),
        vec![
            MediaCall::Seek(700.0),
            MediaCall::Play(700.0),
            MediaCall::Pause,
            MediaCall::Seek(700.0),
            MediaCall::Pause,
            MediaCall::Seek(700.0),
            MediaCall::Play(700.0),
            MediaCall::Pause,
        ]
    );

    engine.halt_preview();
    assert!(engine.live_media().is_empty());
}

#[test]
fn selection_subscribers_survive_page_replacement() {
    let mut engine = Engine::new(Page::default());
    let first = engine.add_audio(audio_request("a.wav"), None);
    engine
        .select_audio(Some(first.id))
        .expect("selection should succeed");
    let mut selected = engine.subscribe_selected_audio();
    selected.borrow_and_update();

    engine.replace_page(Page::default());
    assert!(selected.has_changed().expect("sender should be alive"));
    assert!(selected.borrow_and_update().is_none());

    let second = engine.add_audio(audio_request("b.wav"), None);
    engine
        .select_audio(Some(second.id))
        .expect("selection should succeed");
    assert_eq!(
        selected.borrow_and_update().as_ref().map(|track| track.id),
        Some(second.id)
    );
}
