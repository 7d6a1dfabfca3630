use adreel_core::{
    ClockError, ClockEvent, FrameState, TimelineClock, TimelineProperty,
    animation::SchedulerOptions,
    model::{Color, ObjectKind, Page, SceneObject, ShapeData, ShapeKind, Timing, VideoData},
    visible_at,
};
use proptest::prelude::*;

fn rect(offset_ms: f64, duration_ms: f64) -> SceneObject {
    SceneObject::new(
        "rect",
        ObjectKind::Shape(ShapeData {
            shape: ShapeKind::Rect,
            corner_radius: 0.0,
        }),
        100.0,
        100.0,
        Timing::new(offset_ms, duration_ms),
    )
}

fn video(offset_ms: f64, duration_ms: f64, trim_ms: f64) -> SceneObject {
    SceneObject::new(
        "clip",
        ObjectKind::Video(VideoData {
            source_url: "clip.mp4".to_string(),
            trim_ms,
            ..VideoData::default()
        }),
        320.0,
        180.0,
        Timing::new(offset_ms, duration_ms),
    )
}

fn page_with(objects: Vec<SceneObject>) -> Page {
    let mut page = Page::new(1080, 1080, Color::WHITE, 5_000.0);
    page.objects = objects;
    page
}

fn clock_for(page: &Page) -> TimelineClock {
    TimelineClock::new(page.duration_ms, SchedulerOptions::for_page(page, 50.0))
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 128,
        .. ProptestConfig::default()
    })]

    #[test]
    fn visible_set_matches_half_open_windows(
        windows in prop::collection::vec((0.0f64..5_000.0, 1.0f64..5_000.0), 1..12),
        time_ms in 0.0f64..10_000.0,
    ) {
        let objects: Vec<SceneObject> = windows
            .iter()
            .map(|(offset, duration)| rect(*offset, *duration))
            .collect();
        let expected: Vec<_> = objects
            .iter()
            .filter(|object| {
                object.timing.offset_ms <= time_ms
                    && time_ms < object.timing.offset_ms + object.timing.duration_ms
            })
            .map(|object| object.id)
            .collect();

        prop_assert_eq!(visible_at(&objects, time_ms), expected.clone());
        prop_assert_eq!(FrameState::baseline(&objects, time_ms).visible_ids(), expected);
    }
}

#[test]
fn window_end_is_exclusive() {
    let object = rect(1_000.0, 2_000.0);
    let objects = vec![object.clone()];
    assert!(visible_at(&objects, 999.0).is_empty());
    assert_eq!(visible_at(&objects, 1_000.0), vec![object.id]);
    assert_eq!(visible_at(&objects, 2_999.0), vec![object.id]);
    assert!(visible_at(&objects, 3_000.0).is_empty());
}

#[test]
fn timeline_properties_are_locked_while_playing() {
    let page = page_with(vec![rect(0.0, 5_000.0)]);
    let mut clock = clock_for(&page);

    assert_eq!(
        clock.set(TimelineProperty::Duration, 0.0),
        Err(ClockError::InvalidDuration(0.0))
    );
    assert!(clock.set(TimelineProperty::Duration, -2.0).is_err());

    clock
        .set(TimelineProperty::Seek, 9.0)
        .expect("seek should be accepted while stopped");
    assert!((clock.state().seek_ms - 5_000.0).abs() < f64::EPSILON);

    clock
        .set(TimelineProperty::Seek, 1.25)
        .expect("seek should be accepted while stopped");
    assert!((clock.state().seek_ms - 1_250.0).abs() < f64::EPSILON);

    clock.play(&page).expect("play should build a schedule");
    assert_eq!(
        clock.set(TimelineProperty::Seek, 0.0),
        Err(ClockError::Playing(TimelineProperty::Seek))
    );
    assert_eq!(
        clock.set(TimelineProperty::Duration, 3.0),
        Err(ClockError::Playing(TimelineProperty::Duration))
    );
}

#[test]
fn ticking_drives_video_play_pause_and_finish() {
    let clip = video(1_000.0, 2_000.0, 500.0);
    let clip_id = clip.id;
    let page = page_with(vec![rect(0.0, 5_000.0), clip]);
    let mut clock = clock_for(&page);

    let started = clock.play(&page).expect("play should succeed");
    assert!(started.state.playing);
    assert!(
        !started
            .events
            .iter()
            .any(|event| matches!(event, ClockEvent::MediaPlay { .. }))
    );

    let entered = clock.tick(&page, 1_000.0);
    assert!(entered.events.contains(&ClockEvent::Shown { id: clip_id }));
    assert!(entered.events.contains(&ClockEvent::MediaPlay {
        id: clip_id,
        local_ms: 500.0,
    }));

    let steady = clock.tick(&page, 500.0);
    assert!(steady.events.is_empty());

    let left = clock.tick(&page, 1_500.0);
    assert!((left.state.seek_ms - 3_000.0).abs() < f64::EPSILON);
    assert!(left.events.contains(&ClockEvent::Hidden { id: clip_id }));
    assert!(left.events.contains(&ClockEvent::MediaPause { id: clip_id }));

    let finished = clock.tick(&page, 10_000.0);
    assert!((finished.state.seek_ms - 5_000.0).abs() < f64::EPSILON);
    assert!(!finished.state.playing);
    assert_eq!(finished.events.last(), Some(&ClockEvent::Finished));
}

#[test]
fn pause_restores_baseline_and_parks_media_at_local_time() {
    let mut clip = video(1_000.0, 2_000.0, 500.0);
    clip.props.opacity = 0.8;
    clip.animation.entry = adreel_core::AnimationDefinition::new(
        adreel_core::AnimationKind::Fade,
        1_000.0,
        "linear",
    );
    let clip_id = clip.id;
    let page = page_with(vec![clip]);
    let mut clock = clock_for(&page);

    clock.play(&page).expect("play should succeed");
    let mid = clock.tick(&page, 1_200.0);
    let mid_opacity = mid
        .frame
        .object(clip_id)
        .expect("clip should be sampled")
        .props
        .opacity;
    assert!(mid_opacity < 0.8);

    let paused = clock.pause(&page);
    assert!(!paused.state.playing);
    assert_eq!(
        paused.events,
        vec![
            ClockEvent::MediaPause { id: clip_id },
            ClockEvent::MediaSeek {
                id: clip_id,
                local_ms: 700.0,
            },
        ]
    );
    let frame = paused.frame.object(clip_id).expect("clip should be present");
    assert!(frame.visible);
    assert!((frame.props.opacity - 0.8).abs() < f64::EPSILON);
    assert!(clock.schedule().is_none());
}

#[test]
fn replay_from_the_end_rewinds_to_zero() {
    let page = page_with(vec![rect(0.0, 5_000.0)]);
    let mut clock = clock_for(&page);
    clock
        .set(TimelineProperty::Seek, 5.0)
        .expect("seek should be accepted");

    let report = clock.play(&page).expect("play should succeed");
    assert!(report.state.seek_ms.abs() < f64::EPSILON);
}
