use adreel_core::{
    EngineOptions, generate_parity_report,
    fixtures::{DEMO_HEADLINE_ID, DEMO_LOGO_ID, demo_engine},
    model::Timing,
    parity::{read_parity_report, write_parity_report},
};
use tempfile::tempdir;

#[tokio::test]
async fn reports_are_stable_across_runs() {
    let first = demo_engine(EngineOptions::default()).expect("demo engine should build");
    let second = demo_engine(EngineOptions::default()).expect("demo engine should build");

    let a = generate_parity_report(&first, 30)
        .await
        .expect("parity generation should work");
    let b = generate_parity_report(&second, 30)
        .await
        .expect("parity generation should work");
    assert_eq!(a, b);
    assert_eq!(a.frame_count, 150);
    assert_eq!(a.object_count, 5);
    assert_eq!(a.audio_count, 1);
}

#[tokio::test]
async fn timing_edits_change_the_schedule_fingerprint_only() {
    let baseline_engine = demo_engine(EngineOptions::default()).expect("demo engine should build");
    let baseline = generate_parity_report(&baseline_engine, 30)
        .await
        .expect("parity generation should work");

    let mut edited = demo_engine(EngineOptions::default()).expect("demo engine should build");
    edited
        .set_timing(DEMO_HEADLINE_ID, Timing::new(200.0, 2_800.0))
        .expect("timing should update");
    let report = generate_parity_report(&edited, 30)
        .await
        .expect("parity generation should work");

    assert_ne!(report.schedule_hash, baseline.schedule_hash);
    assert_ne!(report.page_hash, baseline.page_hash);
    assert_eq!(report.voice_plan_hash, baseline.voice_plan_hash);
    assert_eq!(report.audio_hash, baseline.audio_hash);
}

#[tokio::test]
async fn excluded_objects_do_not_count() {
    let mut engine = demo_engine(EngineOptions::default()).expect("demo engine should build");
    engine
        .set_excluded(DEMO_LOGO_ID, true)
        .expect("exclusion should update");
    let report = generate_parity_report(&engine, 10)
        .await
        .expect("parity generation should work");
    assert_eq!(report.object_count, 4);
    assert_eq!(report.frame_count, 50);
}

#[tokio::test]
async fn reports_round_trip_through_disk() {
    let engine = demo_engine(EngineOptions::default()).expect("demo engine should build");
    let report = generate_parity_report(&engine, 24)
        .await
        .expect("parity generation should work");

    let temp = tempdir().expect("tempdir should be creatable");
    let path = temp.path().join("parity").join("report.json");
    write_parity_report(&path, &report).expect("report should be writable");
    let loaded = read_parity_report(&path).expect("report should be readable");
    assert_eq!(loaded, report);
}
