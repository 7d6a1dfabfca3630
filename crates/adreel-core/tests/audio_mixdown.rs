use std::{io::Cursor, path::Path, sync::Arc};

use adreel_core::{
    AudioClipPatch, AudioContext, AudioMixer, DecodedAudio, FileFetcher, GainEnvelope,
    OfflineContext, RealtimeContext, SymphoniaDecoder,
    model::{AudioTrack, ObjectKind, SceneObject, Timing, VideoData},
    wav::encode_wav,
};
use tempfile::tempdir;

const SAMPLE_RATE: u32 = 48_000;

fn write_tone(path: &Path, seconds: f32) {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let frames = (seconds * SAMPLE_RATE as f32).round() as usize;
    let mut writer = hound::WavWriter::create(path, spec).expect("test wav should be creatable");
    for frame in 0..frames {
        let phase = frame as f32 / SAMPLE_RATE as f32 * 330.0 * std::f32::consts::TAU;
        let sample = (phase.sin() * 0.5 * f32::from(i16::MAX)).round() as i16;
        writer
            .write_sample(sample)
            .expect("test wav sample write should succeed");
    }
    writer.finalize().expect("test wav finalize should succeed");
}

fn constant_buffer(seconds: f64, level: f32) -> Arc<DecodedAudio> {
    let frames = (seconds * f64::from(SAMPLE_RATE)) as usize;
    Arc::new(DecodedAudio::new(SAMPLE_RATE, vec![vec![level; frames]]))
}

fn track(url: &str, offset: f64, timeline: f64) -> AudioTrack {
    let mut track = AudioTrack::new(url, url, 10.0);
    track.offset = offset;
    track.timeline = timeline;
    track
}

#[tokio::test]
async fn load_decodes_files_and_skips_failures() {
    let temp = tempdir().expect("tempdir should be creatable");
    write_tone(&temp.path().join("tone.wav"), 2.0);
    let good = track("tone.wav", 0.0, 5.0);
    let missing = track("missing.wav", 0.0, 1.0);
    let mut mixer = AudioMixer::from_tracks(&[good.clone(), missing.clone()]);

    let report = mixer
        .load(&FileFetcher::with_root(temp.path()), &SymphoniaDecoder)
        .await;
    assert_eq!(report.loaded, 1);
    assert_eq!(report.failed, vec![missing.id]);

    let loaded = mixer.clip(good.id).expect("clip should exist");
    assert!(loaded.is_audible());
    assert!((loaded.duration - 2.0).abs() < 0.01);
    // timeline is clamped into the decoded buffer
    assert!(loaded.trim + loaded.timeline <= loaded.duration + 1e-9);
    assert!(!mixer.clip(missing.id).expect("clip should exist").is_audible());
}

#[tokio::test]
async fn mixdown_length_is_min_of_longest_clip_and_timeline() {
    let mut mixer = AudioMixer::new();
    mixer.add(&track("a.wav", 1.0, 1.5), Some(constant_buffer(4.0, 0.5)));
    mixer.add(&track("b.wav", 0.0, 1.0), Some(constant_buffer(4.0, 0.5)));

    let within = OfflineContext::for_clips(mixer.clips(), 5.0, SAMPLE_RATE)
        .expect("audible clips should size a context");
    assert_eq!(within.length(), 120_000);
    assert_eq!(within.channels(), 2);

    let mut truncated = OfflineContext::for_clips(mixer.clips(), 2.0, SAMPLE_RATE)
        .expect("audible clips should size a context");
    assert_eq!(truncated.length(), 96_000);
    assert_eq!(AudioMixer::record(mixer.clips(), &mut truncated), 2);

    let rendered = truncated.render().await;
    let reader = hound::WavReader::new(Cursor::new(encode_wav(&rendered)))
        .expect("rendered wav should parse");
    assert_eq!(reader.spec().channels, 2);
    assert_eq!(reader.spec().sample_rate, SAMPLE_RATE);
    assert_eq!(reader.duration(), 96_000);
}

#[tokio::test]
async fn offline_voices_start_at_their_offset() {
    let mut mixer = AudioMixer::new();
    mixer.add(&track("late.wav", 1.0, 2.0), Some(constant_buffer(4.0, 0.5)));
    let mut offline =
        OfflineContext::for_clips(mixer.clips(), 5.0, SAMPLE_RATE).expect("context");
    AudioMixer::record(mixer.clips(), &mut offline);
    let rendered = offline.render().await;

    let left = &rendered.channels[0];
    assert!(left[..48_000].iter().all(|sample| *sample == 0.0));
    // 1.5s into the clip the 1s fade-in is done: 0.5 * volume 1.0
    assert!((left[48_000 + 72_000] - 0.5).abs() < 1e-3);
    assert!((rendered.channels[1][48_000 + 72_000] - 0.5).abs() < 1e-3);
}

#[test]
fn gain_envelope_ramps_in_and_out() {
    let short = GainEnvelope::for_clip(1.0, 1.5, 0.8);
    assert!(short.gain_at(1.0).abs() < f32::EPSILON);
    assert!((short.gain_at(1.75) - 0.8).abs() < 1e-6);
    assert!((short.gain_at(2.4) - 0.8).abs() < 1e-6);
    assert!(short.gain_at(2.5).abs() < f32::EPSILON);

    let long = GainEnvelope::for_clip(0.0, 10.0, 1.0);
    assert!((long.gain_at(1.0) - 0.5).abs() < 1e-6);
    assert!((long.gain_at(2.0) - 1.0).abs() < 1e-6);
    assert!((long.gain_at(9.975) - 0.5).abs() < 1e-3);
}

#[test]
fn silent_mixes_produce_no_context() {
    let mut mixer = AudioMixer::new();
    let muted = mixer.add(&track("muted.wav", 0.0, 2.0), Some(constant_buffer(4.0, 0.5)));
    mixer
        .update(
            muted.id,
            &AudioClipPatch {
                muted: Some(true),
                ..AudioClipPatch::default()
            },
        )
        .expect("update should succeed");
    let quiet = mixer.add(&track("quiet.wav", 0.0, 2.0), Some(constant_buffer(4.0, 0.5)));
    mixer
        .update(
            quiet.id,
            &AudioClipPatch {
                volume: Some(0.0),
                ..AudioClipPatch::default()
            },
        )
        .expect("update should succeed");
    mixer.add(&track("unloaded.wav", 0.0, 2.0), None);

    assert!(OfflineContext::for_clips(mixer.clips(), 5.0, SAMPLE_RATE).is_none());
}

#[test]
fn updates_refresh_the_selected_clip_watch() {
    let mut mixer = AudioMixer::new();
    let selected = mixer.add(&track("a.wav", 0.0, 1.0), None);
    let other = mixer.add(&track("b.wav", 0.0, 1.0), None);
    mixer
        .select(Some(selected.id))
        .expect("select should succeed");
    let mut receiver = mixer.subscribe_selected();

    mixer
        .update(
            other.id,
            &AudioClipPatch {
                volume: Some(0.2),
                ..AudioClipPatch::default()
            },
        )
        .expect("update should succeed");
    assert!(!receiver.has_changed().expect("sender should be alive"));

    mixer
        .update(
            selected.id,
            &AudioClipPatch {
                volume: Some(0.5),
                offset: Some(1.5),
                ..AudioClipPatch::default()
            },
        )
        .expect("update should succeed");
    assert!(receiver.has_changed().expect("sender should be alive"));
    let snapshot = receiver
        .borrow_and_update()
        .clone()
        .expect("a clip should be selected");
    assert_eq!(snapshot.id, selected.id);
    assert!((snapshot.volume - 0.5).abs() < f32::EPSILON);
    assert!((snapshot.offset - 1.5).abs() < f64::EPSILON);
}

#[test]
fn live_play_reads_from_seek_and_delete_stops_the_voice() {
    let mut mixer = AudioMixer::new();
    let mut trimmed = track("a.wav", 0.5, 2.0);
    trimmed.trim = 1.0;
    let clip = mixer.add(&trimmed, Some(constant_buffer(4.0, 0.25)));
    let mut ctx = RealtimeContext::new(SAMPLE_RATE);

    assert_eq!(mixer.play(&mut ctx, 0.0), 1);
    let voice_id = mixer
        .clip(clip.id)
        .and_then(|clip| clip.active_voice)
        .expect("voice should be active");
    let voice = ctx.voice(voice_id).expect("voice should be scheduled");
    assert!((voice.read_from - 1.0).abs() < f64::EPSILON);
    assert!((voice.start - 0.5).abs() < f64::EPSILON);

    assert_eq!(mixer.play(&mut ctx, 1.75), 1);
    assert_eq!(ctx.active_voices(), 1);
    let voice_id = mixer
        .clip(clip.id)
        .and_then(|clip| clip.active_voice)
        .expect("voice should be active");
    let voice = ctx.voice(voice_id).expect("voice should be scheduled");
    assert!((voice.read_from - 1.75).abs() < f64::EPSILON);

    mixer.delete(clip.id, &mut ctx).expect("delete should succeed");
    assert_eq!(ctx.active_voices(), 0);
    assert!(mixer.clips().is_empty());
}

#[test]
fn stop_all_silences_every_voice() {
    let mut mixer = AudioMixer::new();
    mixer.add(&track("a.wav", 0.0, 2.0), Some(constant_buffer(4.0, 0.25)));
    mixer.add(&track("b.wav", 1.0, 2.0), Some(constant_buffer(4.0, 0.25)));
    let mut ctx = RealtimeContext::new(SAMPLE_RATE);

    assert_eq!(mixer.play(&mut ctx, 0.0), 2);
    let block = ctx.pull(2, 4_800);
    assert_eq!(block.len(), 2);
    assert!((ctx.current_time() - 0.1).abs() < 1e-9);

    mixer.stop_all(&mut ctx);
    assert_eq!(ctx.active_voices(), 0);
    assert!(mixer.clips().iter().all(|clip| !clip.playing));
}

#[tokio::test]
async fn video_audio_is_extracted_at_the_video_position() {
    let temp = tempdir().expect("tempdir should be creatable");
    write_tone(&temp.path().join("clip.wav"), 3.0);
    let video = SceneObject::new(
        "clip",
        ObjectKind::Video(VideoData {
            source_url: "clip.wav".to_string(),
            trim_ms: 500.0,
            volume: 0.6,
            ..VideoData::default()
        }),
        320.0,
        180.0,
        Timing::new(1_000.0, 2_000.0),
    );
    let mut silent = video.clone();
    silent.id = uuid::Uuid::new_v4();
    silent.kind = ObjectKind::Video(VideoData {
        source_url: "clip.wav".to_string(),
        has_audio: false,
        ..VideoData::default()
    });

    let clips = AudioMixer::extract(
        &[video.clone(), silent],
        &FileFetcher::with_root(temp.path()),
        &SymphoniaDecoder,
    )
    .await;

    assert_eq!(clips.len(), 1);
    let clip = &clips[0];
    assert_eq!(clip.id, video.id);
    assert!((clip.offset - 1.0).abs() < f64::EPSILON);
    assert!((clip.trim - 0.5).abs() < f64::EPSILON);
    assert!((clip.timeline - 2.0).abs() < f64::EPSILON);
    assert!((clip.volume - 0.6).abs() < f32::EPSILON);
    assert!(clip.is_audible());
}
