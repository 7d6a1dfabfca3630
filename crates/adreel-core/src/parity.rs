use std::{fs, path::Path};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{info, instrument};

use crate::{
    animation::{FrameState, Schedule},
    audio::{AudioMixer, OfflineContext},
    engine::Engine,
    model::SceneObject,
    time::{frame_count, frame_time_ms, ms_to_seconds},
    wav::encode_wav,
};

const PARITY_SCHEMA_VERSION: u32 = 1;
/// Props are hashed at 1/1000 unit precision so float noise below that
/// cannot flip the fingerprint.
const PROP_QUANTUM: f64 = 1_000.0;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ParityReport {
    pub schema_version: u32,
    pub fps: u32,
    pub object_count: usize,
    pub audio_count: usize,
    pub frame_count: u64,
    pub page_hash: String,
    pub schedule_hash: String,
    pub voice_plan_hash: String,
    pub audio_hash: String,
}

/// Fingerprints exactly what an export at `fps` would sample: the schedule
/// at every frame time plus the offline audio voice plan and its mixdown.
#[instrument(skip(engine), fields(objects = engine.page().objects.len()))]
pub async fn generate_parity_report(engine: &Engine, fps: u32) -> Result<ParityReport> {
    let page = engine.page();
    let document = page.to_document().context("failed to serialize page")?;
    let page_bytes = serde_json::to_vec(&document).context("failed to encode page document")?;

    let objects: Vec<SceneObject> = page
        .objects
        .iter()
        .filter(|object| !object.excluded)
        .cloned()
        .collect();
    let schedule = Schedule::build(&objects, page.duration_ms, engine.scheduler_options())
        .context("failed to build animation schedule")?;
    let frames = frame_count(page.duration_ms, fps.max(1));
    let mut schedule_hasher = Sha256::new();
    for index in 0..frames {
        let state = schedule.sample_frame(&objects, frame_time_ms(index, fps.max(1)));
        hash_frame(&mut schedule_hasher, &state);
    }

    let clips = engine.mixer().clips();
    let mut plan_hasher = Sha256::new();
    let mut audio_bytes = Vec::new();
    if let Some(mut offline) = OfflineContext::for_clips(
        clips,
        ms_to_seconds(page.duration_ms),
        engine.options().sample_rate,
    ) {
        AudioMixer::record(clips, &mut offline);
        plan_hasher.update(offline.length().to_le_bytes());
        for voice in offline.voices() {
            plan_hasher.update(voice.clip_id.as_bytes());
            for value in [voice.start, voice.read_from, voice.duration] {
                plan_hasher.update(quantize(value).to_le_bytes());
            }
            for (time, gain) in voice.envelope.points() {
                plan_hasher.update(quantize(*time).to_le_bytes());
                plan_hasher.update(quantize(f64::from(*gain)).to_le_bytes());
            }
        }
        audio_bytes = encode_wav(&offline.render().await);
    }

    let report = ParityReport {
        schema_version: PARITY_SCHEMA_VERSION,
        fps,
        object_count: objects.len(),
        audio_count: clips.len(),
        frame_count: frames,
        page_hash: hash_hex(&page_bytes),
        schedule_hash: format!("{:x}", schedule_hasher.finalize()),
        voice_plan_hash: format!("{:x}", plan_hasher.finalize()),
        audio_hash: hash_hex(&audio_bytes),
    };
    info!(frames, schedule_hash = %report.schedule_hash, "parity report generated");
    Ok(report)
}

fn hash_frame(hasher: &mut Sha256, state: &FrameState) {
    for object in &state.objects {
        hasher.update(object.id.as_bytes());
        hasher.update([u8::from(object.visible)]);
        let props = &object.props;
        for value in [
            props.left,
            props.top,
            props.scale_x,
            props.scale_y,
            props.angle,
            props.opacity,
        ] {
            hasher.update(quantize(value).to_le_bytes());
        }
        if let Some(media_ms) = object.media_time_ms {
            hasher.update(quantize(media_ms).to_le_bytes());
        }
    }
}

fn quantize(value: f64) -> i64 {
    (value * PROP_QUANTUM).round() as i64
}

pub fn read_parity_report(path: &Path) -> Result<ParityReport> {
    let bytes = fs::read(path)
        .with_context(|| format!("failed to read parity report: {}", path.display()))?;
    let report: ParityReport =
        serde_json::from_slice(&bytes).context("failed to parse parity report json")?;
    Ok(report)
}

pub fn write_parity_report(path: &Path, report: &ParityReport) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create parity directory: {}", parent.display()))?;
    }

    let json = serde_json::to_vec_pretty(report).context("failed to encode parity report json")?;
    fs::write(path, json)
        .with_context(|| format!("failed to write parity report: {}", path.display()))?;
    Ok(())
}

fn hash_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    format!("{digest:x}")
}
