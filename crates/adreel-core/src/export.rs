use std::{path::PathBuf, process::Stdio, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::{
    io::{AsyncBufReadExt, AsyncReadExt, BufReader},
    process::Command,
    sync::broadcast,
};
use tracing::{debug, info, instrument, warn};

use crate::{
    audio::{AudioMixer, OfflineContext},
    cancel::CancellationToken,
    engine::Engine,
    media::{
        AssetFetcher, AudioDecoder, AudioDemuxer, ClockedMediaProvider, FileFetcher,
        MediaProvider, SymphoniaDecoder,
    },
    model::DEFAULT_SAMPLE_RATE,
    raster::RenderSurface,
    recorder::{CaptureError, CaptureOptions, CaptureProgress, Frame, FrameRecorder},
    time::ms_to_seconds,
    wav::encode_wav,
};

pub const SUPPORTED_FPS: [u32; 6] = [10, 15, 24, 25, 30, 60];
pub const DEFAULT_EXPORT_FPS: u32 = 30;

const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(100);
const EVENT_CHANNEL_CAPACITY: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportPhase {
    None,
    CaptureAudio,
    CaptureVideo,
    CompileVideo,
    Completed,
    Error,
}

impl ExportPhase {
    fn rank(self) -> u8 {
        match self {
            Self::None => 0,
            Self::CaptureAudio => 1,
            Self::CaptureVideo => 2,
            Self::CompileVideo => 3,
            Self::Completed => 4,
            Self::Error => 5,
        }
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum ExportFailure {
    Cancelled,
    Failed(String),
}

/// One export attempt: a phase that only moves forward (or to `Error`) and
/// the cancellation token issued for this attempt.
#[derive(Debug, Clone)]
pub struct ExportJob {
    phase: ExportPhase,
    cancel: CancellationToken,
    failure: Option<ExportFailure>,
}

impl Default for ExportJob {
    fn default() -> Self {
        Self::new(CancellationToken::new())
    }
}

impl ExportJob {
    #[must_use]
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            phase: ExportPhase::None,
            cancel,
            failure: None,
        }
    }

    #[must_use]
    pub fn phase(&self) -> ExportPhase {
        self.phase
    }

    #[must_use]
    pub fn failure(&self) -> Option<&ExportFailure> {
        self.failure.as_ref()
    }

    #[must_use]
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Moves to the next phase in sequence. `Error` is reachable from any
    /// non-terminal phase; nothing leaves a terminal phase.
    pub fn advance(&mut self, next: ExportPhase) -> Result<(), ExportError> {
        let allowed = !self.phase.is_terminal()
            && (next == ExportPhase::Error || next.rank() == self.phase.rank() + 1);
        if !allowed {
            return Err(ExportError::InvalidTransition {
                from: self.phase,
                to: next,
            });
        }
        self.phase = next;
        Ok(())
    }

    pub fn fail(&mut self, failure: ExportFailure) {
        if self.phase.is_terminal() {
            return;
        }
        self.phase = ExportPhase::Error;
        self.failure = Some(failure);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportProgress {
    pub phase: ExportPhase,
    pub capture_percent: f64,
    pub compile_percent: f64,
    #[serde(skip)]
    pub preview_frame: Option<Vec<u8>>,
}

pub type ProgressCallback<'a> = &'a (dyn Fn(ExportProgress) + Send + Sync);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportEvent {
    /// Sent before capture so live playback can be torn down.
    RecorderStarting,
    PhaseChanged(ExportPhase),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum VideoCodec {
    #[default]
    H264,
    Vp9,
}

impl VideoCodec {
    #[must_use]
    pub fn extension(self) -> &'static str {
        match self {
            Self::H264 => "mp4",
            Self::Vp9 => "webm",
        }
    }

    fn ffmpeg_args(self) -> Vec<String> {
        let args: &[&str] = match self {
            Self::H264 => &[
                "-c:v",
                "libx264",
                "-preset",
                "medium",
                "-pix_fmt",
                "yuv420p",
                "-c:a",
                "aac",
                "-b:a",
                "192k",
                "-movflags",
                "+faststart",
            ],
            Self::Vp9 => &[
                "-c:v",
                "libvpx-vp9",
                "-crf",
                "32",
                "-b:v",
                "0",
                "-pix_fmt",
                "yuv420p",
                "-c:a",
                "libopus",
                "-b:a",
                "128k",
            ],
        };
        args.iter().map(ToString::to_string).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportSettings {
    pub fps: u32,
    pub codec: VideoCodec,
    pub sample_rate: u32,
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self {
            fps: DEFAULT_EXPORT_FPS,
            codec: VideoCodec::H264,
            sample_rate: DEFAULT_SAMPLE_RATE,
        }
    }
}

impl ExportSettings {
    pub fn validate(&self) -> Result<(), ExportError> {
        if !SUPPORTED_FPS.contains(&self.fps) {
            return Err(ExportError::UnsupportedFps(self.fps));
        }
        if self.sample_rate == 0 {
            return Err(ExportError::InvalidSampleRate);
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("export cancelled")]
    Cancelled,
    #[error("unsupported frame rate {0}, expected one of 10, 15, 24, 25, 30, 60")]
    UnsupportedFps(u32),
    #[error("sample rate must be positive")]
    InvalidSampleRate,
    #[error("export phase cannot move from {from:?} to {to:?}")]
    InvalidTransition { from: ExportPhase, to: ExportPhase },
    #[error("frame capture failed: {0}")]
    Capture(CaptureError),
    #[error("encoder failed: {0}")]
    Encoder(String),
}

impl From<CaptureError> for ExportError {
    fn from(value: CaptureError) -> Self {
        match value {
            CaptureError::Cancelled { .. } => Self::Cancelled,
            other => Self::Capture(other),
        }
    }
}

pub struct EncodeRequest<'a> {
    pub frames: &'a [Frame],
    pub audio_wav: Option<&'a [u8]>,
    pub codec: VideoCodec,
    pub fps: u32,
    pub width: u32,
    pub height: u32,
}

#[async_trait]
pub trait VideoEncoder: Send + Sync {
    fn name(&self) -> &str;

    /// Compiles frames (and optional WAV audio) into encoded video bytes.
    /// `on_progress` receives a fraction in `[0, 1]`.
    async fn encode(
        &self,
        request: EncodeRequest<'_>,
        cancel: &CancellationToken,
        on_progress: &(dyn Fn(f64) + Send + Sync),
    ) -> Result<Vec<u8>>;
}

#[derive(Debug, Clone)]
pub struct FfmpegEncoder {
    binary: PathBuf,
}

impl Default for FfmpegEncoder {
    fn default() -> Self {
        Self::new(None)
    }
}

impl FfmpegEncoder {
    #[must_use]
    pub fn new(binary: Option<PathBuf>) -> Self {
        Self {
            binary: binary.unwrap_or_else(|| PathBuf::from("ffmpeg")),
        }
    }
}

#[async_trait]
impl VideoEncoder for FfmpegEncoder {
    fn name(&self) -> &str {
        "ffmpeg"
    }

    #[instrument(skip_all, fields(frames = request.frames.len(), codec = ?request.codec, fps = request.fps))]
    async fn encode(
        &self,
        request: EncodeRequest<'_>,
        cancel: &CancellationToken,
        on_progress: &(dyn Fn(f64) + Send + Sync),
    ) -> Result<Vec<u8>> {
        let temp_dir = tempfile::tempdir().context("failed to create temporary encode directory")?;
        for frame in request.frames {
            let path = temp_dir.path().join(format!("frame_{:06}.png", frame.index));
            tokio::fs::write(&path, &frame.png)
                .await
                .with_context(|| format!("failed to write frame: {}", path.display()))?;
        }

        let mut args: Vec<String> = [
            "-y",
            "-hide_banner",
            "-loglevel",
            "error",
            "-nostats",
            "-progress",
            "pipe:1",
            "-framerate",
        ]
        .iter()
        .map(ToString::to_string)
        .collect();
        args.push(request.fps.to_string());
        args.push("-i".to_string());
        args.push(temp_dir.path().join("frame_%06d.png").display().to_string());

        if let Some(wav) = request.audio_wav {
            let path = temp_dir.path().join("audio.wav");
            tokio::fs::write(&path, wav)
                .await
                .with_context(|| format!("failed to write audio: {}", path.display()))?;
            args.push("-i".to_string());
            args.push(path.display().to_string());
        }

        args.push("-vf".to_string());
        args.push("scale=trunc(iw/2)*2:trunc(ih/2)*2".to_string());
        args.extend(request.codec.ffmpeg_args());
        let output = temp_dir
            .path()
            .join(format!("export.{}", request.codec.extension()));
        args.push(output.display().to_string());

        debug!(?args, "running ffmpeg");
        let mut child = Command::new(&self.binary)
            .args(&args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to spawn ffmpeg: {}", self.binary.display()))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow::anyhow!("failed to capture ffmpeg stdout"))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| anyhow::anyhow!("failed to capture ffmpeg stderr"))?;
        let stderr_task = tokio::spawn(async move {
            let mut output = String::new();
            match stderr.read_to_string(&mut output).await {
                Ok(_) => output,
                Err(error) => format!("<failed to read ffmpeg stderr: {error}>"),
            }
        });

        let expected_secs = request.frames.len() as f64 / f64::from(request.fps.max(1));
        let mut lines = BufReader::new(stdout).lines();
        let mut state = ProgressState::default();
        loop {
            tokio::select! {
                line = lines.next_line() => {
                    let Some(line) = line.context("failed reading ffmpeg progress")? else {
                        break;
                    };
                    if let Some((key, value)) = line.trim().split_once('=') {
                        state.update(key, value);
                        if key == "progress" {
                            on_progress(state.fraction(expected_secs));
                        }
                    }
                }
                () = tokio::time::sleep(CANCEL_POLL_INTERVAL) => {}
            }

            if cancel.is_cancelled() {
                warn!("cancellation requested, killing ffmpeg");
                child.kill().await.context("failed to kill ffmpeg")?;
                return Err(anyhow::anyhow!("ffmpeg cancelled"));
            }
        }

        let status = child.wait().await.context("failed to wait on ffmpeg")?;
        let stderr_output = stderr_task
            .await
            .unwrap_or_else(|_| "<failed to join stderr reader>".to_string());
        if !status.success() {
            return Err(anyhow::anyhow!(
                "ffmpeg exited with status {status}: {}",
                stderr_output.trim()
            ));
        }

        on_progress(1.0);
        let bytes = tokio::fs::read(&output)
            .await
            .with_context(|| format!("failed to read encoded video: {}", output.display()))?;
        info!(bytes = bytes.len(), "ffmpeg encode completed");
        Ok(bytes)
    }
}

#[derive(Debug, Default)]
struct ProgressState {
    out_time_secs: f64,
    complete: bool,
}

impl ProgressState {
    fn update(&mut self, key: &str, value: &str) {
        match key {
            "out_time_us" | "out_time_ms" => {
                if let Ok(micros) = value.parse::<f64>() {
                    self.out_time_secs = micros / 1_000_000.0;
                }
            }
            "progress" => self.complete = value == "end",
            _ => {}
        }
    }

    fn fraction(&self, expected_secs: f64) -> f64 {
        if self.complete {
            return 1.0;
        }
        if expected_secs <= 0.0 {
            return 0.0;
        }
        (self.out_time_secs / expected_secs).clamp(0.0, 1.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExportArtifact {
    pub bytes: Vec<u8>,
    pub codec: VideoCodec,
    pub fps: u32,
    pub frame_count: u64,
    pub width: u32,
    pub height: u32,
    pub audio_included: bool,
}

pub struct ExportOptions<'a> {
    /// Issue a fresh token per attempt; a cancelled token fails the export.
    pub cancel: CancellationToken,
    pub on_progress: Option<ProgressCallback<'a>>,
}

impl Default for ExportOptions<'_> {
    fn default() -> Self {
        Self {
            cancel: CancellationToken::new(),
            on_progress: None,
        }
    }
}

/// Drives one export at a time through audio mixdown, frame capture and
/// encoding.
pub struct ExportOrchestrator<S: RenderSurface> {
    settings: ExportSettings,
    fetcher: Arc<dyn AssetFetcher>,
    decoder: Arc<dyn AudioDecoder>,
    demuxer: Arc<dyn AudioDemuxer>,
    media: Arc<dyn MediaProvider>,
    encoder: Arc<dyn VideoEncoder>,
    recorder: FrameRecorder<S>,
    events: broadcast::Sender<ExportEvent>,
    job: ExportJob,
}

impl<S: RenderSurface> ExportOrchestrator<S> {
    #[must_use]
    pub fn new(settings: ExportSettings, surface: S, encoder: Arc<dyn VideoEncoder>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            settings,
            fetcher: Arc::new(FileFetcher::new()),
            decoder: Arc::new(SymphoniaDecoder),
            demuxer: Arc::new(SymphoniaDecoder),
            media: Arc::new(ClockedMediaProvider),
            encoder,
            recorder: FrameRecorder::new(surface),
            events,
            job: ExportJob::default(),
        }
    }

    #[must_use]
    pub fn with_fetcher(mut self, fetcher: Arc<dyn AssetFetcher>) -> Self {
        self.fetcher = fetcher;
        self
    }

    #[must_use]
    pub fn with_decoder(mut self, decoder: Arc<dyn AudioDecoder>) -> Self {
        self.decoder = decoder;
        self
    }

    #[must_use]
    pub fn with_demuxer(mut self, demuxer: Arc<dyn AudioDemuxer>) -> Self {
        self.demuxer = demuxer;
        self
    }

    #[must_use]
    pub fn with_media(mut self, media: Arc<dyn MediaProvider>) -> Self {
        self.media = media;
        self
    }

    #[must_use]
    pub fn settings(&self) -> &ExportSettings {
        &self.settings
    }

    #[must_use]
    pub fn job(&self) -> &ExportJob {
        &self.job
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ExportEvent> {
        self.events.subscribe()
    }

    /// Mixes standalone clips and audio extracted from videos into a WAV
    /// artifact. `None` when nothing is audible.
    #[instrument(skip_all, fields(sample_rate = self.settings.sample_rate))]
    pub async fn export_audio(
        &self,
        engine: &mut Engine,
        cancel: &CancellationToken,
    ) -> Result<Option<Vec<u8>>, ExportError> {
        engine
            .load_audio(self.fetcher.as_ref(), self.decoder.as_ref())
            .await;
        if cancel.is_cancelled() {
            return Err(ExportError::Cancelled);
        }

        let page = engine.page();
        let extracted =
            AudioMixer::extract(&page.objects, self.fetcher.as_ref(), self.demuxer.as_ref()).await;
        let mut clips = engine.mixer().clips().to_vec();
        clips.extend(extracted);

        let Some(mut offline) = OfflineContext::for_clips(
            &clips,
            ms_to_seconds(page.duration_ms),
            self.settings.sample_rate,
        ) else {
            info!("no audible audio, skipping mixdown");
            return Ok(None);
        };

        let scheduled = AudioMixer::record(&clips, &mut offline);
        let rendered = offline.render().await;
        if cancel.is_cancelled() {
            return Err(ExportError::Cancelled);
        }

        let wav = encode_wav(&rendered);
        info!(
            scheduled,
            duration_secs = rendered.duration_secs(),
            bytes = wav.len(),
            "audio mixdown completed"
        );
        Ok(Some(wav))
    }

    #[instrument(skip_all, fields(fps = self.settings.fps, codec = ?self.settings.codec, encoder = self.encoder.name()))]
    pub async fn export_video(
        &mut self,
        engine: &mut Engine,
        options: ExportOptions<'_>,
    ) -> Result<ExportArtifact, ExportError> {
        self.job = ExportJob::new(options.cancel.clone());
        let result = self.run_video(engine, &options).await;
        self.recorder.stop();

        match &result {
            Ok(artifact) => {
                info!(
                    bytes = artifact.bytes.len(),
                    frames = artifact.frame_count,
                    "video export completed"
                );
            }
            Err(ExportError::Cancelled) => {
                engine.stop_audio();
                self.job.fail(ExportFailure::Cancelled);
                warn!("video export cancelled");
            }
            Err(error) => {
                self.job.fail(ExportFailure::Failed(error.to_string()));
                warn!(%error, "video export failed");
            }
        }
        if self.job.phase() == ExportPhase::Error {
            self.emit(ExportPhase::Error, &options, 0.0, 0.0);
        }
        result
    }

    async fn run_video(
        &mut self,
        engine: &mut Engine,
        options: &ExportOptions<'_>,
    ) -> Result<ExportArtifact, ExportError> {
        self.settings.validate()?;
        let _ = self.events.send(ExportEvent::RecorderStarting);
        engine.halt_preview();

        self.transition(ExportPhase::CaptureAudio, options, 0.0, 0.0)?;
        let audio = self.export_audio(engine, &options.cancel).await?;

        self.transition(ExportPhase::CaptureVideo, options, 0.0, 0.0)?;
        let page = engine.page();
        self.recorder.start(
            page,
            page.duration_ms,
            engine.scheduler_options(),
            self.media.as_ref(),
        )?;
        let (width, height) = self
            .recorder
            .surface()
            .dimensions()
            .unwrap_or((page.width, page.height));

        let on_progress = options.on_progress;
        let capture_progress = |progress: CaptureProgress<'_>| {
            if let Some(callback) = on_progress {
                callback(ExportProgress {
                    phase: ExportPhase::CaptureVideo,
                    capture_percent: progress.percent(),
                    compile_percent: 0.0,
                    preview_frame: Some(progress.preview.to_vec()),
                });
            }
        };
        let frames = self
            .recorder
            .capture(
                self.settings.fps,
                CaptureOptions {
                    cancel: Some(&options.cancel),
                    on_progress: Some(&capture_progress),
                },
            )
            .await?;
        self.recorder.stop();
        if options.cancel.is_cancelled() {
            return Err(ExportError::Cancelled);
        }

        self.transition(ExportPhase::CompileVideo, options, 100.0, 0.0)?;
        let compile_progress = |fraction: f64| {
            if let Some(callback) = on_progress {
                callback(ExportProgress {
                    phase: ExportPhase::CompileVideo,
                    capture_percent: 100.0,
                    compile_percent: fraction.clamp(0.0, 1.0) * 100.0,
                    preview_frame: None,
                });
            }
        };
        let request = EncodeRequest {
            frames: &frames,
            audio_wav: audio.as_deref(),
            codec: self.settings.codec,
            fps: self.settings.fps,
            width,
            height,
        };
        let bytes = match self
            .encoder
            .encode(request, &options.cancel, &compile_progress)
            .await
        {
            Ok(bytes) => bytes,
            Err(_) if options.cancel.is_cancelled() => return Err(ExportError::Cancelled),
            Err(error) => return Err(ExportError::Encoder(format!("{error:#}"))),
        };
        if options.cancel.is_cancelled() {
            return Err(ExportError::Cancelled);
        }

        self.transition(ExportPhase::Completed, options, 100.0, 100.0)?;
        Ok(ExportArtifact {
            bytes,
            codec: self.settings.codec,
            fps: self.settings.fps,
            frame_count: frames.len() as u64,
            width,
            height,
            audio_included: audio.is_some(),
        })
    }

    fn transition(
        &mut self,
        next: ExportPhase,
        options: &ExportOptions<'_>,
        capture_percent: f64,
        compile_percent: f64,
    ) -> Result<(), ExportError> {
        self.job.advance(next)?;
        debug!(phase = ?next, "export phase changed");
        self.emit(next, options, capture_percent, compile_percent);
        Ok(())
    }

    fn emit(
        &self,
        phase: ExportPhase,
        options: &ExportOptions<'_>,
        capture_percent: f64,
        compile_percent: f64,
    ) {
        let _ = self.events.send(ExportEvent::PhaseChanged(phase));
        if let Some(callback) = options.on_progress {
            callback(ExportProgress {
                phase,
                capture_percent,
                compile_percent,
                preview_frame: None,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_refuses_to_skip_or_regress_phases() {
        let mut job = ExportJob::default();
        assert!(job.advance(ExportPhase::CaptureVideo).is_err());
        job.advance(ExportPhase::CaptureAudio)
            .expect("first phase should be reachable");
        job.advance(ExportPhase::CaptureVideo)
            .expect("capture should follow audio");
        assert!(job.advance(ExportPhase::CaptureAudio).is_err());
        job.advance(ExportPhase::Error)
            .expect("error should be reachable from any running phase");
        assert!(job.advance(ExportPhase::Completed).is_err());
    }

    #[test]
    fn progress_parser_reads_microsecond_keys() {
        let mut state = ProgressState::default();
        state.update("out_time_us", "2500000");
        assert!((state.fraction(5.0) - 0.5).abs() < 1e-9);
        state.update("progress", "end");
        assert!((state.fraction(5.0) - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn unsupported_fps_is_rejected() {
        let settings = ExportSettings {
            fps: 29,
            ..ExportSettings::default()
        };
        assert!(matches!(
            settings.validate(),
            Err(ExportError::UnsupportedFps(29))
        ));
    }
}
