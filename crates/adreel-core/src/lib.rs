pub mod animation;
pub mod audio;
pub mod cancel;
pub mod clock;
pub mod config;
pub mod diagnostics;
pub mod easing;
pub mod engine;
pub mod export;
pub mod fixtures;
pub mod media;
pub mod model;
pub mod parity;
pub mod persistence;
pub mod raster;
pub mod recorder;
pub mod time;
pub mod wav;

pub use animation::{FrameState, ObjectFrame, Schedule, ScheduleError, SchedulerOptions, Tween};
pub use audio::{
    AudioClip, AudioClipPatch, AudioContext, AudioMixer, GainEnvelope, MixerError,
    OfflineContext, RealtimeContext, RenderedAudio,
};
pub use cancel::CancellationToken;
pub use clock::{
    ClockError, ClockEvent, TickReport, TimelineClock, TimelineProperty, TimelineState,
    visible_at,
};
pub use config::AppConfig;
pub use diagnostics::{TelemetryGuard, init_tracing, init_tracing_with_options};
pub use engine::{
    AddAudioRequest, AddObjectRequest, AnimationPatch, Engine, EngineError, EngineOptions,
};
pub use export::{
    ExportArtifact, ExportError, ExportEvent, ExportFailure, ExportJob, ExportOptions,
    ExportOrchestrator, ExportPhase, ExportProgress, ExportSettings, FfmpegEncoder, VideoCodec,
    VideoEncoder,
};
pub use media::{
    AssetFetcher, AudioDecoder, AudioDemuxer, DecodedAudio, FileFetcher, MediaElement,
    MediaProvider, SymphoniaDecoder,
};
pub use model::{
    AnimationDefinition, AnimationKind, AnimationSet, AnimationSlot, AudioTrack, Color,
    Direction, ObjectKind, ObjectProps, Page, PageDocument, SceneObject, Timing,
};
pub use parity::{ParityReport, generate_parity_report};
pub use raster::{RasterSurface, RenderSurface};
pub use recorder::{CaptureError, Frame, FrameRecorder};
