use thiserror::Error;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::{
    animation::{Schedule, ScheduleError, SchedulerOptions},
    cancel::CancellationToken,
    media::{MediaBank, MediaProvider},
    model::{Page, SceneObject},
    raster::RenderSurface,
    time::{frame_count, frame_time_ms},
};

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("frame capture cancelled after {captured} frames")]
    Cancelled { captured: u64 },
    #[error("recorder has no active session")]
    NotStarted,
    #[error("fps must be positive")]
    InvalidFps,
    #[error(transparent)]
    Schedule(#[from] ScheduleError),
    #[error("failed to seek video {id}: {message}")]
    MediaSeek { id: Uuid, message: String },
    #[error("failed to rasterize frame {index}: {message}")]
    Raster { index: u64, message: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub index: u64,
    pub time_ms: f64,
    pub png: Vec<u8>,
}

#[derive(Debug, Clone, Copy)]
pub struct CaptureProgress<'a> {
    pub captured: u64,
    pub total: u64,
    pub preview: &'a [u8],
}

impl CaptureProgress<'_> {
    #[must_use]
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            return 100.0;
        }
        self.captured as f64 / self.total as f64 * 100.0
    }
}

pub type CaptureCallback<'a> = &'a (dyn Fn(CaptureProgress<'_>) + Send + Sync);

#[derive(Clone, Copy, Default)]
pub struct CaptureOptions<'a> {
    pub cancel: Option<&'a CancellationToken>,
    pub on_progress: Option<CaptureCallback<'a>>,
}

struct Session {
    objects: Vec<SceneObject>,
    schedule: Schedule,
    media: MediaBank,
    duration_ms: f64,
}

/// Renders a scene copy frame by frame, independent of the live preview.
pub struct FrameRecorder<S: RenderSurface> {
    surface: S,
    session: Option<Session>,
}

impl<S: RenderSurface> FrameRecorder<S> {
    #[must_use]
    pub fn new(surface: S) -> Self {
        Self {
            surface,
            session: None,
        }
    }

    #[must_use]
    pub fn surface(&self) -> &S {
        &self.surface
    }

    #[must_use]
    pub fn is_started(&self) -> bool {
        self.session.is_some()
    }

    /// Mounts the artboard and every non-excluded object onto the surface and
    /// builds a schedule bound to `duration_ms`.
    #[instrument(skip(self, page, media), fields(objects = page.objects.len()))]
    pub fn start(
        &mut self,
        page: &Page,
        duration_ms: f64,
        options: SchedulerOptions,
        media: &dyn MediaProvider,
    ) -> Result<(), CaptureError> {
        self.stop();

        let objects: Vec<SceneObject> = page
            .objects
            .iter()
            .filter(|object| !object.excluded)
            .cloned()
            .collect();
        let schedule = Schedule::build(&objects, duration_ms, options)?;
        self.surface
            .mount(page, &objects)
            .map_err(|error| CaptureError::Raster {
                index: 0,
                message: format!("{error:#}"),
            })?;
        let media = MediaBank::open(&objects, media);

        info!(
            mounted = objects.len(),
            videos = media.len(),
            duration_ms,
            "frame recorder started"
        );
        self.session = Some(Session {
            objects,
            schedule,
            media,
            duration_ms,
        });
        Ok(())
    }

    /// Captures `ceil(duration * fps / 1000)` frames at `i / fps * 1000` ms.
    /// Cancellation is checked before every frame and discards all output.
    #[instrument(skip(self, options))]
    pub async fn capture(
        &mut self,
        fps: u32,
        options: CaptureOptions<'_>,
    ) -> Result<Vec<Frame>, CaptureError> {
        if fps == 0 {
            return Err(CaptureError::InvalidFps);
        }
        let session = self.session.as_mut().ok_or(CaptureError::NotStarted)?;
        let total = frame_count(session.duration_ms, fps);
        let mut frames = Vec::with_capacity(usize::try_from(total).unwrap_or_default());

        for index in 0..total {
            if options.cancel.is_some_and(CancellationToken::is_cancelled) {
                warn!(captured = index, total, "frame capture cancelled");
                return Err(CaptureError::Cancelled { captured: index });
            }

            let time_ms = frame_time_ms(index, fps);
            let state = session.schedule.sample_frame(&session.objects, time_ms);
            for object in state.objects.iter().filter(|object| object.visible) {
                if let Some(local_ms) = object.media_time_ms {
                    session
                        .media
                        .seek(object.id, local_ms)
                        .await
                        .map_err(|error| CaptureError::MediaSeek {
                            id: object.id,
                            message: format!("{error:#}"),
                        })?;
                }
            }

            let png = self
                .surface
                .render(&state)
                .map_err(|error| CaptureError::Raster {
                    index,
                    message: format!("{error:#}"),
                })?;
            if let Some(on_progress) = options.on_progress {
                on_progress(CaptureProgress {
                    captured: index + 1,
                    total,
                    preview: &png,
                });
            }
            frames.push(Frame {
                index,
                time_ms,
                png,
            });
        }

        debug!(frames = frames.len(), "frame capture complete");
        Ok(frames)
    }

    /// Tears down the schedule, media elements and surface session.
    pub fn stop(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.media.close();
            self.surface.unmount();
            debug!("frame recorder stopped");
        }
    }
}
