use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::{
    animation::{FrameState, Schedule, ScheduleError, SchedulerOptions},
    model::{Page, SceneObject},
    time::{ms_to_seconds, seconds_to_ms},
};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimelineState {
    pub seek_ms: f64,
    pub duration_ms: f64,
    pub playing: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimelineProperty {
    Duration,
    Seek,
}

#[derive(Debug, Error, PartialEq)]
pub enum ClockError {
    #[error("cannot set timeline {0:?} while playing")]
    Playing(TimelineProperty),
    #[error("timeline duration must be positive, got {0}s")]
    InvalidDuration(f64),
    #[error(transparent)]
    Schedule(#[from] ScheduleError),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ClockEvent {
    Shown { id: Uuid },
    Hidden { id: Uuid },
    MediaPlay { id: Uuid, local_ms: f64 },
    MediaPause { id: Uuid },
    MediaSeek { id: Uuid, local_ms: f64 },
    Finished,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TickReport {
    pub state: TimelineState,
    pub frame: FrameState,
    pub events: Vec<ClockEvent>,
}

/// Single global clock for live preview: owns seek/duration/play state and
/// keeps visibility and video playback in step with it.
#[derive(Debug)]
pub struct TimelineClock {
    state: TimelineState,
    options: SchedulerOptions,
    schedule: Option<Schedule>,
    visible: HashSet<Uuid>,
    media_playing: HashSet<Uuid>,
}

impl TimelineClock {
    #[must_use]
    pub fn new(duration_ms: f64, options: SchedulerOptions) -> Self {
        Self {
            state: TimelineState {
                seek_ms: 0.0,
                duration_ms,
                playing: false,
            },
            options,
            schedule: None,
            visible: HashSet::new(),
            media_playing: HashSet::new(),
        }
    }

    #[must_use]
    pub fn state(&self) -> TimelineState {
        self.state
    }

    #[must_use]
    pub fn is_playing(&self) -> bool {
        self.state.playing
    }

    #[must_use]
    pub fn schedule(&self) -> Option<&Schedule> {
        self.schedule.as_ref()
    }

    pub fn set_options(&mut self, options: SchedulerOptions) {
        self.options = options;
    }

    /// Sets duration or seek, given in seconds. Both are rejected while playing.
    #[instrument(skip(self), fields(playing = self.state.playing))]
    pub fn set(&mut self, property: TimelineProperty, seconds: f64) -> Result<(), ClockError> {
        if self.state.playing {
            return Err(ClockError::Playing(property));
        }

        match property {
            TimelineProperty::Duration => {
                if seconds.is_nan() || seconds <= 0.0 {
                    return Err(ClockError::InvalidDuration(seconds));
                }
                self.state.duration_ms = seconds_to_ms(seconds);
                self.state.seek_ms = self.state.seek_ms.min(self.state.duration_ms);
            }
            TimelineProperty::Seek => {
                self.state.seek_ms = seconds_to_ms(seconds).clamp(0.0, self.state.duration_ms);
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn seek_seconds(&self) -> f64 {
        ms_to_seconds(self.state.seek_ms)
    }

    #[instrument(skip(self, page), fields(seek_ms = self.state.seek_ms, objects = page.objects.len()))]
    pub fn play(&mut self, page: &Page) -> Result<TickReport, ClockError> {
        let schedule = Schedule::build(&page.objects, self.state.duration_ms, self.options)?;
        if self.state.seek_ms >= self.state.duration_ms {
            self.state.seek_ms = 0.0;
        }
        self.schedule = Some(schedule);
        self.state.playing = true;
        info!(seek_ms = self.state.seek_ms, "timeline playing");

        let mut events = Vec::new();
        self.sync_visibility(&page.objects, &mut events);
        Ok(self.report(&page.objects, events))
    }

    /// Advances the clock by `delta_ms`. A stopped clock reports its current
    /// frame without advancing.
    pub fn tick(&mut self, page: &Page, delta_ms: f64) -> TickReport {
        if !self.state.playing {
            return self.report(&page.objects, Vec::new());
        }

        self.state.seek_ms = (self.state.seek_ms + delta_ms.max(0.0)).min(self.state.duration_ms);
        let mut events = Vec::new();
        self.sync_visibility(&page.objects, &mut events);

        if self.state.seek_ms >= self.state.duration_ms {
            let report_frame = self.sample(&page.objects);
            self.stop_playback(&mut events);
            events.push(ClockEvent::Finished);
            info!(duration_ms = self.state.duration_ms, "timeline finished");
            return TickReport {
                state: self.state,
                frame: report_frame,
                events,
            };
        }

        self.report(&page.objects, events)
    }

    /// Stops playback and restores baseline props without replaying tweens.
    #[instrument(skip(self, page), fields(seek_ms = self.state.seek_ms))]
    pub fn pause(&mut self, page: &Page) -> TickReport {
        let mut events = Vec::new();
        self.stop_playback(&mut events);
        let frame = match self.schedule.take() {
            Some(schedule) => schedule.baseline_frame(&page.objects, self.state.seek_ms),
            None => FrameState::baseline(&page.objects, self.state.seek_ms),
        };
        self.sync_visibility(&page.objects, &mut events);
        debug!(events = events.len(), "timeline paused");
        TickReport {
            state: self.state,
            frame,
            events,
        }
    }

    /// Scrub preview at the current seek, sampled from a fresh schedule.
    pub fn preview(&self, page: &Page) -> Result<FrameState, ClockError> {
        let schedule = Schedule::build(&page.objects, self.state.duration_ms, self.options)?;
        Ok(schedule.sample_frame(&page.objects, self.state.seek_ms))
    }

    fn stop_playback(&mut self, events: &mut Vec<ClockEvent>) {
        self.state.playing = false;
        let mut paused: Vec<Uuid> = self.media_playing.drain().collect();
        paused.sort_unstable();
        events.extend(paused.into_iter().map(|id| ClockEvent::MediaPause { id }));
    }

    fn sample(&self, objects: &[SceneObject]) -> FrameState {
        match &self.schedule {
            Some(schedule) => schedule.sample_frame(objects, self.state.seek_ms),
            None => FrameState::baseline(objects, self.state.seek_ms),
        }
    }

    fn report(&self, objects: &[SceneObject], events: Vec<ClockEvent>) -> TickReport {
        TickReport {
            state: self.state,
            frame: self.sample(objects),
            events,
        }
    }

    fn sync_visibility(&mut self, objects: &[SceneObject], events: &mut Vec<ClockEvent>) {
        let seek_ms = self.state.seek_ms;
        let playing = self.state.playing;

        for object in objects {
            let visible = object.is_visible_at(seek_ms);
            let was_visible = if visible {
                !self.visible.insert(object.id)
            } else {
                self.visible.remove(&object.id)
            };

            match (was_visible, visible) {
                (false, true) => events.push(ClockEvent::Shown { id: object.id }),
                (true, false) => events.push(ClockEvent::Hidden { id: object.id }),
                _ => {}
            }

            let Some(local_ms) = object.media_time_ms(seek_ms) else {
                continue;
            };

            if !visible {
                if self.media_playing.remove(&object.id) {
                    events.push(ClockEvent::MediaPause { id: object.id });
                }
                continue;
            }

            if playing {
                if self.media_playing.insert(object.id) {
                    events.push(ClockEvent::MediaPlay {
                        id: object.id,
                        local_ms,
                    });
                }
            } else {
                events.push(ClockEvent::MediaSeek {
                    id: object.id,
                    local_ms,
                });
            }
        }
    }
}

/// Ids of objects visible at `time_ms`, in scene order.
#[must_use]
pub fn visible_at(objects: &[SceneObject], time_ms: f64) -> Vec<Uuid> {
    objects
        .iter()
        .filter(|object| object.is_visible_at(time_ms))
        .map(|object| object.id)
        .collect()
}
