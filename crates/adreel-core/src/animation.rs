use std::{collections::HashMap, f64::consts::TAU};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, instrument, trace};
use uuid::Uuid;

use crate::{
    easing,
    model::{
        AnimationDefinition, AnimationKind, AnimationSet, Direction, ObjectProps, Page,
        SceneObject, Timing,
    },
};

pub const DEFAULT_LEAD_MS: f64 = 50.0;

const PAN_DISTANCE_FACTOR: f64 = 0.25;
const RISE_DISTANCE_FACTOR: f64 = 0.5;
const ENTRY_ZOOM_SCALE: f64 = 0.5;
const ENTRY_ROTATE_DEGREES: f64 = 90.0;
const SCENE_ZOOM_SCALE: f64 = 1.15;
const SCENE_DRIFT_FACTOR: f64 = 0.1;
const BREATHE_AMPLITUDE: f64 = 0.05;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SchedulerOptions {
    /// Delay between an object's visibility window opening and its entry
    /// tween starting; mirrored before the window closes for exit tweens.
    pub lead_ms: f64,
    pub artboard_width: f64,
    pub artboard_height: f64,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            lead_ms: DEFAULT_LEAD_MS,
            artboard_width: f64::from(crate::model::DEFAULT_ARTBOARD_WIDTH),
            artboard_height: f64::from(crate::model::DEFAULT_ARTBOARD_HEIGHT),
        }
    }
}

impl SchedulerOptions {
    #[must_use]
    pub fn for_page(page: &Page, lead_ms: f64) -> Self {
        Self {
            lead_ms,
            artboard_width: f64::from(page.width),
            artboard_height: f64::from(page.height),
        }
    }
}

#[derive(Debug, Error, Clone, Copy, PartialEq)]
pub enum ScheduleError {
    #[error("timeline duration must be positive, got {0}ms")]
    NonPositiveDuration(f64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TweenPhase {
    Entry,
    Scene,
    Exit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Property {
    Left,
    Top,
    ScaleX,
    ScaleY,
    Angle,
    Opacity,
}

impl Property {
    #[must_use]
    pub fn read(self, props: &ObjectProps) -> f64 {
        match self {
            Self::Left => props.left,
            Self::Top => props.top,
            Self::ScaleX => props.scale_x,
            Self::ScaleY => props.scale_y,
            Self::Angle => props.angle,
            Self::Opacity => props.opacity,
        }
    }

    pub fn write(self, props: &mut ObjectProps, value: f64) {
        match self {
            Self::Left => props.left = value,
            Self::Top => props.top = value,
            Self::ScaleX => props.scale_x = value,
            Self::ScaleY => props.scale_y = value,
            Self::Angle => props.angle = value,
            Self::Opacity => props.opacity = value,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PropertySpan {
    pub property: Property,
    pub from: f64,
    pub to: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Motion {
    Span { spans: Vec<PropertySpan> },
    /// Oscillates the listed properties around their baseline.
    Pulse {
        properties: Vec<Property>,
        amplitude: f64,
        period_ms: f64,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Tween {
    pub object_id: Uuid,
    pub phase: TweenPhase,
    pub kind: AnimationKind,
    pub start_ms: f64,
    pub end_ms: f64,
    pub easing: String,
    pub motion: Motion,
}

impl Tween {
    #[must_use]
    pub fn duration_ms(&self) -> f64 {
        self.end_ms - self.start_ms
    }

    #[must_use]
    pub fn progress(&self, time_ms: f64) -> f64 {
        let span = self.duration_ms();
        if span <= 0.0 {
            return if time_ms >= self.end_ms { 1.0 } else { 0.0 };
        }
        ((time_ms - self.start_ms) / span).clamp(0.0, 1.0)
    }

    /// Entry tweens show their `from` state before they start; other phases
    /// leave the props untouched until their start and hold the end state
    /// afterwards.
    fn apply(&self, baseline: &ObjectProps, props: &mut ObjectProps, time_ms: f64) {
        if time_ms < self.start_ms && self.phase != TweenPhase::Entry {
            return;
        }

        match &self.motion {
            Motion::Span { spans } => {
                let eased = easing::apply(&self.easing, self.progress(time_ms));
                for span in spans {
                    span.property
                        .write(props, span.from + (span.to - span.from) * eased);
                }
            }
            Motion::Pulse {
                properties,
                amplitude,
                period_ms,
            } => {
                let elapsed = (time_ms.min(self.end_ms) - self.start_ms).max(0.0);
                let wave = (TAU * elapsed / period_ms).sin();
                for property in properties {
                    property.write(props, property.read(baseline) * (1.0 + amplitude * wave));
                }
            }
        }
    }
}

/// Per-object render state at one timeline instant.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ObjectFrame {
    pub id: Uuid,
    pub visible: bool,
    pub props: ObjectProps,
    pub media_time_ms: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrameState {
    pub time_ms: f64,
    pub objects: Vec<ObjectFrame>,
}

impl FrameState {
    /// Visibility at `time_ms` with every object at its own stored props.
    #[must_use]
    pub fn baseline(objects: &[SceneObject], time_ms: f64) -> Self {
        Self {
            time_ms,
            objects: objects
                .iter()
                .map(|object| object_frame(object, object.props.clone(), time_ms))
                .collect(),
        }
    }

    #[must_use]
    pub fn object(&self, id: Uuid) -> Option<&ObjectFrame> {
        self.objects.iter().find(|frame| frame.id == id)
    }

    #[must_use]
    pub fn visible_ids(&self) -> Vec<Uuid> {
        self.objects
            .iter()
            .filter(|frame| frame.visible)
            .map(|frame| frame.id)
            .collect()
    }
}

fn object_frame(object: &SceneObject, props: ObjectProps, time_ms: f64) -> ObjectFrame {
    let visible = object.is_visible_at(time_ms);
    ObjectFrame {
        id: object.id,
        visible,
        props,
        media_time_ms: object.media_time_ms(time_ms).filter(|_| visible),
    }
}

/// Flat, time-addressed tween list for one scene. Sampling is a pure
/// function of time, so the live clock and the frame recorder share it.
#[derive(Debug, Clone)]
pub struct Schedule {
    duration_ms: f64,
    lead_ms: f64,
    baseline: HashMap<Uuid, ObjectProps>,
    tweens: Vec<Tween>,
    by_object: HashMap<Uuid, Vec<usize>>,
}

impl Schedule {
    #[instrument(skip(objects, options), fields(objects = objects.len(), lead_ms = options.lead_ms))]
    pub fn build(
        objects: &[SceneObject],
        duration_ms: f64,
        options: SchedulerOptions,
    ) -> Result<Self, ScheduleError> {
        if duration_ms.is_nan() || duration_ms <= 0.0 {
            return Err(ScheduleError::NonPositiveDuration(duration_ms));
        }

        let mut baseline = HashMap::with_capacity(objects.len());
        let mut tweens = Vec::new();

        for object in objects {
            baseline.insert(object.id, object.props.clone());

            let parent = object
                .mask_of
                .and_then(|parent_id| objects.iter().find(|candidate| candidate.id == parent_id));
            let (timing, animation) = match parent {
                Some(parent) => (parent.timing, &parent.animation),
                None => (object.timing, &object.animation),
            };
            compile_object(
                object,
                timing,
                animation,
                parent.is_some(),
                &options,
                &mut tweens,
            );
        }

        let mut by_object: HashMap<Uuid, Vec<usize>> = HashMap::new();
        for (index, tween) in tweens.iter().enumerate() {
            by_object.entry(tween.object_id).or_default().push(index);
        }

        debug!(tweens = tweens.len(), duration_ms, "animation schedule built");

        Ok(Self {
            duration_ms,
            lead_ms: options.lead_ms,
            baseline,
            tweens,
            by_object,
        })
    }

    #[must_use]
    pub fn duration_ms(&self) -> f64 {
        self.duration_ms
    }

    #[must_use]
    pub fn lead_ms(&self) -> f64 {
        self.lead_ms
    }

    #[must_use]
    pub fn tweens(&self) -> &[Tween] {
        &self.tweens
    }

    pub fn tweens_for(&self, object_id: Uuid) -> impl Iterator<Item = &Tween> {
        self.by_object
            .get(&object_id)
            .into_iter()
            .flatten()
            .map(|index| &self.tweens[*index])
    }

    #[must_use]
    pub fn baseline(&self, object_id: Uuid) -> Option<&ObjectProps> {
        self.baseline.get(&object_id)
    }

    /// Props of one object at `time_ms`, clamped into the timeline.
    #[must_use]
    pub fn sample(&self, object_id: Uuid, time_ms: f64) -> Option<ObjectProps> {
        let baseline = self.baseline.get(&object_id)?;
        let time_ms = time_ms.clamp(0.0, self.duration_ms);
        let mut props = baseline.clone();
        for tween in self.tweens_for(object_id) {
            tween.apply(baseline, &mut props, time_ms);
        }
        Some(props)
    }

    #[must_use]
    pub fn sample_frame(&self, objects: &[SceneObject], time_ms: f64) -> FrameState {
        FrameState {
            time_ms,
            objects: objects
                .iter()
                .map(|object| {
                    let props = self
                        .sample(object.id, time_ms)
                        .unwrap_or_else(|| object.props.clone());
                    object_frame(object, props, time_ms)
                })
                .collect(),
        }
    }

    /// Visibility at `time_ms` with props restored to the snapshot taken at build.
    #[must_use]
    pub fn baseline_frame(&self, objects: &[SceneObject], time_ms: f64) -> FrameState {
        FrameState {
            time_ms,
            objects: objects
                .iter()
                .map(|object| {
                    let props = self
                        .baseline(object.id)
                        .cloned()
                        .unwrap_or_else(|| object.props.clone());
                    object_frame(object, props, time_ms)
                })
                .collect(),
        }
    }
}

fn compile_object(
    object: &SceneObject,
    timing: Timing,
    animation: &AnimationSet,
    is_mask: bool,
    options: &SchedulerOptions,
    tweens: &mut Vec<Tween>,
) {
    let lead = options.lead_ms;
    let entry = &animation.entry;
    let exit = &animation.exit;
    let scene = &animation.scene;

    if entry.is_applied() {
        if let Some(spans) = offstage_spans(entry.kind, object, options, false) {
            let start_ms = timing.offset_ms + lead;
            tweens.push(Tween {
                object_id: object.id,
                phase: TweenPhase::Entry,
                kind: entry.kind,
                start_ms,
                end_ms: start_ms + entry.duration_ms,
                easing: entry.easing.clone(),
                motion: Motion::Span { spans },
            });
        }
    }

    if scene.is_applied() {
        if is_mask && scene.kind.is_scale_varying() {
            trace!(object_id = %object.id, "scale-varying scene animation suppressed on clip mask");
        } else {
            push_scene_tween(object, timing, entry, exit, scene, options, tweens);
        }
    }

    if exit.is_applied() {
        if let Some(spans) = offstage_spans(exit.kind, object, options, true) {
            let end_ms = timing.end_ms() - lead;
            tweens.push(Tween {
                object_id: object.id,
                phase: TweenPhase::Exit,
                kind: exit.kind,
                start_ms: end_ms - exit.duration_ms,
                end_ms,
                easing: exit.easing.clone(),
                motion: Motion::Span {
                    spans: spans
                        .into_iter()
                        .map(|span| PropertySpan {
                            property: span.property,
                            from: span.to,
                            to: span.from,
                        })
                        .collect(),
                },
            });
        }
    }
}

fn push_scene_tween(
    object: &SceneObject,
    timing: Timing,
    entry: &AnimationDefinition,
    exit: &AnimationDefinition,
    scene: &AnimationDefinition,
    options: &SchedulerOptions,
    tweens: &mut Vec<Tween>,
) {
    let lead = options.lead_ms;
    let entry_span = if entry.is_applied() {
        entry.duration_ms + lead
    } else {
        0.0
    };
    let exit_span = if exit.is_applied() {
        exit.duration_ms + lead
    } else {
        0.0
    };
    let middle = timing.duration_ms - entry_span - exit_span;
    if middle <= 0.0 {
        trace!(object_id = %object.id, middle, "scene window empty, scene animation omitted");
        return;
    }

    let Some(motion) = scene_motion(scene, object, middle) else {
        return;
    };

    let start_ms = timing.offset_ms + entry_span;
    tweens.push(Tween {
        object_id: object.id,
        phase: TweenPhase::Scene,
        kind: scene.kind,
        start_ms,
        end_ms: start_ms + middle,
        easing: scene.easing.clone(),
        motion,
    });
}

fn span(property: Property, from: f64, to: f64) -> PropertySpan {
    PropertySpan { property, from, to }
}

/// Spans from the hidden state into the baseline. For exits the caller
/// reverses them; `leaving` flips travel so objects keep moving the named way.
fn offstage_spans(
    kind: AnimationKind,
    object: &SceneObject,
    options: &SchedulerOptions,
    leaving: bool,
) -> Option<Vec<PropertySpan>> {
    let base = &object.props;
    let width = object.width * base.scale_x;
    let height = object.height * base.scale_y;
    let fade = span(Property::Opacity, 0.0, base.opacity);
    let travel = |direction: Direction| {
        if leaving {
            opposite(direction)
        } else {
            direction
        }
    };

    let spans = match kind {
        AnimationKind::None | AnimationKind::Breathe => return None,
        AnimationKind::Fade => vec![fade],
        AnimationKind::Slide { direction } => vec![match travel(direction) {
            Direction::Left => span(Property::Left, options.artboard_width, base.left),
            Direction::Right => span(Property::Left, -width, base.left),
            Direction::Up => span(Property::Top, options.artboard_height, base.top),
            Direction::Down => span(Property::Top, -height, base.top),
        }],
        AnimationKind::Pan { direction } => {
            let dx = width * PAN_DISTANCE_FACTOR;
            let dy = height * PAN_DISTANCE_FACTOR;
            let shift = match travel(direction) {
                Direction::Left => span(Property::Left, base.left + dx, base.left),
                Direction::Right => span(Property::Left, base.left - dx, base.left),
                Direction::Up => span(Property::Top, base.top + dy, base.top),
                Direction::Down => span(Property::Top, base.top - dy, base.top),
            };
            vec![shift, fade]
        }
        AnimationKind::Rise => {
            let distance = height * RISE_DISTANCE_FACTOR;
            let from = if leaving {
                base.top - distance
            } else {
                base.top + distance
            };
            vec![span(Property::Top, from, base.top), fade]
        }
        AnimationKind::Pop => vec![
            span(Property::ScaleX, 0.0, base.scale_x),
            span(Property::ScaleY, 0.0, base.scale_y),
        ],
        AnimationKind::Rotate => {
            let from = if leaving {
                base.angle + ENTRY_ROTATE_DEGREES
            } else {
                base.angle - ENTRY_ROTATE_DEGREES
            };
            vec![span(Property::Angle, from, base.angle), fade]
        }
        AnimationKind::Zoom => vec![
            span(Property::ScaleX, base.scale_x * ENTRY_ZOOM_SCALE, base.scale_x),
            span(Property::ScaleY, base.scale_y * ENTRY_ZOOM_SCALE, base.scale_y),
            fade,
        ],
    };
    Some(spans)
}

fn scene_motion(
    scene: &AnimationDefinition,
    object: &SceneObject,
    middle_ms: f64,
) -> Option<Motion> {
    let base = &object.props;
    let period_ms = scene.duration_ms;

    let motion = match scene.kind {
        AnimationKind::Rotate => {
            let turns = (middle_ms / period_ms).round();
            Motion::Span {
                spans: vec![span(Property::Angle, base.angle, base.angle + 360.0 * turns)],
            }
        }
        AnimationKind::Zoom => Motion::Span {
            spans: vec![
                span(Property::ScaleX, base.scale_x, base.scale_x * SCENE_ZOOM_SCALE),
                span(Property::ScaleY, base.scale_y, base.scale_y * SCENE_ZOOM_SCALE),
            ],
        },
        AnimationKind::Breathe => Motion::Pulse {
            properties: vec![Property::ScaleX, Property::ScaleY],
            amplitude: BREATHE_AMPLITUDE,
            period_ms,
        },
        AnimationKind::Pan { direction } => {
            let dx = object.width * base.scale_x * SCENE_DRIFT_FACTOR;
            let dy = object.height * base.scale_y * SCENE_DRIFT_FACTOR;
            let drift = match direction {
                Direction::Left => span(Property::Left, base.left, base.left - dx),
                Direction::Right => span(Property::Left, base.left, base.left + dx),
                Direction::Up => span(Property::Top, base.top, base.top - dy),
                Direction::Down => span(Property::Top, base.top, base.top + dy),
            };
            Motion::Span { spans: vec![drift] }
        }
        AnimationKind::None
        | AnimationKind::Fade
        | AnimationKind::Slide { .. }
        | AnimationKind::Rise
        | AnimationKind::Pop => {
            trace!(
                object_id = %object.id,
                kind = ?scene.kind,
                "animation kind has no scene form"
            );
            return None;
        }
    };
    Some(motion)
}

fn opposite(direction: Direction) -> Direction {
    match direction {
        Direction::Left => Direction::Right,
        Direction::Right => Direction::Left,
        Direction::Up => Direction::Down,
        Direction::Down => Direction::Up,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ObjectKind, ShapeData, ShapeKind};

    fn rect(timing: Timing) -> SceneObject {
        SceneObject::new(
            "rect",
            ObjectKind::Shape(ShapeData {
                shape: ShapeKind::Rect,
                corner_radius: 0.0,
            }),
            100.0,
            50.0,
            timing,
        )
    }

    #[test]
    fn only_scene_zooms_count_as_scale_varying() {
        assert!(AnimationKind::Zoom.is_scale_varying());
        assert!(AnimationKind::Breathe.is_scale_varying());
        assert!(!AnimationKind::Pop.is_scale_varying());
        assert!(!AnimationKind::Rotate.is_scale_varying());
    }

    #[test]
    fn slide_exit_keeps_travelling_in_named_direction() {
        let mut object = rect(Timing::new(0.0, 2_000.0));
        object.props.left = 300.0;
        object.animation.exit = AnimationDefinition::new(
            AnimationKind::Slide {
                direction: Direction::Left,
            },
            500.0,
            "linear",
        );

        let schedule = Schedule::build(&[object.clone()], 2_000.0, SchedulerOptions::default())
            .expect("schedule should build");
        let end = schedule
            .sample(object.id, 1_950.0)
            .expect("object should be sampled");
        assert!(end.left < 0.0, "slide-left exit should leave past the left edge");
    }

    #[test]
    fn pulse_returns_to_baseline_on_whole_periods() {
        let mut object = rect(Timing::new(0.0, 2_000.0));
        object.animation.scene =
            AnimationDefinition::new(AnimationKind::Breathe, 500.0, "linear");
        let schedule = Schedule::build(&[object.clone()], 2_000.0, SchedulerOptions::default())
            .expect("schedule should build");

        let at_period = schedule
            .sample(object.id, 1_000.0)
            .expect("object should be sampled");
        assert!((at_period.scale_x - 1.0).abs() < 1e-9);
        let at_quarter = schedule
            .sample(object.id, 125.0)
            .expect("object should be sampled");
        assert!(at_quarter.scale_x > 1.0);
    }
}
