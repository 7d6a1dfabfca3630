use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const DEFAULT_ARTBOARD_WIDTH: u32 = 1080;
pub const DEFAULT_ARTBOARD_HEIGHT: u32 = 1080;
pub const DEFAULT_ARTBOARD_FILL: &str = "#ffffff";
pub const DEFAULT_TIMELINE_DURATION_MS: f64 = 5_000.0;
pub const DEFAULT_SAMPLE_RATE: u32 = 48_000;
pub const DEFAULT_ANIMATION_EASING: &str = "power1.out";
pub const POP_DURATION_MS: f64 = 400.0;
pub const POP_EASING: &str = "back.out";
pub const SCENE_GRAPH_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Timing {
    pub offset_ms: f64,
    pub duration_ms: f64,
}

impl Timing {
    #[must_use]
    pub fn new(offset_ms: f64, duration_ms: f64) -> Self {
        Self {
            offset_ms,
            duration_ms,
        }
    }

    #[must_use]
    pub fn end_ms(&self) -> f64 {
        self.offset_ms + self.duration_ms
    }

    /// The upper bound is exclusive: an object ending at `t` is already hidden at `t`.
    #[must_use]
    pub fn is_visible_at(&self, time_ms: f64) -> bool {
        self.offset_ms <= time_ms && time_ms < self.end_ms()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub const BLACK: Self = Self::rgb(0, 0, 0);
    pub const WHITE: Self = Self::rgb(255, 255, 255);
    pub const TRANSPARENT: Self = Self {
        r: 0,
        g: 0,
        b: 0,
        a: 0,
    };

    #[must_use]
    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 255 }
    }

    pub fn parse_hex(value: &str) -> Result<Self, String> {
        let hex = value.trim().trim_start_matches('#');
        if !hex.is_ascii() {
            return Err(format!("invalid color '{value}': not hex"));
        }
        let channel = |index: usize| {
            u8::from_str_radix(&hex[index..index + 2], 16)
                .map_err(|error| format!("invalid color '{value}': {error}"))
        };

        match hex.len() {
            6 => Ok(Self::rgb(channel(0)?, channel(2)?, channel(4)?)),
            8 => Ok(Self {
                r: channel(0)?,
                g: channel(2)?,
                b: channel(4)?,
                a: channel(6)?,
            }),
            _ => Err(format!("invalid color '{value}': expected #rrggbb or #rrggbbaa")),
        }
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.a == 255 {
            write!(f, "#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
        } else {
            write!(
                f,
                "#{:02x}{:02x}{:02x}{:02x}",
                self.r, self.g, self.b, self.a
            )
        }
    }
}

impl Serialize for Color {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Color {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse_hex(&raw).map_err(serde::de::Error::custom)
    }
}

/// Animatable state of a scene object. `left`/`top` place the unscaled
/// bounding box; rotation and scale pivot around its center.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ObjectProps {
    pub left: f64,
    pub top: f64,
    pub scale_x: f64,
    pub scale_y: f64,
    pub angle: f64,
    pub opacity: f64,
    pub fill: Color,
    pub stroke: Option<Color>,
    pub stroke_width: f64,
}

impl Default for ObjectProps {
    fn default() -> Self {
        Self {
            left: 0.0,
            top: 0.0,
            scale_x: 1.0,
            scale_y: 1.0,
            angle: 0.0,
            opacity: 1.0,
            fill: Color::BLACK,
            stroke: None,
            stroke_width: 0.0,
        }
    }
}

impl ObjectProps {
    #[must_use]
    pub fn at(left: f64, top: f64, fill: Color) -> Self {
        Self {
            left,
            top,
            fill,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ShapeKind {
    Rect,
    Ellipse,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChartKind {
    Bar,
    Line,
    Pie,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ShapeData {
    pub shape: ShapeKind,
    #[serde(default)]
    pub corner_radius: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImageData {
    pub source_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct VideoData {
    pub source_url: String,
    pub trim_ms: f64,
    pub has_audio: bool,
    pub volume: f32,
    pub muted: bool,
}

impl Default for VideoData {
    fn default() -> Self {
        Self {
            source_url: String::new(),
            trim_ms: 0.0,
            has_audio: true,
            volume: 1.0,
            muted: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TextData {
    pub text: String,
    #[serde(default)]
    pub font_family: String,
    pub font_size: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChartData {
    pub chart: ChartKind,
    #[serde(default)]
    pub series: Vec<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct GroupData {
    #[serde(default)]
    pub children: Vec<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ObjectKind {
    Shape(ShapeData),
    Image(ImageData),
    Video(VideoData),
    Text(TextData),
    Chart(ChartData),
    Group(GroupData),
}

impl ObjectKind {
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Shape(_) => "shape",
            Self::Image(_) => "image",
            Self::Video(_) => "video",
            Self::Text(_) => "text",
            Self::Chart(_) => "chart",
            Self::Group(_) => "group",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Left,
    Right,
    Up,
    Down,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "name", rename_all = "kebab-case")]
pub enum AnimationKind {
    None,
    Fade,
    Slide { direction: Direction },
    Pan { direction: Direction },
    Rise,
    Pop,
    Rotate,
    Zoom,
    Breathe,
}

impl AnimationKind {
    #[must_use]
    pub fn is_scale_varying(self) -> bool {
        matches!(self, Self::Zoom | Self::Breathe)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnimationDefinition {
    #[serde(flatten)]
    pub kind: AnimationKind,
    pub duration_ms: f64,
    #[serde(default = "default_easing")]
    pub easing: String,
    #[serde(default, skip_serializing_if = "is_false")]
    pub fixed: bool,
}

impl Default for AnimationDefinition {
    fn default() -> Self {
        Self::none()
    }
}

impl AnimationDefinition {
    #[must_use]
    pub fn none() -> Self {
        Self {
            kind: AnimationKind::None,
            duration_ms: 0.0,
            easing: default_easing(),
            fixed: false,
        }
    }

    #[must_use]
    pub fn new(kind: AnimationKind, duration_ms: f64, easing: impl Into<String>) -> Self {
        Self {
            kind,
            duration_ms,
            easing: easing.into(),
            fixed: false,
        }
    }

    #[must_use]
    pub fn pop() -> Self {
        Self {
            kind: AnimationKind::Pop,
            duration_ms: POP_DURATION_MS,
            easing: POP_EASING.to_string(),
            fixed: true,
        }
    }

    #[must_use]
    pub fn is_none(&self) -> bool {
        self.kind == AnimationKind::None
    }

    /// Whether the scheduler emits a tween for this definition.
    #[must_use]
    pub fn is_applied(&self) -> bool {
        !self.is_none() && self.duration_ms > 0.0
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AnimationSlot {
    In,
    Out,
    Scene,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct AnimationSet {
    #[serde(rename = "in")]
    pub entry: AnimationDefinition,
    #[serde(rename = "out")]
    pub exit: AnimationDefinition,
    pub scene: AnimationDefinition,
}

impl AnimationSet {
    #[must_use]
    pub fn get(&self, slot: AnimationSlot) -> &AnimationDefinition {
        match slot {
            AnimationSlot::In => &self.entry,
            AnimationSlot::Out => &self.exit,
            AnimationSlot::Scene => &self.scene,
        }
    }

    pub fn get_mut(&mut self, slot: AnimationSlot) -> &mut AnimationDefinition {
        match slot {
            AnimationSlot::In => &mut self.entry,
            AnimationSlot::Out => &mut self.exit,
            AnimationSlot::Scene => &mut self.scene,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SceneObject {
    pub id: Uuid,
    pub name: String,
    pub kind: ObjectKind,
    pub props: ObjectProps,
    pub width: f64,
    pub height: f64,
    pub timing: Timing,
    #[serde(default)]
    pub animation: AnimationSet,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mask_of: Option<Uuid>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub excluded: bool,
}

impl SceneObject {
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        kind: ObjectKind,
        width: f64,
        height: f64,
        timing: Timing,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            kind,
            props: ObjectProps::default(),
            width,
            height,
            timing,
            animation: AnimationSet::default(),
            mask_of: None,
            excluded: false,
        }
    }

    #[must_use]
    pub fn video(&self) -> Option<&VideoData> {
        match &self.kind {
            ObjectKind::Video(video) => Some(video),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_video(&self) -> bool {
        self.video().is_some()
    }

    #[must_use]
    pub fn is_visible_at(&self, time_ms: f64) -> bool {
        self.timing.is_visible_at(time_ms)
    }

    /// Position inside the underlying media for a global timeline time.
    #[must_use]
    pub fn media_time_ms(&self, time_ms: f64) -> Option<f64> {
        self.video()
            .map(|video| video.trim_ms + (time_ms - self.timing.offset_ms).max(0.0))
    }
}

/// Persisted audio clip record; decode buffers and playback handles never
/// reach this type. Times are in seconds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AudioTrack {
    pub id: Uuid,
    pub url: String,
    pub name: String,
    pub volume: f32,
    pub offset: f64,
    pub timeline: f64,
    pub trim: f64,
    pub duration: f64,
    #[serde(default, skip_serializing_if = "is_false")]
    pub muted: bool,
}

impl AudioTrack {
    #[must_use]
    pub fn new(url: impl Into<String>, name: impl Into<String>, duration: f64) -> Self {
        Self {
            id: Uuid::new_v4(),
            url: url.into(),
            name: name.into(),
            volume: 1.0,
            offset: 0.0,
            timeline: duration.max(0.0),
            trim: 0.0,
            duration: duration.max(0.0),
            muted: false,
        }
    }

    #[must_use]
    pub fn end(&self) -> f64 {
        self.offset + self.timeline
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Page {
    pub fill: Color,
    pub width: u32,
    pub height: u32,
    pub duration_ms: f64,
    pub objects: Vec<SceneObject>,
    pub audios: Vec<AudioTrack>,
}

impl Default for Page {
    fn default() -> Self {
        Self::new(
            DEFAULT_ARTBOARD_WIDTH,
            DEFAULT_ARTBOARD_HEIGHT,
            Color::WHITE,
            DEFAULT_TIMELINE_DURATION_MS,
        )
    }
}

impl Page {
    #[must_use]
    pub fn new(width: u32, height: u32, fill: Color, duration_ms: f64) -> Self {
        Self {
            fill,
            width,
            height,
            duration_ms,
            objects: Vec::new(),
            audios: Vec::new(),
        }
    }

    #[must_use]
    pub fn object(&self, id: Uuid) -> Option<&SceneObject> {
        self.objects.iter().find(|object| object.id == id)
    }

    pub fn object_mut(&mut self, id: Uuid) -> Option<&mut SceneObject> {
        self.objects.iter_mut().find(|object| object.id == id)
    }

    #[must_use]
    pub fn mask_children(&self, parent_id: Uuid) -> Vec<Uuid> {
        self.objects
            .iter()
            .filter(|object| object.mask_of == Some(parent_id))
            .map(|object| object.id)
            .collect()
    }

    pub fn videos(&self) -> impl Iterator<Item = &SceneObject> {
        self.objects.iter().filter(|object| object.is_video())
    }

    pub fn to_document(&self) -> Result<PageDocument, serde_json::Error> {
        let graph = SceneGraph {
            version: SCENE_GRAPH_VERSION,
            objects: self.objects.clone(),
        };
        Ok(PageDocument {
            fill: self.fill.to_string(),
            width: self.width,
            height: self.height,
            duration: self.duration_ms,
            audios: self.audios.clone(),
            scene: serde_json::to_string(&graph)?,
        })
    }

    pub fn from_document(document: &PageDocument) -> Result<Self, PageDocumentError> {
        let graph: SceneGraph = serde_json::from_str(&document.scene)?;
        let fill = Color::parse_hex(&document.fill).map_err(PageDocumentError::Fill)?;
        Ok(Self {
            fill,
            width: document.width,
            height: document.height,
            duration_ms: document.duration,
            objects: graph.objects,
            audios: document.audios.clone(),
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PageDocumentError {
    #[error("invalid scene graph: {0}")]
    Scene(#[from] serde_json::Error),
    #[error("invalid artboard fill: {0}")]
    Fill(String),
}

/// Page form handed to storage: the object graph travels as an opaque JSON string.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PageDocument {
    pub fill: String,
    pub height: u32,
    pub width: u32,
    #[serde(default = "default_timeline_duration_ms")]
    pub duration: f64,
    #[serde(default)]
    pub audios: Vec<AudioTrack>,
    pub scene: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct SceneGraph {
    version: u32,
    objects: Vec<SceneObject>,
}

fn default_easing() -> String {
    DEFAULT_ANIMATION_EASING.to_string()
}

const fn default_timeline_duration_ms() -> f64 {
    DEFAULT_TIMELINE_DURATION_MS
}

#[allow(clippy::trivially_copy_pass_by_ref)]
const fn is_false(value: &bool) -> bool {
    !*value
}
