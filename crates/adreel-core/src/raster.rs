use std::collections::HashMap;

use anyhow::{Context, Result};
use image::{ExtendedColorType, ImageBuffer, ImageEncoder, Rgba, RgbaImage, codecs::png::PngEncoder};
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::{
    animation::FrameState,
    model::{Color, ObjectKind, ObjectProps, Page, SceneObject, ShapeKind},
};

/// Offscreen drawing target the recorder mounts a scene copy onto.
pub trait RenderSurface: Send {
    fn mount(&mut self, page: &Page, objects: &[SceneObject]) -> Result<()>;
    /// Rasterizes one frame to PNG bytes.
    fn render(&mut self, frame: &FrameState) -> Result<Vec<u8>>;
    fn unmount(&mut self);
    fn dimensions(&self) -> Option<(u32, u32)>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outline {
    Rect,
    Ellipse,
}

#[derive(Debug, Clone)]
struct Footprint {
    width: f64,
    height: f64,
    outline: Outline,
    drawn: bool,
    masks: Vec<Uuid>,
}

#[derive(Debug, Clone)]
struct MountedScene {
    width: u32,
    height: u32,
    fill: Color,
    footprints: HashMap<Uuid, Footprint>,
}

/// Software surface drawing every object as a filled, rotated, scaled box or
/// ellipse with opacity over the artboard fill. Clip-mask children are not
/// drawn; they restrict their parent to their own outline.
#[derive(Debug, Clone)]
pub struct RasterSurface {
    scale: f64,
    scene: Option<MountedScene>,
}

impl Default for RasterSurface {
    fn default() -> Self {
        Self::new(1.0)
    }
}

impl RasterSurface {
    #[must_use]
    pub fn new(scale: f64) -> Self {
        Self {
            scale: if scale > 0.0 { scale } else { 1.0 },
            scene: None,
        }
    }

    #[must_use]
    pub fn is_mounted(&self) -> bool {
        self.scene.is_some()
    }
}

impl RenderSurface for RasterSurface {
    #[instrument(skip_all, fields(objects = objects.len(), scale = self.scale))]
    fn mount(&mut self, page: &Page, objects: &[SceneObject]) -> Result<()> {
        let width = scaled_dimension(page.width, self.scale);
        let height = scaled_dimension(page.height, self.scale);

        let mut footprints: HashMap<Uuid, Footprint> = objects
            .iter()
            .map(|object| {
                let outline = match &object.kind {
                    ObjectKind::Shape(shape) if shape.shape == ShapeKind::Ellipse => {
                        Outline::Ellipse
                    }
                    _ => Outline::Rect,
                };
                let drawn =
                    object.mask_of.is_none() && !matches!(object.kind, ObjectKind::Group(_));
                (
                    object.id,
                    Footprint {
                        width: object.width,
                        height: object.height,
                        outline,
                        drawn,
                        masks: Vec::new(),
                    },
                )
            })
            .collect();
        for object in objects {
            if let Some(parent) = object.mask_of.and_then(|id| footprints.get_mut(&id)) {
                parent.masks.push(object.id);
            }
        }

        debug!(width, height, "render surface mounted");
        self.scene = Some(MountedScene {
            width,
            height,
            fill: page.fill,
            footprints,
        });
        Ok(())
    }

    fn render(&mut self, frame: &FrameState) -> Result<Vec<u8>> {
        let scene = self
            .scene
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("render surface is not mounted"))?;
        let mut image: RgbaImage = ImageBuffer::from_pixel(
            scene.width,
            scene.height,
            Rgba([scene.fill.r, scene.fill.g, scene.fill.b, scene.fill.a]),
        );

        for object in frame.objects.iter().filter(|object| object.visible) {
            let Some(footprint) = scene.footprints.get(&object.id) else {
                continue;
            };
            if !footprint.drawn {
                continue;
            }
            let masks: Vec<(&Footprint, &ObjectProps)> = footprint
                .masks
                .iter()
                .filter_map(|id| {
                    let mask = scene.footprints.get(id)?;
                    let props = &frame.object(*id)?.props;
                    Some((mask, props))
                })
                .collect();
            draw_object(&mut image, footprint, &object.props, &masks, self.scale);
        }

        encode_png(&image)
    }

    fn unmount(&mut self) {
        self.scene = None;
    }

    fn dimensions(&self) -> Option<(u32, u32)> {
        self.scene.as_ref().map(|scene| (scene.width, scene.height))
    }
}

fn scaled_dimension(value: u32, scale: f64) -> u32 {
    ((f64::from(value) * scale).round() as u32).max(1)
}

/// Pixel-space placement of one object: center, half extents, rotation.
struct Placement {
    center_x: f64,
    center_y: f64,
    half_width: f64,
    half_height: f64,
    sin: f64,
    cos: f64,
    outline: Outline,
}

impl Placement {
    fn new(footprint: &Footprint, props: &ObjectProps, scale: f64) -> Self {
        let radians = props.angle.to_radians();
        Self {
            center_x: (props.left + footprint.width / 2.0) * scale,
            center_y: (props.top + footprint.height / 2.0) * scale,
            half_width: (footprint.width * props.scale_x * scale).abs() / 2.0,
            half_height: (footprint.height * props.scale_y * scale).abs() / 2.0,
            sin: radians.sin(),
            cos: radians.cos(),
            outline: footprint.outline,
        }
    }

    /// Point in object-local coordinates, or `None` when outside the outline.
    fn local(&self, x: f64, y: f64) -> Option<(f64, f64)> {
        let dx = x - self.center_x;
        let dy = y - self.center_y;
        let local_x = dx * self.cos + dy * self.sin;
        let local_y = -dx * self.sin + dy * self.cos;
        let inside = match self.outline {
            Outline::Rect => local_x.abs() <= self.half_width && local_y.abs() <= self.half_height,
            Outline::Ellipse => {
                (local_x / self.half_width).powi(2) + (local_y / self.half_height).powi(2) <= 1.0
            }
        };
        inside.then_some((local_x, local_y))
    }

    fn radius(&self) -> f64 {
        self.half_width.hypot(self.half_height)
    }
}

fn draw_object(
    image: &mut RgbaImage,
    footprint: &Footprint,
    props: &ObjectProps,
    masks: &[(&Footprint, &ObjectProps)],
    scale: f64,
) {
    let opacity = props.opacity.clamp(0.0, 1.0);
    if opacity <= 0.0 {
        return;
    }
    let placement = Placement::new(footprint, props, scale);
    if placement.half_width <= 0.0 || placement.half_height <= 0.0 {
        return;
    }
    let masks: Vec<Placement> = masks
        .iter()
        .map(|(mask, mask_props)| Placement::new(mask, mask_props, scale))
        .collect();

    let radius = placement.radius();
    let (width, height) = image.dimensions();
    let min_x = (placement.center_x - radius).floor().max(0.0) as u32;
    let min_y = (placement.center_y - radius).floor().max(0.0) as u32;
    let max_x = ((placement.center_x + radius).ceil().max(0.0) as u32).min(width);
    let max_y = ((placement.center_y + radius).ceil().max(0.0) as u32).min(height);
    let stroke_width = props.stroke_width * scale;

    for y in min_y..max_y {
        for x in min_x..max_x {
            let px = f64::from(x) + 0.5;
            let py = f64::from(y) + 0.5;
            let Some((local_x, local_y)) = placement.local(px, py) else {
                continue;
            };
            if !masks.is_empty() && !masks.iter().any(|mask| mask.local(px, py).is_some()) {
                continue;
            }

            let on_stroke = placement.outline == Outline::Rect
                && stroke_width > 0.0
                && (local_x.abs() > placement.half_width - stroke_width
                    || local_y.abs() > placement.half_height - stroke_width);
            let color = match props.stroke {
                Some(stroke) if on_stroke => stroke,
                _ => props.fill,
            };
            blend(image.get_pixel_mut(x, y), color, opacity);
        }
    }
}

fn blend(pixel: &mut Rgba<u8>, color: Color, opacity: f64) {
    let alpha = f64::from(color.a) / 255.0 * opacity;
    let mix = |under: u8, over: u8| {
        (f64::from(over) * alpha + f64::from(under) * (1.0 - alpha)).round() as u8
    };
    let Rgba([r, g, b, a]) = *pixel;
    let out_alpha = (alpha * 255.0 + f64::from(a) * (1.0 - alpha)).round() as u8;
    *pixel = Rgba([mix(r, color.r), mix(g, color.g), mix(b, color.b), out_alpha]);
}

fn encode_png(image: &RgbaImage) -> Result<Vec<u8>> {
    let mut png = Vec::new();
    PngEncoder::new(&mut png)
        .write_image(
            image.as_raw(),
            image.width(),
            image.height(),
            ExtendedColorType::Rgba8,
        )
        .context("failed to encode frame png")?;
    Ok(png)
}
