//! Entity markers: collision and trigger shapes of game entities.
//!
//! Input is a JSON array of entities as dumped by the game-side tooling.
//! Each entity carries a world transform and a list of components whose
//! members are free-form JSON; only a handful of component types are drawn,
//! the rest are ignored. Every entity also gets a small origin dot.
//!
//! **Used by**: CLI `--entities`

use std::collections::HashMap;
use std::path::Path;

use log::{debug, info};
use serde::Deserialize;
use serde_json::Value;
use tiny_skia::{FillRule, Paint, Path as SkPath, PathBuilder, PixmapMut, Stroke, Transform};

use super::{load_json, with_pixmap};
use crate::core::geom::Point;
use crate::entities::{Canvas, Overlay};
use crate::error::Result;

/// Entities further than this from a canvas never touch it
const ENTITY_REACH: i32 = 512;
const ORIGIN_RADIUS: f32 = 3.0;

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct EntityTransform {
    pub x: f32,
    pub y: f32,
    #[serde(rename = "scaleX")]
    pub scale_x: f32,
    #[serde(rename = "scaleY")]
    pub scale_y: f32,
    pub rotation: f32,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Component {
    #[serde(rename = "typeName")]
    pub type_name: String,
    pub members: HashMap<String, Value>,
}

impl Component {
    fn number(&self, key: &str) -> f64 {
        self.members.get(key).and_then(Value::as_f64).unwrap_or(0.0)
    }

    /// Fixed-length numeric array member; zeros when absent or malformed
    fn numbers<const N: usize>(&self, key: &str) -> [f64; N] {
        let mut out = [0.0; N];
        let Some(Value::Array(items)) = self.members.get(key) else {
            return out;
        };
        if items.len() == N {
            for (slot, item) in out.iter_mut().zip(items) {
                *slot = item.as_f64().unwrap_or(0.0);
            }
        }
        out
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Entity {
    pub filename: String,
    pub transform: EntityTransform,
    pub children: Vec<Entity>,
    pub components: Vec<Component>,
    pub name: String,
    pub tags: Vec<String>,
}

impl Entity {
    pub fn origin(&self) -> Point {
        Point::new(self.transform.x as i32, self.transform.y as i32)
    }

    /// Shapes this entity contributes, in draw order (origin dot last)
    fn shapes(&self) -> Vec<Shape> {
        let (x, y) = (self.transform.x as f64, self.transform.y as f64);
        let mut shapes = Vec::new();

        for component in &self.components {
            match component.type_name.as_str() {
                "AreaDamageComponent" => {
                    let [min_x, min_y] = component.numbers::<2>("aabb_min");
                    let [max_x, max_y] = component.numbers::<2>("aabb_max");
                    if let Some(geom) = Geometry::aabb(x, y, [min_x, min_y, max_x, max_y]) {
                        shapes.push(Shape::fill(geom, AREA_DAMAGE));
                    }
                    let radius = component.number("circle_radius");
                    if radius > 0.0 {
                        let center = (x + (min_x + max_x) / 2.0, y + (min_y + max_y) / 2.0);
                        shapes.push(Shape::fill(Geometry::Circle(center, radius), AREA_DAMAGE));
                    }
                }
                "MaterialAreaCheckerComponent" => {
                    let aabb = component.numbers::<4>("area_aabb");
                    if let Some(geom) = Geometry::aabb(x, y, aabb) {
                        shapes.push(Shape::fill(geom, MATERIAL_CHECKER));
                    }
                }
                "TeleportComponent" => {
                    let aabb = component.numbers::<4>("source_location_camera_aabb");
                    if let Some(geom) = Geometry::aabb(x, y, aabb) {
                        shapes.push(Shape::fill(geom, TELEPORT));
                    }
                }
                "HitboxComponent" => {
                    let aabb = [
                        component.number("aabb_min_x"),
                        component.number("aabb_min_y"),
                        component.number("aabb_max_x"),
                        component.number("aabb_max_y"),
                    ];
                    if let Some(geom) = Geometry::aabb(x, y, aabb) {
                        shapes.push(Shape::outlined(geom, HITBOX, OUTLINE));
                    }
                }
                "CollisionTriggerComponent" => {
                    let (w, h) = (component.number("width"), component.number("height"));
                    if w > 0.0 && h > 0.0 {
                        let geom = Geometry::Rect(x - w / 2.0, y - h / 2.0, w, h);
                        shapes.push(Shape::outlined(geom, COLLISION_TRIGGER, OUTLINE));
                    }
                }
                other => debug!("Entity {:?}: skipping component {}", self.name, other),
            }
        }

        shapes.push(Shape::outlined(
            Geometry::Circle((x, y), ORIGIN_RADIUS as f64),
            ORIGIN_FILL,
            ORIGIN_STROKE,
        ));
        shapes
    }
}

// Straight (non-premultiplied) alpha, as `Paint::set_color_rgba8` takes it
const AREA_DAMAGE: [u8; 4] = [255, 0, 0, 100];
const MATERIAL_CHECKER: [u8; 4] = [0, 0, 255, 127];
const TELEPORT: [u8; 4] = [0, 255, 0, 127];
const HITBOX: [u8; 4] = [255, 255, 0, 64];
const COLLISION_TRIGGER: [u8; 4] = [0, 255, 255, 64];
const OUTLINE: [u8; 4] = [0, 0, 0, 64];
const ORIGIN_FILL: [u8; 4] = [255, 255, 255, 128];
const ORIGIN_STROKE: [u8; 4] = [255, 0, 0, 255];

#[derive(Debug, Clone, Copy, PartialEq)]
enum Geometry {
    /// x, y, width, height in world space
    Rect(f64, f64, f64, f64),
    Circle((f64, f64), f64),
}

impl Geometry {
    /// Box relative to `(x, y)`; `None` unless min < max on both axes
    fn aabb(x: f64, y: f64, [min_x, min_y, max_x, max_y]: [f64; 4]) -> Option<Self> {
        (min_x < max_x && min_y < max_y)
            .then(|| Geometry::Rect(x + min_x, y + min_y, max_x - min_x, max_y - min_y))
    }

    fn path(&self) -> Option<SkPath> {
        match *self {
            Geometry::Rect(x, y, w, h) => {
                let rect = tiny_skia::Rect::from_xywh(x as f32, y as f32, w as f32, h as f32)?;
                Some(PathBuilder::from_rect(rect))
            }
            Geometry::Circle((cx, cy), r) => PathBuilder::from_circle(cx as f32, cy as f32, r as f32),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Shape {
    geometry: Geometry,
    fill: [u8; 4],
    stroke: Option<[u8; 4]>,
}

impl Shape {
    fn fill(geometry: Geometry, fill: [u8; 4]) -> Self {
        Self { geometry, fill, stroke: None }
    }

    fn outlined(geometry: Geometry, fill: [u8; 4], stroke: [u8; 4]) -> Self {
        Self { geometry, fill, stroke: Some(stroke) }
    }

    fn render(&self, pixmap: &mut PixmapMut<'_>, transform: Transform) {
        let Some(path) = self.geometry.path() else {
            return;
        };
        let mut paint = Paint {
            anti_alias: true,
            ..Paint::default()
        };
        let [r, g, b, a] = self.fill;
        paint.set_color_rgba8(r, g, b, a);
        pixmap.fill_path(&path, &paint, FillRule::Winding, transform, None);

        if let Some([r, g, b, a]) = self.stroke {
            paint.set_color_rgba8(r, g, b, a);
            let stroke = Stroke {
                width: 1.0,
                ..Stroke::default()
            };
            pixmap.stroke_path(&path, &paint, &stroke, transform, None);
        }
    }
}

/// Entity marker overlay
#[derive(Debug, Clone, Default)]
pub struct Entities {
    entities: Vec<Entity>,
}

impl Entities {
    pub fn new(entities: Vec<Entity>) -> Self {
        Self { entities }
    }

    /// Load entities from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let entities: Vec<Entity> = load_json(path)?;
        info!("Loaded {} entities from {:?}", entities.len(), path);
        Ok(Self { entities })
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Entity> {
        self.entities.iter()
    }
}

impl Overlay for Entities {
    fn name(&self) -> &'static str {
        "entities"
    }

    fn draw(&self, canvas: &mut Canvas) -> Result<()> {
        let reach = canvas.rect().inset(-ENTITY_REACH);
        let shapes: Vec<Shape> = self
            .entities
            .iter()
            .filter(|e| {
                let o = e.origin();
                reach.contains(o.x, o.y)
            })
            .flat_map(Entity::shapes)
            .collect();
        if shapes.is_empty() {
            return Ok(());
        }

        with_pixmap(canvas, self.name(), |pixmap, transform| {
            for shape in &shapes {
                shape.render(pixmap, transform);
            }
        })
    }
}
