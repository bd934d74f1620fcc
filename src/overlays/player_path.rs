//! Player path overlay: the route the player took, coloured by health.
//!
//! Input is a JSON array of segments:
//!
//! ```json
//! [{"from": [10.5, 20], "to": [14, 22], "hp": 80, "maxHP": 100, "polymorphed": false}]
//! ```
//!
//! Healthy segments are green, low-health segments red; polymorphed segments
//! use a fixed purple. All strokes are half transparent.

use std::path::Path;

use log::info;
use serde::Deserialize;
use tiny_skia::{LineCap, LineJoin, Paint, PathBuilder, Stroke};

use super::{load_json, with_pixmap};
use crate::core::geom::Rect;
use crate::entities::{Canvas, Overlay};
use crate::error::Result;

const STROKE_WIDTH: f32 = 3.0;
// Straight (non-premultiplied) alpha
const POLYMORPH_RGBA: [u8; 4] = [255, 100, 167, 127];

/// One recorded movement step
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PlayerPathSegment {
    pub from: [f64; 2],
    pub to: [f64; 2],
    #[serde(default)]
    pub hp: f64,
    #[serde(rename = "maxHP", default)]
    pub max_hp: f64,
    #[serde(default)]
    pub polymorphed: bool,
}

impl PlayerPathSegment {
    /// Stroke colour: red→green by HP ratio, or the polymorph colour
    pub fn color(&self) -> [u8; 4] {
        if self.polymorphed {
            return POLYMORPH_RGBA;
        }
        let hp = if self.max_hp > 0.0 {
            (self.hp / self.max_hp).clamp(0.0, 1.0)
        } else {
            0.0
        };
        [((1.0 - hp) * 255.0).round() as u8, (hp * 255.0).round() as u8, 0, 127]
    }

    /// Pixel rectangle the stroke may touch
    fn reach(&self) -> Rect {
        let margin = STROKE_WIDTH as i32 + 1;
        Rect::new(
            self.from[0] as i32,
            self.from[1] as i32,
            self.to[0] as i32,
            self.to[1] as i32,
        )
        .inset(-margin)
    }
}

/// Player path overlay
#[derive(Debug, Clone, Default)]
pub struct PlayerPath {
    segments: Vec<PlayerPathSegment>,
}

impl PlayerPath {
    pub fn new(segments: Vec<PlayerPathSegment>) -> Self {
        Self { segments }
    }

    /// Load segments from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let segments: Vec<PlayerPathSegment> = load_json(path)?;
        info!("Loaded {} player path segments from {:?}", segments.len(), path);
        Ok(Self { segments })
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }
}

impl Overlay for PlayerPath {
    fn name(&self) -> &'static str {
        "player path"
    }

    fn draw(&self, canvas: &mut Canvas) -> Result<()> {
        let area = canvas.rect();
        let visible: Vec<&PlayerPathSegment> = self
            .segments
            .iter()
            .filter(|s| s.reach().overlaps(&area))
            .collect();
        if visible.is_empty() {
            return Ok(());
        }

        let stroke = Stroke {
            width: STROKE_WIDTH,
            line_cap: LineCap::Round,
            line_join: LineJoin::Miter,
            ..Stroke::default()
        };

        with_pixmap(canvas, self.name(), |pixmap, transform| {
            let mut paint = Paint {
                anti_alias: true,
                ..Paint::default()
            };
            for segment in visible {
                let mut pb = PathBuilder::new();
                pb.move_to(segment.from[0] as f32, segment.from[1] as f32);
                pb.line_to(segment.to[0] as f32, segment.to[1] as f32);
                let Some(path) = pb.finish() else {
                    continue;
                };
                let [r, g, b, a] = segment.color();
                paint.set_color_rgba8(r, g, b, a);
                pixmap.stroke_path(&path, &paint, &stroke, transform, None);
            }
        })
    }
}
