//! Vector overlays rasterized onto row buffers.
//!
//! Overlays are drawn with tiny-skia straight into the row's RGBA buffer.
//! tiny-skia works on premultiplied pixels, so translucent canvases are
//! premultiplied for the duration of the draw and converted back afterwards;
//! opaque canvases (the common case) are used as-is.

pub mod entities;
pub mod player_path;

pub use entities::{Entities, Entity};
pub use player_path::{PlayerPath, PlayerPathSegment};

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use serde::de::DeserializeOwned;
use tiny_skia::{PixmapMut, Transform};

use crate::entities::Canvas;
use crate::error::{Result, StitchError};

/// Read a JSON document describing overlay records
pub(crate) fn load_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let file = File::open(path)?;
    Ok(serde_json::from_reader(BufReader::new(file))?)
}

/// Run `draw` on a pixmap view of `canvas`, with a transform mapping world
/// coordinates to canvas pixels.
pub(crate) fn with_pixmap<F>(canvas: &mut Canvas, name: &'static str, draw: F) -> Result<()>
where
    F: FnOnce(&mut PixmapMut<'_>, Transform),
{
    let rect = canvas.rect();
    let (w, h) = (rect.width(), rect.height());
    let transform = Transform::from_translate(-rect.min.x as f32, -rect.min.y as f32);

    let bytes: &mut [u8] = canvas.image_mut();
    let opaque = bytes.chunks_exact(4).all(|px| px[3] == 255);
    if !opaque {
        premultiply(bytes);
    }

    let result = match PixmapMut::from_bytes(bytes, w, h) {
        Some(mut pixmap) => {
            draw(&mut pixmap, transform);
            Ok(())
        }
        None => Err(StitchError::Overlay {
            name,
            reason: format!("can't map a {w}x{h} canvas"),
        }),
    };

    if !opaque {
        demultiply(bytes);
    }
    result
}

fn premultiply(bytes: &mut [u8]) {
    for px in bytes.chunks_exact_mut(4) {
        let a = px[3] as u16;
        for c in &mut px[..3] {
            *c = ((*c as u16 * a + 127) / 255) as u8;
        }
    }
}

fn demultiply(bytes: &mut [u8]) {
    for px in bytes.chunks_exact_mut(4) {
        let a = px[3] as u16;
        if a == 0 || a == 255 {
            continue;
        }
        for c in &mut px[..3] {
            *c = ((*c as u16 * 255 + a / 2) / a).min(255) as u8;
        }
    }
}
