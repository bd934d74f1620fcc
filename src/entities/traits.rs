//! Abstract traits at the seams of the compositing pipeline.
//!
//! These traits define what `core` needs from pluggable collaborators
//! (blend strategies, overlays, encoders) and what encoders need from an
//! image, so neither side depends on the other's concrete types.

use std::path::Path;

use image::Rgba;

use super::canvas::Canvas;
use super::tile::Tile;
use crate::core::geom::Rect;
use crate::error::Result;

/// Read-only access to a (possibly virtual) RGBA image in world coordinates.
///
/// Implementors may regenerate pixels lazily; callers should scan in
/// row-major order, top to bottom.
pub trait PixelSource: Send + Sync {
    /// World rectangle covered by the image
    fn bounds(&self) -> Rect;

    /// Pixel at world `(x, y)`. Outside `bounds()` returns transparent.
    fn rgba_at(&self, x: i32, y: i32) -> Rgba<u8>;

    /// True if every pixel has alpha 255
    fn is_opaque(&self) -> bool;

    /// Append the RGBA bytes of world row `y`, columns `x0..x1`, to `out`.
    ///
    /// The default reads pixel by pixel; row-cached sources override it with
    /// a bulk copy and report regeneration failures.
    fn read_span(&self, y: i32, x0: i32, x1: i32, out: &mut Vec<u8>) -> Result<()> {
        out.reserve((x1 - x0).max(0) as usize * 4);
        for x in x0..x1 {
            out.extend_from_slice(&self.rgba_at(x, y).0);
        }
        Ok(())
    }

    /// Replace `out` with the RGBA bytes of world row `y` across `bounds()`.
    fn read_row(&self, y: i32, out: &mut Vec<u8>) -> Result<()> {
        let b = self.bounds();
        out.clear();
        self.read_span(y, b.min.x, b.max.x, out)
    }
}

/// Pixel combination rule for overlapping tiles.
///
/// `draw` writes one colour into every pixel of `dst` covered by at least one
/// tile; uncovered pixels keep their current value. Tiles that fail to
/// decode are skipped, never drawn black.
pub trait BlendStrategy: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &'static str;

    fn draw(&self, tiles: &[&Tile], dst: &mut Canvas) -> Result<()>;
}

/// Raster decoration applied after blending.
///
/// The canvas carries its world rectangle; overlays clip themselves to it.
pub trait Overlay: Send + Sync {
    fn name(&self) -> &'static str;

    fn draw(&self, canvas: &mut Canvas) -> Result<()>;
}

/// Flat file writer for a pixel source.
pub trait Encoder: Send + Sync {
    /// File extension written by this encoder, without the dot
    fn extension(&self) -> &'static str;

    fn encode(&self, image: &dyn PixelSource, path: &Path) -> Result<()>;
}
