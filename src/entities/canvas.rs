//! RGBA pixel buffer anchored at a world-space rectangle.
//!
//! **Why**: Tiles, row caches, cell jobs and overlays all work in world
//! coordinates. `Canvas` pairs an `image::RgbaImage` with the rectangle it
//! covers so callers never juggle offsets by hand.
//!
//! **Used by**: blend strategies (cell output), row caches (row buffer),
//! overlays (draw target), flat encoders (materialized images).

use image::{Rgba, RgbaImage};

use crate::core::geom::Rect;

/// Fully transparent black, returned for reads outside a buffer
pub const TRANSPARENT: Rgba<u8> = Rgba([0, 0, 0, 0]);

/// RGBA buffer covering exactly `rect`
#[derive(Debug, Clone)]
pub struct Canvas {
    rect: Rect,
    image: RgbaImage,
}

impl Canvas {
    /// Allocate a canvas for `rect` filled with `fill`
    pub fn new(rect: Rect, fill: Rgba<u8>) -> Self {
        Self {
            rect,
            image: RgbaImage::from_pixel(rect.width(), rect.height(), fill),
        }
    }

    pub fn rect(&self) -> Rect {
        self.rect
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    pub fn image_mut(&mut self) -> &mut RgbaImage {
        &mut self.image
    }

    /// Pixel at world `(x, y)`, transparent outside the canvas
    #[inline]
    pub fn get(&self, x: i32, y: i32) -> Rgba<u8> {
        if !self.rect.contains(x, y) {
            return TRANSPARENT;
        }
        *self.image.get_pixel(
            (x - self.rect.min.x) as u32,
            (y - self.rect.min.y) as u32,
        )
    }

    /// Write pixel at world `(x, y)`; ignored outside the canvas
    #[inline]
    pub fn put(&mut self, x: i32, y: i32, px: Rgba<u8>) {
        if self.rect.contains(x, y) {
            self.image.put_pixel(
                (x - self.rect.min.x) as u32,
                (y - self.rect.min.y) as u32,
                px,
            );
        }
    }

    /// Raw RGBA bytes of world row `y` between `x0..x1` (clipped)
    pub fn row_bytes(&self, y: i32, x0: i32, x1: i32) -> &[u8] {
        if y < self.rect.min.y || y >= self.rect.max.y {
            return &[];
        }
        let x0 = x0.clamp(self.rect.min.x, self.rect.max.x);
        let x1 = x1.clamp(x0, self.rect.max.x);
        let stride = self.rect.width() as usize * 4;
        let row = (y - self.rect.min.y) as usize * stride;
        let a = row + (x0 - self.rect.min.x) as usize * 4;
        let b = row + (x1 - self.rect.min.x) as usize * 4;
        &self.image.as_raw()[a..b]
    }

    /// Copy the overlapping part of `src` into this canvas
    pub fn blit(&mut self, src: &Canvas) {
        let common = self.rect.intersect(&src.rect);
        if common.is_empty() {
            return;
        }
        let dst_stride = self.rect.width() as usize * 4;
        let len = common.width() as usize * 4;
        for y in common.min.y..common.max.y {
            let src_row = src.row_bytes(y, common.min.x, common.max.x);
            let off = (y - self.rect.min.y) as usize * dst_stride
                + (common.min.x - self.rect.min.x) as usize * 4;
            let dst: &mut [u8] = &mut self.image;
            dst[off..off + len].copy_from_slice(src_row);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_world_coordinates() {
        let mut c = Canvas::new(Rect::new(-10, 20, -5, 25), Rgba([1, 2, 3, 255]));
        assert_eq!(c.get(-10, 20), Rgba([1, 2, 3, 255]));
        assert_eq!(c.get(0, 0), TRANSPARENT);

        c.put(-6, 24, Rgba([9, 9, 9, 255]));
        assert_eq!(c.get(-6, 24), Rgba([9, 9, 9, 255]));
        assert_eq!(c.image().get_pixel(4, 4), &Rgba([9, 9, 9, 255]));
    }

    #[test]
    fn test_blit_partial_overlap() {
        let mut dst = Canvas::new(Rect::new(0, 0, 8, 8), Rgba([0, 0, 0, 255]));
        let src = Canvas::new(Rect::new(4, 6, 12, 10), Rgba([200, 0, 0, 255]));
        dst.blit(&src);

        assert_eq!(dst.get(3, 6), Rgba([0, 0, 0, 255]));
        assert_eq!(dst.get(4, 6), Rgba([200, 0, 0, 255]));
        assert_eq!(dst.get(7, 7), Rgba([200, 0, 0, 255]));
        assert_eq!(dst.get(4, 5), Rgba([0, 0, 0, 255]));
    }

    #[test]
    fn test_row_bytes_clips() {
        let c = Canvas::new(Rect::new(0, 0, 4, 2), Rgba([5, 6, 7, 8]));
        assert_eq!(c.row_bytes(1, -3, 2).len(), 8);
        assert!(c.row_bytes(2, 0, 4).is_empty());
    }
}
