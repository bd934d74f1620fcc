//! Integer world-space geometry: points and half-open rectangles.
//!
//! World coordinates are signed; tiles may live at negative positions.
//! Rectangles are half-open (`min` inclusive, `max` exclusive), so a
//! rectangle with `min == max` on either axis is empty.

use std::fmt;

use super::partition::{divide_ceil, divide_floor};

/// Integer point in world space
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// Half-open axis-aligned rectangle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Rect {
    pub min: Point,
    pub max: Point,
}

impl Rect {
    /// Build from two corners. Corners are swapped if given in reverse order.
    pub fn new(x0: i32, y0: i32, x1: i32, y1: i32) -> Self {
        Self {
            min: Point::new(x0.min(x1), y0.min(y1)),
            max: Point::new(x0.max(x1), y0.max(y1)),
        }
    }

    pub fn from_origin_size(origin: Point, width: u32, height: u32) -> Self {
        Self {
            min: origin,
            max: Point::new(origin.x + width as i32, origin.y + height as i32),
        }
    }

    pub fn width(&self) -> u32 {
        (self.max.x - self.min.x).max(0) as u32
    }

    pub fn height(&self) -> u32 {
        (self.max.y - self.min.y).max(0) as u32
    }

    /// Number of pixels covered
    pub fn area(&self) -> u64 {
        self.width() as u64 * self.height() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.min.x >= self.max.x || self.min.y >= self.max.y
    }

    pub fn contains(&self, x: i32, y: i32) -> bool {
        x >= self.min.x && x < self.max.x && y >= self.min.y && y < self.max.y
    }

    /// Intersection; empty rectangles collapse to `Rect::default()`
    pub fn intersect(&self, other: &Rect) -> Rect {
        let r = Rect {
            min: Point::new(self.min.x.max(other.min.x), self.min.y.max(other.min.y)),
            max: Point::new(self.max.x.min(other.max.x), self.max.y.min(other.max.y)),
        };
        if r.is_empty() { Rect::default() } else { r }
    }

    /// True if both are non-empty and share at least one pixel
    pub fn overlaps(&self, other: &Rect) -> bool {
        !self.is_empty()
            && !other.is_empty()
            && self.min.x < other.max.x
            && other.min.x < self.max.x
            && self.min.y < other.max.y
            && other.min.y < self.max.y
    }

    /// Smallest rectangle covering both. Empty operands are ignored.
    pub fn union(&self, other: &Rect) -> Rect {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        Rect {
            min: Point::new(self.min.x.min(other.min.x), self.min.y.min(other.min.y)),
            max: Point::new(self.max.x.max(other.max.x), self.max.y.max(other.max.y)),
        }
    }

    /// Shrink by `n` on every side (negative `n` grows)
    pub fn inset(&self, n: i32) -> Rect {
        Rect {
            min: Point::new(self.min.x + n, self.min.y + n),
            max: Point::new(self.max.x - n, self.max.y - n),
        }
    }

    /// Scale down by `divider`: floor for the min corner, ceil for the max
    /// corner, so the result never loses covered area.
    pub fn scale_down(&self, divider: i32) -> Rect {
        Rect {
            min: Point::new(divide_floor(self.min.x, divider), divide_floor(self.min.y, divider)),
            max: Point::new(divide_ceil(self.max.x, divider), divide_ceil(self.max.y, divider)),
        }
    }

    /// Integer midpoint `(min + max) / 2`, rounded toward negative infinity
    pub fn center(&self) -> Point {
        Point::new(
            divide_floor(self.min.x + self.max.x, 2),
            divide_floor(self.min.y + self.max.y, 2),
        )
    }
}

impl fmt::Display for Rect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({},{})-({},{})",
            self.min.x, self.min.y, self.max.x, self.max.y
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rect_canonical_and_size() {
        let r = Rect::new(10, 20, -5, 0);
        assert_eq!(r.min, Point::new(-5, 0));
        assert_eq!(r.max, Point::new(10, 20));
        assert_eq!(r.width(), 15);
        assert_eq!(r.height(), 20);
        assert_eq!(r.area(), 300);
    }

    #[test]
    fn test_intersect_and_overlaps() {
        let a = Rect::new(0, 0, 64, 64);
        let b = Rect::new(32, 0, 96, 64);
        let c = Rect::new(64, 0, 128, 64);

        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c)); // touching edges do not overlap
        assert_eq!(a.intersect(&b), Rect::new(32, 0, 64, 64));
        assert!(a.intersect(&c).is_empty());
    }

    #[test]
    fn test_union_ignores_empty() {
        let a = Rect::new(0, 0, 10, 10);
        assert_eq!(a.union(&Rect::default()), a);
        assert_eq!(Rect::default().union(&a), a);
        assert_eq!(a.union(&Rect::new(-5, 5, 3, 20)), Rect::new(-5, 0, 10, 20));
    }

    #[test]
    fn test_scale_down_never_shrinks_coverage() {
        // Tile "-3,5" of size 7x7 at divider 2
        let r = Rect::new(-3, 5, 4, 12).scale_down(2);
        assert_eq!(r, Rect::new(-2, 2, 2, 6));
    }

    #[test]
    fn test_inset_negative_grows() {
        let r = Rect::new(0, 0, 512, 512).inset(-1);
        assert_eq!(r, Rect::new(-1, -1, 513, 513));
    }
}
