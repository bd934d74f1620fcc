//! Spatial work partitioning for parallel regeneration.
//!
//! **Why**: Row regeneration splits its strip into fixed-size cells and hands
//! them to worker threads. Walking the cells along a Hilbert curve keeps
//! consecutive jobs spatially adjacent, so neighbouring workers hit the same
//! decoded tiles and progress advances smoothly instead of in stripes.
//!
//! Cells are aligned to multiples of the cell size in world space, not to the
//! rectangle origin. Coordinates can be negative, hence the explicit
//! floor/ceil division helpers.

use super::geom::{Point, Rect};

/// Integer division rounding toward negative infinity. `b` must be positive.
pub fn divide_floor(a: i32, b: i32) -> i32 {
    debug_assert!(b > 0, "divisor must be positive");
    let q = a / b;
    if a % b != 0 && a < 0 { q - 1 } else { q }
}

/// Integer division rounding toward positive infinity. `b` must be positive.
pub fn divide_ceil(a: i32, b: i32) -> i32 {
    debug_assert!(b > 0, "divisor must be positive");
    let q = a / b;
    if a % b != 0 && a > 0 { q + 1 } else { q }
}

/// One grid cell: clipped rectangle plus its grid coordinate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cell {
    pub rect: Rect,
    pub grid: Point,
}

/// Split `rect` into `cell_size`-aligned cells clipped to `rect`.
///
/// Only cells with a non-empty intersection are returned, in row-major
/// order. A zero cell size or an empty rectangle yields no cells.
pub fn gridify(rect: &Rect, cell_size: u32) -> Vec<Cell> {
    if cell_size == 0 || rect.is_empty() {
        return Vec::new();
    }
    let s = cell_size as i32;

    let gx0 = divide_floor(rect.min.x, s);
    let gy0 = divide_floor(rect.min.y, s);
    let gx1 = divide_ceil(rect.max.x, s);
    let gy1 = divide_ceil(rect.max.y, s);

    let mut cells = Vec::with_capacity(((gx1 - gx0) * (gy1 - gy0)).max(0) as usize);
    for gy in gy0..gy1 {
        for gx in gx0..gx1 {
            let cell = Rect::new(gx * s, gy * s, gx * s + s, gy * s + s).intersect(rect);
            if !cell.is_empty() {
                cells.push(Cell {
                    rect: cell,
                    grid: Point::new(gx, gy),
                });
            }
        }
    }
    cells
}

/// Distance of `(x, y)` along a Hilbert curve covering an `n × n` grid.
/// `n` must be a power of two and `x, y < n`.
pub fn hilbert_index(n: u32, x: u32, y: u32) -> u64 {
    let (mut x, mut y) = (x as u64, y as u64);
    let n = n as u64;
    let mut d = 0u64;
    let mut s = n / 2;
    while s > 0 {
        let rx = u64::from((x & s) > 0);
        let ry = u64::from((y & s) > 0);
        d += s * s * ((3 * rx) ^ ry);
        // Rotate the quadrant so the sub-curve has the canonical orientation
        if ry == 0 {
            if rx == 1 {
                x = n - 1 - x;
                y = n - 1 - y;
            }
            std::mem::swap(&mut x, &mut y);
        }
        s /= 2;
    }
    d
}

/// Sort cells along a Hilbert curve sized to the next power of two that
/// covers the grid extent. Stable for equal indices.
pub fn hilbert_order(mut cells: Vec<Cell>) -> Vec<Cell> {
    let Some(first) = cells.first() else {
        return cells;
    };

    let (mut gx0, mut gy0, mut gx1, mut gy1) = (first.grid.x, first.grid.y, first.grid.x, first.grid.y);
    for c in &cells {
        gx0 = gx0.min(c.grid.x);
        gy0 = gy0.min(c.grid.y);
        gx1 = gx1.max(c.grid.x);
        gy1 = gy1.max(c.grid.y);
    }
    let extent = ((gx1 - gx0 + 1).max(gy1 - gy0 + 1)) as u32;
    let n = extent.next_power_of_two();

    cells.sort_by_cached_key(|c| {
        hilbert_index(n, (c.grid.x - gx0) as u32, (c.grid.y - gy0) as u32)
    });
    cells
}

/// `gridify` followed by `hilbert_order`, returning only the rectangles.
pub fn hilbertify(rect: &Rect, cell_size: u32) -> Vec<Rect> {
    hilbert_order(gridify(rect, cell_size))
        .into_iter()
        .map(|c| c.rect)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Test: floor/ceil division bracket the real quotient
    /// Validates: negative numerators round away from each other
    #[test]
    fn test_divide_floor_ceil_bracket_real_quotient() {
        for a in -50..=50 {
            for b in 1..=7 {
                let real = a as f64 / b as f64;
                let lo = divide_floor(a, b);
                let hi = divide_ceil(a, b);
                assert!(lo as f64 <= real, "floor({a}/{b}) = {lo}");
                assert!(hi as f64 >= real, "ceil({a}/{b}) = {hi}");
                assert!(hi - lo <= 1);
                if a % b == 0 {
                    assert_eq!(lo, hi);
                }
            }
        }
        assert_eq!(divide_floor(-1, 2), -1);
        assert_eq!(divide_ceil(-1, 2), 0);
        assert_eq!(divide_floor(7, 2), 3);
        assert_eq!(divide_ceil(7, 2), 4);
    }

    /// Test: gridify covers the rectangle exactly
    /// Validates: no gaps, no overlaps, every cell non-empty and inside
    #[test]
    fn test_gridify_exact_cover() {
        let cases = [
            (Rect::new(0, 0, 100, 100), 32),
            (Rect::new(-70, -13, 45, 90), 16),
            (Rect::new(-512, -512, 0, 0), 512),
            (Rect::new(3, 3, 4, 4), 128),
            (Rect::new(-1000, 5, 1001, 6), 7),
        ];

        for (rect, size) in cases {
            let cells = gridify(&rect, size);
            let mut covered = 0u64;
            for (i, a) in cells.iter().enumerate() {
                assert!(!a.rect.is_empty());
                assert_eq!(a.rect.intersect(&rect), a.rect);
                assert!(a.rect.width() <= size && a.rect.height() <= size);
                covered += a.rect.area();
                for b in &cells[i + 1..] {
                    assert!(!a.rect.overlaps(&b.rect), "{} overlaps {}", a.rect, b.rect);
                }
            }
            assert_eq!(covered, rect.area(), "cover of {rect} with {size}");
        }
    }

    #[test]
    fn test_gridify_aligns_to_world_grid() {
        let cells = gridify(&Rect::new(-10, 0, 10, 5), 8);
        let xs: Vec<(i32, i32)> = cells.iter().map(|c| (c.rect.min.x, c.rect.max.x)).collect();
        assert_eq!(xs, vec![(-10, -8), (-8, 0), (0, 8), (8, 10)]);
        assert_eq!(cells[0].grid, Point::new(-2, 0));
    }

    #[test]
    fn test_gridify_degenerate_inputs() {
        assert!(gridify(&Rect::default(), 16).is_empty());
        assert!(gridify(&Rect::new(0, 0, 10, 10), 0).is_empty());
    }

    #[test]
    fn test_hilbert_index_order_2() {
        assert_eq!(hilbert_index(2, 0, 0), 0);
        assert_eq!(hilbert_index(2, 0, 1), 1);
        assert_eq!(hilbert_index(2, 1, 1), 2);
        assert_eq!(hilbert_index(2, 1, 0), 3);
    }

    /// Test: hilbert ordering visits neighbours consecutively
    /// Validates: every step moves exactly one cell on a full square grid
    #[test]
    fn test_hilbert_order_is_continuous() {
        let cells = hilbert_order(gridify(&Rect::new(-64, 32, 64, 160), 16));
        assert_eq!(cells.len(), 64);
        for pair in cells.windows(2) {
            let dx = (pair[0].grid.x - pair[1].grid.x).abs();
            let dy = (pair[0].grid.y - pair[1].grid.y).abs();
            assert_eq!(dx + dy, 1, "{:?} -> {:?}", pair[0].grid, pair[1].grid);
        }
    }

    #[test]
    fn test_hilbertify_keeps_cover() {
        let rect = Rect::new(0, 0, 300, 40);
        let rects = hilbertify(&rect, 64);
        assert_eq!(rects.len(), gridify(&rect, 64).len());
        assert_eq!(rects.iter().map(|r| r.area()).sum::<u64>(), rect.area());
    }
}
