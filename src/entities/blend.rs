//! Blend strategies: how overlapping tiles become one pixel.
//!
//! **Why**: Captures overlap heavily and contain transient content (other
//! players, particles). A per-channel median over the covering tiles removes
//! most of it; the voronoi rule gives sharper seams for static scenes; the
//! fast rule is enough for downsampled pyramid levels where tiles don't
//! overlap.
//!
//! All strategies share the recency rule: with `limit > 0` tiles are sorted
//! newest first (stable) and only the first `limit` covering tiles of each
//! pixel contribute.

use std::cmp::Reverse;
use std::sync::Arc;

use image::{Rgba, RgbaImage};

use super::canvas::Canvas;
use super::tile::Tile;
use super::traits::BlendStrategy;
use crate::core::geom::Rect;
use crate::error::Result;

/// Stable newest-first ordering used when a contributor limit is active.
fn newest_first<'a>(tiles: &[&'a Tile]) -> Vec<&'a Tile> {
    let mut sorted = tiles.to_vec();
    sorted.sort_by_key(|t| Reverse(t.mod_time()));
    sorted
}

fn ordered<'a>(tiles: &[&'a Tile], limit: usize) -> Vec<&'a Tile> {
    if limit > 0 { newest_first(tiles) } else { tiles.to_vec() }
}

/// A tile's pixels fetched once for a whole draw
struct Decoded {
    bounds: Rect,
    image: Arc<RgbaImage>,
}

impl Decoded {
    fn pixel(&self, x: i32, y: i32) -> Option<&Rgba<u8>> {
        if !self.bounds.contains(x, y) {
            return None;
        }
        Some(self.image.get_pixel((x - self.bounds.min.x) as u32, (y - self.bounds.min.y) as u32))
    }
}

/// Decode the tiles overlapping `rect`, keeping their order.
///
/// Undecodable tiles are dropped here, so they never count towards a limit.
fn decode_overlapping(tiles: &[&Tile], rect: Rect) -> Vec<Decoded> {
    tiles
        .iter()
        .filter(|t| t.bounds().overlaps(&rect))
        .filter_map(|t| {
            t.image().map(|image| Decoded {
                bounds: t.bounds(),
                image,
            })
        })
        .collect()
}

/// Median of a channel sample. Even counts average the two central values.
fn median(values: &mut [u8]) -> u8 {
    debug_assert!(!values.is_empty());
    values.sort_unstable();
    let n = values.len();
    if n % 2 == 1 {
        values[n / 2]
    } else {
        ((values[n / 2 - 1] as u16 + values[n / 2] as u16) / 2) as u8
    }
}

/// Per-channel median over the covering tiles
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Median {
    /// Max contributors per pixel, newest first. 0 = unlimited.
    pub limit: usize,
}

impl BlendStrategy for Median {
    fn name(&self) -> &'static str {
        "median"
    }

    fn draw(&self, tiles: &[&Tile], dst: &mut Canvas) -> Result<()> {
        let rect = dst.rect();
        let tiles = decode_overlapping(&ordered(tiles, self.limit), rect);

        let (mut rs, mut gs, mut bs) = (
            Vec::with_capacity(tiles.len()),
            Vec::with_capacity(tiles.len()),
            Vec::with_capacity(tiles.len()),
        );

        for y in rect.min.y..rect.max.y {
            for x in rect.min.x..rect.max.x {
                rs.clear();
                gs.clear();
                bs.clear();
                for tile in &tiles {
                    if let Some(px) = tile.pixel(x, y) {
                        rs.push(px[0]);
                        gs.push(px[1]);
                        bs.push(px[2]);
                        if self.limit > 0 && rs.len() >= self.limit {
                            break;
                        }
                    }
                }
                if !rs.is_empty() {
                    dst.put(x, y, Rgba([median(&mut rs), median(&mut gs), median(&mut bs), 255]));
                }
            }
        }
        Ok(())
    }
}

/// Colour of the covering tile whose centre is nearest
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Voronoi {
    pub limit: usize,
}

impl BlendStrategy for Voronoi {
    fn name(&self) -> &'static str {
        "voronoi"
    }

    fn draw(&self, tiles: &[&Tile], dst: &mut Canvas) -> Result<()> {
        let rect = dst.rect();
        let tiles = decode_overlapping(&ordered(tiles, self.limit), rect);
        let centers: Vec<_> = tiles.iter().map(|t| t.bounds.center()).collect();

        for y in rect.min.y..rect.max.y {
            for x in rect.min.x..rect.max.x {
                let mut best: Option<(i64, Rgba<u8>)> = None;
                let mut seen = 0usize;
                for (tile, c) in tiles.iter().zip(&centers) {
                    if self.limit > 0 && seen >= self.limit {
                        break;
                    }
                    let Some(&px) = tile.pixel(x, y) else {
                        continue;
                    };
                    seen += 1;
                    let (dx, dy) = ((x - c.x) as i64, (y - c.y) as i64);
                    let dist = dx * dx + dy * dy;
                    // Strictly closer only: earlier tiles win ties
                    if best.is_none_or(|(d, _)| dist < d) {
                        best = Some((dist, px));
                    }
                }
                if let Some((_, px)) = best {
                    dst.put(x, y, Rgba([px[0], px[1], px[2], 255]));
                }
            }
        }
        Ok(())
    }
}

/// Newest covering tile wins
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Fast;

impl BlendStrategy for Fast {
    fn name(&self) -> &'static str {
        "fast"
    }

    fn draw(&self, tiles: &[&Tile], dst: &mut Canvas) -> Result<()> {
        let rect = dst.rect();
        // Oldest first, so newer tiles overwrite
        for tile in newest_first(tiles).into_iter().rev() {
            let common = tile.bounds().intersect(&rect);
            if common.is_empty() {
                continue;
            }
            let Some(img) = tile.image() else {
                continue;
            };
            let origin = tile.bounds().min;
            for y in common.min.y..common.max.y {
                for x in common.min.x..common.max.x {
                    let px = img.get_pixel((x - origin.x) as u32, (y - origin.y) as u32);
                    dst.put(x, y, Rgba([px[0], px[1], px[2], 255]));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbaImage;
    use std::path::Path;
    use std::time::{Duration, UNIX_EPOCH};

    fn tile(dir: &Path, name: &str, rect: Rect, color: [u8; 4], age_secs: u64) -> Tile {
        let path = dir.join(name);
        RgbaImage::from_pixel(rect.width(), rect.height(), Rgba(color))
            .save(&path)
            .unwrap();
        Tile::from_parts(path, rect, UNIX_EPOCH + Duration::from_secs(age_secs), 1)
    }

    fn one_pixel(strategy: &dyn BlendStrategy, tiles: &[Tile]) -> Rgba<u8> {
        let refs: Vec<&Tile> = tiles.iter().collect();
        let mut dst = Canvas::new(Rect::new(0, 0, 1, 1), Rgba([0, 0, 0, 255]));
        strategy.draw(&refs, &mut dst).unwrap();
        dst.get(0, 0)
    }

    #[test]
    fn test_median_odd_and_even() {
        assert_eq!(median(&mut [30, 10, 20]), 20);
        assert_eq!(median(&mut [40, 10, 30, 20]), 25);
        assert_eq!(median(&mut [255, 0]), 127);
        assert_eq!(median(&mut [7]), 7);
    }

    /// Test: median over three and four covering tiles
    /// Validates: per-channel middle value, opaque alpha
    #[test]
    fn test_median_draw() {
        let dir = tempfile::tempdir().unwrap();
        let r = Rect::new(0, 0, 2, 2);
        let mut tiles = vec![
            tile(dir.path(), "a.png", r, [10, 0, 0, 255], 0),
            tile(dir.path(), "b.png", r, [20, 0, 0, 255], 0),
            tile(dir.path(), "c.png", r, [30, 0, 0, 255], 0),
        ];
        assert_eq!(one_pixel(&Median { limit: 0 }, &tiles), Rgba([20, 0, 0, 255]));

        tiles.push(tile(dir.path(), "d.png", r, [40, 0, 0, 100], 0));
        assert_eq!(one_pixel(&Median { limit: 0 }, &tiles), Rgba([25, 0, 0, 255]));
    }

    /// Test: limit keeps only the newest tiles
    /// Validates: newest two of [old=10, new=200, newer=100] -> median 150
    #[test]
    fn test_median_limit_uses_newest() {
        let dir = tempfile::tempdir().unwrap();
        let r = Rect::new(0, 0, 1, 1);
        let tiles = vec![
            tile(dir.path(), "old.png", r, [10, 10, 10, 255], 1),
            tile(dir.path(), "new.png", r, [200, 200, 200, 255], 50),
            tile(dir.path(), "newer.png", r, [100, 100, 100, 255], 90),
        ];
        assert_eq!(one_pixel(&Median { limit: 2 }, &tiles), Rgba([150, 150, 150, 255]));
        assert_eq!(one_pixel(&Median { limit: 1 }, &tiles), Rgba([100, 100, 100, 255]));
        assert_eq!(one_pixel(&Median { limit: 0 }, &tiles), Rgba([100, 100, 100, 255]));
    }

    #[test]
    fn test_uncovered_pixels_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let t = tile(dir.path(), "a.png", Rect::new(0, 0, 2, 2), [9, 9, 9, 255], 0);
        let mut dst = Canvas::new(Rect::new(0, 0, 4, 1), Rgba([1, 2, 3, 4]));

        Median::default().draw(&[&t], &mut dst).unwrap();
        assert_eq!(dst.get(1, 0), Rgba([9, 9, 9, 255]));
        assert_eq!(dst.get(2, 0), Rgba([1, 2, 3, 4]));
    }

    /// Test: voronoi picks nearest centre, first tile wins ties
    /// Validates: deterministic tie-break independent of later tiles
    #[test]
    fn test_voronoi_nearest_and_tie_break() {
        let dir = tempfile::tempdir().unwrap();
        // Centres at (2,0) and (6,0); pixel x=4 is equidistant
        let left = tile(dir.path(), "l.png", Rect::new(0, -2, 5, 2), [255, 0, 0, 255], 0);
        let right = tile(dir.path(), "r.png", Rect::new(3, -2, 9, 2), [0, 0, 255, 255], 0);
        assert_eq!(left.bounds().center().x, 2);
        assert_eq!(right.bounds().center().x, 6);

        let mut dst = Canvas::new(Rect::new(3, 0, 5, 1), Rgba([0, 0, 0, 255]));
        Voronoi::default().draw(&[&left, &right], &mut dst).unwrap();
        assert_eq!(dst.get(3, 0), Rgba([255, 0, 0, 255]));
        assert_eq!(dst.get(4, 0), Rgba([255, 0, 0, 255]));

        let mut dst = Canvas::new(Rect::new(4, 0, 5, 1), Rgba([0, 0, 0, 255]));
        Voronoi::default().draw(&[&right, &left], &mut dst).unwrap();
        assert_eq!(dst.get(4, 0), Rgba([0, 0, 255, 255]));
    }

    #[test]
    fn test_fast_newest_wins() {
        let dir = tempfile::tempdir().unwrap();
        let r = Rect::new(0, 0, 1, 1);
        let tiles = vec![
            tile(dir.path(), "new.png", r, [5, 5, 5, 255], 10),
            tile(dir.path(), "old.png", r, [200, 0, 0, 255], 1),
        ];
        assert_eq!(one_pixel(&Fast, &tiles), Rgba([5, 5, 5, 255]));
    }

    #[test]
    fn test_failed_tile_is_absent() {
        let dir = tempfile::tempdir().unwrap();
        let r = Rect::new(0, 0, 1, 1);
        let good = tile(dir.path(), "good.png", r, [0, 80, 0, 255], 0);
        let missing = Tile::from_parts(dir.path().join("gone.png"), r, UNIX_EPOCH, 1);

        let mut dst = Canvas::new(r, Rgba([0, 0, 0, 255]));
        Median::default().draw(&[&missing, &good], &mut dst).unwrap();
        assert_eq!(dst.get(0, 0), Rgba([0, 80, 0, 255]));
    }

    /// Test: draw decodes only the tiles touching the destination
    /// Validates: a tile outside the canvas stays cold after a median or voronoi draw
    #[test]
    fn test_draw_skips_tiles_outside_canvas() {
        let dir = tempfile::tempdir().unwrap();
        let near = tile(dir.path(), "near.png", Rect::new(0, 0, 4, 4), [1, 2, 3, 255], 0);
        let far = tile(dir.path(), "far.png", Rect::new(100, 100, 104, 104), [9, 9, 9, 255], 0);

        for strategy in [&Median::default() as &dyn BlendStrategy, &Voronoi::default()] {
            let mut dst = Canvas::new(Rect::new(0, 0, 4, 4), Rgba([0, 0, 0, 255]));
            strategy.draw(&[&far, &near], &mut dst).unwrap();
            assert_eq!(dst.get(3, 3), Rgba([1, 2, 3, 255]), "{}", strategy.name());
            assert!(near.is_hot());
            assert!(!far.is_hot(), "{} decoded a tile outside the canvas", strategy.name());
        }
    }

    /// Test: multi-pixel canvas with partial coverage and an undecodable tile
    /// Validates: each pixel blends only its own covering tiles; the failed tile
    /// neither contributes nor counts towards the limit
    #[test]
    fn test_partial_coverage_across_canvas() {
        let dir = tempfile::tempdir().unwrap();
        let left = tile(dir.path(), "l.png", Rect::new(0, 0, 3, 2), [90, 0, 0, 255], 5);
        let right = tile(dir.path(), "r.png", Rect::new(1, 0, 4, 2), [30, 0, 0, 255], 3);
        let missing = Tile::from_parts(
            dir.path().join("gone.png"),
            Rect::new(0, 0, 4, 2),
            UNIX_EPOCH + Duration::from_secs(9),
            1,
        );
        let refs = [&missing, &left, &right];

        let mut dst = Canvas::new(Rect::new(0, 0, 4, 2), Rgba([0, 0, 0, 255]));
        Median { limit: 2 }.draw(&refs, &mut dst).unwrap();
        for y in 0..2 {
            assert_eq!(dst.get(0, y), Rgba([90, 0, 0, 255]));
            assert_eq!(dst.get(1, y), Rgba([60, 0, 0, 255]));
            assert_eq!(dst.get(2, y), Rgba([60, 0, 0, 255]));
            assert_eq!(dst.get(3, y), Rgba([30, 0, 0, 255]));
        }

        let mut dst = Canvas::new(Rect::new(0, 0, 4, 2), Rgba([0, 0, 0, 255]));
        Voronoi { limit: 1 }.draw(&refs, &mut dst).unwrap();
        assert_eq!(dst.get(1, 0), Rgba([90, 0, 0, 255]));
        // Newest decodable tile alone wherever it covers
        assert_eq!(dst.get(2, 0), Rgba([90, 0, 0, 255]));
        assert_eq!(dst.get(3, 1), Rgba([30, 0, 0, 255]));
    }
}
