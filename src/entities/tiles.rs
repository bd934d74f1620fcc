//! Tile set: all tiles of one composite plus their union bounds.

use std::path::Path;
use std::sync::Arc;

use log::{debug, info, warn};

use super::tile::Tile;
use crate::core::geom::Rect;
use crate::error::{Result, StitchError};

/// Shared, immutable list of tiles in deterministic iteration order
#[derive(Debug, Clone, Default)]
pub struct TileSet {
    tiles: Arc<Vec<Arc<Tile>>>,
    bounds: Rect,
}

impl TileSet {
    pub fn new(tiles: Vec<Arc<Tile>>) -> Self {
        let bounds = tiles
            .iter()
            .fold(Rect::default(), |acc, t| acc.union(&t.bounds()));
        Self {
            tiles: Arc::new(tiles),
            bounds,
        }
    }

    /// Scan `dir` for `<x>,<y>.png` tiles.
    ///
    /// Files are visited in path order. Unparsable names and unreadable
    /// headers are logged and skipped.
    ///
    /// # Errors
    ///
    /// - `StitchError::Config`: invalid `scale_divider` or glob pattern
    /// - `StitchError::NoTiles`: nothing usable in `dir`
    pub fn load_dir(dir: &Path, scale_divider: u32) -> Result<Self> {
        if scale_divider < 1 {
            return Err(StitchError::config(format!(
                "invalid scale divider {scale_divider}"
            )));
        }

        // The directory itself may contain glob metacharacters
        let escaped = glob::Pattern::escape(&dir.to_string_lossy());
        let pattern = Path::new(&escaped).join("*.png");
        let pattern = pattern.to_string_lossy();
        let entries = glob::glob(&pattern)
            .map_err(|e| StitchError::config(format!("bad tile pattern {pattern}: {e}")))?;

        let mut paths: Vec<_> = entries
            .filter_map(|entry| match entry {
                Ok(p) => Some(p),
                Err(e) => {
                    warn!("Skipping unreadable entry: {}", e);
                    None
                }
            })
            .collect();
        paths.sort();

        let mut tiles = Vec::with_capacity(paths.len());
        for path in paths {
            match Tile::from_file(&path, scale_divider) {
                Ok(tile) => tiles.push(Arc::new(tile)),
                Err(StitchError::TileName(p)) => debug!("Ignoring {:?}: not a tile name", p),
                Err(e) => warn!("Skipping tile: {}", e),
            }
        }

        if tiles.is_empty() {
            return Err(StitchError::NoTiles(dir.to_path_buf()));
        }

        let set = Self::new(tiles);
        info!(
            "Loaded {} tiles from {:?}, bounds {}",
            set.len(),
            dir,
            set.bounds()
        );
        Ok(set)
    }

    /// Union of all tile rectangles (empty for an empty set)
    pub fn bounds(&self) -> Rect {
        self.bounds
    }

    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Tile>> {
        self.tiles.iter()
    }

    /// Tiles overlapping `rect`, in set order
    pub fn overlapping(&self, rect: &Rect) -> Vec<Arc<Tile>> {
        self.tiles
            .iter()
            .filter(|t| t.bounds().overlaps(rect))
            .cloned()
            .collect()
    }

    /// Sum of decoded buffer sizes currently held
    pub fn decoded_bytes(&self) -> usize {
        self.tiles.iter().map(|t| t.decoded_bytes()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    #[test]
    fn test_load_dir_skips_bad_files() {
        let dir = tempfile::tempdir().unwrap();
        let save = |name: &str, w, h| {
            RgbaImage::from_pixel(w, h, Rgba([1, 1, 1, 255]))
                .save(dir.path().join(name))
                .unwrap();
        };
        save("0,0.png", 10, 10);
        save("-20,5.png", 10, 10);
        save("notes.png", 4, 4);
        std::fs::write(dir.path().join("7,7.png"), b"not a png").unwrap();

        let set = TileSet::load_dir(dir.path(), 1).unwrap();
        assert_eq!(set.len(), 2);
        assert_eq!(set.bounds(), Rect::new(-20, 0, 10, 15));

        // Path order: "-20,5.png" sorts before "0,0.png"
        let first = set.iter().next().unwrap();
        assert_eq!(first.bounds().min.x, -20);

        assert_eq!(set.overlapping(&Rect::new(0, 0, 1, 1)).len(), 1);
        assert_eq!(set.overlapping(&Rect::new(-100, -100, -50, -50)).len(), 0);
    }

    /// Test: tile directory whose name contains glob metacharacters
    /// Validates: the directory is matched literally and its tiles load
    #[test]
    fn test_load_dir_with_glob_chars_in_name() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("caps[1]");
        std::fs::create_dir(&dir).unwrap();
        RgbaImage::from_pixel(8, 8, Rgba([1, 1, 1, 255]))
            .save(dir.join("3,4.png"))
            .unwrap();

        let set = TileSet::load_dir(&dir, 1).unwrap();
        assert_eq!(set.len(), 1);
        assert_eq!(set.bounds(), Rect::new(3, 4, 11, 12));
    }

    #[test]
    fn test_load_dir_empty_is_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            TileSet::load_dir(dir.path(), 1),
            Err(StitchError::NoTiles(_))
        ));
    }
}
