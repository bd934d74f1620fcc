//! Source tile: one capture file plus its world-space rectangle.
//!
//! **Why**: Working sets are tens of thousands of tiles. Keeping them all
//! decoded is impossible, but a tile is read many times while the rows it
//! overlaps are regenerated, so decoding must be amortized.
//!
//! **Used by**: blend strategies (pixel data), composite image (eviction of
//! tiles that fell behind the scan line), reaper (idle sweeps).
//!
//! # States
//!
//! - `Cold`: only the rectangle is known (from the file header)
//! - `Hot`: decoded RGBA buffer present
//! - `Failed`: decode failed; the tile contributes nothing until the next
//!   sweep resets it to `Cold`
//!
//! `Cold → Hot` happens under the tile's write lock on first pixel access
//! (double-checked, so concurrent readers decode once). `Hot → Cold` happens
//! in [`Tile::sweep`] after an idle period or an explicit [`Tile::invalidate`].
//! The rectangle never changes between states.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

use image::imageops::{self, FilterType};
use image::{Rgba, RgbaImage};
use log::{debug, trace, warn};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::core::geom::{Point, Rect};
use crate::error::{Result, StitchError};

/// Tile file names: `<x>,<y>.png` with signed decimal coordinates
static TILE_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(-?\d+),(-?\d+)\.png$").expect("static regex"));

/// Decoded pixel state guarded by the tile's RwLock
#[derive(Debug)]
enum TileState {
    Cold,
    Hot(Arc<RgbaImage>),
    Failed,
}

/// One positioned capture tile with lazily decoded pixels
pub struct Tile {
    path: PathBuf,
    origin: Point,
    mod_time: SystemTime,
    scale_divider: u32,
    rect: Rect,

    state: RwLock<TileState>,
    used: AtomicBool,        // set on every pixel access, cleared by sweep
    idle_ticks: AtomicU32,   // consecutive sweeps without access
    invalidated: AtomicBool, // eviction requested, applied on next sweep
}

/// Parse `<x>,<y>.png` from the file name of `path`
pub fn parse_tile_name(path: &Path) -> Option<Point> {
    let name = path.file_name()?.to_str()?;
    let caps = TILE_NAME.captures(name)?;
    let x = caps[1].parse::<i32>().ok()?;
    let y = caps[2].parse::<i32>().ok()?;
    Some(Point::new(x, y))
}

impl Tile {
    /// Create a cold tile from a capture file.
    ///
    /// Reads only the image header; pixels are decoded on first access.
    ///
    /// # Errors
    ///
    /// - `StitchError::Config`: `scale_divider` is zero
    /// - `StitchError::TileName`: file name is not `<x>,<y>.png`
    /// - `StitchError::TileImage`: header could not be read
    pub fn from_file(path: impl Into<PathBuf>, scale_divider: u32) -> Result<Self> {
        let path = path.into();
        if scale_divider < 1 {
            return Err(StitchError::config(format!(
                "invalid scale divider {scale_divider}"
            )));
        }

        let origin = parse_tile_name(&path).ok_or_else(|| StitchError::TileName(path.clone()))?;

        let (width, height) =
            image::image_dimensions(&path).map_err(|source| StitchError::TileImage {
                path: path.clone(),
                source,
            })?;

        let mod_time = std::fs::metadata(&path)
            .and_then(|m| m.modified())
            .unwrap_or(UNIX_EPOCH);

        let rect = Rect::from_origin_size(origin, width, height).scale_down(scale_divider as i32);

        Ok(Self::with_state(path, origin, rect, mod_time, scale_divider))
    }

    /// Create a cold tile whose (already scaled) rectangle is known.
    ///
    /// Used for pyramid levels, where the exporter just wrote the file and
    /// knows its position.
    pub fn from_parts(
        path: impl Into<PathBuf>,
        rect: Rect,
        mod_time: SystemTime,
        scale_divider: u32,
    ) -> Self {
        Self::with_state(path.into(), rect.min, rect, mod_time, scale_divider.max(1))
    }

    fn with_state(
        path: PathBuf,
        origin: Point,
        rect: Rect,
        mod_time: SystemTime,
        scale_divider: u32,
    ) -> Self {
        Self {
            path,
            origin,
            mod_time,
            scale_divider,
            rect,
            state: RwLock::new(TileState::Cold),
            used: AtomicBool::new(false),
            idle_ticks: AtomicU32::new(0),
            invalidated: AtomicBool::new(false),
        }
    }

    /// World rectangle covered by this tile (scaled). Never touches the disk.
    pub fn bounds(&self) -> Rect {
        self.rect
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Unscaled position parsed from the file name
    pub fn origin(&self) -> Point {
        self.origin
    }

    pub fn mod_time(&self) -> SystemTime {
        self.mod_time
    }

    /// True while decoded pixels are held in memory
    pub fn is_hot(&self) -> bool {
        matches!(
            *self.state.read().unwrap_or_else(|e| e.into_inner()),
            TileState::Hot(_)
        )
    }

    /// Bytes held by the decoded buffer (0 when cold)
    pub fn decoded_bytes(&self) -> usize {
        match &*self.state.read().unwrap_or_else(|e| e.into_inner()) {
            TileState::Hot(img) => img.as_raw().len(),
            _ => 0,
        }
    }

    /// Decoded RGBA pixels, loading them on first access.
    ///
    /// Pixel `(0, 0)` of the returned image is world pixel `bounds().min`.
    /// Returns `None` if the file could not be decoded; the failure is logged
    /// once and the tile is treated as absent until the next sweep.
    pub fn image(&self) -> Option<Arc<RgbaImage>> {
        self.used.store(true, Ordering::Relaxed);

        // Fast path: shared lock
        {
            let state = self.state.read().unwrap_or_else(|e| e.into_inner());
            match &*state {
                TileState::Hot(img) => return Some(Arc::clone(img)),
                TileState::Failed => return None,
                TileState::Cold => {}
            }
        }

        // Slow path: exclusive lock, re-check (another reader may have won)
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        match &*state {
            TileState::Hot(img) => return Some(Arc::clone(img)),
            TileState::Failed => return None,
            TileState::Cold => {}
        }

        match self.decode() {
            Ok(img) => {
                let img = Arc::new(img);
                *state = TileState::Hot(Arc::clone(&img));
                self.idle_ticks.store(0, Ordering::Relaxed);
                trace!("Decoded tile {}", self);
                Some(img)
            }
            Err(e) => {
                warn!("Couldn't load tile: {}", e);
                *state = TileState::Failed;
                None
            }
        }
    }

    /// Pixel at world `(x, y)`, `None` outside the tile or if undecodable
    pub fn pixel_at(&self, x: i32, y: i32) -> Option<Rgba<u8>> {
        if !self.rect.contains(x, y) {
            return None;
        }
        let img = self.image()?;
        Some(*img.get_pixel((x - self.rect.min.x) as u32, (y - self.rect.min.y) as u32))
    }

    /// Request eviction of the decoded buffer. Applied on the next sweep.
    pub fn invalidate(&self) {
        self.invalidated.store(true, Ordering::Release);
    }

    /// Apply the idle rule. Returns true if pixels were released.
    ///
    /// Called periodically by the reaper. A hot tile is released when an
    /// invalidation was requested, or when `idle_ticks` consecutive sweeps
    /// saw no access.
    pub fn sweep(&self, idle_ticks: u32) -> bool {
        let invalidated = self.invalidated.swap(false, Ordering::AcqRel);
        let used = self.used.swap(false, Ordering::AcqRel);

        if matches!(
            *self.state.read().unwrap_or_else(|e| e.into_inner()),
            TileState::Cold
        ) {
            self.idle_ticks.store(0, Ordering::Relaxed);
            return false;
        }

        if !invalidated {
            if used {
                self.idle_ticks.store(0, Ordering::Relaxed);
                return false;
            }
            let idle = self.idle_ticks.fetch_add(1, Ordering::Relaxed) + 1;
            if idle < idle_ticks.max(1) {
                return false;
            }
        }

        self.release();
        true
    }

    /// Drop decoded pixels immediately (back to `Cold`)
    pub fn release(&self) {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        if !matches!(*state, TileState::Cold) {
            *state = TileState::Cold;
            self.idle_ticks.store(0, Ordering::Relaxed);
            trace!("Released tile {}", self);
        }
    }

    fn decode(&self) -> Result<RgbaImage> {
        let img = image::open(&self.path)
            .map_err(|source| StitchError::TileImage {
                path: self.path.clone(),
                source,
            })?
            .to_rgba8();

        let (w, h) = (self.rect.width(), self.rect.height());
        if img.dimensions() == (w, h) {
            return Ok(img);
        }

        if self.scale_divider == 1 {
            debug!(
                "Tile {} is {}x{} on disk, expected {}x{}; resampling",
                self,
                img.width(),
                img.height(),
                w,
                h
            );
        }
        Ok(imageops::resize(&img, w, h, FilterType::Nearest))
    }
}

impl fmt::Display for Tile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.path)
    }
}

impl fmt::Debug for Tile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tile")
            .field("path", &self.path)
            .field("rect", &self.rect)
            .field("scale_divider", &self.scale_divider)
            .field("hot", &self.is_hot())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_png(dir: &Path, name: &str, w: u32, h: u32, color: [u8; 4]) -> PathBuf {
        let path = dir.join(name);
        RgbaImage::from_pixel(w, h, Rgba(color)).save(&path).unwrap();
        path
    }

    #[test]
    fn test_parse_tile_name() {
        assert_eq!(parse_tile_name(Path::new("a/-512,1024.png")), Some(Point::new(-512, 1024)));
        assert_eq!(parse_tile_name(Path::new("0,0.png")), Some(Point::new(0, 0)));
        assert_eq!(parse_tile_name(Path::new("0,0.jpg")), None);
        assert_eq!(parse_tile_name(Path::new("0;0.png")), None);
        assert_eq!(parse_tile_name(Path::new("x,1.png")), None);
        assert_eq!(parse_tile_name(Path::new("0,0xpng")), None);
    }

    /// Test: Cold tile knows its rectangle without decoding
    /// Validates: bounds come from the header, state stays cold
    #[test]
    fn test_from_file_is_cold() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_png(dir.path(), "-10,20.png", 30, 40, [1, 2, 3, 255]);

        let tile = Tile::from_file(&path, 1).unwrap();
        assert_eq!(tile.bounds(), Rect::new(-10, 20, 20, 60));
        assert!(!tile.is_hot());
        assert_eq!(tile.decoded_bytes(), 0);
    }

    #[test]
    fn test_scale_divider_floor_ceil() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_png(dir.path(), "-3,5.png", 7, 7, [1, 2, 3, 255]);

        let tile = Tile::from_file(&path, 2).unwrap();
        assert_eq!(tile.bounds(), Rect::new(-2, 2, 2, 6));

        // Decoded buffer matches the scaled rectangle
        let img = tile.image().unwrap();
        assert_eq!(img.dimensions(), (4, 4));
    }

    #[test]
    fn test_rejects_bad_input() {
        let dir = tempfile::tempdir().unwrap();
        let bad_name = write_png(dir.path(), "tile.png", 4, 4, [0, 0, 0, 255]);
        assert!(matches!(Tile::from_file(&bad_name, 1), Err(StitchError::TileName(_))));

        let good = write_png(dir.path(), "0,0.png", 4, 4, [0, 0, 0, 255]);
        assert!(matches!(Tile::from_file(&good, 0), Err(StitchError::Config(_))));

        let missing = dir.path().join("5,5.png");
        assert!(matches!(Tile::from_file(&missing, 1), Err(StitchError::TileImage { .. })));
    }

    /// Test: Idle eviction
    /// Validates: unused tile goes cold after one idle sweep, bounds unchanged
    #[test]
    fn test_idle_eviction_keeps_bounds() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_png(dir.path(), "64,0.png", 16, 16, [0, 255, 0, 255]);
        let tile = Tile::from_file(&path, 1).unwrap();
        let before = tile.bounds();

        assert_eq!(tile.pixel_at(70, 5), Some(Rgba([0, 255, 0, 255])));
        assert!(tile.is_hot());

        // Used since last sweep: stays hot
        assert!(!tile.sweep(1));
        assert!(tile.is_hot());

        // Idle for a whole period: released
        assert!(tile.sweep(1));
        assert!(!tile.is_hot());
        assert_eq!(tile.bounds(), before);

        // Reloads transparently
        assert_eq!(tile.pixel_at(64, 0), Some(Rgba([0, 255, 0, 255])));
    }

    #[test]
    fn test_invalidate_releases_on_next_sweep() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_png(dir.path(), "0,0.png", 8, 8, [9, 9, 9, 255]);
        let tile = Tile::from_file(&path, 1).unwrap();

        tile.image().unwrap();
        tile.invalidate();
        assert!(tile.is_hot());
        assert!(tile.sweep(10));
        assert!(!tile.is_hot());
    }

    /// Test: Decode failure is absence, not an error
    /// Validates: rectangle survives a corrupted file
    #[test]
    fn test_decode_failure_is_absent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("8,8.png");
        let tile = Tile::from_parts(&path, Rect::new(8, 8, 16, 16), UNIX_EPOCH, 1);

        assert!(tile.image().is_none());
        assert!(tile.pixel_at(9, 9).is_none());
        assert_eq!(tile.bounds(), Rect::new(8, 8, 16, 16));
    }

    #[test]
    fn test_concurrent_readers_share_one_decode() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_png(dir.path(), "0,0.png", 32, 32, [4, 5, 6, 255]);
        let tile = Arc::new(Tile::from_file(&path, 1).unwrap());

        let images: Vec<Arc<RgbaImage>> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    let tile = Arc::clone(&tile);
                    s.spawn(move || tile.image().unwrap())
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        for img in &images[1..] {
            assert!(Arc::ptr_eq(&images[0], img));
        }
    }
}
