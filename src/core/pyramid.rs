//! Deep-zoom pyramid export.
//!
//! **Why**: Flat formats cap out long before a full world map does (WebP at
//! 16383 px). A deep-zoom pyramid has no such limit and is what web viewers
//! expect.
//!
//! The highest level is cut straight from the composite. Every exported tile
//! is then reused as a source tile at half scale, so each following level is
//! just another composite over the previous level's files. No level is ever
//! held in memory as a whole.
//!
//! # Layout
//!
//! ```text
//! <name>.dzi                      JSON descriptor
//! <name>_files/<level>/<col>_<row>.<ext>
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::SystemTime;

use log::{debug, info};
use serde::{Deserialize, Serialize};

use super::composite::{CompositeConfig, CompositeImage, ScanPolicy, SubImage};
use super::geom::{Point, Rect};
use super::limiter::Limiter;
use crate::encode::{EncodeOptions, FlatFormat, encoder_for};
use crate::entities::{Encoder, Fast, PixelSource, Tile, TileSet};
use crate::error::{Result, StitchError};

const DZI_XMLNS: &str = "http://schemas.microsoft.com/deepzoom/2008";

/// Smallest `L` with `2^L >= max(width, height)`
pub fn max_zoom_level(width: u32, height: u32) -> u32 {
    let needed = width.max(height).max(1);
    needed.next_power_of_two().trailing_zeros()
}

/// Pyramid layout options
#[derive(Debug, Clone, Copy)]
pub struct PyramidConfig {
    /// Tile side without overlap
    pub tile_size: u32,
    /// Extra pixels on every side of every tile
    pub overlap: u32,
    pub format: FlatFormat,
    pub encode: EncodeOptions,
}

impl Default for PyramidConfig {
    fn default() -> Self {
        Self {
            tile_size: 512,
            overlap: 0,
            format: FlatFormat::Png,
            encode: EncodeOptions::default(),
        }
    }
}

impl PyramidConfig {
    pub fn validate(&self) -> Result<()> {
        if self.tile_size == 0 {
            return Err(StitchError::config("pyramid tile size must be positive"));
        }
        Ok(())
    }
}

/// Deep-zoom descriptor, serialized with string values
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DziDescriptor {
    #[serde(rename = "Image")]
    pub image: DziImage,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DziImage {
    #[serde(rename = "xmlns")]
    pub xmlns: String,
    pub format: String,
    pub overlap: String,
    pub tile_size: String,
    pub size: DziSize,
    pub top_left: DziPoint,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DziSize {
    pub width: String,
    pub height: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DziPoint {
    #[serde(rename = "X")]
    pub x: String,
    #[serde(rename = "Y")]
    pub y: String,
}

impl DziDescriptor {
    pub fn new(bounds: Rect, config: &PyramidConfig) -> Self {
        Self {
            image: DziImage {
                xmlns: DZI_XMLNS.to_string(),
                format: config.format.extension().to_string(),
                overlap: config.overlap.to_string(),
                tile_size: config.tile_size.to_string(),
                size: DziSize {
                    width: bounds.width().to_string(),
                    height: bounds.height().to_string(),
                },
                top_left: DziPoint {
                    x: bounds.min.x.to_string(),
                    y: bounds.min.y.to_string(),
                },
            },
        }
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        let mut json = serde_json::to_vec(self)?;
        json.push(b'\n');
        fs::write(path, json).map_err(|e| StitchError::export(path, e))
    }
}

/// `<stem>_files` next to the descriptor
pub fn tiles_dir_for(descriptor: &Path) -> PathBuf {
    let stem = descriptor
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    descriptor.with_file_name(format!("{stem}_files"))
}

/// Tile grid of one level: `tile_size` cells from the bounds origin,
/// expanded by `overlap` and clamped to the bounds. Row-major.
pub fn level_grid(bounds: Rect, tile_size: u32, overlap: u32) -> Vec<(u32, u32, Rect)> {
    let ts = tile_size as i32;
    let cols = bounds.width().div_ceil(tile_size);
    let rows = bounds.height().div_ceil(tile_size);
    let mut cells = Vec::with_capacity((cols * rows) as usize);
    for row in 0..rows {
        for col in 0..cols {
            let origin = Point::new(bounds.min.x + col as i32 * ts, bounds.min.y + row as i32 * ts);
            let rect = Rect::from_origin_size(origin, tile_size, tile_size)
                .inset(-(overlap as i32))
                .intersect(&bounds);
            cells.push((col, row, rect));
        }
    }
    cells
}

/// Exports a composite as a deep-zoom pyramid
pub struct PyramidExporter {
    config: PyramidConfig,
    composite: CompositeConfig,
    encoder: Box<dyn Encoder>,
    limiter: Limiter,
    tiles_done: AtomicU64,
    tiles_total: AtomicU64,
}

impl PyramidExporter {
    /// `composite` is the template for the downsampled levels; its row
    /// height and scan policy are overridden.
    pub fn new(config: PyramidConfig, composite: CompositeConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            encoder: encoder_for(config.format, &config.encode),
            limiter: Limiter::with_defaults("pyramid"),
            config,
            composite,
            tiles_done: AtomicU64::new(0),
            tiles_total: AtomicU64::new(0),
        })
    }

    /// Cap concurrent tile encodes (default: one per logical core)
    pub fn with_concurrency(mut self, n: usize) -> Self {
        self.limiter = Limiter::new(n, "pyramid");
        self
    }

    /// `(tiles_written, tiles_total)` across all levels
    pub fn progress(&self) -> (u64, u64) {
        (
            self.tiles_done.load(Ordering::Relaxed),
            self.tiles_total.load(Ordering::Relaxed),
        )
    }

    /// Write the descriptor at `descriptor` and all levels under
    /// `<stem>_files/`.
    pub fn export(&self, image: CompositeImage, descriptor: &Path) -> Result<()> {
        let bounds = image.bounds();
        let tiles_dir = tiles_dir_for(descriptor);
        fs::create_dir_all(&tiles_dir).map_err(|e| StitchError::export(&tiles_dir, e))?;

        info!("Creating DZI descriptor {:?}", descriptor);
        DziDescriptor::new(bounds, &self.config).write(descriptor)?;

        let max_level = max_zoom_level(bounds.width(), bounds.height());
        self.tiles_total
            .store(self.count_tiles(bounds, max_level), Ordering::Relaxed);
        if image.scan_policy() == ScanPolicy::Sequential {
            debug!("Top pyramid level read with a sequential composite; expect row thrash");
        }

        info!("Creating DZI tiles in {:?} ({} levels)", tiles_dir, max_level + 1);

        let mut current = image;
        for level in (0..=max_level).rev() {
            let tiles = self.export_level(&current, &tiles_dir, level)?;
            if level == 0 {
                break;
            }
            current = CompositeImage::builder(TileSet::new(tiles))
                .blend(Arc::new(Fast))
                .config(CompositeConfig {
                    row_height: self.config.tile_size,
                    scan_policy: ScanPolicy::Shared,
                    ..self.composite.clone()
                })
                .build()?;
        }
        debug!(
            "Pyramid encoded with at most {} of {} encoders busy",
            self.limiter.peak_in_flight(),
            self.limiter.max_permits()
        );
        Ok(())
    }

    fn count_tiles(&self, mut bounds: Rect, max_level: u32) -> u64 {
        let mut total = 0u64;
        for _ in 0..=max_level {
            total += level_grid(bounds, self.config.tile_size, 0).len() as u64;
            bounds = bounds.scale_down(2);
        }
        total
    }

    /// Encode every tile of `source` into `<tiles_dir>/<level>/` and return
    /// them as half-scale tiles for the next level.
    fn export_level(&self, source: &CompositeImage, tiles_dir: &Path, level: u32) -> Result<Vec<Arc<Tile>>> {
        let level_dir = tiles_dir.join(level.to_string());
        fs::create_dir_all(&level_dir).map_err(|e| StitchError::export(&level_dir, e))?;

        let grid = level_grid(source.bounds(), self.config.tile_size, self.config.overlap);
        debug!("Level {}: {} tiles from {}", level, grid.len(), source.bounds());

        let ext = self.encoder.extension();
        let results: Mutex<Vec<Option<Arc<Tile>>>> = Mutex::new(vec![None; grid.len()]);
        let first_error: Mutex<Option<StitchError>> = Mutex::new(None);
        let failed = AtomicBool::new(false);

        thread::scope(|s| {
            for (i, (col, row, rect)) in grid.iter().enumerate() {
                if failed.load(Ordering::Relaxed) {
                    break;
                }
                let permit = self.limiter.acquire();
                let path = level_dir.join(format!("{col}_{row}.{ext}"));
                let (results, first_error, failed) = (&results, &first_error, &failed);
                s.spawn(move || {
                    let _permit = permit;
                    let sub = SubImage::new(source, *rect);
                    match self.encoder.encode(&sub, &path) {
                        Ok(()) => {
                            let tile = Tile::from_parts(path, sub.bounds().scale_down(2), SystemTime::now(), 2);
                            results.lock().unwrap_or_else(|e| e.into_inner())[i] = Some(Arc::new(tile));
                            self.tiles_done.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(e) => {
                            failed.store(true, Ordering::Relaxed);
                            let mut slot = first_error.lock().unwrap_or_else(|e| e.into_inner());
                            if slot.is_none() {
                                *slot = Some(e);
                            }
                        }
                    }
                });
            }
        });

        if let Some(e) = first_error.into_inner().unwrap_or_else(|e| e.into_inner()) {
            return Err(StitchError::export(&level_dir, format!("level {level}: {e}")));
        }
        let tiles = results
            .into_inner()
            .unwrap_or_else(|e| e.into_inner())
            .into_iter()
            .flatten()
            .collect();
        Ok(tiles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_max_zoom_level() {
        assert_eq!(max_zoom_level(1, 1), 0);
        assert_eq!(max_zoom_level(2, 1), 1);
        assert_eq!(max_zoom_level(512, 512), 9);
        assert_eq!(max_zoom_level(513, 10), 10);
        // 1000x700 -> levels 10..=0, eleven in total
        assert_eq!(max_zoom_level(1000, 700), 10);
    }

    #[test]
    fn test_level_grid_clamps_and_overlaps() {
        let b = Rect::new(-100, 50, 1000, 700);
        let grid = level_grid(b, 512, 0);
        assert_eq!(grid.len(), 3 * 2);
        assert_eq!(grid[0], (0, 0, Rect::new(-100, 50, 412, 562)));
        assert_eq!(grid[5], (2, 1, Rect::new(924, 562, 1000, 700)));
        assert_eq!(grid.iter().map(|c| c.2.area()).sum::<u64>(), b.area());

        let grid = level_grid(b, 512, 2);
        assert_eq!(grid[0].2, Rect::new(-100, 50, 414, 564));
        assert_eq!(grid[4].2, Rect::new(410, 560, 926, 700));
    }

    #[test]
    fn test_descriptor_json() {
        let d = DziDescriptor::new(Rect::new(-5, 7, 995, 707), &PyramidConfig::default());
        let json: serde_json::Value = serde_json::to_value(&d).unwrap();
        let img = &json["Image"];
        assert_eq!(img["xmlns"], DZI_XMLNS);
        assert_eq!(img["Format"], "png");
        assert_eq!(img["Overlap"], "0");
        assert_eq!(img["TileSize"], "512");
        assert_eq!(img["Size"]["Width"], "1000");
        assert_eq!(img["Size"]["Height"], "700");
        assert_eq!(img["TopLeft"]["X"], "-5");
        assert_eq!(img["TopLeft"]["Y"], "7");
    }

    #[test]
    fn test_tiles_dir_for() {
        assert_eq!(tiles_dir_for(Path::new("out/map.dzi")), PathBuf::from("out/map_files"));
    }

    #[test]
    fn test_zero_tile_size_rejected() {
        let cfg = PyramidConfig {
            tile_size: 0,
            ..PyramidConfig::default()
        };
        assert!(PyramidExporter::new(cfg, CompositeConfig::default()).is_err());
    }
}
