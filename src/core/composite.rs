//! Composite image: the virtual full canvas built from a tile set.
//!
//! **Why**: Outputs can be hundreds of thousands of pixels per side. The
//! composite never materializes them; it splits its bounds into row caches
//! and regenerates a strip only when a reader reaches it.
//!
//! **Used by**: flat encoders (top-to-bottom scan), pyramid exporter (many
//! concurrent sub-image readers), progress reporting.
//!
//! # Scan behaviour
//!
//! Reads are cheapest in row-major order, top to bottom. When a read lands in
//! a row other than the hot row:
//! - the next row is queued for prefetch on the composite's own worker,
//!   unless it is already populated or already queued
//! - under [`ScanPolicy::Sequential`] the previous row is dropped and tiles
//!   lying entirely above the new hot row are marked for eviction
//!
//! Random access still returns correct pixels; it just regenerates more.
//!
//! A reaper thread sweeps rows and tiles on a fixed interval so memory held
//! by idle rows (and by tiles nobody reads) is returned even without a scan.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use image::Rgba;
use log::{debug, info, trace, warn};

use super::geom::Rect;
use super::reaper::Reaper;
use super::row_cache::{RegenContext, RowCache, RowState};
use super::workers::{Workers, default_threads};
use crate::entities::{BlendStrategy, Canvas, Overlay, PixelSource, TRANSPARENT, TileSet};
use crate::error::{Result, StitchError};

const NO_HOT_ROW: usize = usize::MAX;

/// How readers are expected to traverse the composite
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ScanPolicy {
    /// One reader, top to bottom. Rows and tiles behind it are evicted eagerly.
    #[default]
    Sequential,
    /// Several concurrent readers. Only prefetch; memory is reclaimed by the
    /// reaper alone.
    Shared,
}

/// Tunables for a composite
#[derive(Debug, Clone)]
pub struct CompositeConfig {
    /// Height of one row cache in pixels
    pub row_height: u32,
    /// Side of the regeneration work cells
    pub cell_size: u32,
    /// Fill for pixels no tile covers
    pub background: Rgba<u8>,
    pub scan_policy: ScanPolicy,
    /// Regeneration worker threads per row
    pub threads: usize,
    /// Reaper tick. `None` disables the reaper thread.
    pub reaper_interval: Option<Duration>,
    /// Idle ticks after which a populated row is dropped
    pub row_idle_threshold: u32,
    /// Idle ticks after which a decoded tile is released
    pub tile_idle_ticks: u32,
}

impl Default for CompositeConfig {
    fn default() -> Self {
        Self {
            row_height: 128,
            cell_size: 512,
            background: Rgba([0, 0, 0, 255]),
            scan_policy: ScanPolicy::Sequential,
            threads: default_threads(),
            reaper_interval: Some(Duration::from_secs(1)),
            row_idle_threshold: 2,
            tile_idle_ticks: 1,
        }
    }
}

/// State shared with the prefetch worker and the reaper
struct Shared {
    bounds: Rect,
    row_height: u32,
    rows: Vec<Arc<RowCache>>,
    ctx: RegenContext,
    policy: ScanPolicy,
    row_idle_threshold: u32,
    tile_idle_ticks: u32,
    hot_row: AtomicUsize,
    pixels_read: AtomicU64,
    /// One flag per row, set while a prefetch of that row is queued or running
    prefetch_pending: Vec<AtomicBool>,
    prefetch_jobs: AtomicU64,
}

impl Shared {
    fn sweep(&self) {
        let rows = self
            .rows
            .iter()
            .filter(|r| r.invalidate_auto(self.row_idle_threshold))
            .count();
        let tiles = self
            .ctx
            .tiles
            .iter()
            .filter(|t| t.sweep(self.tile_idle_ticks))
            .count();
        if rows > 0 || tiles > 0 {
            trace!("Sweep released {} rows, {} tiles", rows, tiles);
        }
    }
}

/// Builder for [`CompositeImage`]
pub struct CompositeBuilder {
    tiles: TileSet,
    bounds: Option<Rect>,
    blend: Option<Arc<dyn BlendStrategy>>,
    overlays: Vec<Arc<dyn Overlay>>,
    config: CompositeConfig,
}

impl CompositeBuilder {
    /// Crop to `bounds` instead of the tile set's union
    pub fn bounds(mut self, bounds: Rect) -> Self {
        self.bounds = Some(bounds);
        self
    }

    pub fn blend(mut self, blend: Arc<dyn BlendStrategy>) -> Self {
        self.blend = Some(blend);
        self
    }

    /// Append an overlay; overlays draw in registration order
    pub fn overlay(mut self, overlay: Arc<dyn Overlay>) -> Self {
        self.overlays.push(overlay);
        self
    }

    pub fn config(mut self, config: CompositeConfig) -> Self {
        self.config = config;
        self
    }

    pub fn row_height(mut self, row_height: u32) -> Self {
        self.config.row_height = row_height;
        self
    }

    pub fn scan_policy(mut self, policy: ScanPolicy) -> Self {
        self.config.scan_policy = policy;
        self
    }

    /// Validate and build.
    ///
    /// # Errors
    ///
    /// `StitchError::Config` for empty bounds, zero row height or cell size,
    /// or a missing blend strategy.
    pub fn build(self) -> Result<CompositeImage> {
        let bounds = self.bounds.unwrap_or_else(|| self.tiles.bounds());
        if bounds.is_empty() {
            return Err(StitchError::config("composite bounds are empty"));
        }
        let Some(blend) = self.blend else {
            return Err(StitchError::config("no blend strategy given"));
        };
        let cfg = self.config;
        if cfg.row_height == 0 {
            return Err(StitchError::config("invalid row height of 0 pixels"));
        }
        if cfg.cell_size == 0 {
            return Err(StitchError::config("invalid cell size of 0 pixels"));
        }

        let h = cfg.row_height as i32;
        let rows: Vec<Arc<RowCache>> = (bounds.min.y..bounds.max.y)
            .step_by(cfg.row_height as usize)
            .map(|y| {
                Arc::new(RowCache::new(Rect::new(
                    bounds.min.x,
                    y,
                    bounds.max.x,
                    (y + h).min(bounds.max.y),
                )))
            })
            .collect();

        debug!(
            "Composite {} ({}x{}): {} rows of {}px, {} blend, {} overlays",
            bounds,
            bounds.width(),
            bounds.height(),
            rows.len(),
            cfg.row_height,
            blend.name(),
            self.overlays.len()
        );

        let prefetch_pending = rows.iter().map(|_| AtomicBool::new(false)).collect();
        let shared = Arc::new(Shared {
            bounds,
            row_height: cfg.row_height,
            rows,
            ctx: RegenContext {
                tiles: self.tiles,
                blend,
                overlays: Arc::new(self.overlays),
                background: cfg.background,
                cell_size: cfg.cell_size,
                threads: cfg.threads.max(1),
            },
            policy: cfg.scan_policy,
            row_idle_threshold: cfg.row_idle_threshold,
            tile_idle_ticks: cfg.tile_idle_ticks,
            hot_row: AtomicUsize::new(NO_HOT_ROW),
            pixels_read: AtomicU64::new(0),
            prefetch_pending,
            prefetch_jobs: AtomicU64::new(0),
        });

        let reaper = match cfg.reaper_interval {
            Some(interval) => {
                let swept = Arc::clone(&shared);
                Some(Reaper::spawn(interval, "composite", move || swept.sweep())?)
            }
            None => None,
        };

        Ok(CompositeImage {
            prefetch: Workers::new(1, "prefetch")?,
            reaper,
            shared,
        })
    }
}

/// Virtual image assembled from tiles, regenerated row by row
pub struct CompositeImage {
    // Threads first: they are joined before shared state goes away
    prefetch: Workers,
    reaper: Option<Reaper>,
    shared: Arc<Shared>,
}

impl CompositeImage {
    /// Start building a composite over `tiles`
    pub fn builder(tiles: TileSet) -> CompositeBuilder {
        CompositeBuilder {
            tiles,
            bounds: None,
            blend: None,
            overlays: Vec::new(),
            config: CompositeConfig::default(),
        }
    }

    pub fn tiles(&self) -> &TileSet {
        &self.shared.ctx.tiles
    }

    pub fn row_height(&self) -> u32 {
        self.shared.row_height
    }

    pub fn row_count(&self) -> usize {
        self.shared.rows.len()
    }

    pub fn scan_policy(&self) -> ScanPolicy {
        self.shared.policy
    }

    /// Rectangle and state of row `idx`
    #[cfg(test)]
    fn row_info(&self, idx: usize) -> Option<(Rect, RowState)> {
        self.shared.rows.get(idx).map(|r| (r.rect(), r.state()))
    }

    /// `(pixels_read, total_pixels)`. Each read pixel counts once.
    pub fn progress(&self) -> (u64, u64) {
        (
            self.shared.pixels_read.load(Ordering::Relaxed),
            self.shared.bounds.area(),
        )
    }

    /// Prefetch jobs queued so far
    pub fn prefetch_jobs(&self) -> u64 {
        self.shared.prefetch_jobs.load(Ordering::Relaxed)
    }

    /// Run one reaper sweep now
    pub fn sweep(&self) {
        self.shared.sweep();
    }

    fn row_index(&self, y: i32) -> usize {
        ((y - self.shared.bounds.min.y) / self.shared.row_height as i32) as usize
    }

    fn on_row_access(&self, idx: usize) {
        let shared = &self.shared;
        if shared.hot_row.swap(idx, Ordering::AcqRel) == idx {
            return;
        }
        trace!("Hot row -> {}", idx);

        let next = idx + 1;
        if next < shared.rows.len() && shared.rows[next].state() == RowState::Empty {
            let claimed = shared.prefetch_pending[next]
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_ok();
            if claimed {
                shared.prefetch_jobs.fetch_add(1, Ordering::Relaxed);
                let prefetched = Arc::clone(shared);
                self.prefetch.execute(move || {
                    let row = &prefetched.rows[next];
                    if let Err(e) = row.regenerate(&prefetched.ctx) {
                        warn!("Prefetch of row {} failed: {}", row.rect(), e);
                    }
                    prefetched.prefetch_pending[next].store(false, Ordering::Release);
                });
            }
        }

        if shared.policy == ScanPolicy::Sequential && idx > 0 {
            shared.rows[idx - 1].invalidate();

            let top = shared.rows[idx].rect().min.y;
            let mut evicted = 0usize;
            for tile in shared.ctx.tiles.iter() {
                if tile.bounds().max.y <= top {
                    tile.invalidate();
                    evicted += 1;
                }
            }
            trace!("Marked {} tiles above y={} for eviction", evicted, top);
        }
    }

    /// Row buffer containing world row `y` (which must be inside bounds)
    fn row_at(&self, y: i32) -> Result<Arc<Canvas>> {
        let idx = self.row_index(y);
        self.on_row_access(idx);
        self.shared.rows[idx].regenerate(&self.shared.ctx)
    }

    /// Pixel at `(x, y)`, surfacing regeneration errors
    pub fn try_rgba_at(&self, x: i32, y: i32) -> Result<Rgba<u8>> {
        if !self.shared.bounds.contains(x, y) {
            return Ok(TRANSPARENT);
        }
        let row = self.row_at(y)?;
        self.shared.pixels_read.fetch_add(1, Ordering::Relaxed);
        Ok(row.get(x, y))
    }
}

impl PixelSource for CompositeImage {
    fn bounds(&self) -> Rect {
        self.shared.bounds
    }

    fn rgba_at(&self, x: i32, y: i32) -> Rgba<u8> {
        self.try_rgba_at(x, y).unwrap_or_else(|e| {
            warn!("Couldn't regenerate pixel ({}, {}): {}", x, y, e);
            self.shared.ctx.background
        })
    }

    fn is_opaque(&self) -> bool {
        self.shared.ctx.background[3] == 255
    }

    fn read_span(&self, y: i32, x0: i32, x1: i32, out: &mut Vec<u8>) -> Result<()> {
        let b = self.shared.bounds;
        let Some((lo, hi)) = clip_span(&b, y, x0, x1) else {
            pad(out, x1 - x0);
            return Ok(());
        };

        let row = self.row_at(y)?;
        pad(out, lo - x0);
        out.extend_from_slice(row.row_bytes(y, lo, hi));
        pad(out, x1 - hi);
        self.shared
            .pixels_read
            .fetch_add((hi - lo) as u64, Ordering::Relaxed);
        Ok(())
    }
}

/// Columns of `x0..x1` on row `y` that fall inside `rect`, if any
fn clip_span(rect: &Rect, y: i32, x0: i32, x1: i32) -> Option<(i32, i32)> {
    let (lo, hi) = (x0.max(rect.min.x), x1.min(rect.max.x));
    (y >= rect.min.y && y < rect.max.y && lo < hi).then_some((lo, hi))
}

/// Append `n` transparent pixels
fn pad(out: &mut Vec<u8>, n: i32) {
    if n > 0 {
        out.resize(out.len() + n as usize * 4, 0);
    }
}

impl Drop for CompositeImage {
    fn drop(&mut self) {
        let (read, total) = self.progress();
        debug!(
            "Dropping composite {} (read {} of {} pixels, {} prefetches)",
            self.shared.bounds,
            read,
            total,
            self.prefetch_jobs()
        );
        // Stop the reaper before the prefetch pool drains
        self.reaper.take();
    }
}

/// Bounds-clamped read-through view of another pixel source.
///
/// Used by the pyramid to encode one output tile straight from the
/// composite without copying anything.
pub struct SubImage<'a> {
    source: &'a dyn PixelSource,
    rect: Rect,
}

impl<'a> SubImage<'a> {
    /// View of `rect ∩ source.bounds()`
    pub fn new(source: &'a dyn PixelSource, rect: Rect) -> Self {
        Self {
            rect: rect.intersect(&source.bounds()),
            source,
        }
    }
}

impl PixelSource for SubImage<'_> {
    fn bounds(&self) -> Rect {
        self.rect
    }

    fn rgba_at(&self, x: i32, y: i32) -> Rgba<u8> {
        if !self.rect.contains(x, y) {
            return TRANSPARENT;
        }
        self.source.rgba_at(x, y)
    }

    fn is_opaque(&self) -> bool {
        self.source.is_opaque()
    }

    fn read_span(&self, y: i32, x0: i32, x1: i32, out: &mut Vec<u8>) -> Result<()> {
        let Some((lo, hi)) = clip_span(&self.rect, y, x0, x1) else {
            pad(out, x1 - x0);
            return Ok(());
        };
        pad(out, lo - x0);
        self.source.read_span(y, lo, hi, out)?;
        pad(out, x1 - hi);
        Ok(())
    }
}

/// Log a one-line summary of a finished scan
pub fn log_scan_summary(image: &CompositeImage) {
    let (read, total) = image.progress();
    info!(
        "Composite {} scanned: {} of {} pixels, {} tiles, {} KiB decoded, {} rows prefetched",
        image.bounds(),
        read,
        total,
        image.tiles().len(),
        image.tiles().decoded_bytes() / 1024,
        image.prefetch_jobs()
    );
}
