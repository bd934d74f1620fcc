//! Row cache: one horizontal strip of the composite, regenerated on demand.
//!
//! **Why**: The composite is far too large to hold in memory, but encoders
//! read it top to bottom. Holding a couple of fully blended strips at a time
//! gives them a conventional scan-ordered image at bounded memory.
//!
//! **Used by**: `CompositeImage` (one row per strip), reaper (idle sweeps).
//!
//! # State machine
//!
//! ```text
//! Empty ──regenerate──> Regenerating ──ok──> Populated
//!   ^                        │                  │
//!   └────────error───────────┘                  │
//!   └──────────── idle expired / invalidate ────┘
//! ```
//!
//! Readers arriving while a row regenerates wait on the row's condition
//! variable and then share the same buffer.

use std::sync::{Arc, Condvar, Mutex, MutexGuard};

use image::Rgba;
use log::{debug, trace};

use super::geom::Rect;
use super::partition::hilbertify;
use super::workers::run_batch;
use crate::entities::{BlendStrategy, Canvas, Overlay, Tile, TileSet};
use crate::error::Result;

/// Everything a row needs to regenerate itself.
///
/// Cheap to clone; shared by the composite, its rows and the prefetch worker.
#[derive(Clone)]
pub struct RegenContext {
    pub tiles: TileSet,
    pub blend: Arc<dyn BlendStrategy>,
    pub overlays: Arc<Vec<Arc<dyn Overlay>>>,
    pub background: Rgba<u8>,
    pub cell_size: u32,
    pub threads: usize,
}

/// Observable row state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowState {
    Empty,
    Regenerating,
    Populated,
}

#[derive(Debug)]
struct RowInner {
    state: RowState,
    buffer: Option<Arc<Canvas>>,
    idle: u32,
    // Set when invalidate() hits a row mid-regeneration
    discard: bool,
}

/// One cached strip of the composite
#[derive(Debug)]
pub struct RowCache {
    rect: Rect,
    inner: Mutex<RowInner>,
    changed: Condvar,
}

impl RowCache {
    pub fn new(rect: Rect) -> Self {
        Self {
            rect,
            inner: Mutex::new(RowInner {
                state: RowState::Empty,
                buffer: None,
                idle: 0,
                discard: false,
            }),
            changed: Condvar::new(),
        }
    }

    pub fn rect(&self) -> Rect {
        self.rect
    }

    fn lock(&self) -> MutexGuard<'_, RowInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn state(&self) -> RowState {
        self.lock().state
    }

    /// Cached buffer, if populated. Does not regenerate or reset idling.
    #[cfg(test)]
    pub fn peek(&self) -> Option<Arc<Canvas>> {
        self.lock().buffer.clone()
    }

    /// Return the row buffer, regenerating it if needed.
    ///
    /// Safe to call from many threads: only one regenerates, the others wait
    /// for its result. A failed regeneration is not cached and the error is
    /// returned to the regenerating caller; waiters retry.
    pub fn regenerate(&self, ctx: &RegenContext) -> Result<Arc<Canvas>> {
        let mut inner = self.lock();
        loop {
            match inner.state {
                RowState::Populated => {
                    if let Some(buffer) = inner.buffer.clone() {
                        inner.idle = 0;
                        return Ok(buffer);
                    }
                    inner.state = RowState::Empty;
                }
                RowState::Regenerating => {
                    inner = self.changed.wait(inner).unwrap_or_else(|e| e.into_inner());
                }
                RowState::Empty => break,
            }
        }
        inner.state = RowState::Regenerating;
        inner.discard = false;
        drop(inner);

        let mut guard = RegenGuard { row: self, done: false };
        let result = self.render(ctx).map(Arc::new);

        let mut inner = self.lock();
        match &result {
            Ok(buffer) if !inner.discard => {
                inner.state = RowState::Populated;
                inner.buffer = Some(Arc::clone(buffer));
                inner.idle = 0;
            }
            _ => {
                inner.state = RowState::Empty;
                inner.buffer = None;
            }
        }
        inner.discard = false;
        guard.done = true;
        drop(inner);
        self.changed.notify_all();

        result
    }

    fn render(&self, ctx: &RegenContext) -> Result<Canvas> {
        let tiles = ctx.tiles.overlapping(&self.rect);
        let cells = hilbertify(&self.rect, ctx.cell_size);
        debug!(
            "Regenerating row {} ({} tiles, {} cells)",
            self.rect,
            tiles.len(),
            cells.len()
        );

        let row = Mutex::new(Canvas::new(self.rect, ctx.background));
        let tiles = &tiles;
        let row_ref = &row;
        let blend = ctx.blend.as_ref();
        let background = ctx.background;

        let jobs: Vec<_> = cells
            .into_iter()
            .map(|cell| {
                move || -> Result<()> {
                    let cell_tiles: Vec<&Tile> = tiles
                        .iter()
                        .filter(|t| t.bounds().overlaps(&cell))
                        .map(|t| t.as_ref())
                        .collect();
                    if cell_tiles.is_empty() {
                        return Ok(());
                    }
                    let mut canvas = Canvas::new(cell, background);
                    blend.draw(&cell_tiles, &mut canvas)?;
                    row_ref
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .blit(&canvas);
                    Ok(())
                }
            })
            .collect();

        run_batch(jobs, ctx.threads)?;

        let mut canvas = row.into_inner().unwrap_or_else(|e| e.into_inner());
        for overlay in ctx.overlays.iter() {
            overlay.draw(&mut canvas)?;
        }
        Ok(canvas)
    }

    /// Count one idle period; drop the buffer once more than `threshold`
    /// periods passed without a read. Returns true if dropped.
    pub fn invalidate_auto(&self, threshold: u32) -> bool {
        let mut inner = self.lock();
        if inner.state != RowState::Populated {
            return false;
        }
        inner.idle += 1;
        if inner.idle > threshold {
            inner.state = RowState::Empty;
            inner.buffer = None;
            inner.idle = 0;
            trace!("Row {} expired", self.rect);
            return true;
        }
        false
    }

    /// Drop the buffer now. A regeneration in flight is not cached.
    pub fn invalidate(&self) {
        let mut inner = self.lock();
        match inner.state {
            RowState::Populated => {
                inner.state = RowState::Empty;
                inner.buffer = None;
                inner.idle = 0;
                trace!("Row {} invalidated", self.rect);
            }
            RowState::Regenerating => inner.discard = true,
            RowState::Empty => {}
        }
    }
}

/// Resets a row to `Empty` if rendering unwinds, so waiters don't hang
struct RegenGuard<'a> {
    row: &'a RowCache,
    done: bool,
}

impl Drop for RegenGuard<'_> {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        let mut inner = self.row.lock();
        inner.state = RowState::Empty;
        inner.buffer = None;
        drop(inner);
        self.row.changed.notify_all();
    }
}
