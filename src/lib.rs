//! STITCHA - tiled image compositing library
//!
//! Composes thousands of overlapping, position-tagged PNG captures into one
//! large image that is read row by row and exported as PNG/JPEG/WebP or as a
//! deep-zoom pyramid. Re-exports all modules for use by the binary target.

// Core engine (geometry, rows, composite, exporters)
pub mod core;

pub mod cli;
pub mod config;
pub mod encode;
pub mod entities;
pub mod error;
pub mod overlays;

pub use crate::core::composite::{CompositeImage, ScanPolicy};
pub use crate::core::geom::{Point, Rect};
pub use entities::{BlendStrategy, Overlay, PixelSource, Tile, TileSet};
pub use error::{Result, StitchError};
