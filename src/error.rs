//! Error types shared by the stitching engine.
//!
//! **Why**: Configuration problems must fail fast with a readable message,
//! while per-tile decode problems are only logged. Both travel through the
//! same enum so worker batches can hand back "the first error" uniformly.

use std::path::PathBuf;

/// Result alias used across the library.
pub type Result<T> = std::result::Result<T, StitchError>;

/// Errors produced while loading tiles, compositing, or exporting.
#[derive(Debug, thiserror::Error)]
pub enum StitchError {
    /// Invalid construction parameters (empty bounds, zero sizes, ...)
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Tile file name does not follow the `<x>,<y>.png` pattern
    #[error("file name {0:?} does not match the \"<x>,<y>.png\" pattern")]
    TileName(PathBuf),

    /// Tile header or pixel data could not be read
    #[error("failed to read tile {path:?}: {source}")]
    TileImage {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    /// Directory scan produced no usable tiles
    #[error("no usable tiles found in {0:?}")]
    NoTiles(PathBuf),

    /// Overlay failed to render onto a row buffer
    #[error("overlay {name} failed: {reason}")]
    Overlay { name: &'static str, reason: String },

    /// Output exceeds a hard limit of the target format
    #[error("image size {width}x{height} exceeds the {format} limit of {limit} pixels per side")]
    ImageTooLarge {
        format: &'static str,
        width: u32,
        height: u32,
        limit: u32,
    },

    /// Encoding or writing an output file failed
    #[error("failed to export {path:?}: {reason}")]
    Export { path: PathBuf, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl StitchError {
    /// Shorthand for configuration errors
    pub fn config(msg: impl Into<String>) -> Self {
        StitchError::Config(msg.into())
    }

    /// Wrap any displayable failure as an export error for `path`
    pub fn export(path: impl Into<PathBuf>, reason: impl std::fmt::Display) -> Self {
        StitchError::Export {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}
