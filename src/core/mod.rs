//! Core engine - geometry, partitioning, row caches, the composite and
//! its exporters.
//!
//! Nothing here knows about file formats on the way in beyond PNG tiles,
//! or about the command line.

pub mod composite;
pub mod geom;
pub mod limiter;
pub mod partition;
pub mod progress;
pub mod pyramid;
pub mod reaper;
pub mod row_cache;
pub mod workers;

pub use composite::{CompositeBuilder, CompositeConfig, CompositeImage, ScanPolicy, SubImage};
pub use geom::{Point, Rect};
pub use limiter::{Limiter, Permit};
pub use progress::ExportProgress;
pub use pyramid::{PyramidConfig, PyramidExporter};
pub use reaper::Reaper;
pub use row_cache::{RowCache, RowState};
pub use workers::Workers;
