//! Entities - the data the engine composites.
//!
//! - `Tile` / `TileSet`: positioned source rasters with lazy pixels
//! - `Canvas`: RGBA buffer anchored in world space
//! - `blend`: pixel combination strategies
//! - `traits`: seams between the engine and its collaborators

pub mod blend;
pub mod canvas;
pub mod tile;
pub mod tiles;
pub mod traits;

pub use blend::{Fast, Median, Voronoi};
pub use canvas::{Canvas, TRANSPARENT};
pub use tile::Tile;
pub use tiles::TileSet;
pub use traits::{BlendStrategy, Encoder, Overlay, PixelSource};
