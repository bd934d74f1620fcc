use clap::{Parser, ValueEnum};
use std::path::PathBuf;

use crate::encode::PngCompression;

// Build version with codec info
const VERSION_INFO: &str = const_format::concatcp!(
    env!("CARGO_PKG_VERSION"), "\n",
    "Codecs: png (streaming), jpeg, webp (lossless)\n",
    "Target: ", std::env::consts::ARCH, "-", std::env::consts::OS
);

/// How overlapping tiles are merged
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum BlendMethod {
    /// Per-channel median of the covering tiles
    #[default]
    Median,
    /// Colour of the tile whose centre is nearest
    Voronoi,
}

/// Stitch position-tagged PNG captures into one large image
#[derive(Parser, Debug)]
#[command(author, version = VERSION_INFO, about, long_about = None)]
pub struct Args {
    /// Directory with `<x>,<y>.png` tiles (default: $STITCHA_INPUT or ./output)
    #[arg(short = 'i', long = "input", value_name = "DIR")]
    pub input: Option<PathBuf>,

    /// Output file; the extension picks the format (png, jpg, webp, dzi)
    #[arg(short = 'o', long = "output", value_name = "FILE", default_value = "output.png")]
    pub output: PathBuf,

    /// Downscaling factor: 2 halves both sides
    #[arg(short = 'd', long = "divide", value_name = "N", default_value_t = 1)]
    pub divide: u32,

    /// Blend method for overlapping tiles
    #[arg(short = 'b', long = "blend", value_enum, default_value_t = BlendMethod::Median)]
    pub blend: BlendMethod,

    /// Blend only the N newest tiles per pixel (by modification time); 0 = all
    #[arg(long = "blend-tile-limit", value_name = "N", default_value_t = 9)]
    pub blend_tile_limit: usize,

    /// Left bound of the output rectangle (inclusive)
    #[arg(long = "xmin", value_name = "X", allow_hyphen_values = true)]
    pub xmin: Option<i32>,

    /// Upper bound of the output rectangle (inclusive)
    #[arg(long = "ymin", value_name = "Y", allow_hyphen_values = true)]
    pub ymin: Option<i32>,

    /// Right bound of the output rectangle (exclusive)
    #[arg(long = "xmax", value_name = "X", allow_hyphen_values = true)]
    pub xmax: Option<i32>,

    /// Lower bound of the output rectangle (exclusive)
    #[arg(long = "ymax", value_name = "Y", allow_hyphen_values = true)]
    pub ymax: Option<i32>,

    /// Height of one cached row in pixels
    #[arg(long = "row-height", value_name = "PX", default_value_t = 128)]
    pub row_height: u32,

    /// Side of the regeneration work cells in pixels
    #[arg(long = "cell-size", value_name = "PX", default_value_t = 512)]
    pub cell_size: u32,

    /// Deep-zoom tile size (dzi output only)
    #[arg(long = "dzi-tile-size", value_name = "PX", default_value_t = 512)]
    pub dzi_tile_size: u32,

    /// Deep-zoom tile overlap (dzi output only)
    #[arg(long = "dzi-overlap", value_name = "PX", default_value_t = 0)]
    pub dzi_overlap: u32,

    /// PNG compression preset
    #[arg(long = "png-compression", value_enum, default_value_t = PngCompression::Default)]
    pub png_compression: PngCompression,

    /// JPEG quality, 1-100
    #[arg(long = "jpeg-quality", value_name = "Q", default_value_t = 80)]
    pub jpeg_quality: u8,

    /// Entities JSON to draw as markers
    #[arg(long = "entities", value_name = "JSON")]
    pub entities: Option<PathBuf>,

    /// Player path JSON to draw as a health-coloured trail
    #[arg(long = "player-path", value_name = "JSON")]
    pub player_path: Option<PathBuf>,

    /// Worker threads per row regeneration (default: half the logical cores)
    #[arg(short = 'w', long = "workers", value_name = "N")]
    pub workers: Option<usize>,

    /// Don't draw a progress bar
    #[arg(short = 'q', long = "quiet")]
    pub quiet: bool,

    /// Enable debug logging to file (default: stitcha.log)
    #[arg(short = 'l', long = "log", value_name = "LOG_FILE")]
    pub log_file: Option<Option<PathBuf>>,

    /// Increase logging verbosity (default: warn, -v: info, -vv: debug, -vvv+: trace)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbosity: u8,
}
