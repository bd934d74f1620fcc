//! Run configuration resolved from the command line and the environment.
//!
//! Priority for the input directory: `--input` → `STITCHA_INPUT` → `./output`.
//! Everything else comes from flags with clap defaults. Validation happens
//! once here so the engine can assume sane values.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::debug;

use crate::cli::{Args, BlendMethod};
use crate::core::composite::{CompositeConfig, ScanPolicy};
use crate::core::geom::{Point, Rect};
use crate::core::pyramid::PyramidConfig;
use crate::encode::{EncodeOptions, FlatFormat};
use crate::entities::{BlendStrategy, Median, Overlay, Voronoi};
use crate::error::{Result, StitchError};
use crate::overlays::{Entities, PlayerPath};

/// Environment variable naming the tile directory
pub const INPUT_ENV: &str = "STITCHA_INPUT";
const DEFAULT_INPUT: &str = "output";

/// What the output path asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputKind {
    Flat(FlatFormat),
    Dzi,
}

impl OutputKind {
    /// Infer from the output path's extension
    pub fn from_path(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .ok_or_else(|| StitchError::config(format!("output {:?} has no extension", path)))?;
        if ext.eq_ignore_ascii_case("dzi") {
            return Ok(Self::Dzi);
        }
        FlatFormat::from_extension(ext)
            .map(Self::Flat)
            .ok_or_else(|| StitchError::config(format!("unknown output format {:?}", ext)))
    }
}

/// Explicit output bounds; missing sides fall back to the tile bounds
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BoundsOverride {
    pub xmin: Option<i32>,
    pub ymin: Option<i32>,
    pub xmax: Option<i32>,
    pub ymax: Option<i32>,
}

impl BoundsOverride {
    pub fn is_set(&self) -> bool {
        self.xmin.is_some() || self.ymin.is_some() || self.xmax.is_some() || self.ymax.is_some()
    }

    /// Output rectangle given the bounds of all tiles
    pub fn resolve(&self, tiles: Rect) -> Result<Rect> {
        let min = Point::new(self.xmin.unwrap_or(tiles.min.x), self.ymin.unwrap_or(tiles.min.y));
        let max = Point::new(self.xmax.unwrap_or(tiles.max.x), self.ymax.unwrap_or(tiles.max.y));
        if min.x >= max.x || min.y >= max.y {
            return Err(StitchError::config(format!(
                "output rectangle ({},{})-({},{}) is empty",
                min.x, min.y, max.x, max.y
            )));
        }
        Ok(Rect { min, max })
    }
}

/// Validated run configuration
#[derive(Debug, Clone)]
pub struct StitchConfig {
    pub input: PathBuf,
    pub output: PathBuf,
    pub output_kind: OutputKind,
    pub divide: u32,
    pub blend: BlendMethod,
    pub blend_tile_limit: usize,
    pub bounds: BoundsOverride,
    pub composite: CompositeConfig,
    pub pyramid: PyramidConfig,
    pub encode: EncodeOptions,
    pub entities: Option<PathBuf>,
    pub player_path: Option<PathBuf>,
    pub show_progress: bool,
}

impl StitchConfig {
    pub fn from_args(args: &Args) -> Result<Self> {
        Self::resolve(args, std::env::var(INPUT_ENV).ok())
    }

    fn resolve(args: &Args, env_input: Option<String>) -> Result<Self> {
        if args.divide < 1 {
            return Err(StitchError::config("--divide must be at least 1"));
        }
        if args.row_height == 0 {
            return Err(StitchError::config("--row-height must be positive"));
        }
        if args.cell_size == 0 {
            return Err(StitchError::config("--cell-size must be positive"));
        }
        if !(1..=100).contains(&args.jpeg_quality) {
            return Err(StitchError::config("--jpeg-quality must be within 1..=100"));
        }
        if args.workers == Some(0) {
            return Err(StitchError::config("--workers must be positive"));
        }

        let output_kind = OutputKind::from_path(&args.output)?;
        let encode = EncodeOptions {
            png_compression: args.png_compression,
            jpeg_quality: args.jpeg_quality,
        };
        let pyramid = PyramidConfig {
            tile_size: args.dzi_tile_size,
            overlap: args.dzi_overlap,
            encode,
            ..PyramidConfig::default()
        };
        pyramid.validate()?;

        let defaults = CompositeConfig::default();
        let composite = CompositeConfig {
            row_height: args.row_height,
            cell_size: args.cell_size,
            threads: args.workers.unwrap_or(defaults.threads),
            // Pyramid tiles are read by several encoders at once
            scan_policy: match output_kind {
                OutputKind::Dzi => ScanPolicy::Shared,
                OutputKind::Flat(_) => ScanPolicy::Sequential,
            },
            ..defaults
        };

        let input = resolve_input(args.input.clone(), env_input);
        debug!("Input directory: {:?}", input);

        Ok(Self {
            input,
            output: args.output.clone(),
            output_kind,
            divide: args.divide,
            blend: args.blend,
            blend_tile_limit: args.blend_tile_limit,
            bounds: BoundsOverride {
                xmin: args.xmin,
                ymin: args.ymin,
                xmax: args.xmax,
                ymax: args.ymax,
            },
            composite,
            pyramid,
            encode,
            entities: args.entities.clone(),
            player_path: args.player_path.clone(),
            show_progress: !args.quiet,
        })
    }

    pub fn blend_strategy(&self) -> Arc<dyn BlendStrategy> {
        match self.blend {
            BlendMethod::Median => Arc::new(Median {
                limit: self.blend_tile_limit,
            }),
            BlendMethod::Voronoi => Arc::new(Voronoi {
                limit: self.blend_tile_limit,
            }),
        }
    }

    /// Load the requested overlays, entities first so the path draws on top
    pub fn load_overlays(&self) -> Result<Vec<Arc<dyn Overlay>>> {
        let mut overlays: Vec<Arc<dyn Overlay>> = Vec::new();
        if let Some(path) = &self.entities {
            overlays.push(Arc::new(Entities::load(path)?));
        }
        if let Some(path) = &self.player_path {
            overlays.push(Arc::new(PlayerPath::load(path)?));
        }
        Ok(overlays)
    }
}

/// CLI → env → `./output`
fn resolve_input(cli: Option<PathBuf>, env: Option<String>) -> PathBuf {
    cli.or_else(|| env.filter(|s| !s.is_empty()).map(PathBuf::from))
        .unwrap_or_else(|| Path::new(".").join(DEFAULT_INPUT))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn args(extra: &[&str]) -> Args {
        let mut argv = vec!["stitcha"];
        argv.extend_from_slice(extra);
        Args::parse_from(argv)
    }

    #[test]
    fn test_input_priority() {
        let cli = Some(PathBuf::from("/cli"));
        assert_eq!(resolve_input(cli, Some("/env".into())), PathBuf::from("/cli"));
        assert_eq!(resolve_input(None, Some("/env".into())), PathBuf::from("/env"));
        assert_eq!(resolve_input(None, Some(String::new())), Path::new(".").join("output"));
        assert_eq!(resolve_input(None, None), Path::new(".").join("output"));
    }

    #[test]
    fn test_output_kind_from_extension() {
        let kind = |p: &str| OutputKind::from_path(Path::new(p)).ok();
        assert_eq!(kind("a.png"), Some(OutputKind::Flat(FlatFormat::Png)));
        assert_eq!(kind("a.JPEG"), Some(OutputKind::Flat(FlatFormat::Jpeg)));
        assert_eq!(kind("a.webp"), Some(OutputKind::Flat(FlatFormat::Webp)));
        assert_eq!(kind("map.dzi"), Some(OutputKind::Dzi));
        assert_eq!(kind("a.tiff"), None);
        assert_eq!(kind("noext"), None);
    }

    /// Test: invalid knobs are rejected up front
    #[test]
    fn test_validation() {
        for bad in [
            &["--divide", "0"][..],
            &["--row-height", "0"],
            &["--cell-size", "0"],
            &["--dzi-tile-size", "0", "-o", "x.dzi"],
            &["--jpeg-quality", "0"],
            &["--jpeg-quality", "101"],
            &["--workers", "0"],
            &["-o", "out.bmp"],
        ] {
            let err = StitchConfig::resolve(&args(bad), None);
            assert!(matches!(err, Err(StitchError::Config(_))), "{bad:?} accepted");
        }
    }

    #[test]
    fn test_dzi_uses_shared_scan() {
        let cfg = StitchConfig::resolve(&args(&["-o", "map.dzi", "-w", "3"]), None).unwrap();
        assert_eq!(cfg.output_kind, OutputKind::Dzi);
        assert_eq!(cfg.composite.scan_policy, ScanPolicy::Shared);
        assert_eq!(cfg.composite.threads, 3);

        let cfg = StitchConfig::resolve(&args(&[]), None).unwrap();
        assert_eq!(cfg.composite.scan_policy, ScanPolicy::Sequential);
        assert_eq!(cfg.blend_strategy().name(), "median");
    }

    #[test]
    fn test_bounds_override() {
        let tiles = Rect::new(-100, -100, 100, 100);
        let partial = BoundsOverride {
            xmin: Some(0),
            ymax: Some(50),
            ..Default::default()
        };
        assert_eq!(partial.resolve(tiles).unwrap(), Rect::new(0, -100, 100, 50));
        assert_eq!(BoundsOverride::default().resolve(tiles).unwrap(), tiles);

        let inverted = BoundsOverride {
            xmin: Some(10),
            xmax: Some(10),
            ..Default::default()
        };
        assert!(inverted.resolve(tiles).is_err());
    }
}
