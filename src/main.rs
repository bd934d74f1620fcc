use anyhow::{Context, Result};
use clap::Parser;
use log::{debug, info};
use std::path::PathBuf;
use std::time::Instant;

use stitcha::cli::Args;
use stitcha::config::{OutputKind, StitchConfig};
use stitcha::core::composite::{log_scan_summary, CompositeImage};
use stitcha::core::progress::ExportProgress;
use stitcha::core::pyramid::PyramidExporter;
use stitcha::encode::export_flat;
use stitcha::entities::TileSet;

fn init_logging(args: &Args) -> Result<()> {
    // 0 (default) = warn, 1 (-v) = info, 2 (-vv) = debug, 3+ (-vvv) = trace
    let log_level = match args.verbosity {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    if let Some(log_path_opt) = &args.log_file {
        let log_path = log_path_opt
            .clone()
            .unwrap_or_else(|| PathBuf::from("stitcha.log"));
        let file = std::fs::File::create(&log_path)
            .with_context(|| format!("Failed to create log file {}", log_path.display()))?;

        env_logger::Builder::new()
            .filter_level(log_level)
            .format_timestamp_millis()
            .target(env_logger::Target::Pipe(Box::new(file)))
            .init();

        info!("Logging to file: {} (level: {:?})", log_path.display(), log_level);
    } else {
        // Respects RUST_LOG if set
        let default_level = match args.verbosity {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        };
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
            .format_timestamp_millis()
            .init();
    }
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args)?;

    info!("Stitcha v{} starting...", env!("CARGO_PKG_VERSION"));
    debug!("Command-line args: {:?}", args);

    let config = StitchConfig::from_args(&args).context("Invalid arguments")?;
    let started = Instant::now();

    let overlays = config.load_overlays().context("Failed to load overlays")?;

    let tiles = TileSet::load_dir(&config.input, config.divide)
        .with_context(|| format!("Failed to load tiles from {}", config.input.display()))?;
    let bounds = config.bounds.resolve(tiles.bounds())?;
    info!(
        "Loaded {} tiles covering {}, output rectangle {}",
        tiles.len(),
        tiles.bounds(),
        bounds
    );

    let mut builder = CompositeImage::builder(tiles)
        .bounds(bounds)
        .blend(config.blend_strategy())
        .config(config.composite.clone());
    for overlay in overlays {
        builder = builder.overlay(overlay);
    }
    let image = builder.build().context("Failed to set up the composite")?;

    match config.output_kind {
        OutputKind::Flat(format) => {
            let progress = progress_bar(&config, "px");
            progress.set_message(format!("{} {}", format.extension(), config.output.display()));
            progress
                .run(
                    || image.progress(),
                    || export_flat(&image, &config.output, &config.encode),
                )
                .with_context(|| format!("Failed to export {}", config.output.display()))?;
            log_scan_summary(&image);
        }
        OutputKind::Dzi => {
            let exporter = PyramidExporter::new(config.pyramid, config.composite.clone())?;
            let progress = progress_bar(&config, "tiles");
            progress.set_message(format!("dzi {}", config.output.display()));
            progress
                .run(
                    || exporter.progress(),
                    || exporter.export(image, &config.output),
                )
                .with_context(|| format!("Failed to export {}", config.output.display()))?;
        }
    }

    info!(
        "Wrote {} in {:.1}s",
        config.output.display(),
        started.elapsed().as_secs_f64()
    );
    Ok(())
}

fn progress_bar(config: &StitchConfig, unit: &str) -> ExportProgress {
    if config.show_progress {
        ExportProgress::new(unit)
    } else {
        ExportProgress::hidden()
    }
}
