//! batch_detect - run a detector over every video of a dataset
//!
//! This binary:
//! 1. Resolves the run configuration (settings file, env, `--set` overrides)
//! 2. Checks the input directory, detector config and checkpoint exist
//! 3. Asks for confirmation (skip with `--yes`)
//! 4. Loads the detector once
//! 5. Writes one detections JSON (and optionally one annotated video) per input video,
//!    skipping videos whose JSON already exists and is non-empty

use anyhow::{Context, Result};
use clap::Parser;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::Arc;

use batch_detect::ui::confirm;
use batch_detect::{run_batch, FileOpener, Predictor, RunConfig, SyntheticOpener, Ui};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Settings file (TOML). Defaults to <root>/settings.toml.
    #[arg(long, env = "BATCH_DETECT_CONFIG")]
    config: Option<PathBuf>,
    /// Project root that settings paths are relative to.
    #[arg(long, default_value = ".")]
    root: PathBuf,
    /// Inline override as key=value (repeatable), e.g. --set confidence=0.3
    #[arg(long = "set", value_name = "KEY=VALUE")]
    overrides: Vec<String>,
    /// Do not ask for confirmation.
    #[arg(short, long)]
    yes: bool,
    /// Output style: auto, plain or pretty.
    #[arg(long)]
    ui: Option<String>,
    /// Skip decoding and feed N synthetic frames per file (dry run).
    #[arg(long, value_name = "FRAMES")]
    synthetic: Option<u64>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let root = if args.root.is_absolute() {
        args.root.clone()
    } else {
        std::env::current_dir()
            .context("resolving current directory")?
            .join(&args.root)
    };
    let cfg = RunConfig::load(args.config.as_deref(), &root, &args.overrides)?;
    log::info!(
        "dataset={} detector={} confidence={} parallel={} writer={}",
        cfg.dataset,
        cfg.detector,
        cfg.confidence,
        cfg.parallel,
        cfg.writer
    );

    println!("Input: {}", cfg.video_in_dir.display());
    println!("Output: {}", cfg.json_out_dir.display());
    println!("Generate video: {}", cfg.generate_videos);
    println!("Output video: {}", cfg.video_out_dir.display());

    if !args.yes {
        let stdin = std::io::stdin();
        let mut input = stdin.lock();
        let mut output = std::io::stdout();
        if !confirm("\nDo you want to continue?", false, &mut input, &mut output)? {
            eprintln!("Aborted.");
            std::process::exit(1);
        }
    }

    let ui = Ui::from_args(args.ui.as_deref(), std::io::stderr().is_terminal());
    let detector_cfg = Arc::new(cfg.detector_config()?);
    let mut predictor = {
        let _stage = ui.stage("load detector");
        Predictor::new(detector_cfg, cfg.parallel, cfg.workers)?
    };

    let mut progress = ui.batch_progress();
    let summary = match args.synthetic {
        Some(frames) => run_batch(
            &cfg,
            &mut predictor,
            &SyntheticOpener::new(frames),
            &mut progress,
        )?,
        None => run_batch(&cfg, &mut predictor, &FileOpener, &mut progress)?,
    };

    log::info!(
        "batch complete: {} videos, {} processed, {} skipped",
        summary.total,
        summary.processed,
        summary.skipped
    );
    Ok(())
}
