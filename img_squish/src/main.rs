use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use console::style;
use img_squish::config::{Config, DEFAULT_CONFIG_FILE};
use img_squish::converter::{ConversionParams, JxlConverter, WebpConverter};
use img_squish::learner::FormatLearner;
use img_squish::notify::notifier_for;
use img_squish::orchestrator::DualConverter;
use img_squish::probe::{detect_formats, scan_folder};
use img_squish::processor::{describe_report, ImageProcessor, ImageTask};
use img_squish::scheduler::{BatchScheduler, SchedulerOptions};
use img_squish::vision::extractor_for;
use shared_utils::logging::{init_logging, LogConfig};
use shared_utils::{print_summary_report, resolve_worker_count};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "img-squish")]
#[command(
    version,
    about = "Losslessly compress images by converting to JPEG XL/WebP and keeping the smallest file",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Convert every image in a folder, keeping the smallest version
    Run {
        #[arg(value_name = "FOLDER")]
        folder: PathBuf,

        /// Only process the top-level folder
        #[arg(long)]
        no_recursive: bool,

        /// Worker threads (default: config value, then CPU count)
        #[arg(short, long)]
        threads: Option<usize>,

        #[arg(short, long, value_name = "PATH", default_value = DEFAULT_CONFIG_FILE)]
        config: PathBuf,

        /// Minimum size reduction in percent for a converted file to be kept
        #[arg(long, value_name = "PCT")]
        min_improvement: Option<f64>,

        /// Disable vision features in the format learner
        #[arg(long)]
        no_vision: bool,

        /// Hide the progress bar
        #[arg(short, long)]
        quiet: bool,
    },

    /// Print the format learner's detailed report
    Stats {
        #[arg(short, long, value_name = "PATH", default_value = DEFAULT_CONFIG_FILE)]
        config: PathBuf,
    },

    /// Write a configuration file with default values
    InitConfig {
        #[arg(value_name = "PATH", default_value = DEFAULT_CONFIG_FILE)]
        path: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            folder,
            no_recursive,
            threads,
            config,
            min_improvement,
            no_vision,
            quiet,
        } => {
            let mut cfg = Config::load(&config)
                .with_context(|| format!("Failed to load config {}", config.display()))?;
            if no_recursive {
                cfg.recursive = false;
            }
            if let Some(pct) = min_improvement {
                cfg.min_improvement_pct = pct;
            }
            if no_vision {
                cfg.enable_vision = false;
            }
            let cfg = cfg.validate().context("Invalid command-line override")?;
            run(&folder, threads, &cfg, quiet)
        }
        Commands::Stats { config } => {
            let cfg = Config::load(&config)
                .with_context(|| format!("Failed to load config {}", config.display()))?;
            let learner = FormatLearner::open(&cfg.stats_path(), extractor_for(false));
            println!("{}", learner.detailed_report());
            Ok(())
        }
        Commands::InitConfig { path } => {
            if path.exists() {
                bail!("{} already exists, not overwriting", path.display());
            }
            Config::write_default(&path)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!("✅ Wrote default configuration to {}", path.display());
            Ok(())
        }
    }
}

fn run(folder: &Path, threads: Option<usize>, cfg: &Config, quiet: bool) -> anyhow::Result<()> {
    if let Err(e) = init_logging("img_squish", LogConfig::from_log_path(&cfg.log_file)) {
        eprintln!("⚠️  File logging disabled: {:#}", e);
    }

    if !folder.exists() {
        bail!("Folder '{}' does not exist", folder.display());
    }
    if !folder.is_dir() {
        bail!("'{}' is not a directory", folder.display());
    }

    info!(folder = %folder.display(), recursive = cfg.recursive, "Starting image compression");
    println!("📂 Scanning folder: {}", folder.display());
    println!(
        "   Mode: {}",
        if cfg.recursive {
            "Recursive (processing subdirectories)"
        } else {
            "Top-level only"
        }
    );

    let files = scan_folder(folder, cfg.recursive, &cfg.skip_extensions);
    if files.is_empty() {
        println!("No image files found.");
        return Ok(());
    }

    let formats: Vec<String> = detect_formats(&files).into_iter().collect();
    println!("   Found {} image file(s)", files.len());
    println!("   Formats detected: {}", formats.join(", "));

    let jxl = JxlConverter::discover();
    match jxl.binary() {
        Some(path) => println!(
            "{} JPEG XL support available (using {})",
            style("✓").green(),
            path.display()
        ),
        None => {
            println!(
                "{} JPEG XL support not available (cjxl not found)",
                style("⚠").yellow()
            );
            println!("  Install libjxl (e.g. `brew install jpeg-xl` or `apt install libjxl-tools`)");
            println!("  Images will only be converted to WebP.");
        }
    }
    println!();

    let learner = Arc::new(FormatLearner::open(
        &cfg.stats_path(),
        extractor_for(cfg.enable_vision),
    ));
    {
        let learner = Arc::clone(&learner);
        if let Err(e) = ctrlc::set_handler(move || {
            learner.save();
            eprintln!("\n⚠️  Interrupted, learner statistics saved");
            std::process::exit(130);
        }) {
            warn!(error = %e, "Could not install Ctrl-C handler");
        }
    }

    let tasks = ImageTask::from_paths(&files);
    let total = tasks.len();
    let alloc = resolve_worker_count(threads, cfg.threads, total);
    info!(workers = alloc.workers, source = ?alloc.source, images = total, "Worker pool sized");

    let processor = ImageProcessor::new(
        DualConverter::new(
            Arc::new(jxl),
            Arc::new(WebpConverter::new()),
            ConversionParams::from(cfg),
        ),
        Arc::clone(&learner),
        cfg.min_improvement_pct,
    );

    let mut scheduler = BatchScheduler::new(
        SchedulerOptions {
            workers: alloc.workers,
            hang_timeout: cfg.hang_timeout(),
            quiet,
        },
        notifier_for(cfg.enable_notifications),
    );
    let summary = scheduler.run(tasks, |task| processor.process(task));
    learner.save();

    for report in &summary.reports {
        println!("{}", describe_report(report, total));
    }
    print_summary_report(&summary.summary_report());
    if summary.hang_alerts > 0 {
        println!(
            "{} {} potential hang(s) detected, see the log for details",
            style("⚠").yellow(),
            summary.hang_alerts
        );
    }

    println!();
    println!("{}", learner.statistics_summary());
    println!("Log file: {}", cfg.log_file);
    Ok(())
}
