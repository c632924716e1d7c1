#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

mod config;
mod error;
mod layout;
mod merge;
mod parse;
mod walk;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use config::MergeConfig;

/// Merge the images of a directory into one PDF, one page per image.
///
/// Images (PNG or JPEG) directly inside each DIR are ordered by file name and
/// written to DIR.pdf next to DIR. Name files like 001.jpg, 002.jpg, ... to
/// control page order.
#[derive(Parser)]
#[command(name = "img2pdf", version)]
struct Cli {
    /// dirs to merge
    dirs: Vec<PathBuf>,

    /// merge every sub-directory of each DIR into its own PDF
    #[arg(short, long)]
    batch: bool,

    /// keep each image at its original size (ignores -s, -l, -w, -e)
    #[arg(short, long)]
    free: bool,

    /// page size, A0 to A4
    #[arg(short, long, default_value = "A4")]
    size: String,

    /// landscape pages
    #[arg(short, long)]
    landscape: bool,

    /// page width in points, needs --height; overrides --size
    #[arg(short, long, default_value_t = 0.0, value_parser = parse_points)]
    width: f64,

    /// page height in points, needs --width; overrides --size
    #[arg(short = 'e', long, default_value_t = 0.0, value_parser = parse_points)]
    height: f64,

    /// parallel batch jobs
    #[arg(short = 'j', long, default_value_t = 1, value_parser = clap::value_parser!(u16).range(1..))]
    threads: u16,

    /// only print warnings and errors
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// print page placement details
    #[arg(short, long)]
    verbose: bool,

    /// print shell completions and exit
    #[arg(long, value_name = "SHELL")]
    completions: Option<clap_complete::Shell>,
}

/// page dimension in points, must be a finite number
fn parse_points(s: &str) -> Result<f64, String> {
    let value: f64 = s.parse().map_err(|e| format!("{}", e))?;
    if !value.is_finite() {
        return Err(format!("{} is not a finite number of points", s));
    }
    Ok(value)
}

impl Cli {
    fn config(&self) -> MergeConfig {
        MergeConfig {
            free: self.free,
            size: self.size.clone(),
            landscape: self.landscape,
            width: self.width,
            height: self.height,
            threads: self.threads as usize,
        }
    }

    fn log_filter(&self) -> EnvFilter {
        let level = if self.quiet {
            "warn"
        } else if self.verbose {
            "debug"
        } else {
            "info"
        };
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
    }
}

fn run(cli: &Cli) -> Result<()> {
    let config = cli.config();

    if config.threads > 1 {
        rayon::ThreadPoolBuilder::new()
            .num_threads(config.threads)
            .build_global()
            .context("Failed to configure thread pool")?;
    }

    for dir in &cli.dirs {
        if cli.batch {
            merge::merge_batch(dir, &config)
                .with_context(|| format!("Batch merge of {} failed", dir.display()))?;
        } else {
            merge::merge_dir(dir, &config)
                .with_context(|| format!("Merge of {} failed", dir.display()))?;
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Some(shell) = cli.completions {
        clap_complete::generate(shell, &mut Cli::command(), "img2pdf", &mut std::io::stdout());
        return ExitCode::SUCCESS;
    }

    tracing_subscriber::fmt()
        .with_env_filter(cli.log_filter())
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!("{:#}", err);
            ExitCode::from(1)
        }
    }
}
