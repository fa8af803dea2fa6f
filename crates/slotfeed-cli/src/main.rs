#![allow(clippy::doc_markdown)]
#![allow(clippy::uninlined_format_args)]
//! `slotfeed` CLI - drive feeds from the command line
//!
//! Usage:
//!   `slotfeed run --devices 2 data/part-*`
//!   `slotfeed archive -o dump.bin data/part-*`
//!   `slotfeed inspect dump.bin --limit 5`
//!   `slotfeed sample --capacity 100 data/part-*`
//!   `slotfeed config`

mod dump;
mod run;

use clap::{Parser, Subcommand, ValueEnum};
use slotfeed_core::{FeedConfig, FeedKind};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "slotfeed")]
#[command(author, version, about = "slotfeed CLI - slot record ingestion and batching")]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file
    #[arg(
        short,
        long,
        global = true,
        default_value = "slotfeed.toml",
        env = "SLOTFEED_CONFIG"
    )]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// CLI feed kind option
#[derive(Debug, Clone, Copy, ValueEnum)]
enum KindArg {
    InMemory,
    Streaming,
    PageView,
}

impl From<KindArg> for FeedKind {
    fn from(k: KindArg) -> Self {
        match k {
            KindArg::InMemory => FeedKind::InMemory,
            KindArg::Streaming => FeedKind::Streaming,
            KindArg::PageView => FeedKind::PageView,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Read files and pack every batch on one or more devices
    Run {
        /// Input files
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Number of devices (one feed thread each)
        #[arg(long, default_value = "1")]
        devices: usize,

        /// Feed variant (overrides reader.kind)
        #[arg(long, value_enum)]
        kind: Option<KindArg>,

        /// Records per batch (overrides reader.batch_size)
        #[arg(long)]
        batch_size: Option<usize>,

        /// Probability of keeping a record (overrides reader.sample_rate)
        #[arg(long)]
        sample_rate: Option<f32>,

        /// Input files are binary archives
        #[arg(long)]
        archive: bool,
    },

    /// Parse text files into one binary archive
    Archive {
        /// Input text files
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Archive to write
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Print the records of an archive
    Inspect {
        /// Archive file
        file: PathBuf,

        /// Maximum number of records to print
        #[arg(long, default_value = "10")]
        limit: usize,

        /// Print JSON lines instead of text
        #[arg(long)]
        json: bool,
    },

    /// Load files and print the reservoir sample
    Sample {
        /// Input files
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Reservoir capacity (overrides sampling.capacity)
        #[arg(long)]
        capacity: Option<usize>,

        /// RNG seed (overrides sampling.seed)
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Print the effective configuration as TOML
    Config,
}

fn init_logging(level: &str) {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| level.to_string()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = FeedConfig::load_from_path(&cli.config)?;
    init_logging(&config.logging.level);

    match cli.command {
        Commands::Run {
            files,
            devices,
            kind,
            batch_size,
            sample_rate,
            archive,
        } => {
            if let Some(kind) = kind {
                config.reader.kind = kind.into();
            }
            if let Some(batch_size) = batch_size {
                config.reader.batch_size = batch_size;
            }
            if let Some(rate) = sample_rate {
                config.reader.sample_rate = rate;
            }
            config.reader.load_archive |= archive;

            let summary = run::run(config, files, devices)?;
            println!(
                "{} records in {} batches across {} device(s), {} feasigns, {:.2}s",
                summary.records,
                summary.batches,
                summary.devices.len(),
                summary.feasigns,
                summary.elapsed.as_secs_f64()
            );
            for report in &summary.devices {
                println!(
                    "  device {}: {} batches, {} records, pack {:?}, transfer {:?}",
                    report.device,
                    report.batches,
                    report.records,
                    report.pack_time,
                    report.trans_time
                );
            }
        }
        Commands::Archive { files, output } => {
            let written = dump::archive(config, files, &output)?;
            println!("Wrote {} records to {}", written, output.display());
        }
        Commands::Inspect { file, limit, json } => {
            let records = dump::inspect(config, &file, limit)?;
            for record in &records {
                if json {
                    println!("{}", record.to_json());
                } else {
                    println!("{}", dump::format_record(record));
                }
            }
        }
        Commands::Sample {
            files,
            capacity,
            seed,
        } => {
            if let Some(capacity) = capacity {
                config.sampling.capacity = capacity;
            }
            if seed.is_some() {
                config.sampling.seed = seed;
            }
            let sample = dump::sample(config, files)?;
            println!("Sampled {} of {} records:", sample.resident.len(), sample.seen);
            for id in &sample.resident {
                println!("  {}", id);
            }
        }
        Commands::Config => {
            config.validate()?;
            print!("{}", config.to_toml()?);
        }
    }

    Ok(())
}
