use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing::warn;

use primeseg::config::{default_segment_size, default_threads};
use primeseg::storage::{self, PrimeSink, SegmentFiles, SharedFile};
use primeseg::{BigInt, SieveConfig, Summary, generate_primes_with};

#[derive(Parser)]
#[command(name = "primeseg")]
#[command(about = "Multithreaded segmented prime sieve over arbitrary-precision ranges", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Find all primes in [2, LIMIT] or below 2^BITS")]
    Generate {
        #[arg(
            help = "Inclusive upper limit (decimal, may exceed 64 bits)",
            required_unless_present = "bits",
            conflicts_with = "bits"
        )]
        limit: Option<BigInt>,
        #[arg(short, long, help = "Sieve every value below 2^BITS")]
        bits: Option<u32>,
        #[arg(
            short,
            long,
            help = "Number of worker threads (default: available cores)"
        )]
        threads: Option<usize>,
        #[arg(
            short,
            long,
            help = "Numbers per segment (default: 500000 from 32 bits up, 10000000 below)"
        )]
        segment_size: Option<u64>,
        #[arg(
            short,
            long,
            default_value = storage::DEFAULT_OUTPUT_DIR,
            help = "Directory for prime files and the execution log"
        )]
        output_dir: PathBuf,
        #[arg(long, help = "Write one ordered file instead of one file per segment")]
        shared_file: bool,
        #[arg(long, help = "Bit-width tag for file names (default: bit length of the limit)")]
        label: Option<u32>,
        #[arg(long, help = "Do not draw the progress bar")]
        no_progress: bool,
    },
    #[command(about = "Concatenate per-segment files into one ascending list")]
    Merge {
        #[arg(short, long, help = "Bit-width tag of the files to merge")]
        label: u32,
        #[arg(
            short,
            long,
            default_value = storage::DEFAULT_OUTPUT_DIR,
            help = "Directory holding the segment files"
        )]
        dir: PathBuf,
        #[arg(short, long, help = "Output file (default: stdout)")]
        output: Option<PathBuf>,
    },
}

fn init_logging() {
    // LOG_FORMAT=json for machine-readable lines, human-readable otherwise
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_default();
    if log_format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(io::stderr)
            .with_target(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(io::stderr)
            .with_target(false)
            .init();
    }
}

fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();

    match cli.command {
        Commands::Generate {
            limit,
            bits,
            threads,
            segment_size,
            output_dir,
            shared_file,
            label,
            no_progress,
        } => {
            let threads = threads.unwrap_or_else(default_threads);
            let mut config = match (limit, bits) {
                (_, Some(bits)) => SieveConfig::for_bits(bits, threads)
                    .with_context(|| format!("cannot sieve below 2^{bits}"))?,
                (Some(limit), None) => {
                    SieveConfig::new(limit, threads, default_segment_size(limit.bits()))
                }
                (None, None) => bail!("either LIMIT or --bits is required"),
            };
            if let Some(size) = segment_size {
                config = config.with_segment_size(size);
            }
            if let Some(label) = label {
                config = config.with_label(label);
            }
            config = config.with_progress(!no_progress);
            config.validate().context("invalid sieve parameters")?;

            println!(
                "Finding primes up to {} ({} threads, segment size {})...",
                config.limit, config.threads, config.segment_size
            );

            let summary = if shared_file {
                let path = output_dir.join(storage::shared_file_name(config.label));
                let sink = SharedFile::create(&path)
                    .with_context(|| format!("cannot create {}", path.display()))?;
                run(&config, &sink)?
            } else {
                let sink = SegmentFiles::new(&output_dir, config.label)
                    .with_context(|| format!("cannot create {}", output_dir.display()))?;
                run(&config, &sink)?
            };

            println!("\nTotal: {} primes found", summary.primes);
            let duration_us = summary.elapsed.as_micros();
            println!(
                "Execution time: {}us ({:.2}ms)",
                duration_us,
                duration_us as f64 / 1000.0
            );

            if let Err(e) = storage::log_execution(
                &output_dir,
                config.label,
                config.threads,
                config.segment_size,
                &summary,
            ) {
                warn!(error = %e, "failed to log execution");
            }
        }
        Commands::Merge { label, dir, output } => {
            let count = match output {
                Some(path) => {
                    let file = File::create(&path)
                        .with_context(|| format!("cannot create {}", path.display()))?;
                    let mut out = BufWriter::new(file);
                    storage::merge_segment_files(&dir, label, &mut out)?
                }
                None => {
                    let stdout = io::stdout();
                    let mut out = stdout.lock();
                    let count = storage::merge_segment_files(&dir, label, &mut out)?;
                    out.flush()?;
                    count
                }
            };
            eprintln!("Merged {count} primes from {}", dir.display());
        }
    }

    Ok(())
}

fn run(config: &SieveConfig, sink: &dyn PrimeSink) -> Result<Summary> {
    generate_primes_with(config, sink).with_context(|| format!("sieve up to {} failed", config.limit))
}
