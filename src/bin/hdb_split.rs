//! hdb-split: split a hash database into two shard databases.
//!
//! ```bash
//! hdb-split source.tch 0x3 shard3.tch 0x5 shard5.tch --shards 8
//! hdb-split source.tch 3 a.tch 11 b.tch --partitions partitions.json
//! ```
//!
//! Both destinations are created with the source's bucket count,
//! alignment, free-block pool size and options.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;

use hdbkit::cli::{self, ResyncArg};
use hdbkit::progress::ProgressPrinter;
use hdbkit::shard::{PartitionLayout, PartitionTable};
use hdbkit::split::{self, Checkpoint, FileCheckpoint, NoCheckpoint, SplitOptions, SplitSummary, SplitTarget};

#[derive(Parser, Debug)]
#[command(name = "hdb-split", version, about = "Split a hash database into two shard databases")]
struct Args {
    /// Source database
    source: PathBuf,

    /// Bitmask owned by the first destination (decimal or 0x hex)
    #[arg(value_parser = parse_mask)]
    mask1: u64,

    /// First destination database (created or truncated)
    dest1: PathBuf,

    /// Bitmask owned by the second destination (decimal or 0x hex)
    #[arg(value_parser = parse_mask)]
    mask2: u64,

    /// Second destination database (created or truncated)
    dest2: PathBuf,

    /// JSON partition table; overrides the generated layout
    #[arg(long, value_name = "FILE", conflicts_with_all = ["shards", "primary_host", "backup_host", "start_port", "port_step"])]
    partitions: Option<PathBuf>,

    /// Number of shards in the generated table (power of two)
    #[arg(long, default_value_t = 16)]
    shards: u64,

    #[arg(long, default_value = "localhost")]
    primary_host: String,

    #[arg(long, default_value = "localhost")]
    backup_host: String,

    #[arg(long, default_value_t = 11000)]
    start_port: u16,

    #[arg(long, default_value_t = 2)]
    port_step: u16,

    /// Leave the deflate option set on destinations during the load
    #[arg(long)]
    no_keep_compressed: bool,

    /// Records between progress lines
    #[arg(long, value_name = "N", default_value_t = 1000)]
    progress_every: u64,

    /// How to recover when no record starts at the expected offset
    #[arg(long, value_enum, default_value_t = ResyncArg::Aligned)]
    resync: ResyncArg,

    /// Save the latest processed count and offset to this file
    #[arg(long, value_name = "FILE")]
    checkpoint: Option<PathBuf>,
}

fn parse_mask(s: &str) -> std::result::Result<u64, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("invalid bitmask '{s}': {e}"))
}

fn main() -> ExitCode {
    cli::init_logging();
    match run(Args::parse()) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(2),
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn partition_table(args: &Args) -> Result<PartitionTable> {
    match &args.partitions {
        Some(path) => PartitionTable::from_json_file(path)
            .with_context(|| format!("cannot load partition table {}", path.display())),
        None => {
            let layout = PartitionLayout {
                shard_count: args.shards,
                primary_host: args.primary_host.clone(),
                backup_host: args.backup_host.clone(),
                start_port: args.start_port,
                port_step: args.port_step,
            };
            Ok(PartitionTable::generate(&layout)?)
        }
    }
}

fn run(args: Args) -> Result<bool> {
    let table = partition_table(&args)?;
    let targets = [
        SplitTarget {
            bitmask: args.mask1,
            path: args.dest1.clone(),
        },
        SplitTarget {
            bitmask: args.mask2,
            path: args.dest2.clone(),
        },
    ];
    let options = SplitOptions {
        keep_compressed: !args.no_keep_compressed,
        progress_interval: args.progress_every,
        resync: args.resync.into(),
    };

    println!("Source Database       : {}", args.source.display());
    println!("  Destination 1 DB    : {}", args.dest1.display());
    println!("  Destination 1 mask  : {:#04x}", args.mask1);
    println!("  Destination 2 DB    : {}", args.dest2.display());
    println!("  Destination 2 mask  : {:#04x}", args.mask2);

    let mut progress = ProgressPrinter::new(std::io::stdout());
    let mut checkpoint: Box<dyn Checkpoint> = match &args.checkpoint {
        Some(path) => Box::new(FileCheckpoint::new(path)),
        None => Box::new(NoCheckpoint),
    };

    let summary = split::split_files(
        &args.source,
        [&targets[0], &targets[1]],
        table,
        &options,
        &mut progress,
        checkpoint.as_mut(),
    )
    .with_context(|| format!("split of {} failed", args.source.display()))?;

    print_summary(&summary);
    Ok(summary.truncated_at.is_none())
}

fn print_summary(summary: &SplitSummary) {
    let [d1, d2] = &summary.destinations;
    println!();
    println!("Processed records             : {:15}", summary.scanned);
    println!("  expected to process         : {:15}", summary.expected);
    println!("  routed to Destination 1 DB  : {:15}", d1.routed);
    println!("  written to Destination 1 DB : {:15}", d1.written);
    println!("  routed to Destination 2 DB  : {:15}", d2.routed);
    println!("  written to Destination 2 DB : {:15}", d2.written);
    if d1.conflicts + d2.conflicts > 0 {
        println!("  already present (kept)      : {:15}", d1.conflicts + d2.conflicts);
    }
    if summary.unroutable > 0 {
        println!("  unroutable (see log)        : {:15}", summary.unroutable);
    }
    println!("  free records skipped        : {:15}", summary.free_records);
    if summary.resyncs > 0 {
        println!("  resyncs                     : {:15}", summary.resyncs);
    }
    if let Some(at) = summary.truncated_at {
        println!("  truncated record at         : {:15}", at);
    }
}
