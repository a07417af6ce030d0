//! hdb-check: bucket/record reachability check of a hash database.
//!
//! ```bash
//! hdb-check casket.tch
//! hdb-check casket.tch --resync aligned --json
//! hdb-check casket.tch --offsets-out /tmp/dangling.csv --records-out /tmp/orphans.csv
//! ```
//!
//! Exit status: 0 when consistent, 2 when dangling pointers, orphan records
//! or a truncated record were found, 1 when the file cannot be read.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;

use hdbkit::check::{self, CheckOptions, CheckReport};
use hdbkit::cli::{self, ResyncArg};
use hdbkit::format::HashDbFile;
use hdbkit::progress::ProgressPrinter;

#[derive(Parser, Debug)]
#[command(name = "hdb-check", version, about = "Find dangling pointers and orphan records in a hash database")]
struct Args {
    /// Database file to check
    db: PathBuf,

    /// Where to write dangling pointers (origin,offset)
    #[arg(long, value_name = "FILE", default_value = "offsets.csv")]
    offsets_out: PathBuf,

    /// Where to write orphan records (origin,offset)
    #[arg(long, value_name = "FILE", default_value = "records.csv")]
    records_out: PathBuf,

    /// Do not write CSV files
    #[arg(long)]
    no_dump: bool,

    /// How to recover when no record starts at the expected offset
    #[arg(long, value_enum, default_value_t = ResyncArg::Byte)]
    resync: ResyncArg,

    /// Print the report as JSON
    #[arg(long)]
    json: bool,
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

fn run(args: Args) -> Result<bool> {
    let db = HashDbFile::open(&args.db).with_context(|| format!("cannot open {}", args.db.display()))?;
    let options = CheckOptions {
        resync: args.resync.into(),
        ..CheckOptions::default()
    };
    let mut progress = ProgressPrinter::new(std::io::stderr());
    let report = check::check_with_progress(&db, options, &mut progress);

    if !args.no_dump {
        check::dump_findings(&report.dangling, &args.offsets_out)
            .with_context(|| format!("cannot write {}", args.offsets_out.display()))?;
        check::dump_findings(&report.orphans, &args.records_out)
            .with_context(|| format!("cannot write {}", args.records_out.display()))?;
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&args, &report);
    }
    Ok(report.is_consistent())
}

fn print_report(args: &Args, report: &CheckReport) {
    let s = &report.stats;
    println!("Database                 : {}", args.db.display());
    println!("  resync policy          : {:?}", report.resync);
    println!("  buckets scanned        : {:15}", s.buckets_scanned);
    println!("  non-empty buckets      : {:15}", s.non_empty_buckets);
    println!("  child pointers         : {:15}", s.child_pointers);
    println!("  duplicate offsets      : {:15}", s.duplicate_offsets);
    println!("  out-of-range pointers  : {:15}", s.out_of_range_pointers);
    println!("  overflowed pointers    : {:15}", s.overflowed_pointers);
    println!("  data records           : {:15}", s.data_records);
    println!("  free records           : {:15}", s.free_records);
    println!("  resyncs                : {:15}", s.resyncs);
    println!("  skipped bytes          : {:15}", s.skipped_bytes);
    println!("  dangling pointers      : {:15}", report.dangling.len());
    println!("  orphan records         : {:15}", report.orphans.len());
    if let Some(at) = report.truncated_at {
        println!("  truncated record at    : {:15}", at);
    }
}
