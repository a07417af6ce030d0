//! hdb-inspect: read-only views of a hash database.
//!
//! ```bash
//! hdb-inspect header casket.tch
//! hdb-inspect offsets casket.tch > offsets.txt
//! hdb-inspect probe casket.tch offsets.txt
//! hdb-inspect lookup casket.tch mlid:4812
//! hdb-inspect stats casket.tch --resync byte
//! hdb-inspect free-pool casket.tch
//! ```

use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use hdbkit::cli::{self, ResyncArg};
use hdbkit::format::{probe_offsets, record_totals, HashDbFile, ResyncPolicy};

#[derive(Parser, Debug)]
#[command(name = "hdb-inspect", version, about = "Inspect the layout of a hash database")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the header fields
    Header {
        db: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// Print the byte offset of every non-empty bucket, one per line
    Offsets { db: PathBuf },
    /// Count how many offsets (one per line, `-` for stdin) land on a data record
    Probe { db: PathBuf, offsets: PathBuf },
    /// Find a key and print its record
    Lookup { db: PathBuf, key: String },
    /// Count records and key/value bytes
    Stats {
        db: PathBuf,
        #[arg(long, value_enum, default_value_t = ResyncArg::Aligned)]
        resync: ResyncArg,
    },
    /// List the free-block pool entries
    FreePool { db: PathBuf },
}

fn main() -> Result<()> {
    cli::init_logging();

    match Args::parse().command {
        Command::Header { db, json } => header(&db, json),
        Command::Offsets { db } => offsets(&db),
        Command::Probe { db, offsets } => probe(&db, &offsets),
        Command::Lookup { db, key } => lookup(&db, &key),
        Command::Stats { db, resync } => stats(&db, resync.into()),
        Command::FreePool { db } => free_pool(&db),
    }
}

fn open(path: &Path) -> Result<HashDbFile> {
    HashDbFile::open(path).with_context(|| format!("cannot open {}", path.display()))
}

fn header(path: &Path, json: bool) -> Result<()> {
    let db = open(path)?;
    let meta = db.metadata();
    if json {
        println!("{}", serde_json::to_string_pretty(meta)?);
        return Ok(());
    }
    println!("path                 : {}", path.display());
    println!("flags                : {:#04x} {:?}", meta.flags.0, meta.flags.names());
    println!("options              : {:#04x} {:?}", meta.options.bits(), meta.options.names());
    println!("pointer width        : {} bytes", meta.pointer_width.bytes());
    println!("alignment            : {} (power {})", meta.alignment(), meta.alignment_power);
    println!("free block pool      : {} slots (power {})", 1u64 << meta.free_block_power, meta.free_block_power);
    println!("bucket count         : {}", meta.bucket_count);
    println!("record count         : {}", meta.record_count_hint);
    println!("first record         : {}", meta.record_section_offset);
    println!("recorded file size   : {}", meta.recorded_file_size);
    println!("actual file size     : {}", meta.file_len);
    Ok(())
}

fn offsets(path: &Path) -> Result<()> {
    let db = open(path)?;
    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    let mut found = 0u64;
    for (_, offset) in db.bucket_offsets() {
        writeln!(out, "{offset}")?;
        found += 1;
    }
    out.flush()?;
    let meta = db.metadata();
    eprintln!(
        "{} of {} buckets in use, header records {} records",
        found, meta.bucket_count, meta.record_count_hint
    );
    Ok(())
}

fn probe(path: &Path, offsets_path: &Path) -> Result<()> {
    let db = open(path)?;
    let reader: Box<dyn BufRead> = if offsets_path == Path::new("-") {
        Box::new(BufReader::new(io::stdin()))
    } else {
        let file = File::open(offsets_path).with_context(|| format!("cannot open {}", offsets_path.display()))?;
        Box::new(BufReader::new(file))
    };

    let mut offsets = Vec::new();
    for (n, line) in reader.lines().enumerate() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match line.parse::<u64>() {
            Ok(offset) => offsets.push(offset),
            Err(e) => bail!("line {}: '{}' is not an offset: {}", n + 1, line, e),
        }
    }

    let stats = probe_offsets(&db, offsets);
    let rate = if stats.probed == 0 {
        0.0
    } else {
        stats.data_magic as f64 / stats.probed as f64 * 100.0
    };
    println!("probed               : {:15}", stats.probed);
    println!("  on a data record   : {:15}", stats.data_magic);
    println!("  elsewhere          : {:15}", stats.other);
    println!("  hit rate           : {:14.2}%", rate);
    Ok(())
}

fn lookup(path: &Path, key: &str) -> Result<()> {
    let db = open(path)?;
    let found = db.lookup(key.as_bytes())?;
    println!("bucket               : {}", found.bucket_index);
    println!("hash                 : {:#04x}", found.hash);
    println!("nodes visited        : {}", found.visited);
    match found.record {
        Some(rec) => {
            println!("offset               : {}", rec.offset);
            println!("value size           : {}", rec.value_size);
            println!("value                : {}", String::from_utf8_lossy(rec.value.unwrap_or_default()));
        }
        None => println!("not found"),
    }
    Ok(())
}

fn stats(path: &Path, resync: ResyncPolicy) -> Result<()> {
    let db = open(path)?;
    let totals = record_totals(&db, resync);
    println!("data records         : {:15}", totals.data_records);
    println!("  key bytes          : {:15}", totals.key_bytes);
    println!("  value bytes        : {:15}", totals.value_bytes);
    println!("free records         : {:15}", totals.free_records);
    println!("  free bytes         : {:15}", totals.free_bytes);
    println!("resyncs              : {:15}", totals.resyncs);
    println!("skipped bytes        : {:15}", totals.skipped_bytes);
    if let Some(at) = totals.truncated_at {
        println!("truncated record at  : {:15}", at);
    }
    Ok(())
}

fn free_pool(path: &Path) -> Result<()> {
    let db = open(path)?;
    let entries = db.free_pool();
    for entry in &entries {
        println!("{},{}", entry.position, entry.size);
    }
    eprintln!("{} free-block pool entries", entries.len());
    Ok(())
}
