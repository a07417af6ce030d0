//! CSV dumps of checker findings.
//!
//! One row per finding, `origin,offset` in decimal, no header row.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::check::Finding;
use crate::error::Result;

pub fn write_findings<W: Write>(findings: &[Finding], writer: &mut W) -> Result<()> {
    for f in findings {
        writeln!(writer, "{},{}", f.origin, f.offset)?;
    }
    Ok(())
}

/// Write `findings` to `path`, creating it only when there is something to
/// report. Returns whether the file was written.
pub fn dump_findings(findings: &[Finding], path: &Path) -> Result<bool> {
    if findings.is_empty() {
        return Ok(false);
    }
    let mut writer = BufWriter::new(File::create(path)?);
    write_findings(findings, &mut writer)?;
    writer.flush()?;
    tracing::info!("wrote {} rows to {:?}", findings.len(), path);
    Ok(true)
}
