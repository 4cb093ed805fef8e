//! Human-readable dump of a trace log.
//!
//! Each `CONSUME` record becomes one line holding its time since the clock
//! origin and the delta to the previous `CONSUME`, followed by its payload:
//!
//! ```text
//!    500.0 ns (+ 500.0 ns): 2000
//!    900.0 ns (+ 400.0 ns): 4000
//! ```

use crate::error::Result;
use crate::log_parser::{LogReader, TimestampConverter};
use anyhow::Context;
use std::io::{BufRead, Write};
use std::path::Path;

/// Write the formatted `CONSUME` records of `reader` to `out`.
///
/// `CPS` records recalibrate the clock; a `CONSUME` before any `CPS` fails
/// with `CalibrationMissing`. Returns the number of lines written.
pub fn format_log<R: BufRead, W: Write>(reader: LogReader<R>, out: &mut W) -> Result<usize> {
    let mut converter = TimestampConverter::new();
    let mut prev_ns = 0.0;
    let mut written = 0;

    for record in reader {
        let record = record?;
        if converter.observe(&record)? || !record.is_consume() {
            continue;
        }

        let ns = converter.to_nanos(&record)?;
        writeln!(
            out,
            "{:8.1} ns (+{:6.1} ns): {}",
            ns,
            ns - prev_ns,
            record.payload().unwrap_or_default()
        )?;
        prev_ns = ns;
        written += 1;
    }

    Ok(written)
}

/// The `format` command: print `path` formatted to stdout.
pub fn format_file(path: &Path) -> anyhow::Result<()> {
    let reader =
        LogReader::open(path).with_context(|| format!("Failed to open log {}", path.display()))?;

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let written = format_log(reader, &mut out)
        .with_context(|| format!("Failed to format log {}", path.display()))?;
    out.flush()?;

    tracing::debug!("formatted {} records from {}", written, path.display());
    Ok(())
}
