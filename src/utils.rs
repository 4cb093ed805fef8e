//! Console helpers shared by the commands.
//!
//! ```rust
//! use kafkamark::utils::{format_duration, format_value};
//! use std::time::Duration;
//!
//! assert_eq!(format_duration(Duration::from_millis(250)), "250.00ms");
//! assert_eq!(format_value(12.34567), "12.346");
//! ```

use std::time::Duration;

/// Render a duration with the largest unit that keeps it readable.
///
/// Sub-minute values get two decimals in ns/μs/ms/s; longer ones are split
/// into whole minutes (and hours) plus seconds:
///
/// ```rust
/// # use kafkamark::utils::format_duration;
/// # use std::time::Duration;
/// assert_eq!(format_duration(Duration::from_nanos(750)), "750ns");
/// assert_eq!(format_duration(Duration::from_secs(90)), "1m 30s");
/// assert_eq!(format_duration(Duration::from_secs(7265)), "2h 1m 5s");
/// ```
pub fn format_duration(duration: Duration) -> String {
    const UNITS: [(u128, f64, &str); 3] = [
        (1_000_000, 1e3, "μs"),
        (1_000_000_000, 1e6, "ms"),
        (60_000_000_000, 1e9, "s"),
    ];

    let nanos = duration.as_nanos();
    if nanos < 1_000 {
        return format!("{}ns", nanos);
    }
    if let Some((_, scale, unit)) = UNITS.iter().find(|(limit, _, _)| nanos < *limit) {
        return format!("{:.2}{}", nanos as f64 / scale, unit);
    }

    let secs = duration.as_secs();
    let (hours, minutes, seconds) = (secs / 3600, secs / 60 % 60, secs % 60);
    match hours {
        0 => format!("{}m {}s", minutes, seconds),
        _ => format!("{}h {}m {}s", hours, minutes, seconds),
    }
}

/// A measurement at the precision of the CDF files.
pub fn format_value(value: f64) -> String {
    format!("{:.3}", value)
}

/// Print one `|`-delimited table row; columns without a width get 10.
///
/// ```rust
/// # use kafkamark::utils::{print_table_row, print_table_separator};
/// let widths = [16, 8];
/// print_table_separator(&widths);
/// print_table_row(&["Latency (usec)", "200"], &widths);
/// print_table_separator(&widths);
/// ```
pub fn print_table_row(columns: &[&str], widths: &[usize]) {
    println!("{}", table_row(columns, widths));
}

/// Print a `+---+` rule matching `print_table_row`.
pub fn print_table_separator(widths: &[usize]) {
    println!("{}", table_separator(widths));
}

fn table_row(columns: &[&str], widths: &[usize]) -> String {
    columns
        .iter()
        .enumerate()
        .fold(String::from("|"), |mut row, (i, column)| {
            let width = widths.get(i).copied().unwrap_or(10);
            row.push_str(&format!(" {:<width$} |", column, width = width));
            row
        })
}

fn table_separator(widths: &[usize]) -> String {
    widths.iter().fold(String::from("+"), |mut line, width| {
        line.push_str(&"-".repeat(width + 2));
        line.push('+');
        line
    })
}

/// A `width`-cell bar of `█` (done) and `░` (remaining) for `current` of
/// `total` steps. An empty total counts as done.
pub fn create_progress_indicator(current: usize, total: usize, width: usize) -> String {
    let done = if total == 0 {
        width
    } else {
        (current.min(total) * width) / total
    };
    let mut bar = "█".repeat(done);
    bar.push_str(&"░".repeat(width - done));
    bar
}
