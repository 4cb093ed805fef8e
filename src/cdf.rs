//! # Empirical Distributions
//!
//! Turns an unordered bag of samples into a cumulative distribution table and
//! nearest-rank summaries, and moves those tables to and from the fixed-width
//! text files the `report` command leaves next to the consumer log.
//!
//! ## Percentile Selection
//!
//! Percentiles are nearest-rank, not interpolated: the value for fraction `f`
//! over `n` sorted samples is `sorted[floor(f * n)]`, clamped to `n - 1`.
//! With `[1, 2, 3, 4]` the median is `3`, not `2.5`. Fractions are held as
//! parts per ten thousand so the rank index is computed with integer
//! arithmetic and never suffers from `0.29 * 100 == 28.999...`.
//!
//! ## Table Layout
//!
//! A CDF table holds one row per sample, `(value, (i + 1) / n)`, merged with
//! synthetic rows at p0 (the minimum, fraction 0), every integer percentile
//! from 1 to 99, p99.9, p99.99 and p100 (the maximum). Rows are ordered by
//! fraction then value, so both columns are non-decreasing.

use crate::error::{AnalysisError, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

const PERCENTILE_SCALE: u32 = 10_000;

/// Tolerance used when matching fractions read back from a file, half of the
/// last printed decimal.
const FRACTION_TOLERANCE: f64 = 0.5e-4;

/// A percentile expressed in parts per ten thousand (`9990` is p99.9).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Percentile(u32);

impl Percentile {
    pub const MIN: Percentile = Percentile(0);
    pub const MEDIAN: Percentile = Percentile(5_000);
    pub const P90: Percentile = Percentile(9_000);
    pub const P99: Percentile = Percentile(9_900);
    pub const P999: Percentile = Percentile(9_990);
    pub const P9999: Percentile = Percentile(9_999);
    pub const MAX: Percentile = Percentile(PERCENTILE_SCALE);

    pub fn from_per_ten_thousand(parts: u32) -> Option<Self> {
        (parts <= PERCENTILE_SCALE).then_some(Percentile(parts))
    }

    /// Whole percentile, e.g. `Percentile::whole(50)` for the median
    pub fn whole(percent: u32) -> Option<Self> {
        Self::from_per_ten_thousand(percent.checked_mul(100)?)
    }

    pub fn fraction(self) -> f64 {
        self.0 as f64 / PERCENTILE_SCALE as f64
    }

    /// Nearest-rank index into `count` sorted samples. `count` must be non-zero.
    pub fn rank_index(self, count: usize) -> usize {
        let index = (count as u128 * self.0 as u128 / PERCENTILE_SCALE as u128) as usize;
        index.min(count.saturating_sub(1))
    }

    pub fn label(self) -> String {
        let whole = self.0 / 100;
        let rest = self.0 % 100;
        if rest == 0 {
            format!("p{}", whole)
        } else if rest % 10 == 0 {
            format!("p{}.{}", whole, rest / 10)
        } else {
            format!("p{}.{:02}", whole, rest)
        }
    }
}

/// The synthetic rows every CDF table carries: p0, p1..p99, p99.9, p99.99, p100.
pub fn table_percentiles() -> Vec<Percentile> {
    let mut percentiles = Vec::with_capacity(103);
    percentiles.push(Percentile::MIN);
    percentiles.extend((1..=99).map(|p| Percentile(p * 100)));
    percentiles.push(Percentile::P999);
    percentiles.push(Percentile::P9999);
    percentiles.push(Percentile::MAX);
    percentiles
}

/// One row of a CDF table. `extra` carries a companion column, such as the
/// size of a batch listed by its interval.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CdfRow {
    pub value: f64,
    pub fraction: f64,
    pub extra: Option<f64>,
}

/// Nearest-rank summary of a sample set
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub count: usize,
    pub min: f64,
    pub median: f64,
    pub p90: f64,
    pub p99: f64,
    pub p999: f64,
    pub max: f64,
}

#[derive(Debug, Clone, Copy)]
struct Point {
    value: f64,
    extra: Option<f64>,
}

/// A non-empty, sorted sample set.
#[derive(Debug, Clone)]
pub struct Distribution {
    points: Vec<Point>,
}

impl Distribution {
    /// Sort `samples` ascending. Fails with `EmptyInput` on zero samples.
    pub fn new(samples: Vec<f64>) -> Result<Self> {
        Self::from_points(
            samples
                .into_iter()
                .map(|value| Point { value, extra: None })
                .collect(),
        )
    }

    /// Like [`Distribution::new`], ordering by the first element and keeping
    /// the second as a companion column.
    pub fn with_extra(samples: Vec<(f64, f64)>) -> Result<Self> {
        Self::from_points(
            samples
                .into_iter()
                .map(|(value, extra)| Point {
                    value,
                    extra: Some(extra),
                })
                .collect(),
        )
    }

    fn from_points(mut points: Vec<Point>) -> Result<Self> {
        if points.is_empty() {
            return Err(AnalysisError::EmptyInput);
        }
        points.sort_by(|a, b| a.value.total_cmp(&b.value));
        Ok(Self { points })
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn value_at(&self, percentile: Percentile) -> f64 {
        self.point_at(percentile).value
    }

    fn point_at(&self, percentile: Percentile) -> Point {
        self.points[percentile.rank_index(self.points.len())]
    }

    pub fn summary(&self) -> Summary {
        Summary {
            count: self.len(),
            min: self.value_at(Percentile::MIN),
            median: self.value_at(Percentile::MEDIAN),
            p90: self.value_at(Percentile::P90),
            p99: self.value_at(Percentile::P99),
            p999: self.value_at(Percentile::P999),
            max: self.value_at(Percentile::MAX),
        }
    }

    /// Full CDF table: one row per sample merged with the synthetic
    /// percentile rows.
    pub fn cdf(&self) -> CdfTable {
        let count = self.points.len();
        let mut rows: Vec<CdfRow> = self
            .points
            .iter()
            .enumerate()
            .map(|(i, point)| CdfRow {
                value: point.value,
                fraction: (i + 1) as f64 / count as f64,
                extra: point.extra,
            })
            .collect();

        rows.extend(table_percentiles().into_iter().map(|p| {
            let point = self.point_at(p);
            CdfRow {
                value: point.value,
                fraction: p.fraction(),
                extra: point.extra,
            }
        }));

        // Stable: a sample row and a percentile row with equal fraction keep
        // value order, and the percentile row never precedes a smaller value.
        rows.sort_by(|a, b| {
            a.fraction
                .total_cmp(&b.fraction)
                .then(a.value.total_cmp(&b.value))
        });

        CdfTable {
            rows,
            sample_count: Some(count),
        }
    }
}

/// Build the CDF table of `samples`.
pub fn build_cdf(samples: &[f64]) -> Result<CdfTable> {
    Ok(Distribution::new(samples.to_vec())?.cdf())
}

/// Nearest-rank summary of `samples`.
pub fn summary(samples: &[f64]) -> Result<Summary> {
    Ok(Distribution::new(samples.to_vec())?.summary())
}

/// The two comment lines heading every CDF file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CdfHeader {
    pub columns: &'static str,
}

impl CdfHeader {
    pub const LATENCY: CdfHeader = CdfHeader {
        columns: "Time (usec)  Cum. Fraction",
    };
    pub const BATCH_INTERVAL: CdfHeader = CdfHeader {
        columns: "Interval (msec)  Size (msg cnt)  Cum. Fraction",
    };
    pub const BATCH_SIZE: CdfHeader = CdfHeader {
        columns: "Size (msg cnt)  Cum. Fraction",
    };

    fn write_to<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        writeln!(writer, "# {}", self.columns)?;
        writeln!(writer, "#---------------------------")
    }
}

/// A CDF table, either freshly built or read back from disk.
#[derive(Debug, Clone, PartialEq)]
pub struct CdfTable {
    rows: Vec<CdfRow>,
    sample_count: Option<usize>,
}

impl CdfTable {
    pub fn rows(&self) -> &[CdfRow] {
        &self.rows
    }

    /// Number of samples behind the table, excluding synthetic rows.
    pub fn sample_count(&self) -> usize {
        self.sample_count
            .unwrap_or_else(|| self.rows.len().saturating_sub(table_percentiles().len()))
    }

    pub fn write_to<W: Write>(&self, writer: &mut W, header: &CdfHeader) -> std::io::Result<()> {
        header.write_to(writer)?;
        for row in &self.rows {
            match row.extra {
                Some(extra) => writeln!(
                    writer,
                    "{:10.3}  {:8.0}    {:9.4}",
                    row.value, extra, row.fraction
                )?,
                None => writeln!(writer, "{:10.3}    {:9.4}", row.value, row.fraction)?,
            }
        }
        Ok(())
    }

    pub fn write_file(&self, path: &Path, header: &CdfHeader) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        self.write_to(&mut writer, header)?;
        writer.flush()?;
        Ok(())
    }

    /// Parse a CDF file body. `path` is only used in error messages.
    pub fn read_from<R: BufRead>(reader: R, path: &Path) -> Result<Self> {
        let mut rows = Vec::new();

        for (index, line) in reader.lines().enumerate() {
            let line = line?;
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }

            let malformed = |reason: String| AnalysisError::MalformedCdf {
                path: path.to_path_buf(),
                line: index + 1,
                reason,
            };

            let columns = trimmed
                .split_whitespace()
                .map(|c| {
                    c.parse::<f64>()
                        .map_err(|e| malformed(format!("'{}' is not a number: {}", c, e)))
                })
                .collect::<Result<Vec<f64>>>()?;

            let row = match columns.as_slice() {
                [value, fraction] => CdfRow {
                    value: *value,
                    fraction: *fraction,
                    extra: None,
                },
                [value, extra, fraction] => CdfRow {
                    value: *value,
                    fraction: *fraction,
                    extra: Some(*extra),
                },
                other => {
                    return Err(malformed(format!(
                        "expected 2 or 3 columns, found {}",
                        other.len()
                    )))
                }
            };
            rows.push(row);
        }

        Ok(Self {
            rows,
            sample_count: None,
        })
    }

    pub fn read_file(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        Self::read_from(BufReader::new(file), path)
    }

    /// Value of the last row whose fraction does not exceed `fraction`.
    ///
    /// Fractions read back from a file carry only four decimals, so this is
    /// an approximate lookup; use [`CdfTable::percentile`] for the exact
    /// nearest-rank values.
    pub fn value_at(&self, fraction: f64) -> Result<f64> {
        let first = self.rows.first().ok_or(AnalysisError::EmptyInput)?;
        let value = self
            .rows
            .iter()
            .take_while(|row| row.fraction <= fraction + FRACTION_TOLERANCE)
            .last()
            .unwrap_or(first)
            .value;
        Ok(value)
    }

    /// Nearest-rank value of the samples behind the table.
    ///
    /// The value column of a table is the sorted union of the `n` samples
    /// and the synthetic rows, each of which repeats `sorted[rank_index(q)]`.
    /// Sample `r` is therefore found at row `r + c`, where `c` counts the
    /// synthetic rows with a rank below `r`. The lookup only needs `n`, so it
    /// is exact however the fractions were rounded when the file was written.
    /// Tables without the synthetic rows fall back to [`CdfTable::value_at`].
    pub fn percentile(&self, percentile: Percentile) -> Result<f64> {
        let synthetic = table_percentiles();
        let count = self.sample_count();
        if count == 0 || self.rows.len() != count + synthetic.len() {
            return self.value_at(percentile.fraction());
        }

        let rank = percentile.rank_index(count);
        let offset = synthetic
            .iter()
            .filter(|q| q.rank_index(count) < rank)
            .count();
        self.rows
            .get(rank + offset)
            .map(|row| row.value)
            .ok_or(AnalysisError::EmptyInput)
    }

    pub fn summary(&self) -> Result<Summary> {
        let min = self.rows.first().ok_or(AnalysisError::EmptyInput)?.value;
        Ok(Summary {
            count: self.sample_count(),
            min,
            median: self.percentile(Percentile::MEDIAN)?,
            p90: self.percentile(Percentile::P90)?,
            p99: self.percentile(Percentile::P99)?,
            p999: self.percentile(Percentile::P999)?,
            max: self.percentile(Percentile::MAX)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_median_is_nearest_rank() {
        let summary = summary(&[4.0, 1.0, 3.0, 2.0]).unwrap();
        assert_eq!(summary.median, 3.0);
        assert_eq!(summary.min, 1.0);
        assert_eq!(summary.max, 4.0);
        assert_eq!(summary.count, 4);
    }

    #[test]
    fn test_rank_index_clamps_to_last_sample() {
        assert_eq!(Percentile::MAX.rank_index(4), 3);
        assert_eq!(Percentile::P9999.rank_index(1), 0);
        assert_eq!(Percentile::P999.rank_index(1000), 999);
        assert_eq!(Percentile::P999.rank_index(10_000), 9_990);
        // 0.29 * 100 is 28.999... in floating point; integer ranks are exact
        assert_eq!(Percentile::whole(29).unwrap().rank_index(100), 29);
    }

    #[test]
    fn test_empty_input_is_rejected() {
        assert!(matches!(build_cdf(&[]), Err(AnalysisError::EmptyInput)));
        assert!(matches!(summary(&[]), Err(AnalysisError::EmptyInput)));
    }

    #[test]
    fn test_cdf_is_monotonic_and_ends_at_one() {
        let samples = vec![5.0, 3.0, 9.0, 1.0, 3.0, 7.0, 2.0];
        let table = build_cdf(&samples).unwrap();
        let rows = table.rows();

        assert_eq!(rows.len(), samples.len() + table_percentiles().len());
        for pair in rows.windows(2) {
            assert!(pair[0].value <= pair[1].value, "{:?}", pair);
            assert!(pair[0].fraction <= pair[1].fraction, "{:?}", pair);
        }
        assert_eq!(rows[0].fraction, 0.0);
        assert_eq!(rows[0].value, 1.0);
        let last = rows.last().unwrap();
        assert_eq!(last.fraction, 1.0);
        assert_eq!(last.value, 9.0);
    }

    #[test]
    fn test_percentile_labels() {
        assert_eq!(Percentile::MEDIAN.label(), "p50");
        assert_eq!(Percentile::P999.label(), "p99.9");
        assert_eq!(Percentile::P9999.label(), "p99.99");
        assert_eq!(Percentile::MAX.label(), "p100");
        assert!(Percentile::from_per_ten_thousand(10_001).is_none());
    }

    #[test]
    fn test_file_round_trip_reproduces_summary() {
        let samples: Vec<f64> = (1..=250).map(|i| (i * 7 % 250) as f64 * 0.5).collect();
        let distribution = Distribution::new(samples).unwrap();
        let table = distribution.cdf();

        let mut buffer = Vec::new();
        table.write_to(&mut buffer, &CdfHeader::LATENCY).unwrap();
        let text = String::from_utf8(buffer.clone()).unwrap();
        assert!(text.starts_with("# Time (usec)  Cum. Fraction\n#---"));

        let reread = CdfTable::read_from(Cursor::new(buffer), Path::new("latency.cdf")).unwrap();
        let expected = distribution.summary();
        let actual = reread.summary().unwrap();

        assert_eq!(actual.count, expected.count);
        for (a, e) in [
            (actual.min, expected.min),
            (actual.median, expected.median),
            (actual.p90, expected.p90),
            (actual.p99, expected.p99),
            (actual.p999, expected.p999),
            (actual.max, expected.max),
        ] {
            assert!((a - e).abs() < 1e-3, "read back {} expected {}", a, e);
        }
    }

    #[test]
    fn test_large_file_keeps_exact_nearest_rank() {
        // Past 20k samples neighbouring fractions print identically at four
        // decimals, so the lookup cannot go by the fraction column.
        let count = 100_000;
        let distribution = Distribution::new((0..count).map(|i| i as f64).collect()).unwrap();

        let mut buffer = Vec::new();
        distribution
            .cdf()
            .write_to(&mut buffer, &CdfHeader::LATENCY)
            .unwrap();
        let reread = CdfTable::read_from(Cursor::new(buffer), Path::new("latency.cdf")).unwrap();

        assert_eq!(reread.sample_count(), count);
        for percentile in table_percentiles() {
            assert_eq!(
                reread.percentile(percentile).unwrap(),
                distribution.value_at(percentile),
                "{}",
                percentile.label()
            );
        }
        assert_eq!(reread.summary().unwrap(), distribution.summary());
        assert_eq!(reread.percentile(Percentile::MEDIAN).unwrap(), 50_000.0);
    }

    #[test]
    fn test_percentile_with_repeated_values() {
        let samples = vec![1.0, 1.0, 1.0, 2.0, 2.0, 9.0, 9.0, 9.0, 9.0, 9.0];
        let distribution = Distribution::new(samples).unwrap();

        let mut buffer = Vec::new();
        distribution
            .cdf()
            .write_to(&mut buffer, &CdfHeader::LATENCY)
            .unwrap();
        let reread = CdfTable::read_from(Cursor::new(buffer), Path::new("r.cdf")).unwrap();

        for percentile in table_percentiles() {
            assert_eq!(
                reread.percentile(percentile).unwrap(),
                distribution.value_at(percentile)
            );
        }
    }

    #[test]
    fn test_three_column_rows_keep_companion_value() {
        let distribution =
            Distribution::with_extra(vec![(2.5, 10.0), (0.5, 3.0), (1.5, 7.0)]).unwrap();
        let table = distribution.cdf();

        let mut buffer = Vec::new();
        table
            .write_to(&mut buffer, &CdfHeader::BATCH_INTERVAL)
            .unwrap();
        let reread = CdfTable::read_from(Cursor::new(buffer), Path::new("b.cdf")).unwrap();

        let first = reread.rows()[0];
        assert_eq!(first.value, 0.5);
        assert_eq!(first.extra, Some(3.0));
        assert_eq!(reread.summary().unwrap().max, 2.5);
    }

    #[test]
    fn test_malformed_cdf_line_is_reported() {
        let text = "# header\n#----\n1.0 0.5\n1.0 x\n";
        let err = CdfTable::read_from(Cursor::new(text), Path::new("bad.cdf")).unwrap_err();
        match err {
            AnalysisError::MalformedCdf { line, .. } => assert_eq!(line, 4),
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
