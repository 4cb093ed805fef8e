//! # Consumer Log Parsing
//!
//! The consumer and producer binaries write pipe-delimited trace lines of the
//! form `cycles|TAG|field|field...`, where `cycles` is the raw time-stamp
//! counter value at which the record was taken. Two tags matter here:
//!
//! - `CPS`: `cycles|CPS|<cycles per second>` - clock calibration. The cycle
//!   value of this record becomes the origin for every later conversion.
//! - `CONSUME`: `cycles|CONSUME|<payload>|<latency ns>` - one consumed message.
//!
//! Everything else is tagged [`RecordTag::Other`] and carried through
//! untouched. Parsing is fail-fast: the first malformed line aborts the read.

use crate::error::{AnalysisError, Result};
use std::fs::File;
use std::io::{BufRead, BufReader, Lines};
use std::path::Path;

/// Field index of the record tag.
const TAG_FIELD: usize = 1;
/// Field index of the calibration rate in a `CPS` record.
const CPS_RATE_FIELD: usize = 2;
/// Field index of the payload / latency field in a `CONSUME` record.
const CONSUME_LATENCY_FIELD: usize = 3;

/// Record type selected by the second field of a log line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordTag {
    Consume,
    Cps,
    Other(String),
}

impl RecordTag {
    fn parse(tag: &str) -> Self {
        match tag {
            "CONSUME" => RecordTag::Consume,
            "CPS" => RecordTag::Cps,
            other => RecordTag::Other(other.to_string()),
        }
    }

    /// Minimum number of `|`-separated fields a line with this tag must carry.
    fn required_fields(&self) -> usize {
        match self {
            RecordTag::Consume => CONSUME_LATENCY_FIELD + 1,
            RecordTag::Cps => CPS_RATE_FIELD + 1,
            RecordTag::Other(_) => TAG_FIELD + 1,
        }
    }
}

impl std::fmt::Display for RecordTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecordTag::Consume => write!(f, "CONSUME"),
            RecordTag::Cps => write!(f, "CPS"),
            RecordTag::Other(tag) => write!(f, "{}", tag),
        }
    }
}

/// One parsed log line.
///
/// `fields` holds every `|`-separated field of the line, including the
/// timestamp and the tag, so positions match the on-disk layout.
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    line: usize,
    timestamp_cycles: u64,
    tag: RecordTag,
    fields: Vec<String>,
}

impl LogRecord {
    /// Parse a single log line. `line` is the 1-based line number used in errors.
    pub fn parse(line: usize, text: &str) -> Result<Self> {
        let fields: Vec<String> = text.trim().split('|').map(str::to_owned).collect();

        if fields.len() <= TAG_FIELD {
            return Err(AnalysisError::malformed(
                line,
                format!("expected at least {} fields, found {}", TAG_FIELD + 1, fields.len()),
            ));
        }

        let tag = RecordTag::parse(&fields[TAG_FIELD]);
        let required = tag.required_fields();
        if fields.len() < required {
            return Err(AnalysisError::malformed(
                line,
                format!(
                    "{} record needs at least {} fields, found {}",
                    tag,
                    required,
                    fields.len()
                ),
            ));
        }

        let timestamp_cycles = fields[0].trim().parse::<u64>().map_err(|e| {
            AnalysisError::malformed(line, format!("invalid cycle counter '{}': {}", fields[0], e))
        })?;

        Ok(Self {
            line,
            timestamp_cycles,
            tag,
            fields,
        })
    }

    pub fn line(&self) -> usize {
        self.line
    }

    pub fn timestamp_cycles(&self) -> u64 {
        self.timestamp_cycles
    }

    pub fn tag(&self) -> &RecordTag {
        &self.tag
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    pub fn field(&self, index: usize) -> Option<&str> {
        self.fields.get(index).map(String::as_str)
    }

    pub fn is_consume(&self) -> bool {
        self.tag == RecordTag::Consume
    }

    /// The payload column of a `CONSUME` record, printed verbatim by `format`.
    pub fn payload(&self) -> Option<&str> {
        match self.tag {
            RecordTag::Consume => self.field(CONSUME_LATENCY_FIELD),
            _ => None,
        }
    }

    /// End-to-end latency in nanoseconds carried by a `CONSUME` record.
    pub fn latency_ns(&self) -> Result<f64> {
        if self.tag != RecordTag::Consume {
            return Err(AnalysisError::malformed(
                self.line,
                format!("{} record carries no latency", self.tag),
            ));
        }
        self.number_at(CONSUME_LATENCY_FIELD)
    }

    /// Calibration rate carried by a `CPS` record.
    pub fn cycles_per_second(&self) -> Result<f64> {
        if self.tag != RecordTag::Cps {
            return Err(AnalysisError::malformed(
                self.line,
                format!("{} record carries no clock rate", self.tag),
            ));
        }
        let rate = self.number_at(CPS_RATE_FIELD)?;
        if !rate.is_finite() || rate <= 0.0 {
            return Err(AnalysisError::malformed(
                self.line,
                format!("cycles per second must be positive, got {}", rate),
            ));
        }
        Ok(rate)
    }

    fn number_at(&self, index: usize) -> Result<f64> {
        let raw = self.fields[index].trim();
        raw.parse::<f64>().map_err(|e| {
            AnalysisError::malformed(self.line, format!("field {} '{}' is not a number: {}", index, raw, e))
        })
    }
}

/// Lazy, fail-fast reader producing [`LogRecord`]s from any line source.
///
/// Once an error has been yielded the reader is exhausted.
pub struct LogReader<R> {
    lines: Lines<R>,
    line: usize,
    failed: bool,
}

impl<R: BufRead> LogReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
            line: 0,
            failed: false,
        }
    }
}

impl LogReader<BufReader<File>> {
    /// Open a log file on disk
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        Ok(Self::new(BufReader::new(file)))
    }
}

impl<R: BufRead> Iterator for LogReader<R> {
    type Item = Result<LogRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }

        let text = match self.lines.next()? {
            Ok(text) => text,
            Err(e) => {
                self.failed = true;
                return Some(Err(e.into()));
            }
        };
        self.line += 1;

        let record = LogRecord::parse(self.line, &text);
        if record.is_err() {
            self.failed = true;
        }
        Some(record)
    }
}

/// Clock calibration taken from a single `CPS` record.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClockCalibration {
    pub cycles_per_second: f64,
    pub origin_cycles: u64,
}

impl ClockCalibration {
    pub fn new(cycles_per_second: f64, origin_cycles: u64) -> Self {
        Self {
            cycles_per_second,
            origin_cycles,
        }
    }

    pub fn from_record(record: &LogRecord) -> Result<Self> {
        Ok(Self::new(
            record.cycles_per_second()?,
            record.timestamp_cycles(),
        ))
    }

    /// The origin expressed in nanoseconds of the cycle clock
    pub fn origin_nanos(&self) -> f64 {
        1e9 * self.origin_cycles as f64 / self.cycles_per_second
    }

    /// Convert an absolute cycle counter to nanoseconds since the origin.
    pub fn to_nanos(&self, cycles: u64) -> f64 {
        1e9 * cycles as f64 / self.cycles_per_second - self.origin_nanos()
    }

    /// Convert a cycle-count span to milliseconds.
    pub fn span_to_millis(&self, cycles: u64) -> f64 {
        1000.0 * cycles as f64 / self.cycles_per_second
    }
}

/// Tracks the calibration seen so far while scanning a log.
///
/// A later `CPS` record replaces the earlier one.
#[derive(Debug, Default, Clone)]
pub struct TimestampConverter {
    calibration: Option<ClockCalibration>,
}

impl TimestampConverter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a record; returns `true` when it recalibrated the clock.
    pub fn observe(&mut self, record: &LogRecord) -> Result<bool> {
        if *record.tag() != RecordTag::Cps {
            return Ok(false);
        }
        self.calibration = Some(ClockCalibration::from_record(record)?);
        Ok(true)
    }

    pub fn calibration(&self) -> Option<&ClockCalibration> {
        self.calibration.as_ref()
    }

    /// The active calibration, or `CalibrationMissing` blaming `line`.
    pub fn require(&self, line: usize) -> Result<&ClockCalibration> {
        self.calibration
            .as_ref()
            .ok_or(AnalysisError::CalibrationMissing { line })
    }

    /// Nanoseconds since the calibration origin for `record`'s timestamp.
    pub fn to_nanos(&self, record: &LogRecord) -> Result<f64> {
        Ok(self
            .require(record.line())?
            .to_nanos(record.timestamp_cycles()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_parse_consume_record() {
        let record = LogRecord::parse(1, "1500|CONSUME|msg-17|2500\n").unwrap();
        assert_eq!(record.timestamp_cycles(), 1500);
        assert_eq!(*record.tag(), RecordTag::Consume);
        assert_eq!(record.payload(), Some("2500"));
        assert_eq!(record.latency_ns().unwrap(), 2500.0);
        assert_eq!(record.fields().len(), 4);
    }

    #[test]
    fn test_parse_other_tag_is_kept() {
        let record = LogRecord::parse(2, "10|PRODUCE|x").unwrap();
        assert_eq!(*record.tag(), RecordTag::Other("PRODUCE".to_string()));
        assert!(record.payload().is_none());
        assert!(record.latency_ns().is_err());
    }

    #[test]
    fn test_missing_fields_are_malformed() {
        let err = LogRecord::parse(4, "1500|CONSUME|only-three").unwrap_err();
        match err {
            AnalysisError::MalformedRecord { line, .. } => assert_eq!(line, 4),
            other => panic!("unexpected error: {:?}", other),
        }

        assert!(LogRecord::parse(5, "no-separators").is_err());
        assert!(LogRecord::parse(6, "").is_err());
        assert!(LogRecord::parse(7, "12|CPS").is_err());
    }

    #[test]
    fn test_bad_numbers_are_malformed() {
        assert!(LogRecord::parse(1, "abc|CPS|1e9").is_err());
        let record = LogRecord::parse(1, "0|CPS|fast").unwrap();
        assert!(record.cycles_per_second().is_err());
        let record = LogRecord::parse(1, "0|CPS|0").unwrap();
        assert!(record.cycles_per_second().is_err());
    }

    #[test]
    fn test_reader_stops_at_first_malformed_line() {
        let log = "0|CPS|1e9\n5|CONSUME|a|10\nbroken\n9|CONSUME|b|20\n";
        let mut reader = LogReader::new(Cursor::new(log));

        assert!(reader.next().unwrap().is_ok());
        assert!(reader.next().unwrap().is_ok());
        let err = reader.next().unwrap().unwrap_err();
        assert!(matches!(err, AnalysisError::MalformedRecord { line: 3, .. }));
        assert!(reader.next().is_none());
    }

    #[test]
    fn test_clock_conversion_one_cycle_per_nanosecond() {
        let mut converter = TimestampConverter::new();
        let cps = LogRecord::parse(1, "0|CPS|1e9").unwrap();
        assert!(converter.observe(&cps).unwrap());

        let consume = LogRecord::parse(2, "500|CONSUME|m|1").unwrap();
        assert_eq!(converter.to_nanos(&consume).unwrap(), 500.0);
    }

    #[test]
    fn test_conversion_is_relative_to_cps_record() {
        let calibration = ClockCalibration::new(2e9, 1_000);
        assert_eq!(calibration.origin_nanos(), 500.0);
        assert_eq!(calibration.to_nanos(3_000), 1_000.0);
        assert_eq!(calibration.span_to_millis(2_000_000), 1.0);
    }

    #[test]
    fn test_conversion_before_calibration_fails() {
        let converter = TimestampConverter::new();
        let consume = LogRecord::parse(9, "500|CONSUME|m|1").unwrap();
        let err = converter.to_nanos(&consume).unwrap_err();
        assert!(matches!(err, AnalysisError::CalibrationMissing { line: 9 }));
    }

    #[test]
    fn test_last_cps_record_wins() {
        let mut converter = TimestampConverter::new();
        converter
            .observe(&LogRecord::parse(1, "0|CPS|1e9").unwrap())
            .unwrap();
        converter
            .observe(&LogRecord::parse(2, "100|CPS|2e9").unwrap())
            .unwrap();

        let calibration = converter.calibration().unwrap();
        assert_eq!(calibration.cycles_per_second, 2e9);
        assert_eq!(calibration.origin_cycles, 100);
    }
}
