//! Cell value model and row types

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use std::fmt;

/// Which parts of a date-time the source actually carried
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateTimeKind {
    /// Date only (the midnight time component is synthetic)
    Date,
    /// Time only (the date component is the epoch day)
    Time,
    /// Full date and time
    DateTime,
}

/// Represents a single logical cell value
///
/// This is the one tagged union every component exchanges. Numeric coercion
/// happens once at the parse boundary; consumers match exhaustively.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    /// Absent / empty cell
    Null,
    /// Boolean value
    Bool(bool),
    /// 64-bit signed integer value
    Int(i64),
    /// IEEE-754 double value
    Float(f64),
    /// String value
    Str(String),
    /// Date-time instant (UTC) plus what the source carried
    DateTime {
        when: NaiveDateTime,
        kind: DateTimeKind,
    },
    /// Decimal amount with ISO currency code and the original symbol
    Currency {
        amount: f64,
        code: String,
        symbol: String,
    },
    /// Percentage stored as a fraction (0.25 == 25%)
    Percent(f64),
    /// Error sentinel carrying the original error text (e.g. "#DIV/0!")
    CellError(String),
}

impl CellValue {
    /// Check if the cell is null
    pub fn is_null(&self) -> bool {
        matches!(self, CellValue::Null)
    }

    /// Convert the cell value to its display string
    pub fn as_string(&self) -> String {
        match self {
            CellValue::Null => String::new(),
            CellValue::Bool(b) => b.to_string(),
            CellValue::Int(i) => i.to_string(),
            CellValue::Float(f) => f.to_string(),
            CellValue::Str(s) => s.clone(),
            CellValue::DateTime { when, kind } => match kind {
                DateTimeKind::Date => when.format("%Y-%m-%d").to_string(),
                DateTimeKind::Time => when.format("%H:%M:%S").to_string(),
                DateTimeKind::DateTime => when.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
            },
            CellValue::Currency { amount, symbol, .. } => format!("{}{}", symbol, amount),
            CellValue::Percent(p) => format!("{}%", p * 100.0),
            CellValue::CellError(e) => e.clone(),
        }
    }

    /// Try to view the value as a string slice
    pub fn as_str(&self) -> Option<&str> {
        match self {
            CellValue::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Try to convert to integer
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            CellValue::Int(i) => Some(*i),
            CellValue::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            CellValue::Str(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// Try to convert to float
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            CellValue::Int(i) => Some(*i as f64),
            CellValue::Float(f) => Some(*f),
            CellValue::Percent(p) => Some(*p),
            CellValue::Currency { amount, .. } => Some(*amount),
            CellValue::Str(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// Try to convert to boolean
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            CellValue::Bool(b) => Some(*b),
            CellValue::Int(i) => Some(*i != 0),
            CellValue::Str(s) => match s.to_ascii_lowercase().as_str() {
                "true" | "yes" | "1" => Some(true),
                "false" | "no" | "0" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_string())
    }
}

impl From<&str> for CellValue {
    fn from(s: &str) -> Self {
        CellValue::Str(s.to_string())
    }
}

impl From<String> for CellValue {
    fn from(s: String) -> Self {
        CellValue::Str(s)
    }
}

impl From<i64> for CellValue {
    fn from(i: i64) -> Self {
        CellValue::Int(i)
    }
}

impl From<f64> for CellValue {
    fn from(f: f64) -> Self {
        CellValue::Float(f)
    }
}

impl From<bool> for CellValue {
    fn from(b: bool) -> Self {
        CellValue::Bool(b)
    }
}

impl From<NaiveDateTime> for CellValue {
    fn from(when: NaiveDateTime) -> Self {
        CellValue::DateTime {
            when,
            kind: DateTimeKind::DateTime,
        }
    }
}

impl<T: Into<CellValue>> From<Option<T>> for CellValue {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(v) => v.into(),
            None => CellValue::Null,
        }
    }
}

/// A logical row: the 1-based source row number plus its ordered cells
///
/// Missing interior cells materialize as [`CellValue::Null`]; trailing cells
/// are simply absent.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    /// 1-based logical row number in source order
    pub number: u32,
    /// Cells in this row, indexed from 0
    pub cells: Vec<CellValue>,
}

impl Row {
    /// Create a new row
    pub fn new(number: u32, cells: Vec<CellValue>) -> Self {
        Row { number, cells }
    }

    /// Get cell at column index (0-based)
    pub fn get(&self, col: usize) -> Option<&CellValue> {
        self.cells.get(col)
    }

    /// Number of cells in the row
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// True when the row has no cells or only null cells
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty() || self.cells.iter().all(|c| c.is_null())
    }

    /// Convert the row to a vector of display strings
    pub fn to_strings(&self) -> Vec<String> {
        self.cells.iter().map(|c| c.as_string()).collect()
    }
}

// Threshold below which a serial fraction counts as midnight; one second is
// ~1.2e-5 days, so this keeps second precision while absorbing float noise.
const MIDNIGHT_EPSILON: f64 = 0.0001;

/// Convert an OOXML serial day number to a date-time cell value.
///
/// The 1900 date system pretends 1900 was a leap year; serials at or above
/// the fictitious Feb 29 (serial 60) are shifted back one day. The 1904
/// system counts plainly from 1904-01-01.
pub fn serial_to_datetime(serial: f64, epoch_1904: bool) -> Option<CellValue> {
    if !serial.is_finite() || !(0.0..=2_958_465.999_999).contains(&serial) {
        return None;
    }

    let mut days = serial.floor() as i64;
    let frac = serial - serial.floor();
    let mut secs = (frac * 86_400.0).round() as i64;
    if secs >= 86_400 {
        days += 1;
        secs = 0;
    }

    let date = if epoch_1904 {
        NaiveDate::from_ymd_opt(1904, 1, 1)? + Duration::days(days)
    } else if days == 0 {
        NaiveDate::from_ymd_opt(1899, 12, 31)?
    } else {
        let since_epoch = if days >= 60 { days - 2 } else { days - 1 };
        NaiveDate::from_ymd_opt(1900, 1, 1)? + Duration::days(since_epoch)
    };

    let time = NaiveTime::from_num_seconds_from_midnight_opt(secs as u32, 0)?;
    let kind = if serial < 1.0 && !epoch_1904 {
        DateTimeKind::Time
    } else if frac < MIDNIGHT_EPSILON {
        DateTimeKind::Date
    } else {
        DateTimeKind::DateTime
    };

    Some(CellValue::DateTime {
        when: NaiveDateTime::new(date, time),
        kind,
    })
}

/// Parse an ISO-8601 cell payload (`t="d"` cells, typed text columns)
pub fn parse_iso_datetime(text: &str) -> Option<CellValue> {
    let trimmed = text.trim().trim_end_matches('Z');
    if let Ok(when) = NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S") {
        return Some(CellValue::DateTime {
            when,
            kind: DateTimeKind::DateTime,
        });
    }
    if let Ok(when) = NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S") {
        return Some(CellValue::DateTime {
            when,
            kind: DateTimeKind::DateTime,
        });
    }
    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        return Some(CellValue::DateTime {
            when: date.and_hms_opt(0, 0, 0)?,
            kind: DateTimeKind::Date,
        });
    }
    None
}
