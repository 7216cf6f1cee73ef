use crate::reader::reference::index_to_reference;
use chrono::Duration;
use chrono::NaiveDate;
use chrono::NaiveDateTime;

/// Date system a workbook counts serial numbers from.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum Epoch {
    #[default]
    Y1900,
    Y1904,
}

impl Epoch {
    /// Converts a serial number to a timestamp, rounded to the millisecond.
    /// The 1900 system counts the nonexistent 1900-02-29, so serials below 60 shift by a day.
    pub fn from_serial(self, serial: f64) -> Option<NaiveDateTime> {
        if !serial.is_finite() || serial < 0.0 {
            return None;
        }
        let days = serial.trunc() as i64;
        let offset = match self {
            Epoch::Y1904 => 1_462,
            Epoch::Y1900 if days < 60 => 1,
            Epoch::Y1900 => 0,
        };
        let milliseconds = (serial.fract() * 86_400_000.0).round() as i64;
        let base = NaiveDate::from_ymd_opt(1899, 12, 30)?.and_hms_opt(0, 0, 0)?;
        base.checked_add_signed(Duration::try_days(days.checked_add(offset)?)?)?
            .checked_add_signed(Duration::try_milliseconds(milliseconds)?)
    }
}

/// Types of cell data in a sheet part.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum CellType {
    #[default]
    Empty,
    Boolean,
    Number,
    /// Serial number formatted as a date
    Date(Epoch),
    /// Serial number formatted as date and time
    DateTime(Epoch),
    /// Serial number formatted as a time of day
    Time,
    /// ISO 8601 text (`t="d"`)
    IsoDateTime,
    /// Inline, formula or resolved shared string text
    Text,
    /// Index into the shared string table, resolved while reading
    SharedString,
    /// Error value such as `#DIV/0!`
    Error,
}

impl CellType {
    /// Date and time types of the built-in number format ids.
    pub(crate) fn parse_builtin_number_format_id(id: &str, epoch: Epoch) -> Option<Self> {
        match id {
            "22" => Some(Self::DateTime(epoch)),
            "14" | "15" | "16" | "17" => Some(Self::Date(epoch)),
            "18" | "19" | "20" | "21" | "45" | "46" | "47" => Some(Self::Time),
            _ => None,
        }
    }

    /// Classifies a custom format code by the date and time tokens outside literals,
    /// escapes and bracketed sections.
    pub(crate) fn parse_custom_number_format(format: &str, epoch: Epoch) -> Self {
        let mut is_escaped = false;
        let mut is_literal = false;
        let mut is_bracket = false;
        let mut is_date = false;
        let mut is_time = false;
        for character in format.chars() {
            match character {
                _ if is_escaped => is_escaped = false,
                '_' | '\\' => is_escaped = true,

                '"' if is_literal => is_literal = false,
                '"' if !is_bracket => is_literal = true,

                ']' if is_bracket => is_bracket = false,
                '[' if !is_literal => is_bracket = true,
                _ if is_literal || is_bracket => (),

                'Y' | 'y' | 'D' | 'd' => is_date = true,
                'H' | 'h' | 'S' | 's' => is_time = true,
                _ => (),
            }
        }

        match (is_date, is_time) {
            (true, true) => Self::DateTime(epoch),
            (true, false) => Self::Date(epoch),
            (false, true) => Self::Time,
            (false, false) => Self::Number,
        }
    }

    /// Maps the `t` attribute of a `<c>` element; numbers are refined by their style.
    pub(crate) fn from_type_attribute(kind: Option<&str>) -> Self {
        match kind {
            Some("inlineStr" | "str") => Self::Text,
            Some("s") => Self::SharedString,
            Some("d") => Self::IsoDateTime,
            Some("b") => Self::Boolean,
            Some("e") => Self::Error,
            _ => Self::Number,
        }
    }
}

/// A single cell read from a sheet.
#[derive(Clone, Debug, PartialEq)]
pub struct Cell {
    pub row: usize,
    pub col: usize,
    pub(crate) kind: CellType,
    /// Raw value as stored in the part
    pub(crate) value: String,
}

impl Cell {
    pub(crate) fn new(row: usize, col: usize, kind: CellType, value: impl Into<String>) -> Self {
        Cell { row, col, kind, value: value.into() }
    }

    pub fn kind(&self) -> CellType {
        self.kind
    }

    pub fn raw(&self) -> &str {
        &self.value
    }

    /// Excel-style reference such as `B2`.
    pub fn reference(&self) -> String {
        index_to_reference(self.row, self.col)
    }

    /// The same cell reported at another position.
    pub(crate) fn moved(&self, row: usize, col: usize) -> Self {
        Cell { row, col, ..self.clone() }
    }

    pub fn to_boolean(&self) -> Option<bool> {
        match self.value.trim().to_ascii_lowercase().as_str() {
            "1" | "true" => Some(true),
            "0" | "false" => Some(false),
            _ => None,
        }
    }

    pub fn to_double(&self) -> Option<f64> {
        match self.kind {
            CellType::Error | CellType::Empty => None,
            _ => self.value.trim().parse::<f64>().ok(),
        }
    }

    /// Integer value; fractional numbers are rejected rather than truncated.
    pub fn to_bigint(&self) -> Option<i64> {
        if let Ok(integer) = self.value.trim().parse::<i64>() {
            return Some(integer);
        }
        self.to_double()
            .filter(|number| number.fract() == 0.0 && number.abs() < i64::MAX as f64)
            .map(|number| number as i64)
    }

    pub fn to_datetime(&self) -> Option<NaiveDateTime> {
        match self.kind {
            CellType::Date(epoch) | CellType::DateTime(epoch) => epoch.from_serial(self.to_double()?),
            CellType::Time | CellType::Number => Epoch::Y1900.from_serial(self.to_double()?),
            CellType::IsoDateTime | CellType::Text => parse_iso(&self.value),
            _ => None,
        }
    }

    pub fn to_date(&self) -> Option<NaiveDate> {
        self.to_datetime().map(|datetime| datetime.date())
    }
}

/// ISO 8601 date or date-time text.
fn parse_iso(value: &str) -> Option<NaiveDateTime> {
    let value = value.trim().trim_end_matches('Z');
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"]
        .iter()
        .find_map(|pattern| NaiveDateTime::parse_from_str(value, pattern).ok())
        .or_else(|| NaiveDate::parse_from_str(value, "%Y-%m-%d").ok().and_then(|date| date.and_hms_opt(0, 0, 0)))
}

impl std::fmt::Display for Cell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let formatted = match self.kind {
            CellType::Boolean => self.to_boolean().map(|value| value.to_string()),
            CellType::Date(_) => self.to_date().map(|date| date.format("%Y-%m-%d").to_string()),
            CellType::DateTime(_) => self.to_datetime().map(|value| value.format("%Y-%m-%d %H:%M:%S").to_string()),
            CellType::Time => self.to_datetime().map(|value| value.format("%H:%M:%S").to_string()),
            CellType::IsoDateTime => Some(self.value.replace('T', " ")),
            _ => None,
        };
        // Unconvertible values display as stored.
        f.write_str(formatted.as_deref().unwrap_or(&self.value))
    }
}
