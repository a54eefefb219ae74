use chrono::{Datelike, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::scraper::ParseError;

// ── Calendar month ────────────────────────────────────────────────────────────

/// One calendar month; the unit of a single page request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct YearMonth {
    pub year: i32,
    pub month: u32,
}

impl YearMonth {
    pub fn new(year: i32, month: u32) -> Option<Self> {
        if (1..=12).contains(&month) && NaiveDate::from_ymd_opt(year, month, 1).is_some() {
            Some(Self { year, month })
        } else {
            None
        }
    }

    pub fn of(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    /// The month before this one, rolling January back to December of year - 1.
    pub fn pred(self) -> Self {
        if self.month == 1 {
            Self { year: self.year - 1, month: 12 }
        } else {
            Self { year: self.year, month: self.month - 1 }
        }
    }

    pub fn succ(self) -> Self {
        if self.month == 12 {
            Self { year: self.year + 1, month: 1 }
        } else {
            Self { year: self.year, month: self.month + 1 }
        }
    }

    pub fn first_day(self) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(self.year, self.month, 1)
    }

    /// Number of days in the month, leap years included.
    pub fn days_in_month(self) -> u32 {
        let (Some(first), Some(next)) = (self.first_day(), self.succ().first_day()) else {
            return 0;
        };
        (next - first).num_days() as u32
    }

    pub fn contains(self, date: NaiveDate) -> bool {
        date.year() == self.year && date.month() == self.month
    }

    /// Every month from `from` to `to`, both inclusive, in chronological order.
    pub fn range_inclusive(from: Self, to: Self) -> impl Iterator<Item = YearMonth> {
        std::iter::successors(Some(from), move |m| {
            let next = m.succ();
            (next <= to).then_some(next)
        })
        .take_while(move |m| *m <= to)
    }
}

impl fmt::Display for YearMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for YearMonth {
    type Err = String;

    /// Accepts `YYYY-MM` or `YYYY/MM`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (year, month) = s
            .split_once(['-', '/'])
            .ok_or_else(|| format!("expected YYYY-MM, got {:?}", s))?;
        let year: i32 = year.parse().map_err(|_| format!("bad year in {:?}", s))?;
        let month: u32 = month.parse().map_err(|_| format!("bad month in {:?}", s))?;
        YearMonth::new(year, month).ok_or_else(|| format!("month out of range in {:?}", s))
    }
}

// ── Daily temperatures ────────────────────────────────────────────────────────

/// Max / min / mean temperature for one day, in degrees Celsius.
///
/// Only complete rows become records, so all three fields are always present.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DailyRecord {
    pub max: f64,
    pub min: f64,
    pub mean: f64,
}

/// All records gathered during one scraping run, keyed by calendar day.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WeatherAggregate {
    records: BTreeMap<NaiveDate, DailyRecord>,
}

impl WeatherAggregate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Later scrapes win for dates already present.
    pub fn merge(&mut self, month: BTreeMap<NaiveDate, DailyRecord>) -> usize {
        let n = month.len();
        self.records.extend(month);
        n
    }

    pub fn get(&self, date: &NaiveDate) -> Option<&DailyRecord> {
        self.records.get(date)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&NaiveDate, &DailyRecord)> {
        self.records.iter()
    }

    pub fn date_range(&self) -> Option<(NaiveDate, NaiveDate)> {
        let first = self.records.keys().next()?;
        let last = self.records.keys().next_back()?;
        Some((*first, *last))
    }
}

// ── Parser output ─────────────────────────────────────────────────────────────

/// What one page yields before assembly: the day annotations in document
/// order and the flat sequence of data-cell texts.
#[derive(Debug, Clone, Default)]
pub struct ParsedPage {
    pub dates: Vec<NaiveDate>,
    pub cells: Vec<String>,
    /// Set when the page could only be read partially.
    pub fault: Option<ParseError>,
}

// ── Stored rows ───────────────────────────────────────────────────────────────

/// A record as read back from the database.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoredRecord {
    pub date: NaiveDate,
    pub station_id: String,
    pub max: f64,
    pub min: f64,
    pub mean: f64,
    #[serde(skip_serializing)]
    pub scraped_at: NaiveDateTime,
}
