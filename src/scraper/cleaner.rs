use crate::models::{DailyRecord, ParsedPage, YearMonth};
use crate::scraper::AssembleError;
use chrono::{Datelike, NaiveDate};
use std::collections::BTreeMap;
use tracing::debug;

/// Columns per day row in the daily-data table.
pub const ROW_WIDTH: usize = 11;

const MAX_COL: usize = 0;
const MIN_COL: usize = 1;
const MEAN_COL: usize = 2;

// ── Parsers ───────────────────────────────────────────────────────────────────

/// Parse a temperature cell. Blank cells and markers such as "M" are missing.
/// "12.5" → 12.5 | "-0.4" → -0.4 | "" → None | "M" → None
pub fn parse_temperature(s: &str) -> Option<f64> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    s.parse::<f64>().ok().filter(|t| t.is_finite())
}

/// How many day rows of `month` can hold data as of `today`.
///
/// The running month only has rows up to today; any other month has all of
/// its days.
pub fn valid_row_count(month: YearMonth, today: NaiveDate) -> usize {
    if month == YearMonth::of(today) {
        today.day() as usize
    } else {
        month.days_in_month() as usize
    }
}

fn row_to_record(row: &[String]) -> Option<DailyRecord> {
    Some(DailyRecord {
        max: parse_temperature(row.get(MAX_COL)?)?,
        min: parse_temperature(row.get(MIN_COL)?)?,
        mean: parse_temperature(row.get(MEAN_COL)?)?,
    })
}

// ── Page → records ────────────────────────────────────────────────────────────

/// Turn one parsed page into date-keyed records.
///
/// The flat cell list is cut into rows of [`ROW_WIDTH`]; at most one row per
/// valid day is read and a trailing partial row is discarded. Rows pair with
/// the page's date annotations by position, so both lists must have the same
/// length once capped to the valid day count, and the dates must be strictly
/// increasing. Rows missing max, min or mean produce no record.
pub fn assemble(
    page: &ParsedPage,
    month: YearMonth,
    today: NaiveDate,
) -> Result<BTreeMap<NaiveDate, DailyRecord>, AssembleError> {
    let slots = valid_row_count(month, today);

    let rows: Vec<&[String]> = page.cells.chunks_exact(ROW_WIDTH).take(slots).collect();
    let dates: Vec<NaiveDate> = page.dates.iter().copied().take(slots).collect();

    if rows.len() != dates.len() {
        return Err(AssembleError::Alignment {
            rows: rows.len(),
            dates: dates.len(),
        });
    }
    if let Some(date) = dates.iter().find(|d| !month.contains(**d)) {
        return Err(AssembleError::ForeignDate { date: *date, month });
    }
    // A repeated or backwards day would let one row overwrite another.
    if let Some(w) = dates.windows(2).find(|w| w[0] >= w[1]) {
        return Err(AssembleError::Unordered { date: w[1] });
    }

    let records: BTreeMap<NaiveDate, DailyRecord> = dates
        .into_iter()
        .zip(rows)
        .filter_map(|(date, row)| row_to_record(row).map(|r| (date, r)))
        .collect();

    debug!("{}: {} of {} rows complete", month, records.len(), slots);
    Ok(records)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn ym(year: i32, month: u32) -> YearMonth {
        YearMonth::new(year, month).unwrap()
    }

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    /// A row with the three temperature columns set and eight filler columns.
    fn row(max: &str, min: &str, mean: &str) -> Vec<String> {
        let mut cells = vec![max.to_string(), min.to_string(), mean.to_string()];
        cells.extend((3..ROW_WIDTH).map(|i| format!("x{}", i)));
        cells
    }

    fn page(dates: Vec<NaiveDate>, rows: Vec<Vec<String>>) -> ParsedPage {
        ParsedPage {
            dates,
            cells: rows.into_iter().flatten().collect(),
            fault: None,
        }
    }

    fn today() -> NaiveDate {
        d(2024, 6, 15)
    }

    #[test]
    fn test_parse_temperature() {
        assert_eq!(parse_temperature("12.5"), Some(12.5));
        assert_eq!(parse_temperature(" -0.4 "), Some(-0.4));
        assert_eq!(parse_temperature(""), None);
        assert_eq!(parse_temperature("M"), None);
        assert_eq!(parse_temperature("NaN"), None);
        assert_eq!(parse_temperature("inf"), None);
    }

    #[test]
    fn test_valid_row_count() {
        assert_eq!(valid_row_count(ym(2020, 2), today()), 29);
        assert_eq!(valid_row_count(ym(2019, 2), today()), 28);
        assert_eq!(valid_row_count(ym(2024, 6), today()), 15);
        assert_eq!(valid_row_count(ym(2023, 6), today()), 30);
    }

    #[test]
    fn test_three_rows_for_march_2020() {
        let p = page(
            vec![d(2020, 3, 1), d(2020, 3, 2), d(2020, 3, 3)],
            vec![row("5.0", "-3.0", "1.0"), row("6.5", "-2.5", "2.0"), row("-1.0", "-9.0", "-5.0")],
        );

        let records = assemble(&p, ym(2020, 3), today()).unwrap();

        assert_eq!(records.len(), 3);
        assert_eq!(records[&d(2020, 3, 1)], DailyRecord { max: 5.0, min: -3.0, mean: 1.0 });
        assert_eq!(records[&d(2020, 3, 2)], DailyRecord { max: 6.5, min: -2.5, mean: 2.0 });
        assert_eq!(records[&d(2020, 3, 3)], DailyRecord { max: -1.0, min: -9.0, mean: -5.0 });
    }

    #[test]
    fn test_leap_february_with_28_rows() {
        let dates: Vec<_> = (1..=28).map(|day| d(2020, 2, day)).collect();
        let rows: Vec<_> = (1..=28).map(|i| row(&format!("{}.0", i), "-1.0", "0.5")).collect();

        let records = assemble(&page(dates, rows), ym(2020, 2), today()).unwrap();

        assert_eq!(records.len(), 28);
        assert!(!records.contains_key(&d(2020, 2, 29)));
        assert_eq!(records[&d(2020, 2, 28)].max, 28.0);
    }

    #[test]
    fn test_rows_beyond_day_count_are_ignored() {
        // Summary rows (sum, avg, extremes) follow the last day on the page.
        let dates: Vec<_> = (1..=30).map(|day| d(2023, 4, day)).collect();
        let mut rows: Vec<_> = (1..=30).map(|_| row("10.0", "0.0", "5.0")).collect();
        rows.push(row("300.0", "0.0", "150.0"));
        rows.push(row("10.0", "0.0", "5.0"));

        let records = assemble(&page(dates, rows), ym(2023, 4), today()).unwrap();

        assert_eq!(records.len(), 30);
        assert!(records.keys().all(|k| ym(2023, 4).contains(*k)));
        assert!(records.values().all(|r| r.max == 10.0));
    }

    #[test]
    fn test_incomplete_rows_are_dropped_without_shifting_dates() {
        let p = page(
            vec![d(2018, 1, 1), d(2018, 1, 2), d(2018, 1, 3), d(2018, 1, 4)],
            vec![
                row("1.0", "-1.0", "0.0"),
                row("", "-2.0", "-1.0"),
                row("M", "M", "M"),
                row("4.0", "-4.0", "0.0"),
            ],
        );

        let records = assemble(&p, ym(2018, 1), today()).unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[&d(2018, 1, 1)].max, 1.0);
        assert_eq!(records[&d(2018, 1, 4)].max, 4.0);
    }

    #[test]
    fn test_trailing_partial_row_is_discarded() {
        let mut cells = row("1.0", "0.0", "0.5");
        cells.extend(["2.0".to_string(), "1.0".to_string(), "1.5".to_string()]);
        let p = ParsedPage {
            dates: vec![d(2018, 2, 1)],
            cells,
            fault: None,
        };

        let records = assemble(&p, ym(2018, 2), today()).unwrap();
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn test_running_month_reads_up_to_today() {
        let dates: Vec<_> = (1..=30).map(|day| d(2024, 6, day)).collect();
        let rows: Vec<_> = (1..=30).map(|_| row("20.0", "10.0", "15.0")).collect();

        let records = assemble(&page(dates, rows), ym(2024, 6), today()).unwrap();

        assert_eq!(records.len(), 15);
        assert_eq!(records.keys().next_back(), Some(&d(2024, 6, 15)));
    }

    #[test]
    fn test_row_and_date_count_mismatch_is_an_error() {
        let p = page(
            vec![d(2018, 3, 1), d(2018, 3, 2)],
            vec![row("1.0", "0.0", "0.5")],
        );

        let err = assemble(&p, ym(2018, 3), today()).unwrap_err();
        assert_eq!(err, AssembleError::Alignment { rows: 1, dates: 2 });
    }

    #[test]
    fn test_date_from_another_month_is_an_error() {
        let p = page(vec![d(2018, 4, 1)], vec![row("1.0", "0.0", "0.5")]);

        let err = assemble(&p, ym(2018, 3), today()).unwrap_err();
        assert!(matches!(err, AssembleError::ForeignDate { .. }));
    }

    #[test]
    fn test_repeated_date_is_an_error() {
        let p = page(
            vec![d(2020, 3, 1), d(2020, 3, 1)],
            vec![row("5.0", "1.0", "3.0"), row("9.0", "2.0", "5.5")],
        );

        let err = assemble(&p, ym(2020, 3), today()).unwrap_err();
        assert_eq!(err, AssembleError::Unordered { date: d(2020, 3, 1) });
    }

    #[test]
    fn test_out_of_order_dates_are_an_error() {
        let p = page(
            vec![d(2020, 3, 1), d(2020, 3, 3), d(2020, 3, 2)],
            vec![row("5.0", "1.0", "3.0"), row("6.0", "1.0", "3.5"), row("7.0", "1.0", "4.0")],
        );

        let err = assemble(&p, ym(2020, 3), today()).unwrap_err();
        assert_eq!(err, AssembleError::Unordered { date: d(2020, 3, 2) });
    }

    #[test]
    fn test_output_never_exceeds_complete_rows() {
        let dates: Vec<_> = (1..=31).map(|day| d(2019, 7, day)).collect();
        let rows: Vec<_> = (1..=31)
            .map(|i| if i % 3 == 0 { row("", "1.0", "1.0") } else { row("1.0", "1.0", "1.0") })
            .collect();
        let complete = rows.iter().filter(|r| r[..3].iter().all(|c| !c.is_empty())).count();

        let records = assemble(&page(dates, rows), ym(2019, 7), today()).unwrap();
        assert!(records.len() <= complete);
        assert_eq!(records.len(), 21);
    }
}
