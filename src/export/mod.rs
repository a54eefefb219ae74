//! CSV export of stored daily temperatures.

use crate::models::StoredRecord;
use crate::storage::Repository;
use anyhow::{Context, Result};
use serde::Serialize;
use std::io::Write;
use std::path::Path;
use tracing::info;

#[derive(Debug, Serialize)]
struct CsvRow {
    date: String,
    max: f64,
    min: f64,
    mean: f64,
}

impl From<&StoredRecord> for CsvRow {
    fn from(r: &StoredRecord) -> Self {
        Self {
            date: r.date.format("%Y-%m-%d").to_string(),
            max: r.max,
            min: r.min,
            mean: r.mean,
        }
    }
}

/// Write `date,max,min,mean` rows to any writer. Returns the row count.
pub fn write_csv<W: Write>(records: &[StoredRecord], out: W) -> Result<usize> {
    let mut writer = csv::Writer::from_writer(out);
    for rec in records {
        writer.serialize(CsvRow::from(rec))?;
    }
    writer.flush()?;
    Ok(records.len())
}

/// Export every stored record from `from_year` to `to_year` inclusive.
pub fn export_years(repo: &Repository, from_year: i32, to_year: i32, path: &Path) -> Result<usize> {
    let mut records = Vec::new();
    for year in from_year..=to_year {
        records.extend(repo.fetch_year(year)?);
    }

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Could not create dir {:?}", parent))?;
    }
    let file = std::fs::File::create(path)
        .with_context(|| format!("Could not create {:?}", path))?;
    let n = write_csv(&records, file)?;

    info!("Exported {} records ({}–{}) to {:?}", n, from_year, to_year, path);
    Ok(n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DailyRecord, WeatherAggregate};
    use chrono::NaiveDate;
    use std::collections::BTreeMap;

    #[test]
    fn test_export_years_writes_header_and_rows() {
        let repo = Repository::open_in_memory().unwrap();
        repo.run_migrations().unwrap();
        let mut agg = WeatherAggregate::new();
        agg.merge(BTreeMap::from([
            (NaiveDate::from_ymd_opt(2018, 12, 31).unwrap(), DailyRecord { max: -2.5, min: -14.0, mean: -8.25 }),
            (NaiveDate::from_ymd_opt(2019, 1, 1).unwrap(), DailyRecord { max: -3.0, min: -15.5, mean: -9.25 }),
            (NaiveDate::from_ymd_opt(2020, 1, 1).unwrap(), DailyRecord { max: 0.0, min: -1.0, mean: -0.5 }),
        ]));
        repo.save_aggregate("27174", &agg).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("temps.csv");
        let n = export_years(&repo, 2018, 2019, &path).unwrap();

        assert_eq!(n, 2);
        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines, vec!["date,max,min,mean", "2018-12-31,-2.5,-14.0,-8.25", "2019-01-01,-3.0,-15.5,-9.25"]);
    }
}
