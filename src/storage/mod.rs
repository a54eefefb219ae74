use crate::models::{StoredRecord, WeatherAggregate, YearMonth};
use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use duckdb::{params, Connection};
use std::path::Path;
use tracing::info;

// ── Schema ────────────────────────────────────────────────────────────────────

const DDL: &str = r#"
CREATE TABLE IF NOT EXISTS daily_temperatures (
    date        DATE     PRIMARY KEY,
    station_id  VARCHAR  NOT NULL,
    max_temp    DOUBLE   NOT NULL,
    min_temp    DOUBLE   NOT NULL,
    mean_temp   DOUBLE   NOT NULL,
    scraped_at  TIMESTAMP NOT NULL
);

CREATE SEQUENCE IF NOT EXISTS scrape_run_ids START 1;

CREATE TABLE IF NOT EXISTS scrape_runs (
    id                  INTEGER PRIMARY KEY DEFAULT nextval('scrape_run_ids'),
    started_at          TIMESTAMP NOT NULL,
    finished_at         TIMESTAMP,
    status              VARCHAR NOT NULL DEFAULT 'running',
    mode                VARCHAR,
    months_visited      INTEGER DEFAULT 0,
    records_saved       INTEGER DEFAULT 0,
    stop_reason         VARCHAR,
    error_msg           VARCHAR
);

CREATE TABLE IF NOT EXISTS schema_version (
    version     INTEGER PRIMARY KEY,
    applied_at  TIMESTAMP NOT NULL
);
"#;

const SELECT_RECORDS: &str =
    "SELECT date, station_id, max_temp, min_temp, mean_temp, scraped_at FROM daily_temperatures";

/// Finished-run summary written to `scrape_runs`.
#[derive(Debug, Clone, Default)]
pub struct RunSummary<'a> {
    pub months_visited: usize,
    pub records_saved: usize,
    pub stop_reason: Option<&'a str>,
    pub error: Option<&'a str>,
}

// ── Repository ────────────────────────────────────────────────────────────────

pub struct Repository {
    conn: Connection,
}

impl Repository {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Could not create dir {:?}", parent))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open DuckDB at {:?}", path))?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self { conn: Connection::open_in_memory()? })
    }

    pub fn run_migrations(&self) -> Result<()> {
        info!("Running migrations…");
        self.conn.execute_batch(DDL).context("DDL failed")?;
        self.conn.execute(
            "INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (1, ?)",
            params![Utc::now().naive_utc()],
        )?;
        info!("Migrations done.");
        Ok(())
    }

    // ── Daily temperatures ────────────────────────────────────────────────────

    /// Remove every stored temperature so a fresh run can be saved.
    pub fn purge(&self) -> Result<usize> {
        let n = self
            .conn
            .execute("DELETE FROM daily_temperatures", [])
            .context("purge failed")?;
        info!("Purged {} records", n);
        Ok(n)
    }

    /// Upsert the whole aggregate in one transaction.
    pub fn save_aggregate(&self, station_id: &str, aggregate: &WeatherAggregate) -> Result<usize> {
        if aggregate.is_empty() {
            return Ok(0);
        }

        let tx = self.conn.unchecked_transaction()?;
        upsert_records(&tx, station_id, aggregate)?;
        tx.commit()?;
        Ok(aggregate.len())
    }

    /// Delete every stored record and save the aggregate in their place, in
    /// one transaction. A failed insert leaves the old records intact.
    pub fn replace_all(&self, station_id: &str, aggregate: &WeatherAggregate) -> Result<usize> {
        let tx = self.conn.unchecked_transaction()?;
        let purged = tx
            .execute("DELETE FROM daily_temperatures", [])
            .context("purge failed")?;
        upsert_records(&tx, station_id, aggregate)?;
        tx.commit()?;

        info!("Replaced {} stored records with {}", purged, aggregate.len());
        Ok(aggregate.len())
    }

    /// Records of one month, oldest first.
    pub fn fetch_month(&self, year: i32, month: u32) -> Result<Vec<StoredRecord>> {
        let ym = YearMonth::new(year, month)
            .with_context(|| format!("invalid month {}-{}", year, month))?;
        let (Some(first), Some(next)) = (ym.first_day(), ym.succ().first_day()) else {
            return Ok(vec![]);
        };
        self.fetch_between(first, next)
    }

    /// Records of one calendar year, oldest first.
    pub fn fetch_year(&self, year: i32) -> Result<Vec<StoredRecord>> {
        let first = NaiveDate::from_ymd_opt(year, 1, 1)
            .with_context(|| format!("invalid year {}", year))?;
        let next = NaiveDate::from_ymd_opt(year + 1, 1, 1)
            .with_context(|| format!("invalid year {}", year + 1))?;
        self.fetch_between(first, next)
    }

    /// `[from, until)`
    fn fetch_between(&self, from: NaiveDate, until: NaiveDate) -> Result<Vec<StoredRecord>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{SELECT_RECORDS} WHERE date >= ? AND date < ? ORDER BY date"))?;
        let rows = stmt
            .query_map(params![from, until], |r| {
                Ok(StoredRecord {
                    date: r.get(0)?,
                    station_id: r.get(1)?,
                    max: r.get(2)?,
                    min: r.get(3)?,
                    mean: r.get(4)?,
                    scraped_at: r.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Daily mean temperatures of `year`, grouped by month (index 0 = January).
    /// Months without data are empty.
    pub fn monthly_mean_series(&self, year: i32) -> Result<Vec<Vec<f64>>> {
        let mut series = vec![Vec::new(); 12];
        for rec in self.fetch_year(year)? {
            let idx = YearMonth::of(rec.date).month as usize - 1;
            series[idx].push(rec.mean);
        }
        Ok(series)
    }

    pub fn record_count(&self) -> Result<i64> {
        let mut s = self.conn.prepare("SELECT COUNT(*) FROM daily_temperatures")?;
        Ok(s.query_row([], |r| r.get(0))?)
    }

    pub fn date_range(&self) -> Result<(Option<NaiveDate>, Option<NaiveDate>)> {
        let mut s = self
            .conn
            .prepare("SELECT MIN(date), MAX(date) FROM daily_temperatures")?;
        Ok(s.query_row([], |r| Ok((r.get(0)?, r.get(1)?)))?)
    }

    // ── Scrape run log ────────────────────────────────────────────────────────

    pub fn begin_scrape_run(&self, mode: &str) -> Result<i64> {
        let id: i64 = self.conn.query_row(
            "INSERT INTO scrape_runs (started_at, status, mode) VALUES (?, 'running', ?) RETURNING id",
            params![Utc::now().naive_utc(), mode],
            |r| r.get(0),
        )?;
        Ok(id)
    }

    pub fn finish_scrape_run(&self, run_id: i64, summary: &RunSummary<'_>) -> Result<()> {
        self.conn.execute(
            r#"UPDATE scrape_runs SET
               finished_at = ?, status = ?,
               months_visited = ?, records_saved = ?, stop_reason = ?, error_msg = ?
               WHERE id = ?"#,
            params![
                Utc::now().naive_utc(),
                if summary.error.is_none() { "success" } else { "error" },
                summary.months_visited as i64,
                summary.records_saved as i64,
                summary.stop_reason,
                summary.error,
                run_id,
            ],
        )?;
        Ok(())
    }

    pub fn last_run_status(&self) -> Result<Option<(String, Option<String>)>> {
        let mut s = self
            .conn
            .prepare("SELECT status, stop_reason FROM scrape_runs ORDER BY id DESC LIMIT 1")?;
        let mut rows = s.query([])?;
        match rows.next()? {
            Some(r) => Ok(Some((r.get(0)?, r.get(1)?))),
            None => Ok(None),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

fn upsert_records(conn: &Connection, station_id: &str, aggregate: &WeatherAggregate) -> Result<()> {
    let now = Utc::now().naive_utc();
    let sql = r#"
        INSERT INTO daily_temperatures
            (date, station_id, max_temp, min_temp, mean_temp, scraped_at)
        VALUES (?, ?, ?, ?, ?, ?)
        ON CONFLICT (date) DO UPDATE SET
            station_id = excluded.station_id,
            max_temp   = excluded.max_temp,
            min_temp   = excluded.min_temp,
            mean_temp  = excluded.mean_temp,
            scraped_at = excluded.scraped_at
    "#;

    for (date, rec) in aggregate.iter() {
        conn.execute(sql, params![*date, station_id, rec.max, rec.min, rec.mean, now])
            .with_context(|| format!("insert record {}", date))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DailyRecord;
    use std::collections::BTreeMap;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn repo() -> Repository {
        let repo = Repository::open_in_memory().unwrap();
        repo.run_migrations().unwrap();
        repo
    }

    fn aggregate(days: &[(NaiveDate, f64)]) -> WeatherAggregate {
        let mut agg = WeatherAggregate::new();
        agg.merge(
            days.iter()
                .map(|(date, mean)| (*date, DailyRecord { max: mean + 5.0, min: mean - 5.0, mean: *mean }))
                .collect::<BTreeMap<_, _>>(),
        );
        agg
    }

    #[test]
    fn test_save_and_fetch_month() {
        let repo = repo();
        let agg = aggregate(&[
            (d(2018, 2, 28), -8.0),
            (d(2018, 3, 1), -7.5),
            (d(2018, 3, 31), 1.2),
            (d(2018, 4, 1), 3.0),
        ]);

        assert_eq!(repo.save_aggregate("27174", &agg).unwrap(), 4);

        let march = repo.fetch_month(2018, 3).unwrap();
        assert_eq!(march.len(), 2);
        assert_eq!(march[0].date, d(2018, 3, 1));
        assert_eq!(march[0].mean, -7.5);
        assert_eq!(march[0].max, -2.5);
        assert_eq!(march[1].date, d(2018, 3, 31));
        assert_eq!(march[1].station_id, "27174");
    }

    #[test]
    fn test_save_overwrites_same_date() {
        let repo = repo();
        repo.save_aggregate("27174", &aggregate(&[(d(2019, 1, 1), 1.0)])).unwrap();
        repo.save_aggregate("27174", &aggregate(&[(d(2019, 1, 1), 2.0)])).unwrap();

        assert_eq!(repo.record_count().unwrap(), 1);
        assert_eq!(repo.fetch_month(2019, 1).unwrap()[0].mean, 2.0);
    }

    #[test]
    fn test_purge_clears_records() {
        let repo = repo();
        repo.save_aggregate("27174", &aggregate(&[(d(2019, 1, 1), 1.0), (d(2019, 1, 2), 2.0)]))
            .unwrap();

        assert_eq!(repo.purge().unwrap(), 2);
        assert_eq!(repo.record_count().unwrap(), 0);
        assert_eq!(repo.date_range().unwrap(), (None, None));
    }

    #[test]
    fn test_replace_all_swaps_stored_records() {
        let repo = repo();
        repo.save_aggregate("27174", &aggregate(&[(d(1999, 2, 1), 1.0), (d(1999, 2, 2), 2.0)]))
            .unwrap();

        let n = repo.replace_all("27174", &aggregate(&[(d(2018, 1, 1), -4.0)])).unwrap();

        assert_eq!(n, 1);
        assert_eq!(repo.record_count().unwrap(), 1);
        assert!(repo.fetch_year(1999).unwrap().is_empty());
        assert_eq!(repo.fetch_month(2018, 1).unwrap()[0].mean, -4.0);
    }

    #[test]
    fn test_monthly_mean_series() {
        let repo = repo();
        repo.save_aggregate(
            "27174",
            &aggregate(&[(d(2020, 1, 1), -10.0), (d(2020, 1, 2), -12.0), (d(2020, 12, 31), -20.0)]),
        )
        .unwrap();

        let series = repo.monthly_mean_series(2020).unwrap();
        assert_eq!(series.len(), 12);
        assert_eq!(series[0], vec![-10.0, -12.0]);
        assert!(series[1..11].iter().all(Vec::is_empty));
        assert_eq!(series[11], vec![-20.0]);
    }

    #[test]
    fn test_scrape_run_log() {
        let repo = repo();
        let id = repo.begin_scrape_run("range").unwrap();
        repo.finish_scrape_run(
            id,
            &RunSummary {
                months_visited: 3,
                records_saved: 90,
                stop_reason: Some("RangeComplete"),
                error: None,
            },
        )
        .unwrap();

        assert_eq!(
            repo.last_run_status().unwrap(),
            Some(("success".to_string(), Some("RangeComplete".to_string())))
        );
    }
}
