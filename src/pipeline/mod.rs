//! Pipeline orchestrator: ties scraper → controller → storage together.
//!
//! ## Run modes
//!
//! `Range` / `Year`: scrape an explicit span of months, oldest first.
//!
//! `Backfill`: start at a month (default: the current one) and walk back until
//!   the archive stops returning new pages.
//!
//! Whatever the mode, the run's aggregate is saved in one transaction at the
//! end, after an optional purge of previously stored records.

pub mod controller;

use crate::config::AppConfig;
use crate::models::{WeatherAggregate, YearMonth};
use crate::scraper::PageSource;
use crate::scraper::http_client::HttpClient;
use crate::storage::{Repository, RunSummary};
use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

pub use self::controller::{CancelFlag, RunReport, ScrapeController, StopReason};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrapeMode {
    Range { from: YearMonth, to: YearMonth },
    Year(i32),
    Backfill { from: Option<YearMonth> },
}

impl ScrapeMode {
    pub fn label(&self) -> &'static str {
        match self {
            ScrapeMode::Range { .. } => "range",
            ScrapeMode::Year(_) => "year",
            ScrapeMode::Backfill { .. } => "backfill",
        }
    }
}

pub struct Pipeline {
    config: AppConfig,
    cancel: CancelFlag,
}

impl Pipeline {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            cancel: CancelFlag::new(),
        }
    }

    pub fn with_cancel_flag(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub async fn run(&self, mode: ScrapeMode) -> Result<PipelineStats> {
        let repo = Repository::open(&self.config.storage.db_path).context("Failed to open DuckDB")?;
        if self.config.storage.run_migrations {
            repo.run_migrations()?;
        }

        let client = HttpClient::new(&self.config.scraper).context("Failed to build scraper")?;
        let today = Local::now().date_naive();

        self.run_with(&repo, client, mode, today).await
    }

    /// Run against any page source; `today` decides how much of the running
    /// month is readable.
    pub async fn run_with<S: PageSource>(
        &self,
        repo: &Repository,
        source: S,
        mode: ScrapeMode,
        today: NaiveDate,
    ) -> Result<PipelineStats> {
        let run_id = repo.begin_scrape_run(mode.label())?;

        let deadline = self
            .config
            .pipeline
            .max_run_secs
            .map(|secs| Instant::now() + Duration::from_secs(secs));

        let mut ctl = ScrapeController::new(source, today)
            .with_epoch_start_year(self.config.scraper.epoch_start_year)
            .with_deadline(deadline)
            .with_cancel_flag(self.cancel.clone())
            .with_max_consecutive_failures(self.config.pipeline.max_consecutive_failures);

        match mode {
            ScrapeMode::Range { from, to } => {
                ctl.scrape_range(from, to).await;
            }
            ScrapeMode::Year(year) => {
                let (Some(from), Some(to)) = (YearMonth::new(year, 1), YearMonth::new(year, 12)) else {
                    anyhow::bail!("year {} is out of range", year);
                };
                ctl.scrape_range(from, to).await;
            }
            ScrapeMode::Backfill { from } => {
                let start = from.unwrap_or_else(|| YearMonth::of(today));
                ctl.scrape_backward_until_exhausted(start).await;
            }
        }

        let station_id = ctl.station_id().to_string();
        let (aggregate, report) = ctl.into_results();

        let saved = self.save(repo, &station_id, &aggregate, report.stop_reason);

        let stop_reason = report.stop_reason.map(|r| format!("{:?}", r));
        let error = saved.as_ref().err().map(|e| format!("{:#}", e));
        if let Err(e) = repo.finish_scrape_run(
            run_id,
            &RunSummary {
                months_visited: report.months_visited,
                records_saved: *saved.as_ref().unwrap_or(&0),
                stop_reason: stop_reason.as_deref(),
                error: error.as_deref(),
            },
        ) {
            warn!("Failed to record scrape run {}: {:#}", run_id, e);
        }

        let records_saved = saved?;
        let stats = PipelineStats {
            records_saved,
            date_range: aggregate.date_range(),
            report,
        };

        info!(
            "=== Done: {} months | {} merged | {} fetch errors | {} misaligned | {} records saved | stop: {:?} ===",
            stats.report.months_visited,
            stats.report.months_merged,
            stats.report.fetch_failures,
            stats.report.misaligned,
            stats.records_saved,
            stats.report.stop_reason,
        );

        Ok(stats)
    }

    /// Only a walk that reached its natural end replaces stored history; an
    /// interrupted one upserts what it got.
    fn save(
        &self,
        repo: &Repository,
        station_id: &str,
        aggregate: &WeatherAggregate,
        stop_reason: Option<StopReason>,
    ) -> Result<usize> {
        if aggregate.is_empty() {
            info!("Nothing scraped; stored records left untouched");
            return Ok(0);
        }
        let completed = stop_reason.is_some_and(StopReason::is_natural_end);
        if self.config.pipeline.purge_before_save && completed {
            repo.replace_all(station_id, aggregate)
        } else {
            if self.config.pipeline.purge_before_save {
                warn!("Run stopped early ({:?}); merging without purge", stop_reason);
            }
            repo.save_aggregate(station_id, aggregate)
        }
    }
}

#[derive(Debug)]
pub struct PipelineStats {
    pub records_saved: usize,
    pub date_range: Option<(NaiveDate, NaiveDate)>,
    pub report: RunReport,
}
