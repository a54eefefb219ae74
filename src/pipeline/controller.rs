//! Month-walking scrape controller.
//!
//! Drives fetch → parse → assemble for one month at a time and owns the run's
//! [`WeatherAggregate`]. Two walks are offered:
//!
//! * [`ScrapeController::scrape_range`] visits an explicit range of months in
//!   chronological order.
//! * [`ScrapeController::scrape_backward_until_exhausted`] walks into the past
//!   until a page carries no dates, or the same dates as a page already seen.
//!
//! A month that fails to fetch or assemble is logged and skipped; it never
//! stops a walk on its own.

use crate::models::{WeatherAggregate, YearMonth};
use crate::scraper::cleaner::assemble;
use crate::scraper::parsers::TableParser;
use crate::scraper::{AssembleError, FetchError, PageSource};
use chrono::NaiveDate;
use std::collections::HashSet;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::time::Instant;
use tracing::{debug, info, warn};

// ── Cancellation ──────────────────────────────────────────────────────────────

/// Shared stop request, checked between months.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

// ── Run state ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Running,
    Stopped(StopReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Every month of an explicit range was visited.
    RangeComplete,
    /// A page carried no day annotations at all.
    Exhausted,
    /// A page repeated a date list already seen in this run.
    Duplicate,
    /// The walk went past the archive's first year.
    ReachedEpoch,
    DeadlineExceeded,
    Cancelled,
    TooManyFailures,
}

impl StopReason {
    /// The walk ended on its own rather than being cut short.
    pub fn is_natural_end(self) -> bool {
        matches!(
            self,
            StopReason::RangeComplete | StopReason::Exhausted | StopReason::Duplicate | StopReason::ReachedEpoch
        )
    }
}

/// What happened to a single month.
#[derive(Debug)]
pub enum MonthOutcome {
    Merged { records: usize },
    Empty,
    Duplicate,
    FetchFailed(FetchError),
    Misaligned(AssembleError),
}

/// Order-preserving hash of a page's date list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DateListFingerprint(u64);

impl DateListFingerprint {
    pub fn of(dates: &[NaiveDate]) -> Self {
        let mut hasher = DefaultHasher::new();
        dates.hash(&mut hasher);
        Self(hasher.finish())
    }
}

/// Where the walk is and what it has seen.
#[derive(Debug, Clone)]
pub struct ScrapeCursor {
    pub current: YearMonth,
    pub backward: bool,
    history: HashSet<DateListFingerprint>,
}

impl ScrapeCursor {
    fn new(start: YearMonth) -> Self {
        Self {
            current: start,
            backward: false,
            history: HashSet::new(),
        }
    }

    pub fn has_seen(&self, dates: &[NaiveDate]) -> bool {
        self.history.contains(&DateListFingerprint::of(dates))
    }

    fn remember(&mut self, dates: &[NaiveDate]) {
        self.history.insert(DateListFingerprint::of(dates));
    }

    pub fn seen_count(&self) -> usize {
        self.history.len()
    }
}

/// Per-run counters, so callers can tell "nothing left" from "nothing worked".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub months_visited: usize,
    pub months_merged: usize,
    pub months_empty: usize,
    pub fetch_failures: usize,
    pub misaligned: usize,
    pub parse_faults: usize,
    pub records_merged: usize,
    pub stop_reason: Option<StopReason>,
}

// ── Controller ────────────────────────────────────────────────────────────────

pub struct ScrapeController<S: PageSource> {
    source: S,
    aggregate: WeatherAggregate,
    cursor: ScrapeCursor,
    state: ControllerState,
    report: RunReport,
    today: NaiveDate,
    epoch_start_year: i32,
    deadline: Option<Instant>,
    cancel: CancelFlag,
    max_consecutive_failures: Option<u32>,
}

impl<S: PageSource> ScrapeController<S> {
    pub fn new(source: S, today: NaiveDate) -> Self {
        Self {
            source,
            aggregate: WeatherAggregate::new(),
            cursor: ScrapeCursor::new(YearMonth::of(today)),
            state: ControllerState::Running,
            report: RunReport::default(),
            today,
            epoch_start_year: i32::MIN,
            deadline: None,
            cancel: CancelFlag::new(),
            max_consecutive_failures: None,
        }
    }

    pub fn with_epoch_start_year(mut self, year: i32) -> Self {
        self.epoch_start_year = year;
        self
    }

    pub fn with_deadline(mut self, deadline: Option<Instant>) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn with_cancel_flag(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_max_consecutive_failures(mut self, max: Option<u32>) -> Self {
        self.max_consecutive_failures = max;
        self
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    pub fn cursor(&self) -> &ScrapeCursor {
        &self.cursor
    }

    pub fn aggregate(&self) -> &WeatherAggregate {
        &self.aggregate
    }

    pub fn station_id(&self) -> &str {
        self.source.station_id()
    }

    /// Hand the aggregate and report to the caller once the run is over.
    pub fn into_results(self) -> (WeatherAggregate, RunReport) {
        (self.aggregate, self.report)
    }

    /// Scrape every month from `from` to `to` inclusive, oldest first.
    pub async fn scrape_range(&mut self, from: YearMonth, to: YearMonth) -> &RunReport {
        self.state = ControllerState::Running;
        self.cursor.backward = false;
        info!("Scraping {} → {}", from, to);

        for month in YearMonth::range_inclusive(from, to) {
            if let Some(reason) = self.interrupted() {
                self.stop(reason);
                return &self.report;
            }
            self.cursor.current = month;
            self.scrape_month(month, false).await;
        }

        self.stop(StopReason::RangeComplete);
        &self.report
    }

    /// Walk backward from `start` until the site has nothing new to show.
    pub async fn scrape_backward_until_exhausted(&mut self, start: YearMonth) -> &RunReport {
        self.state = ControllerState::Running;
        self.cursor.backward = true;
        self.cursor.current = start;
        info!("Scraping backward from {} until exhausted", start);

        let mut consecutive_failures = 0u32;

        while self.state == ControllerState::Running {
            let month = self.cursor.current;

            if let Some(reason) = self.interrupted() {
                self.stop(reason);
                break;
            }
            if month.year < self.epoch_start_year {
                info!("{} is before the archive's first year", month);
                self.stop(StopReason::ReachedEpoch);
                break;
            }

            match self.scrape_month(month, true).await {
                MonthOutcome::Empty => self.stop(StopReason::Exhausted),
                MonthOutcome::Duplicate => self.stop(StopReason::Duplicate),
                MonthOutcome::FetchFailed(_) | MonthOutcome::Misaligned(_) => {
                    consecutive_failures += 1;
                    if self
                        .max_consecutive_failures
                        .is_some_and(|max| consecutive_failures >= max)
                    {
                        warn!("{} failed months in a row, giving up", consecutive_failures);
                        self.stop(StopReason::TooManyFailures);
                    }
                }
                MonthOutcome::Merged { .. } => consecutive_failures = 0,
            }

            self.cursor.current = month.pred();
        }

        &self.report
    }

    /// Fetch, parse and assemble one month; merge unless it ends the walk.
    pub async fn scrape_month(&mut self, month: YearMonth, detect_duplicates: bool) -> MonthOutcome {
        self.report.months_visited += 1;
        info!("Scraping {}...", month);

        let body = match self.fetch(month).await {
            Ok(body) => body,
            Err(e) => {
                warn!("{}: {}", month, e);
                self.report.fetch_failures += 1;
                return MonthOutcome::FetchFailed(e);
            }
        };

        let page = TableParser::parse_page(&body);
        if page.fault.is_some() {
            self.report.parse_faults += 1;
        }

        if detect_duplicates {
            if page.dates.is_empty() {
                info!("No data for {}", month);
                self.report.months_empty += 1;
                return MonthOutcome::Empty;
            }
            if self.cursor.has_seen(&page.dates) {
                info!("{} repeats a page already scraped", month);
                return MonthOutcome::Duplicate;
            }
        }
        self.cursor.remember(&page.dates);

        match assemble(&page, month, self.today) {
            Ok(records) => {
                let n = self.aggregate.merge(records);
                debug!("{}: merged {} records", month, n);
                self.report.months_merged += 1;
                self.report.records_merged += n;
                MonthOutcome::Merged { records: n }
            }
            Err(e) => {
                warn!("{}: {}", month, e);
                self.report.misaligned += 1;
                MonthOutcome::Misaligned(e)
            }
        }
    }

    async fn fetch(&self, month: YearMonth) -> Result<Vec<u8>, FetchError> {
        match self.deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, self.source.fetch_month(month))
                .await
                .unwrap_or(Err(FetchError::DeadlineExceeded(month))),
            None => self.source.fetch_month(month).await,
        }
    }

    fn interrupted(&self) -> Option<StopReason> {
        if self.cancel.is_cancelled() {
            return Some(StopReason::Cancelled);
        }
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return Some(StopReason::DeadlineExceeded);
        }
        None
    }

    fn stop(&mut self, reason: StopReason) {
        info!("Stopped at {}: {:?}", self.cursor.current, reason);
        self.state = ControllerState::Stopped(reason);
        self.report.stop_reason = Some(reason);
    }
}
