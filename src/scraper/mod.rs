pub mod cleaner;
pub mod http_client;
pub mod parsers;

use crate::models::YearMonth;
use async_trait::async_trait;
use chrono::NaiveDate;
use thiserror::Error;

// ── Errors ────────────────────────────────────────────────────────────────────

/// A page could not be retrieved. Fatal for that month only.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("invalid request URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("network request failed for {url}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("HTTP {status} for {url}")]
    HttpStatus {
        url: String,
        status: reqwest::StatusCode,
    },

    #[error("failed reading response body from {url}")]
    Body {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("run deadline reached while fetching {0}")]
    DeadlineExceeded(YearMonth),
}

/// The page could only be read in part; whatever was parsed before the
/// fault is still returned.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("page is not valid UTF-8 after byte {valid_up_to}")]
    InvalidEncoding { valid_up_to: usize },
}

/// Rows and day annotations of a page could not be paired safely.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AssembleError {
    #[error("{rows} table rows but {dates} date annotations")]
    Alignment { rows: usize, dates: usize },

    #[error("date {date} does not belong to {month}")]
    ForeignDate { date: NaiveDate, month: YearMonth },

    #[error("date {date} is out of order or repeated")]
    Unordered { date: NaiveDate },
}

// ── Source trait ──────────────────────────────────────────────────────────────

/// Swappable page source: one raw page per calendar month.
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn fetch_month(&self, month: YearMonth) -> Result<Vec<u8>, FetchError>;

    /// Identifier of the station whose pages this source returns.
    fn station_id(&self) -> &str;
}
