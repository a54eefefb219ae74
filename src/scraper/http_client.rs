use crate::config::ScraperConfig;
use crate::models::YearMonth;
use crate::scraper::{FetchError, PageSource};
use anyhow::{Context, Result};
use async_trait::async_trait;
use rand::Rng;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::time::sleep;
use tracing::debug;
use url::Url;

/// Fetches daily-data pages for one station from the climate archive.
pub struct HttpClient {
    inner: reqwest::Client,
    config: ScraperConfig,
    /// No delay before the very first request of a run.
    warmed_up: AtomicBool,
}

impl HttpClient {
    pub fn new(config: &ScraperConfig) -> Result<Self> {
        let inner = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(config.timeout_secs))
            .gzip(true)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            inner,
            config: config.clone(),
            warmed_up: AtomicBool::new(false),
        })
    }

    /// Request URL for one month, e.g.
    /// `...daily_data_e.html?StationID=27174&timeframe=2&StartYear=1840&EndYear=2018&Day=1&Year=2018&Month=5`
    pub fn month_url(&self, month: YearMonth) -> Result<Url, url::ParseError> {
        let year = month.year.to_string();
        Url::parse_with_params(
            &self.config.base_url,
            &[
                ("StationID", self.config.station_id.clone()),
                ("timeframe", "2".to_string()),
                ("StartYear", self.config.epoch_start_year.to_string()),
                ("EndYear", year.clone()),
                ("Day", "1".to_string()),
                ("Year", year),
                ("Month", month.month.to_string()),
            ],
        )
    }

    /// Sleep for the configured delay + random jitter.
    async fn polite_delay(&self) {
        if !self.warmed_up.swap(true, Ordering::Relaxed) {
            return;
        }
        let jitter = if self.config.jitter_ms > 0 {
            rand::rng().random_range(0..=self.config.jitter_ms)
        } else {
            0
        };
        let total = Duration::from_millis(self.config.request_delay_ms + jitter);
        if !total.is_zero() {
            sleep(total).await;
        }
    }
}

#[async_trait]
impl PageSource for HttpClient {
    async fn fetch_month(&self, month: YearMonth) -> Result<Vec<u8>, FetchError> {
        let url = self.month_url(month)?;
        self.polite_delay().await;

        debug!("GET {}", url);
        let resp = self
            .inner
            .get(url.clone())
            .send()
            .await
            .map_err(|source| FetchError::Network {
                url: url.to_string(),
                source,
            })?;

        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::HttpStatus {
                url: url.to_string(),
                status,
            });
        }

        let body = resp.bytes().await.map_err(|source| FetchError::Body {
            url: url.to_string(),
            source,
        })?;
        debug!("{}: {} bytes", month, body.len());
        Ok(body.to_vec())
    }

    fn station_id(&self) -> &str {
        &self.config.station_id
    }
}
