mod config;
mod export;
mod models;
mod pipeline;
mod scraper;
mod storage;
mod utils;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::AppConfig;
use crate::models::YearMonth;
use crate::pipeline::{CancelFlag, Pipeline, ScrapeMode};
use crate::storage::Repository;

#[derive(Parser)]
#[command(name = "climate-scraper", about = "Daily temperature archive scraper", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Command {
    /// Scrape an explicit span of months, e.g. --from 2018-01 --to 2018-03
    Range {
        #[arg(long)]
        from: YearMonth,
        #[arg(long)]
        to: YearMonth,
    },

    /// Scrape all twelve months of one year
    Year { year: i32 },

    /// Walk backward month by month until the archive has no new data
    Backfill {
        /// First month to scrape (default: current month)
        #[arg(long)]
        from: Option<YearMonth>,
    },

    /// Print the stored records of one month
    Show {
        year: i32,
        month: u32,
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Per-month mean temperature distribution for a span of years
    Summary { from_year: i32, to_year: i32 },

    /// Write stored records for a span of years to CSV
    Export {
        #[arg(long)]
        from_year: i32,
        #[arg(long)]
        to_year: i32,
        #[arg(short, long, default_value = "data/temperatures.csv")]
        out: PathBuf,
    },

    /// Show database statistics
    Stats,

    /// Delete all stored records
    Purge,

    /// Apply schema migrations without scraping
    Migrate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "climate_scraper=info,warn",
        1 => "climate_scraper=debug,info",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(fmt::layer().compact().with_target(false))
        .with(EnvFilter::new(filter))
        .init();

    let config = AppConfig::load()?;

    let mode = match cli.command {
        Command::Range { from, to } => Some(ScrapeMode::Range { from, to }),
        Command::Year { year } => Some(ScrapeMode::Year(year)),
        Command::Backfill { from } => Some(ScrapeMode::Backfill { from }),
        _ => None,
    };

    if let Some(mode) = mode {
        let _t = utils::CommandTimer::start(mode.label(), format!("{:?}", mode));

        let cancel = CancelFlag::new();
        let on_ctrl_c = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted; finishing the current month");
                on_ctrl_c.cancel();
            }
        });

        let stats = Pipeline::new(config).with_cancel_flag(cancel).run(mode).await?;
        info!(
            "Done: {} records saved, range {:?}",
            stats.records_saved, stats.date_range
        );
        return Ok(());
    }

    let repo = Repository::open(&config.storage.db_path)?;
    if config.storage.run_migrations {
        repo.run_migrations()?;
    }

    match cli.command {
        Command::Show { year, month, json } => {
            let records = repo.fetch_month(year, month)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&records)?);
            } else if records.is_empty() {
                println!("No records for {}-{:02}.", year, month);
            } else {
                println!("  Date         Max      Min      Mean");
                for r in &records {
                    println!("  {}  {:>6.1}  {:>6.1}  {:>6.1}", r.date, r.max, r.min, r.mean);
                }
            }
        }

        Command::Summary { from_year, to_year } => {
            for year in from_year..=to_year {
                let series = repo.monthly_mean_series(year)?;
                println!("─── {} ───", year);
                for (i, means) in series.iter().enumerate() {
                    match utils::summarize(means) {
                        Some((lo, avg, hi)) => println!(
                            "  {:02}  days {:>2}  low {:>8}  mean {:>8}  high {:>8}",
                            i + 1,
                            means.len(),
                            utils::fmt_temp(Some(lo)),
                            utils::fmt_temp(Some(avg)),
                            utils::fmt_temp(Some(hi)),
                        ),
                        None => println!("  {:02}  no data", i + 1),
                    }
                }
            }
        }

        Command::Export { from_year, to_year, out } => {
            let _t = utils::CommandTimer::start("export", format!("{}..={}", from_year, to_year));
            let n = export::export_years(&repo, from_year, to_year, &out)?;
            println!("{} records written to {}", utils::fmt_count(n as u64), out.display());
        }

        Command::Stats => {
            let records = repo.record_count()?;
            let (min, max) = repo.date_range().unwrap_or((None, None));
            let last = repo.last_run_status()?;
            println!("─────────────────────────────────");
            println!("  Climate scraper — Database Stats");
            println!("─────────────────────────────────");
            println!("  Station  : {}", config.scraper.station_id);
            println!("  Records  : {}", utils::fmt_count(u64::try_from(records).unwrap_or_default()));
            println!("  From     : {}", min.map(|d| d.to_string()).unwrap_or("—".into()));
            println!("  To       : {}", max.map(|d| d.to_string()).unwrap_or("—".into()));
            if let Some((status, reason)) = last {
                println!("  Last run : {} ({})", status, reason.unwrap_or("—".into()));
            }
            println!("─────────────────────────────────");
        }

        Command::Purge => {
            let n = repo.purge()?;
            println!("{} records deleted.", utils::fmt_count(n as u64));
        }

        Command::Migrate => {
            repo.run_migrations()?;
            println!("Migrations applied.");
        }

        Command::Range { .. } | Command::Year { .. } | Command::Backfill { .. } => {}
    }

    Ok(())
}
