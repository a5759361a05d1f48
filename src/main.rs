// Service binary: daily analysis scheduler.
//
// The HTTP query layer lives in a separate service; this process owns
// the store schema, the scheduled pipeline runs and nothing else.

use anyhow::Context;
use chrono::{Local, NaiveDate, Timelike};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use pkd_analysis::{AnalysisConfig, AnalysisService, PkdStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Optional config file as the first argument; environment wins.
    let config = match std::env::args().nth(1) {
        Some(path) => AnalysisConfig::from_file(&path)?.apply_environment(),
        None => AnalysisConfig::default().apply_environment(),
    };
    config.validate().context("invalid configuration")?;
    info!("{}", config.summary());

    let store = PkdStore::connect(&config.database_url, config.database_auth_token.as_deref())
        .await
        .context("store connection failed")?;

    let service = AnalysisService::new(store, config.clone());

    if !config.analysis_enabled {
        warn!("Analysis scheduler disabled; waiting for shutdown signal");
        tokio::signal::ctrl_c().await?;
        return Ok(());
    }

    info!(
        "Scheduler started: daily analysis at {:02}:00 local time",
        config.analysis_schedule_hour
    );

    let mut tick = tokio::time::interval(tokio::time::Duration::from_secs(60));
    let mut last_run_date: Option<NaiveDate> = None;

    loop {
        tokio::select! {
            _ = tick.tick() => {
                let now = Local::now();
                let due = now.hour() == config.analysis_schedule_hour as u32
                    && last_run_date != Some(now.date_naive());
                if !due {
                    continue;
                }

                info!("Scheduled analysis triggered ({})", now.format("%Y-%m-%d %H:%M"));
                match service.start_analysis() {
                    Ok(()) => {
                        last_run_date = Some(now.date_naive());
                    }
                    Err(e) => {
                        // A run is already in flight; try again next day
                        error!("Scheduled start rejected: {}", e);
                        last_run_date = Some(now.date_naive());
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                let status = service.job_status();
                info!(
                    "Shutdown signal received (job status: {})",
                    status.status.as_str()
                );
                if status.status == pkd_analysis::JobStatus::Running {
                    warn!("A pipeline run is in flight; partial batches stay in the store");
                }
                return Ok(());
            }
        }
    }
}
