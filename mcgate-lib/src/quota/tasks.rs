use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::QuotaLedger;
use crate::config::TrafficLimiterConfig;

/// Start the ledger's periodic duties: auto-save, daily rollover with
/// retention purge, and the usage report.
///
/// All of them stop when `shutdown` is cancelled; the final save is left to
/// [`QuotaLedger::close`].
pub fn spawn_background_tasks(
    ledger: Arc<QuotaLedger>,
    config: &TrafficLimiterConfig,
    shutdown: CancellationToken,
) -> Vec<JoinHandle<()>> {
    let mut handles = Vec::with_capacity(3);

    let l = ledger.clone();
    handles.push(spawn_periodic("save", config.save_interval(), shutdown.clone(), move || {
        let l = l.clone();
        async move {
            if let Err(e) = l.save().await {
                warn!(error = %e, "failed to save traffic data");
            }
        }
    }));

    let l = ledger.clone();
    handles.push(spawn_periodic("rollover", config.reset_check_interval(), shutdown.clone(), move || {
        let l = l.clone();
        async move {
            l.check_and_reset_daily();
            l.purge_expired();
        }
    }));

    if let Some(period) = config.report_interval() {
        let l = ledger;
        // Report once at startup
        log_usage_report(&l);
        handles.push(spawn_periodic("report", period, shutdown, move || {
            let l = l.clone();
            async move { log_usage_report(&l) }
        }));
    }

    handles
}

fn spawn_periodic<F, Fut>(
    name: &'static str,
    period: Duration,
    shutdown: CancellationToken,
    mut tick: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut interval = interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!(task = name, "traffic task stopped");
                    break;
                }
                _ = interval.tick() => tick().await,
            }
        }
    })
}

/// Log one line per player with used/limit/percentage.
pub fn log_usage_report(ledger: &QuotaLedger) {
    let records = ledger.snapshot();
    if records.is_empty() {
        return;
    }
    info!(at = %Local::now().format("%H:%M:%S"), players = records.len(), "traffic usage report");
    for record in records {
        let stats = record.stats();
        let line = format!(
            "{:<16} {:>8.2} MB {:>8.0} MB {:>9.1}%",
            record.player_name, stats.used_mb, stats.limit_mb, stats.percentage
        );
        if stats.percentage > 90.0 {
            warn!("{line}");
        } else {
            info!("{line}");
        }
    }
}
