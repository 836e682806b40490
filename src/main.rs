//! # Telelog
//!
//! Store-and-forward telemetry logger daemon.
//!
//! Wires the core services together and drives them off two timers: the
//! sampling tick produces one record per interval and persists it (pending
//! queue always, archive when the clock is synchronized), and the flush
//! tick pushes pending batches toward the remote collector. Ctrl+C shuts
//! down cleanly; whatever is still pending survives on flash for the next
//! boot.
//!
//! Source feeds (satellite fix, temperature probe, bus frames, timing
//! pulse) enter through [`Sampler`] and [`ClockAuthority`]; wiring them to
//! the actual device drivers is platform glue and lives outside this
//! binary's core loop.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::Mutex;
use tokio::time::{interval, Duration};
use tracing::{error, info, warn};

mod bus;
mod clock;
mod config;
mod delivery;
mod error;
mod record;
mod sampler;
mod storage;

use clock::{ClockAuthority, ClockSettings};
use config::Config;
use delivery::{DeliveryCoordinator, TcpLineTransport};
use sampler::Sampler;
use storage::RecordBuffer;

/// Number of flushes between operator status log lines
const STATUS_LOG_INTERVAL_FLUSHES: u64 = 12;

#[tokio::main]
async fn main() -> Result<()> {
    // Keep the appender guard alive for the life of the process
    let _log_guard = init_logging();

    info!("Telelog v{} starting...", env!("CARGO_PKG_VERSION"));

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config/default.toml".to_string());
    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path))?;

    let clock = Arc::new(ClockAuthority::new(ClockSettings {
        sanity_floor_ms: config.clock.sanity_floor_ms,
        pulse_interval_ms: config.clock.pulse_interval_ms,
        pulse_tolerance_ms: config.clock.pulse_tolerance_ms,
        gps_pulse_align_ms: config.clock.gps_pulse_align_ms,
    }));

    let buffer = Arc::new(
        RecordBuffer::open(&config.storage, clock.clone())
            .context("failed to open record buffer")?,
    );
    info!(data_dir = %config.storage.data_dir, "record buffer ready");

    let sampler = Arc::new(Mutex::new(Sampler::new(
        clock.clone(),
        config.sampler.stale_after_ms,
    )));

    let transport = TcpLineTransport::new(config.delivery.endpoint.clone());
    let mut coordinator = DeliveryCoordinator::new(buffer.clone(), transport);

    let mut sample_tick = interval(Duration::from_millis(config.sampler.sample_interval_ms));
    let mut flush_tick = interval(Duration::from_millis(config.delivery.flush_interval_ms));

    info!(
        sample_ms = config.sampler.sample_interval_ms,
        flush_ms = config.delivery.flush_interval_ms,
        endpoint = %config.delivery.endpoint,
        "entering main loop, press Ctrl+C to exit"
    );

    let mut flush_count: u64 = 0;

    loop {
        tokio::select! {
            _ = sample_tick.tick() => {
                let record = {
                    let sampler = sampler.lock().await;
                    sampler.sample()
                };

                match buffer.append_pending(&[record.clone()]).await {
                    Ok(()) => {
                        sampler.lock().await.set_storage_fault(false);
                    }
                    Err(e) => {
                        warn!(error = %e, "pending append failed, attempting recovery");
                        sampler.lock().await.set_storage_fault(true);
                        if let Err(e) = buffer.ensure_ready(false).await {
                            warn!(error = %e, "storage recovery not yet possible");
                        }
                        continue;
                    }
                }

                // Redundant forensic trail; deferred silently until the
                // clock can name a file
                if let Err(e) = buffer.append_archive(&[record]).await {
                    warn!(error = %e, "archive append failed");
                }
            }

            _ = flush_tick.tick() => {
                match coordinator.flush(config.delivery.max_batch).await {
                    Ok(report) if report.consumed > 0 => {
                        flush_count += 1;
                    }
                    Ok(_) => {}
                    Err(e) => error!(error = %e, "flush failed"),
                }

                if flush_count > 0 && flush_count % STATUS_LOG_INTERVAL_FLUSHES == 0 {
                    if let Ok(stats) = buffer.stats().await {
                        info!(
                            pending = stats.pending,
                            archive_deferred = stats.archive_deferred,
                            clock_synced = clock.is_synchronized(),
                            clock_source = %clock.active_source(),
                            "status"
                        );
                    }
                }
            }

            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down...");
                if let Ok(stats) = buffer.stats().await {
                    info!(pending = stats.pending, "records left on flash for next boot");
                }
                break;
            }
        }
    }

    Ok(())
}

/// Console logging with env-filter plus a daily-rotated on-device log file.
fn init_logging() -> tracing_appender::non_blocking::WorkerGuard {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let file_appender = tracing_appender::rolling::daily("./logs", "telelog.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(file_writer),
        )
        .init();

    guard
}
