//! Server daemon for the fire-alarm system: accepts sensor connections,
//! validates and records their telemetry, and relays state and alerts
//! to any connected monitors

pub mod config;
pub mod logging;
pub mod monitor;

use std::sync::Arc;

use falarm_broker::{
    AcceptorError, ActiveSessions, BrokerError, MonitorRelay, ReadingStore, RelayError,
    SessionContext,
};
use thiserror::Error;
use tokio::time::Duration;

pub use crate::config::{AlarmConfig, Args, ConfigError};

#[derive(Error, Debug)]
pub enum FireAlarmError {
    #[error("I/O Error")]
    Io(#[from] std::io::Error),
    #[error("Configuration Error")]
    Config(#[from] ConfigError),
    #[error("Sensor acceptor Error")]
    Acceptor(#[from] AcceptorError),
    #[error("Monitor relay Error")]
    Relay(#[from] RelayError),
    #[error("Broker Error")]
    Broker(#[from] BrokerError),
    #[error("Actix mailbox Error")]
    MailError(#[from] actix::MailboxError),
    #[error("Unable to set up log tracer")]
    Logger(#[from] log::SetLoggerError),
    #[error("Unable to set up tracing subscriber")]
    Subscriber(#[from] tracing::subscriber::SetGlobalDefaultError),
}

pub type FireAlarmResult<T> = std::result::Result<T, FireAlarmError>;

/// Run the server until ctrl-c, or until one of the listeners fails.
/// Must be called from within a running actix system
pub async fn serve(config: AlarmConfig) -> FireAlarmResult<()> {
    let store = Arc::new(ReadingStore::new());
    let (fanout, broker_handle) = falarm_broker::broker();

    if config.logging.log_events {
        monitor::spawn_event_logger(&broker_handle).await?;
    }

    let ctx = SessionContext::new(
        Arc::clone(&store),
        Arc::new(fanout),
        config.thresholds,
        config.session_timing(),
    );
    let acceptor =
        falarm_broker::Acceptor::bind(config.sensor_addr(), ctx, config.listen.max_sessions)
            .await?;
    let relay = MonitorRelay::bind(
        config.monitor_addr(),
        broker_handle,
        Arc::clone(&store),
        config.write_timeout(),
    )
    .await?;

    let active = acceptor.active_sessions();
    if config.logging.stats_interval_secs > 0 {
        let interval = Duration::from_secs(config.logging.stats_interval_secs);
        tokio::spawn(report_stats(active.clone(), Arc::clone(&store), interval));
    }

    tokio::select! {
        res = acceptor.run() => res?,
        res = relay.run() => res?,
        res = tokio::signal::ctrl_c() => {
            res?;
            log::info!("Shutting down with {} sensor sessions live", active.get());
        }
    }

    Ok(())
}

async fn report_stats(active: ActiveSessions, store: Arc<ReadingStore>, interval: Duration) {
    let mut tick = tokio::time::interval(interval);
    loop {
        tick.tick().await;
        log::info!(
            "{} sensor sessions live, {} sensors reporting",
            active.get(),
            store.len()
        );
    }
}
