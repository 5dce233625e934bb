use chrono::Local;
use falarm_sensor::{Reading, Thresholds};
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use thiserror::Error;
use tokio::{
    io::AsyncRead,
    net::TcpStream,
    time::{Duration, Instant},
};

use crate::{
    frame::{FrameReader, ReadOutcome},
    AlarmEvent, Notifier, OwnerId, ReadingStore, SensorId, UNASSIGNED_SENSOR_ID, UNOWNED,
};

// Store ownership tokens, one per session
static NEXT_OWNER: AtomicU64 = AtomicU64::new(UNOWNED + 1);

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Connection setup failed: {0}")]
    Handshake(std::io::Error),
    #[error("Transport error: {0}")]
    Transport(std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Active,
    Closed,
}

/// Timing knobs shared by every session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionTiming {
    /// A sensor silent for longer than this is reported stale, once per
    /// elapsed interval
    pub stale_timeout: Duration,
    /// Longest wait for a frame before staleness is re-checked
    pub poll_interval: Duration,
    pub max_frame_bytes: usize,
}

impl Default for SessionTiming {
    fn default() -> Self {
        Self {
            stale_timeout: Duration::from_secs(crate::DEFAULT_STALE_TIMEOUT),
            poll_interval: Duration::from_millis(crate::DEFAULT_POLL_INTERVAL_MILLIS),
            max_frame_bytes: crate::DEFAULT_MAX_FRAME_BYTES,
        }
    }
}

/// Shared collaborators handed to every session by the acceptor
#[derive(Clone)]
pub struct SessionContext {
    store: Arc<ReadingStore>,
    notifier: Arc<dyn Notifier>,
    thresholds: Thresholds,
    timing: SessionTiming,
}

impl SessionContext {
    pub fn new(
        store: Arc<ReadingStore>,
        notifier: Arc<dyn Notifier>,
        thresholds: Thresholds,
        timing: SessionTiming,
    ) -> Self {
        Self {
            store,
            notifier,
            thresholds,
            timing,
        }
    }

    pub fn store(&self) -> &Arc<ReadingStore> {
        &self.store
    }

    pub fn timing(&self) -> SessionTiming {
        self.timing
    }
}

/// [`SensorSession`] handles a single sensor connection, and has the
/// following responsibilities:
/// 1. Decode inbound frames into [`Reading`]s. Malformed frames are dropped
///    and the session carries on
/// 2. Validate each reading, record it in the [`ReadingStore`], and publish
///    [`AlarmEvent::ReadingUpdated`] followed by one
///    [`AlarmEvent::ThresholdViolation`] per failed check
/// 3. Track the time since the last valid reading, and publish
///    [`AlarmEvent::SensorStale`] once per elapsed stale timeout
/// 4. On close, for whatever reason, remove the sensor's store entry if
///    this session was its last writer. A sensor that reconnected before
///    its old connection timed out keeps the entry of the new session.
///    This happens in [`Drop`], so it also runs if the task is aborted
pub struct SensorSession {
    peer: String,
    owner: OwnerId,
    ctx: SessionContext,
    state: SessionState,
    sensor_id: Option<SensorId>,
    last_reading: Instant,
}

impl SensorSession {
    pub fn new(peer: impl Into<String>, ctx: SessionContext) -> Self {
        Self {
            peer: peer.into(),
            owner: NEXT_OWNER.fetch_add(1, Ordering::Relaxed),
            ctx,
            state: SessionState::Connecting,
            sensor_id: None,
            last_reading: Instant::now(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn sensor_id(&self) -> Option<&str> {
        self.sensor_id.as_deref()
    }

    /// Finish setting up a freshly accepted TCP connection, then serve it
    /// until it closes
    pub async fn run_tcp(self, stream: TcpStream) -> Result<(), SessionError> {
        if let Err(e) = stream.set_nodelay(true) {
            log::error!("Unable to set up connection from {}: {e:}", self.peer);
            return Err(SessionError::Handshake(e));
        }
        self.run(stream).await
    }

    /// Serve the connection until the peer closes it or it fails. The
    /// connection is dropped before the store entry is cleaned up
    pub async fn run<R: AsyncRead + Unpin>(mut self, conn: R) -> Result<(), SessionError> {
        let mut reader = FrameReader::new(conn, self.ctx.timing.max_frame_bytes);
        let poll_interval = self.ctx.timing.poll_interval;
        self.transition(SessionState::Active);

        loop {
            match reader.next_frame(poll_interval).await {
                Ok(ReadOutcome::Frame(frame)) => match Reading::decode(&frame, Local::now()) {
                    Ok(reading) => self.ingest(reading),
                    Err(e) => {
                        log::debug!("Dropping malformed frame from {}: {e:}", self.peer);
                        self.check_stale(Instant::now());
                    }
                },
                Ok(ReadOutcome::Idle) => self.check_stale(Instant::now()),
                Ok(ReadOutcome::Closed) => {
                    log::info!("Peer {} closed the connection", self.peer);
                    return Ok(());
                }
                Err(e) => {
                    log::warn!("Transport error on connection from {}: {e:}", self.peer);
                    return Err(SessionError::Transport(e));
                }
            }
        }
    }

    fn transition(&mut self, next: SessionState) {
        log::trace!("Session {} {:?} -> {:?}", self.peer, self.state, next);
        self.state = next;
    }

    fn ingest(&mut self, reading: Reading) {
        let sensor_id = reading.sensor_id().to_string();
        match self.sensor_id.replace(sensor_id.clone()) {
            None => log::info!("Connection {} identified as sensor {sensor_id:}", self.peer),
            Some(previous) if previous != sensor_id => {
                log::warn!(
                    "Connection {} switched from sensor {previous:} to {sensor_id:}",
                    self.peer
                );
                self.ctx.store.remove_if_owner(&previous, self.owner);
            }
            Some(_) => {}
        }

        log::trace!("Reading from {sensor_id:}: {reading:?}");
        let result = self.ctx.thresholds.validate(&reading);
        self.ctx
            .store
            .upsert_owned(&sensor_id, reading.clone(), self.owner);
        self.ctx
            .notifier
            .publish(AlarmEvent::ReadingUpdated { reading });

        for judgment in result.violations() {
            let cause = judgment.cause.clone().unwrap_or_default();
            log::warn!("{cause:}");
            self.ctx.notifier.publish(AlarmEvent::ThresholdViolation {
                sensor_id: sensor_id.clone(),
                field: judgment.field,
                cause,
            });
        }

        self.last_reading = Instant::now();
    }

    /// Alert at most once per stale timeout: the reference time is reset
    /// when the alert fires
    fn check_stale(&mut self, now: Instant) {
        let stale_timeout = self.ctx.timing.stale_timeout;
        if now.duration_since(self.last_reading) <= stale_timeout {
            return;
        }
        self.last_reading = now;

        match &self.sensor_id {
            Some(sensor_id) => {
                log::warn!("Sensor {sensor_id:} has not reported in {stale_timeout:?}");
                self.ctx.notifier.publish(AlarmEvent::SensorStale {
                    sensor_id: sensor_id.clone(),
                });
            }
            None => log::warn!(
                "Connection {} has not sent a valid reading in {stale_timeout:?}",
                self.peer
            ),
        }
    }
}

impl Drop for SensorSession {
    fn drop(&mut self) {
        self.transition(SessionState::Closed);
        let sensor_id = self.sensor_id.as_deref().unwrap_or(UNASSIGNED_SENSOR_ID);
        if !self.ctx.store.remove_if_owner(sensor_id, self.owner) && self.sensor_id.is_some() {
            log::debug!("Entry for {sensor_id:} now belongs to another session, keeping it");
        }
        log::info!("Session for {sensor_id:} ({}) closed", self.peer);
    }
}
