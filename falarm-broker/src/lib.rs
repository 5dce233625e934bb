//! The `falarm-broker` crate defines the ingestion and fan-out layer of the
//! fire-alarm system. Fire sensors hold a persistent TCP connection to the
//! server and push one telemetry record per frame; monitors subscribe to
//! the broker and never talk to sensors directly.
//!
//! The crate is composed of the following pieces, which act in coordination:
//! 1. [`Acceptor`] listens on the sensor port and spawns one [`SensorSession`]
//!    task per accepted connection. The number of live sessions is tracked
//!    and may be capped.
//! 2. Each [`SensorSession`] decodes frames into
//!    [`Reading`](falarm_sensor::Reading)s, validates them against the
//!    configured [`Thresholds`](falarm_sensor::Thresholds), records the latest
//!    reading per sensor in the shared [`ReadingStore`], and publishes
//!    [`AlarmEvent`]s. The session also watches for sensors that went
//!    silent for longer than the stale timeout.
//! 3. [`FanOut`] routes published events to every subscribed client. The
//!    subscriber set is owned by a single event loop task, so publishing
//!    never waits on a monitor.
//! 4. [`BrokerHandle`] is an [`actix::Actor`] exposing only the client
//!    subscription API, and [`MonitorRelay`] uses it to stream events as
//!    JSON lines to monitors connected over TCP.
//!
//! # Examples
//! ```no_run
//! use std::sync::Arc;
//! use falarm_broker::{Acceptor, ReadingStore, SessionContext, SessionTiming};
//!
//! #[actix::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let (fanout, broker_handle) = falarm_broker::broker();
//!     let store = Arc::new(ReadingStore::new());
//!
//!     let (events_tx, mut events_rx) = tokio::sync::mpsc::channel(falarm_broker::SUBSCRIBER_QUEUE_DEPTH);
//!     let _subscription = broker_handle
//!         .send(falarm_broker::ClientSubscribe { events: events_tx })
//!         .await??;
//!
//!     let ctx = SessionContext::new(
//!         store,
//!         Arc::new(fanout),
//!         falarm_sensor::Thresholds::default(),
//!         SessionTiming::default(),
//!     );
//!     let acceptor = Acceptor::bind("0.0.0.0:9001", ctx, None).await?;
//!     tokio::spawn(acceptor.run());
//!
//!     while let Some(event) = events_rx.recv().await {
//!         log::info!("{event:?}");
//!     }
//!     Ok(())
//! }
//! ```

mod acceptor;
mod broker;
mod event;
mod frame;
mod relay;
mod session;
mod store;

pub use acceptor::{Acceptor, AcceptorError, ActiveSessions};
pub use broker::{
    broker, BrokerError, BrokerHandle, ClientSubscribe, ClientUnsubscribe, FanOut,
    SubscriptionHandle,
};
pub use event::{AlarmEvent, Notifier};
pub use frame::{FrameReader, ReadOutcome};
pub use relay::{MonitorRelay, RelayError};
pub use session::{SensorSession, SessionContext, SessionError, SessionState, SessionTiming};
pub use store::{OwnerId, ReadingStore, SensorState, UNOWNED};

/// Sensors identify themselves by the `sensorId` field of every frame
pub type SensorId = String;

/// [`ClientId`] is assigned to each subscriber of the broker
pub type ClientId = u32;

/// Id used for store cleanup by a session that never received a
/// valid reading
pub const UNASSIGNED_SENSOR_ID: &str = "Unassigned Sensor Id";

/// Port sensors connect to unless configured otherwise
pub const DEFAULT_SENSOR_PORT: u16 = 9001;

/// Port monitors connect to unless configured otherwise
pub const DEFAULT_MONITOR_PORT: u16 = 9002;

// Seconds without a reading before a sensor is reported stale
const DEFAULT_STALE_TIMEOUT: u64 = 3600;

// Upper bound on how long a session waits for a frame before
// re-checking staleness
const DEFAULT_POLL_INTERVAL_MILLIS: u64 = 1000;

/// Capacity of each subscriber's event queue. Events published while a
/// subscriber's queue is full are dropped for that subscriber
pub const SUBSCRIBER_QUEUE_DEPTH: usize = 1024;

const DEFAULT_MAX_FRAME_BYTES: usize = 64 * 1024;
