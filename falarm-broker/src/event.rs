use falarm_sensor::{Field, Reading};
use serde::Serialize;

use crate::SensorId;

/// Everything a monitor can ever observe. Transport and decode errors
/// stay inside the broker and are never turned into events
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum AlarmEvent {
    #[serde(rename_all = "camelCase")]
    ReadingUpdated { reading: Reading },
    #[serde(rename_all = "camelCase")]
    ThresholdViolation {
        sensor_id: SensorId,
        field: Field,
        cause: String,
    },
    #[serde(rename_all = "camelCase")]
    SensorStale { sensor_id: SensorId },
}

impl AlarmEvent {
    pub fn sensor_id(&self) -> &str {
        match self {
            AlarmEvent::ReadingUpdated { reading } => reading.sensor_id(),
            AlarmEvent::ThresholdViolation { sensor_id, .. } => sensor_id,
            AlarmEvent::SensorStale { sensor_id } => sensor_id,
        }
    }
}

/// The publish side of the fan-out, as seen by sensor sessions. Sessions
/// do not know which transport delivers the event to monitors, only that
/// `publish` returns without waiting on any of them
pub trait Notifier: Send + Sync {
    fn publish(&self, event: AlarmEvent);
}
