use actix::Addr;
use falarm_broker::{AlarmEvent, BrokerHandle, ClientSubscribe, SubscriptionHandle};
use tokio::sync::mpsc::{channel, Receiver};

use crate::FireAlarmResult;

/// Subscribe a local monitor that writes every published event to the log.
/// Readings go out at debug level, alerts at warn
pub async fn spawn_event_logger(broker: &Addr<BrokerHandle>) -> FireAlarmResult<SubscriptionHandle> {
    let (events, receiver) = channel(falarm_broker::SUBSCRIBER_QUEUE_DEPTH);
    let handle = broker
        .send(ClientSubscribe { events })
        .await
        .map_err(|e| {
            log::error!("Error sending event logger subscribe request {e:}");
            e
        })??;

    tokio::spawn(log_events(receiver));
    Ok(handle)
}

async fn log_events(mut receiver: Receiver<AlarmEvent>) {
    while let Some(event) = receiver.recv().await {
        log_event(&event);
    }
    log::debug!("Event logger stopped, broker closed");
}

fn log_event(event: &AlarmEvent) {
    match event {
        AlarmEvent::ReadingUpdated { reading } => log::debug!(
            "Sensor {} reading: temperature {}, battery {}%, smoke {}, co2 {}",
            reading.sensor_id(),
            reading.temperature(),
            reading.battery_percentage(),
            reading.smoke_level(),
            reading.co2_level()
        ),
        AlarmEvent::ThresholdViolation {
            sensor_id,
            field,
            cause,
        } => log::warn!("Sensor {sensor_id:} {field:} alert: {cause:}"),
        AlarmEvent::SensorStale { sensor_id } => {
            log::warn!("Sensor {sensor_id:} has stopped reporting")
        }
    }
}
