use chrono::{DateTime, Local};
use dashmap::DashMap;
use falarm_sensor::Reading;

use crate::SensorId;

/// Identifies the session that wrote an entry. [`UNOWNED`] entries were
/// written outside any session
pub type OwnerId = u64;

pub const UNOWNED: OwnerId = 0;

/// Latest known state of one sensor
#[derive(Debug, Clone, PartialEq)]
pub struct SensorState {
    pub reading: Reading,
    pub last_update: DateTime<Local>,
    pub owner: OwnerId,
}

/// [`ReadingStore`] holds the latest reading of every connected sensor,
/// shared by all sessions and by the monitor relay. Callers only get the
/// key-scoped operations below; locking is per shard of the underlying
/// map, so writes to different sensors do not serialize on each other,
/// while writes to the same sensor are last-writer-wins.
///
/// Entries are never evicted: a session removes its sensor's entry when
/// the connection closes, unless another session has written it since.
#[derive(Debug, Default)]
pub struct ReadingStore {
    sensors: DashMap<SensorId, SensorState>,
}

impl ReadingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the entry for `sensor_id`, stamped with the
    /// current time
    pub fn upsert(&self, sensor_id: &str, reading: Reading) {
        self.upsert_owned(sensor_id, reading, UNOWNED);
    }

    /// As [`ReadingStore::upsert`], recording `owner` as the writer
    pub fn upsert_owned(&self, sensor_id: &str, reading: Reading, owner: OwnerId) {
        let state = SensorState {
            reading,
            last_update: Local::now(),
            owner,
        };
        if self.sensors.insert(sensor_id.to_string(), state).is_none() {
            log::debug!("New sensor {sensor_id:} added to store");
        }
    }

    pub fn get(&self, sensor_id: &str) -> Option<SensorState> {
        self.sensors.get(sensor_id).map(|entry| entry.value().clone())
    }

    /// Removing an absent sensor is a no-op
    pub fn remove(&self, sensor_id: &str) {
        if self.sensors.remove(sensor_id).is_some() {
            log::debug!("Sensor {sensor_id:} removed from store");
        }
    }

    /// Remove the entry only if `owner` was its last writer. Returns
    /// whether an entry was removed
    pub fn remove_if_owner(&self, sensor_id: &str, owner: OwnerId) -> bool {
        let removed = self
            .sensors
            .remove_if(sensor_id, |_, state| state.owner == owner)
            .is_some();
        if removed {
            log::debug!("Sensor {sensor_id:} removed from store");
        }
        removed
    }

    pub fn last_update_time(&self, sensor_id: &str) -> Option<DateTime<Local>> {
        self.sensors.get(sensor_id).map(|entry| entry.last_update)
    }

    /// Point in time copy of every entry, in no particular order
    pub fn snapshot(&self) -> Vec<SensorState> {
        self.sensors
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sensors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn reading(id: &str, temperature: f64) -> Reading {
        Reading::new(id, temperature, 70, 3, 300.0, Local::now()).unwrap()
    }

    #[test]
    fn upsert_is_last_writer_wins() {
        let store = ReadingStore::new();
        store.upsert("10-10", reading("10-10", 20.0));
        store.upsert("10-10", reading("10-10", 21.5));

        assert_eq!(store.len(), 1);
        let state = store.get("10-10").expect("entry present");
        assert_eq!(state.reading.temperature(), 21.5);
        assert_eq!(store.last_update_time("10-10"), Some(state.last_update));
    }

    #[test]
    fn remove_is_idempotent() {
        let store = ReadingStore::new();
        store.remove("missing");
        store.upsert("a", reading("a", 20.0));
        store.remove("a");
        store.remove("a");

        assert!(store.is_empty());
        assert!(store.get("a").is_none());
        assert!(store.last_update_time("a").is_none());
    }

    #[test]
    fn owned_removal_spares_newer_writer() {
        let store = ReadingStore::new();
        store.upsert_owned("10-10", reading("10-10", 20.0), 1);
        store.upsert_owned("10-10", reading("10-10", 22.0), 2);

        assert!(!store.remove_if_owner("10-10", 1));
        assert_eq!(store.get("10-10").unwrap().owner, 2);
        assert!(!store.remove_if_owner("missing", 1));

        assert!(store.remove_if_owner("10-10", 2));
        assert!(store.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_writers_do_not_interfere() {
        let store = Arc::new(ReadingStore::new());

        let tasks: Vec<_> = (0..16)
            .map(|i| {
                let store = Arc::clone(&store);
                tokio::spawn(async move {
                    let id = format!("sensor-{i}");
                    for n in 0..100 {
                        store.upsert(&id, reading(&id, n as f64));
                        tokio::task::yield_now().await;
                    }
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(store.len(), 16);
        for state in store.snapshot() {
            assert_eq!(state.reading.temperature(), 99.0);
        }
    }
}
