use parking_lot::Mutex;
use std::{
    collections::HashMap,
    time::{Duration, Instant},
};
use tracing::warn;

/// Last time each key fired. Keys are warning sources in the monitor and
/// user ids for the button cooldown.
#[derive(Default)]
pub struct LogThrottle {
    last: Mutex<HashMap<String, Instant>>,
}

impl LogThrottle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true (and records the time) if `key` may be logged now.
    pub fn allow(&self, key: &str, period: Duration) -> bool {
        let now = Instant::now();
        let mut map = self.last.lock();
        if matches!(map.get(key), Some(prev) if now.duration_since(*prev) < period) {
            return false;
        }
        map.insert(key.to_string(), now);
        true
    }

    /// Only warn once per `period` for the same `key`.
    pub fn warn(&self, key: &str, period: Duration, msg: impl AsRef<str>) {
        if self.allow(key, period) {
            warn!("{}", msg.as_ref());
        }
    }

    /// Drop keys that have not fired for `max_age` so the map stays bounded.
    pub fn prune(&self, max_age: Duration) {
        let now = Instant::now();
        self.last
            .lock()
            .retain(|_, prev| now.duration_since(*prev) < max_age);
    }
}
