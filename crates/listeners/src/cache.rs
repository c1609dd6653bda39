//! TTL-based dedup cache shared by the workflow and event listeners, plus
//! the explicit key shapes both listeners deduplicate on.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use osmo_core::TaskStatus;

/// How much of the message participates in the pod-update dedup key. Long
/// messages often differ only in trailing detail (timestamps, retry counts);
/// the prefix keeps those from re-emitting.
const MESSAGE_PREFIX_LEN: usize = 64;

/// Set of string keys with per-entry expiry.
pub struct TtlCache {
    ttl: Duration,
    entries: Mutex<HashMap<String, Instant>>,
}

impl TtlCache {
    pub fn new(ttl: Duration) -> Self {
        Self { ttl, entries: Mutex::new(HashMap::new()) }
    }

    /// Insert the key if it is absent or expired. Returns true when the
    /// caller should act on it (i.e. this observation is new).
    pub fn insert_if_new(&self, key: &str) -> bool {
        let mut entries = self.entries.lock().expect("ttl cache poisoned");
        let now = Instant::now();
        match entries.get(key) {
            Some(at) if now.duration_since(*at) < self.ttl => false,
            _ => {
                entries.insert(key.to_string(), now);
                true
            }
        }
    }

    /// Drop expired entries; returns how many were removed.
    pub fn prune(&self) -> usize {
        let mut entries = self.entries.lock().expect("ttl cache poisoned");
        let before = entries.len();
        let ttl = self.ttl;
        entries.retain(|_, at| at.elapsed() < ttl);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("ttl cache poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Dedup key for one derived pod state.
pub fn pod_update_key(uid: &str, status: TaskStatus, exit_code: i32, message: &str) -> String {
    let prefix: String = message.chars().take(MESSAGE_PREFIX_LEN).collect();
    format!("{uid}|{}|{exit_code}|{prefix}", status.as_str_name())
}

/// Dedup key for one cluster event.
pub fn event_key(uid: &str, reason: &str, message: &str, first_timestamp: &str) -> String {
    format!("{uid}|{reason}|{message}|{first_timestamp}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_keys_insert_and_duplicates_skip() {
        let cache = TtlCache::new(Duration::from_secs(60));
        assert!(cache.insert_if_new("a"));
        assert!(!cache.insert_if_new("a"));
        assert!(cache.insert_if_new("b"));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn expired_keys_fire_again_and_prune_drops_them() {
        let cache = TtlCache::new(Duration::from_millis(0));
        assert!(cache.insert_if_new("a"));
        // TTL zero: immediately expired again.
        assert!(cache.insert_if_new("a"));
        assert_eq!(cache.prune(), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn pod_key_varies_with_every_component() {
        let base = pod_update_key("u1", TaskStatus::Failed, 260, "boom");
        assert_ne!(base, pod_update_key("u2", TaskStatus::Failed, 260, "boom"));
        assert_ne!(base, pod_update_key("u1", TaskStatus::Running, 260, "boom"));
        assert_ne!(base, pod_update_key("u1", TaskStatus::Failed, 261, "boom"));
        assert_ne!(base, pod_update_key("u1", TaskStatus::Failed, 260, "bang"));
    }

    #[test]
    fn pod_key_ignores_message_tail_past_the_prefix() {
        let long_a = format!("{}{}", "x".repeat(64), "tail-one");
        let long_b = format!("{}{}", "x".repeat(64), "tail-two");
        assert_eq!(
            pod_update_key("u1", TaskStatus::Failed, 1, &long_a),
            pod_update_key("u1", TaskStatus::Failed, 1, &long_b),
        );
    }
}
