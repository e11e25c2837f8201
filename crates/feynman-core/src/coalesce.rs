//! Update coalescer: bounded-rate batching of per-field updates.
//!
//! Only the last value staged for an `(element id, field)` pair before a
//! flush is ever delivered, so a field updated from a hot loop produces at
//! most one `update` event per flush interval.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde_json::Value;

use crate::event::{Event, Payload};

/// Default minimum spacing between interval-gated flushes.
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_millis(50);

/// `(element id, field name)`.
pub type UpdateKey = (String, String);

/// A staged value taken out by a flush.
#[derive(Debug, Clone, PartialEq)]
pub struct StagedUpdate {
    pub id: String,
    pub name: String,
    pub value: Value,
}

impl StagedUpdate {
    pub fn into_event(self) -> Event {
        Event::new(
            self.id,
            Payload::Update {
                name: self.name,
                value: self.value,
            },
        )
    }
}

#[derive(Debug)]
pub struct Coalescer {
    staged: HashMap<UpdateKey, Value>,
    interval: Duration,
    last_flush: Instant,
}

impl Coalescer {
    pub fn new(interval: Duration) -> Self {
        Self::starting_at(interval, Instant::now())
    }

    /// Create a coalescer whose first interval starts at `now`.
    pub fn starting_at(interval: Duration, now: Instant) -> Self {
        Self {
            staged: HashMap::new(),
            interval,
            last_flush: now,
        }
    }

    /// Upsert the latest value for `(id, name)`.
    pub fn stage(&mut self, id: impl Into<String>, name: impl Into<String>, value: Value) {
        self.staged.insert((id.into(), name.into()), value);
    }

    /// Whether more than one interval has passed since the last flush.
    pub fn is_due(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.last_flush) > self.interval
    }

    /// Interval-gated flush. `None` when not yet due; otherwise the whole
    /// staged map (possibly empty) and the interval restarts.
    pub fn take_if_due(&mut self, now: Instant) -> Option<Vec<StagedUpdate>> {
        if !self.is_due(now) {
            return None;
        }
        Some(self.take_all(now))
    }

    /// Forced flush: drain everything regardless of the interval.
    pub fn take_all(&mut self, now: Instant) -> Vec<StagedUpdate> {
        self.last_flush = now;
        self.staged
            .drain()
            .map(|((id, name), value)| StagedUpdate { id, name, value })
            .collect()
    }

    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.staged.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.staged.is_empty()
    }
}

impl Default for Coalescer {
    fn default() -> Self {
        Self::new(DEFAULT_FLUSH_INTERVAL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn hundred_stages_flush_to_one_update_with_last_value() {
        let t0 = Instant::now();
        let mut c = Coalescer::starting_at(DEFAULT_FLUSH_INTERVAL, t0);
        for n in 1..=100 {
            c.stage("x", "count", json!(n));
        }
        let batch = c.take_all(t0);
        assert_eq!(
            batch,
            vec![StagedUpdate {
                id: "x".into(),
                name: "count".into(),
                value: json!(100),
            }]
        );
        assert!(c.is_empty());
    }

    #[test]
    fn gated_flush_waits_for_interval() {
        let t0 = Instant::now();
        let mut c = Coalescer::starting_at(Duration::from_millis(50), t0);
        c.stage("a", "text", json!("1"));
        assert!(c.take_if_due(t0 + Duration::from_millis(10)).is_none());
        assert_eq!(c.len(), 1);

        let batch = c.take_if_due(t0 + Duration::from_millis(60)).unwrap();
        assert_eq!(batch.len(), 1);

        // Interval restarts at the flush.
        c.stage("a", "text", json!("2"));
        assert!(c.take_if_due(t0 + Duration::from_millis(100)).is_none());
        assert!(c.take_if_due(t0 + Duration::from_millis(111)).is_some());
    }

    #[test]
    fn distinct_keys_are_kept_apart() {
        let t0 = Instant::now();
        let mut c = Coalescer::starting_at(DEFAULT_FLUSH_INTERVAL, t0);
        c.stage("db", "read", json!(1));
        c.stage("db", "write", json!(2));
        c.stage("other", "read", json!(3));
        let mut batch = c.take_all(t0);
        batch.sort_by(|a, b| (&a.id, &a.name).cmp(&(&b.id, &b.name)));
        let keys: Vec<_> = batch.iter().map(|u| (u.id.as_str(), u.name.as_str())).collect();
        assert_eq!(keys, vec![("db", "read"), ("db", "write"), ("other", "read")]);
    }

    #[test]
    fn staged_update_becomes_update_event() {
        let ev = StagedUpdate {
            id: "db-size".into(),
            name: "text".into(),
            value: json!("size: 1"),
        }
        .into_event();
        assert_eq!(ev.id, "db-size");
        assert_eq!(
            ev.payload,
            Payload::Update {
                name: "text".into(),
                value: json!("size: 1")
            }
        );
    }

    proptest! {
        #[test]
        fn flush_delivers_exactly_the_last_value_per_key(
            ops in proptest::collection::vec((0u8..4, 0u8..3, any::<i64>()), 1..200)
        ) {
            let t0 = Instant::now();
            let mut c = Coalescer::starting_at(DEFAULT_FLUSH_INTERVAL, t0);
            let mut expected: HashMap<UpdateKey, Value> = HashMap::new();
            for (id, field, value) in &ops {
                let key = (format!("e{id}"), format!("f{field}"));
                c.stage(key.0.clone(), key.1.clone(), json!(value));
                expected.insert(key, json!(value));
            }
            let batch = c.take_all(t0);
            prop_assert_eq!(batch.len(), expected.len());
            for u in batch {
                prop_assert_eq!(Some(&u.value), expected.get(&(u.id.clone(), u.name.clone())));
            }
        }
    }
}
