//! Decision logic for writes that carry explicit timestamps
//!
//! A write whose explicit timestamp is older than the live state is a fact
//! about the past. It is published as `historic_state_changed` and never
//! replaces the live state.

use chrono::{DateTime, Utc};
use retro_core::{Attributes, Context, EventKind, State};

/// Which timestamp made a write historic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoricReason {
    LastUpdated,
    LastChanged,
}

/// What the store does with a proposed state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Replace the live state and publish `state_changed`
    Current,
    /// Leave the live state alone and publish `historic_state_changed`
    Historic(HistoricReason),
}

impl WriteOutcome {
    pub fn is_historic(&self) -> bool {
        matches!(self, WriteOutcome::Historic(_))
    }

    pub fn event_kind(&self) -> EventKind {
        match self {
            WriteOutcome::Current => EventKind::StateChanged,
            WriteOutcome::Historic(_) => EventKind::HistoricStateChanged,
        }
    }
}

/// Decide how a write relates to the current live state
///
/// Only explicit timestamps can make a write historic, and only when the live
/// state has a non-empty value. `last_updated` is checked before
/// `last_changed`; both comparisons are strict.
pub fn decide(
    current: Option<&State>,
    last_changed: Option<DateTime<Utc>>,
    last_updated: Option<DateTime<Utc>>,
) -> WriteOutcome {
    let Some(current) = current.filter(|s| !s.state.is_empty()) else {
        return WriteOutcome::Current;
    };

    if last_updated.is_some_and(|ts| ts < current.last_updated) {
        return WriteOutcome::Historic(HistoricReason::LastUpdated);
    }
    if last_changed.is_some_and(|ts| ts < current.last_changed) {
        return WriteOutcome::Historic(HistoricReason::LastChanged);
    }
    WriteOutcome::Current
}

/// A proposed state write
///
/// ```ignore
/// let write = StateWrite::new(19.5)
///     .attribute("unit_of_measurement", "°C")
///     .last_updated(reading_time);
/// store.write("sensor.outside", write)?;
/// ```
#[derive(Debug, Clone, Default)]
pub struct StateWrite {
    pub value: String,
    pub attributes: Attributes,
    pub context: Option<Context>,
    pub last_changed: Option<DateTime<Utc>>,
    pub last_updated: Option<DateTime<Utc>>,
}

impl StateWrite {
    pub fn new(value: impl ToString) -> Self {
        Self {
            value: value.to_string(),
            ..Default::default()
        }
    }

    pub fn attributes(mut self, attributes: Attributes) -> Self {
        self.attributes = attributes;
        self
    }

    pub fn attribute(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn context(mut self, context: Context) -> Self {
        self.context = Some(context);
        self
    }

    pub fn last_changed(mut self, ts: DateTime<Utc>) -> Self {
        self.last_changed = Some(ts);
        self
    }

    pub fn last_updated(mut self, ts: DateTime<Utc>) -> Self {
        self.last_updated = Some(ts);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use retro_core::EntityId;

    fn live(value: &str, changed: DateTime<Utc>, updated: DateTime<Utc>) -> State {
        State::resolve(
            EntityId::new("sensor", "temp").unwrap(),
            value,
            Attributes::new(),
            Context::new(),
            None,
            Some(changed),
            Some(updated),
        )
    }

    #[test]
    fn test_first_write_is_current() {
        let old = Utc::now() - Duration::days(30);
        assert_eq!(decide(None, Some(old), Some(old)), WriteOutcome::Current);
    }

    #[test]
    fn test_older_last_updated_is_historic() {
        let t0 = Utc::now();
        let current = live("20.0", t0, t0);
        let outcome = decide(Some(&current), None, Some(t0 - Duration::hours(1)));
        assert_eq!(outcome, WriteOutcome::Historic(HistoricReason::LastUpdated));
        assert_eq!(outcome.event_kind(), EventKind::HistoricStateChanged);
    }

    #[test]
    fn test_older_last_changed_is_historic() {
        let t0 = Utc::now();
        let current = live("20.0", t0, t0);
        let outcome = decide(Some(&current), Some(t0 - Duration::minutes(1)), None);
        assert_eq!(outcome, WriteOutcome::Historic(HistoricReason::LastChanged));
    }

    #[test]
    fn test_equal_or_newer_timestamps_are_current() {
        let t0 = Utc::now();
        let current = live("20.0", t0, t0);
        assert_eq!(decide(Some(&current), Some(t0), Some(t0)), WriteOutcome::Current);
        assert_eq!(
            decide(Some(&current), None, Some(t0 + Duration::seconds(1))),
            WriteOutcome::Current
        );
        assert_eq!(decide(Some(&current), None, None), WriteOutcome::Current);
    }

    #[test]
    fn test_newer_last_updated_but_older_last_changed_is_historic() {
        let t0 = Utc::now();
        let current = live("20.0", t0, t0);
        let outcome = decide(
            Some(&current),
            Some(t0 - Duration::hours(2)),
            Some(t0 + Duration::hours(1)),
        );
        assert_eq!(outcome, WriteOutcome::Historic(HistoricReason::LastChanged));
    }

    #[test]
    fn test_empty_current_value_accepts_anything() {
        let t0 = Utc::now();
        let current = live("", t0, t0);
        assert_eq!(
            decide(Some(&current), None, Some(t0 - Duration::days(1))),
            WriteOutcome::Current
        );
    }
}
