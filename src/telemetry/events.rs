use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// Detector output before it is stamped and logged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alert {
    pub severity: Severity,
    pub message: String,
}

impl Alert {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Info,
            message: message.into(),
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub timestamp: DateTime<Utc>,
    pub severity: Severity,
    pub message: String,
}

impl Event {
    pub fn from_alert(alert: Alert, timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            severity: alert.severity,
            message: alert.message,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventOrder {
    /// Insertion order, oldest first.
    Oldest,
    #[default]
    Newest,
}

/// Fixed-capacity FIFO of events. Once full, each push evicts the oldest entry.
#[derive(Debug, Clone)]
pub struct EventLog {
    entries: VecDeque<Event>,
    capacity: usize,
}

impl EventLog {
    /// `capacity` is validated as non-zero at config load.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, event: Event) {
        if self.capacity == 0 {
            return;
        }
        while self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(event);
    }

    pub fn to_vec(&self, order: EventOrder) -> Vec<Event> {
        match order {
            EventOrder::Oldest => self.entries.iter().cloned().collect(),
            EventOrder::Newest => self.entries.iter().rev().cloned().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(n: usize) -> Event {
        Event {
            timestamp: Utc::now(),
            severity: Severity::Info,
            message: format!("event {n}"),
        }
    }

    #[test]
    fn test_capacity_is_never_exceeded() {
        let mut log = EventLog::new(3);
        for n in 0..10 {
            log.push(event(n));
            assert!(log.to_vec(EventOrder::Oldest).len() <= 3);
        }
        assert_eq!(log.to_vec(EventOrder::Oldest).len(), 3);
    }

    #[test]
    fn test_overflow_evicts_oldest() {
        let capacity = 50;
        let mut log = EventLog::new(capacity);
        for n in 0..=capacity {
            log.push(event(n));
        }
        let messages: Vec<_> = log
            .to_vec(EventOrder::Oldest)
            .into_iter()
            .map(|e| e.message)
            .collect();
        assert_eq!(messages.len(), capacity);
        assert!(!messages.contains(&"event 0".to_string()));
        assert_eq!(messages.first().unwrap(), "event 1");
        assert_eq!(messages.last().unwrap(), &format!("event {capacity}"));
    }

    #[test]
    fn test_read_orders() {
        let mut log = EventLog::new(5);
        for n in 0..3 {
            log.push(event(n));
        }
        let oldest: Vec<_> = log
            .to_vec(EventOrder::Oldest)
            .into_iter()
            .map(|e| e.message)
            .collect();
        assert_eq!(oldest, vec!["event 0", "event 1", "event 2"]);

        let newest: Vec<_> = log
            .to_vec(EventOrder::Newest)
            .into_iter()
            .map(|e| e.message)
            .collect();
        assert_eq!(newest, vec!["event 2", "event 1", "event 0"]);
    }

    #[test]
    fn test_severity_serializes_lowercase() {
        let json = serde_json::to_value(Severity::Warning).unwrap();
        assert_eq!(json, serde_json::json!("warning"));
    }
}
