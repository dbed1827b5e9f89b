// src/events.rs
use crate::models::{HealthCheckReport, HealthStatus, RepairAction};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alert {
    pub service: String,
    pub status: HealthStatus,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Message pushed to real-time subscribers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum HealthEvent {
    Report(HealthCheckReport),
    Repair(RepairAction),
    Alert(Alert),
}

impl HealthEvent {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Fan-out of health events. Slow subscribers lose the oldest messages
/// rather than holding up the scheduler.
#[derive(Clone)]
pub struct EventBroadcaster {
    tx: broadcast::Sender<HealthEvent>,
}

impl EventBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Returns the number of subscribers that will see the event.
    pub fn publish(&self, event: HealthEvent) -> usize {
        match self.tx.send(event) {
            Ok(receivers) => receivers,
            Err(_) => {
                debug!("no event subscribers");
                0
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<HealthEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn events_are_tagged_json() {
        let events = EventBroadcaster::new(8);
        let mut rx = events.subscribe();

        let alert = Alert {
            service: "logs".to_string(),
            status: HealthStatus::Fail,
            message: "logs is failing".to_string(),
            timestamp: Utc::now(),
        };
        assert_eq!(events.publish(HealthEvent::Alert(alert.clone())), 1);

        let received = rx.recv().await.unwrap();
        let json: serde_json::Value = serde_json::from_str(&received.to_json().unwrap()).unwrap();
        assert_eq!(json["type"], "alert");
        assert_eq!(json["data"]["service"], "logs");
        assert_eq!(json["data"]["status"], "fail");
    }

    #[test]
    fn publishing_without_subscribers_is_fine() {
        let events = EventBroadcaster::new(1);
        let alert = Alert {
            service: "portal".to_string(),
            status: HealthStatus::Warn,
            message: "slow".to_string(),
            timestamp: Utc::now(),
        };
        assert_eq!(events.publish(HealthEvent::Alert(alert)), 0);
    }
}
