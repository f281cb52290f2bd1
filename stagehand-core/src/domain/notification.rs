//! Notification domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of notification, stable across all sinks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Success,
    Failure,
    Rollback,
    CriticalFailure,
}

impl std::fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NotificationKind::Success => write!(f, "success"),
            NotificationKind::Failure => write!(f, "failure"),
            NotificationKind::Rollback => write!(f, "rollback"),
            NotificationKind::CriticalFailure => write!(f, "critical_failure"),
        }
    }
}

/// Notification payload delivered to every configured channel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub timestamp: DateTime<Utc>,
    pub data: serde_json::Value,
}

impl Notification {
    pub fn new(kind: NotificationKind, data: serde_json::Value) -> Self {
        Self {
            kind,
            timestamp: Utc::now(),
            data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_shape() {
        let n = Notification::new(
            NotificationKind::CriticalFailure,
            serde_json::json!({ "environment": "production" }),
        );
        let json = serde_json::to_value(&n).unwrap();

        assert_eq!(json["type"], "critical_failure");
        assert!(json["timestamp"].is_string());
        assert_eq!(json["data"]["environment"], "production");
    }
}
