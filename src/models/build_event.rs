//! Build lifecycle events used to trigger status recomputation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{JobSignal, ValidationStatus};

/// Fact that may change the derived status of a build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
#[serde(rename_all = "snake_case")]
pub enum BuildEvent {
    /// A build was created.
    BuildCreated { build_id: Uuid },
    /// An upload batch was applied.
    BatchReceived {
        build_id: Uuid,
        batch_count: i32,
        total_batch: Option<i32>,
    },
    /// All diffs of the build were classified.
    DiffsClassified { build_id: Uuid, diff_count: u64 },
    /// A reviewer changed the validation status.
    ValidationChanged {
        build_id: Uuid,
        validation_status: ValidationStatus,
    },
    /// The job runner sent a terminal signal.
    JobSignalled { build_id: Uuid, signal: JobSignal },
    /// The batch timeout elapsed.
    Expired { build_id: Uuid },
}

impl BuildEvent {
    pub fn build_id(&self) -> Uuid {
        match self {
            Self::BuildCreated { build_id }
            | Self::BatchReceived { build_id, .. }
            | Self::DiffsClassified { build_id, .. }
            | Self::ValidationChanged { build_id, .. }
            | Self::JobSignalled { build_id, .. }
            | Self::Expired { build_id } => *build_id,
        }
    }
}

/// Event with its emission timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildEventMessage {
    #[serde(flatten)]
    pub event: BuildEvent,
    pub timestamp: DateTime<Utc>,
}

impl BuildEventMessage {
    pub fn new(event: BuildEvent) -> Self {
        Self {
            event,
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization_is_tagged() {
        let build_id = Uuid::now_v7();
        let message = BuildEventMessage::new(BuildEvent::Expired { build_id });
        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["type"], "expired");
        assert_eq!(json["payload"]["build_id"], build_id.to_string());
        assert!(json.get("timestamp").is_some());
    }

    #[test]
    fn test_build_id_accessor() {
        let build_id = Uuid::now_v7();
        let event = BuildEvent::JobSignalled {
            build_id,
            signal: JobSignal::Aborted,
        };
        assert_eq!(event.build_id(), build_id);
    }
}
