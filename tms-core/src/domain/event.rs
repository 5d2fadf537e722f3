//! Domain events
//!
//! Every lifecycle transition publishes one of these on the orchestrator's
//! event bus. Subscribers (notification, dashboards, metrics) receive the
//! same events whether the transition originated from the queue manager, the
//! webhook ingestor or the timeout sweep.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::execution::ExecutionResults;

/// A lifecycle transition of an execution or parallel parent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ExecutionEvent {
    Queued {
        execution_id: Uuid,
        test_suite: String,
        environment: String,
    },
    Assigned {
        execution_id: Uuid,
        runner_id: Uuid,
        /// Present when the assignment is for one shard of a parallel parent
        shard_index: Option<i32>,
    },
    Started {
        execution_id: Uuid,
        shard_index: Option<i32>,
    },
    Completed {
        execution_id: Uuid,
        shard_index: Option<i32>,
        results: Option<ExecutionResults>,
    },
    Failed {
        execution_id: Uuid,
        shard_index: Option<i32>,
        error_message: Option<String>,
    },
    Cancelled {
        execution_id: Uuid,
    },
}

impl ExecutionEvent {
    /// The execution this event belongs to.
    pub fn execution_id(&self) -> Uuid {
        match self {
            ExecutionEvent::Queued { execution_id, .. }
            | ExecutionEvent::Assigned { execution_id, .. }
            | ExecutionEvent::Started { execution_id, .. }
            | ExecutionEvent::Completed { execution_id, .. }
            | ExecutionEvent::Failed { execution_id, .. }
            | ExecutionEvent::Cancelled { execution_id } => *execution_id,
        }
    }

    /// Short name used in logs and serialized payloads.
    pub fn name(&self) -> &'static str {
        match self {
            ExecutionEvent::Queued { .. } => "execution_queued",
            ExecutionEvent::Assigned { .. } => "execution_assigned",
            ExecutionEvent::Started { .. } => "execution_started",
            ExecutionEvent::Completed { .. } => "execution_completed",
            ExecutionEvent::Failed { .. } => "execution_failed",
            ExecutionEvent::Cancelled { .. } => "execution_cancelled",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_accessors() {
        let id = Uuid::new_v4();
        let event = ExecutionEvent::Completed {
            execution_id: id,
            shard_index: Some(2),
            results: None,
        };

        assert_eq!(event.execution_id(), id);
        assert_eq!(event.name(), "execution_completed");
    }

    #[test]
    fn test_event_serialization_tag() {
        let event = ExecutionEvent::Cancelled {
            execution_id: Uuid::new_v4(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "cancelled");
    }
}
