//! Status notifications
//!
//! The decision engine and the applier publish lifecycle events on a
//! broadcast channel. Events of a single action are sent from one task in
//! transition order, so subscribers see them FIFO per action.

use crate::error::{ErrorKind, OptimizerError};
use crate::models::{ActionPlanState, ActionState};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;
use uuid::Uuid;

pub const DECISION_ENGINE_STATUS_TOPIC: &str = "decision_engine.status";
pub const APPLIER_STATUS_TOPIC: &str = "applier.status";

const DEFAULT_CAPACITY: usize = 1024;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum StatusEvent {
    StrategyStarted {
        audit_uuid: Uuid,
        request_id: Uuid,
    },
    StrategySucceeded {
        audit_uuid: Uuid,
        request_id: Uuid,
        action_plan_uuid: Uuid,
    },
    StrategyFailed {
        audit_uuid: Uuid,
        request_id: Uuid,
        kind: ErrorKind,
        reason: String,
    },
    ActionStateChanged {
        action_plan_uuid: Uuid,
        action_uuid: Uuid,
        from: ActionState,
        to: ActionState,
        timestamp: DateTime<Utc>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    ActionPlanStateChanged {
        action_plan_uuid: Uuid,
        from: ActionPlanState,
        to: ActionPlanState,
        timestamp: DateTime<Utc>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
}

impl StatusEvent {
    pub fn strategy_failed(audit_uuid: Uuid, request_id: Uuid, error: &OptimizerError) -> Self {
        StatusEvent::StrategyFailed {
            audit_uuid,
            request_id,
            kind: error.kind(),
            reason: error.to_string(),
        }
    }

    pub fn action(
        action_plan_uuid: Uuid,
        action_uuid: Uuid,
        from: ActionState,
        to: ActionState,
        reason: Option<String>,
    ) -> Self {
        StatusEvent::ActionStateChanged {
            action_plan_uuid,
            action_uuid,
            from,
            to,
            timestamp: Utc::now(),
            reason,
        }
    }

    pub fn plan(action_plan_uuid: Uuid, from: ActionPlanState, to: ActionPlanState, reason: Option<String>) -> Self {
        StatusEvent::ActionPlanStateChanged {
            action_plan_uuid,
            from,
            to,
            timestamp: Utc::now(),
            reason,
        }
    }

    /// Status topic the event belongs to
    pub fn topic(&self) -> &'static str {
        match self {
            StatusEvent::StrategyStarted { .. }
            | StatusEvent::StrategySucceeded { .. }
            | StatusEvent::StrategyFailed { .. } => DECISION_ENGINE_STATUS_TOPIC,
            StatusEvent::ActionStateChanged { .. } | StatusEvent::ActionPlanStateChanged { .. } => {
                APPLIER_STATUS_TOPIC
            }
        }
    }
}

/// Fan-out of status events to any number of subscribers
#[derive(Debug, Clone)]
pub struct StatusBus {
    sender: broadcast::Sender<StatusEvent>,
}

impl Default for StatusBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl StatusBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish an event; having no subscriber is not an error
    pub fn publish(&self, event: StatusEvent) {
        trace!(topic = event.topic(), event = ?event, "Status event");
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.sender.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_events_reach_every_subscriber() {
        let bus = StatusBus::default();
        let mut first = bus.subscribe();
        let mut second = bus.subscribe();

        let plan = Uuid::new_v4();
        bus.publish(StatusEvent::plan(plan, ActionPlanState::Pending, ActionPlanState::Ongoing, None));

        for rx in [&mut first, &mut second] {
            match rx.recv().await.unwrap() {
                StatusEvent::ActionPlanStateChanged { action_plan_uuid, to, .. } => {
                    assert_eq!(action_plan_uuid, plan);
                    assert_eq!(to, ActionPlanState::Ongoing);
                }
                other => panic!("unexpected event {:?}", other),
            }
        }
    }

    #[test]
    fn test_wire_format() {
        let event = StatusEvent::StrategyFailed {
            audit_uuid: Uuid::nil(),
            request_id: Uuid::nil(),
            kind: ErrorKind::CdmStale,
            reason: "stale".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "strategy_failed");
        assert_eq!(json["kind"], "cdm_stale");
        assert_eq!(event.topic(), DECISION_ENGINE_STATUS_TOPIC);

        StatusBus::default().publish(event);
    }
}
