use async_trait::async_trait;
use chrono::{DateTime, Utc};
use guildflow_shared::ScopeId;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use tokio::sync::{broadcast, RwLock};
use tracing::info;
use uuid::Uuid;

use super::{
    MessageDelivery, PriorityChange, RecordAssignment, ServiceError, ServiceResult, Tagging,
    UserNotification,
};

/// Side effect published by the bus
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OutboundEvent {
    MessageSent {
        message_id: String,
        scope_id: Option<ScopeId>,
        channel_id: String,
        content: String,
    },
    RecordAssigned {
        record_id: String,
        assignee_id: String,
    },
    TagAdded {
        record_id: String,
        tag: String,
    },
    PriorityChanged {
        record_id: String,
        previous: Option<String>,
        priority: String,
    },
    UserNotified {
        notification_id: String,
        user_id: String,
        title: Option<String>,
        message: String,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct BusMessage {
    pub event: OutboundEvent,
    pub timestamp: DateTime<Utc>,
}

/// In-process collaborator: records state and broadcasts every side effect to subscribers
pub struct EventBus {
    broadcast: broadcast::Sender<BusMessage>,
    assignments: RwLock<HashMap<String, String>>,
    tags: RwLock<HashMap<String, BTreeSet<String>>>,
    priorities: RwLock<HashMap<String, String>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(1000)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (broadcast, _) = broadcast::channel(capacity);
        Self {
            broadcast,
            assignments: RwLock::new(HashMap::new()),
            tags: RwLock::new(HashMap::new()),
            priorities: RwLock::new(HashMap::new()),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BusMessage> {
        self.broadcast.subscribe()
    }

    fn publish(&self, event: OutboundEvent) {
        info!(?event, "Outbound workflow event");
        // no subscribers is fine
        let _ = self.broadcast.send(BusMessage {
            event,
            timestamp: Utc::now(),
        });
    }

    pub async fn assignee_of(&self, record_id: &str) -> Option<String> {
        self.assignments.read().await.get(record_id).cloned()
    }

    pub async fn tags_of(&self, record_id: &str) -> Vec<String> {
        self.tags
            .read()
            .await
            .get(record_id)
            .map(|tags| tags.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn priority_of(&self, record_id: &str) -> Option<String> {
        self.priorities.read().await.get(record_id).cloned()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

fn require_non_empty(name: &str, value: &str) -> ServiceResult<()> {
    if value.trim().is_empty() {
        return Err(ServiceError::Rejected(format!("{} must not be empty", name)));
    }
    Ok(())
}

#[async_trait]
impl MessageDelivery for EventBus {
    async fn send_message(
        &self,
        scope_id: Option<ScopeId>,
        channel_id: &str,
        content: &str,
    ) -> ServiceResult<String> {
        require_non_empty("channel_id", channel_id)?;
        require_non_empty("content", content)?;

        let message_id = Uuid::new_v4().to_string();
        self.publish(OutboundEvent::MessageSent {
            message_id: message_id.clone(),
            scope_id,
            channel_id: channel_id.to_string(),
            content: content.to_string(),
        });
        Ok(message_id)
    }
}

#[async_trait]
impl RecordAssignment for EventBus {
    async fn assign_record(&self, record_id: &str, assignee_id: &str) -> ServiceResult<()> {
        require_non_empty("record_id", record_id)?;

        self.assignments
            .write()
            .await
            .insert(record_id.to_string(), assignee_id.to_string());
        self.publish(OutboundEvent::RecordAssigned {
            record_id: record_id.to_string(),
            assignee_id: assignee_id.to_string(),
        });
        Ok(())
    }
}

#[async_trait]
impl Tagging for EventBus {
    async fn add_tag(&self, record_id: &str, tag: &str) -> ServiceResult<()> {
        require_non_empty("record_id", record_id)?;
        require_non_empty("tag", tag)?;

        self.tags
            .write()
            .await
            .entry(record_id.to_string())
            .or_default()
            .insert(tag.to_string());
        self.publish(OutboundEvent::TagAdded {
            record_id: record_id.to_string(),
            tag: tag.to_string(),
        });
        Ok(())
    }
}

#[async_trait]
impl PriorityChange for EventBus {
    async fn change_priority(&self, record_id: &str, priority: &str) -> ServiceResult<Option<String>> {
        require_non_empty("record_id", record_id)?;
        require_non_empty("priority", priority)?;

        let previous = self
            .priorities
            .write()
            .await
            .insert(record_id.to_string(), priority.to_string());
        self.publish(OutboundEvent::PriorityChanged {
            record_id: record_id.to_string(),
            previous: previous.clone(),
            priority: priority.to_string(),
        });
        Ok(previous)
    }
}

#[async_trait]
impl UserNotification for EventBus {
    async fn notify_user(
        &self,
        user_id: &str,
        title: Option<&str>,
        message: &str,
    ) -> ServiceResult<String> {
        require_non_empty("user_id", user_id)?;

        let notification_id = Uuid::new_v4().to_string();
        self.publish(OutboundEvent::UserNotified {
            notification_id: notification_id.clone(),
            user_id: user_id.to_string(),
            title: title.map(str::to_string),
            message: message.to_string(),
        });
        Ok(notification_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_send_message_is_broadcast() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        let message_id = bus.send_message(Some(1), "welcome", "hi").await.unwrap();
        let received = rx.recv().await.unwrap();

        match received.event {
            OutboundEvent::MessageSent { message_id: id, channel_id, .. } => {
                assert_eq!(id, message_id);
                assert_eq!(channel_id, "welcome");
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_priority_change_returns_previous() {
        let bus = EventBus::new();

        assert_eq!(bus.change_priority("t-1", "low").await.unwrap(), None);
        assert_eq!(
            bus.change_priority("t-1", "high").await.unwrap(),
            Some("low".to_string())
        );
        assert_eq!(bus.priority_of("t-1").await, Some("high".to_string()));
    }

    #[tokio::test]
    async fn test_record_state_is_tracked() {
        let bus = EventBus::new();

        bus.add_tag("t-9", "vip").await.unwrap();
        bus.add_tag("t-9", "vip").await.unwrap();
        bus.assign_record("t-9", "42").await.unwrap();

        assert_eq!(bus.tags_of("t-9").await, vec!["vip".to_string()]);
        assert_eq!(bus.assignee_of("t-9").await, Some("42".to_string()));
    }

    #[tokio::test]
    async fn test_empty_values_are_rejected() {
        let bus = EventBus::new();

        assert!(matches!(
            bus.send_message(None, "", "hi").await,
            Err(ServiceError::Rejected(_))
        ));
        assert!(bus.add_tag("t-1", "  ").await.is_err());
    }
}
