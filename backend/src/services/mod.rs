//! Outbound collaborators used by workflow action handlers.
//!
//! Each action handler calls exactly one of these capabilities. The host application provides
//! real implementations (chat gateway, ticket store, ...); [`EventBus`] is the in-process
//! implementation used by the bundled binary and by tests.

pub mod event_bus;

use async_trait::async_trait;
use guildflow_shared::ScopeId;

pub use event_bus::{EventBus, OutboundEvent};

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Service unavailable: {0}")]
    Unavailable(String),
    #[error("Request rejected: {0}")]
    Rejected(String),
    #[error("Not found: {0}")]
    NotFound(String),
}

pub type ServiceResult<T> = Result<T, ServiceError>;

#[async_trait]
pub trait MessageDelivery: Send + Sync {
    /// Post a message to a channel, returning the new message id
    async fn send_message(
        &self,
        scope_id: Option<ScopeId>,
        channel_id: &str,
        content: &str,
    ) -> ServiceResult<String>;
}

#[async_trait]
pub trait RecordAssignment: Send + Sync {
    async fn assign_record(&self, record_id: &str, assignee_id: &str) -> ServiceResult<()>;
}

#[async_trait]
pub trait Tagging: Send + Sync {
    async fn add_tag(&self, record_id: &str, tag: &str) -> ServiceResult<()>;
}

#[async_trait]
pub trait PriorityChange: Send + Sync {
    /// Change a record's priority, returning the previous one if any
    async fn change_priority(&self, record_id: &str, priority: &str) -> ServiceResult<Option<String>>;
}

#[async_trait]
pub trait UserNotification: Send + Sync {
    /// Notify a user directly, returning the notification id
    async fn notify_user(
        &self,
        user_id: &str,
        title: Option<&str>,
        message: &str,
    ) -> ServiceResult<String>;
}
