//! Event system infrastructure for queue_sync.
//!
//! This crate provides the types shared between the reconciliation core and
//! whatever view layer sits on top of it, plus the machinery used to deliver
//! reconciled state to that view layer.
//!
//! # Architecture
//!
//! - **TicketSnapshot**: the reconciled, client-held view of a tracked ticket
//! - **TrackerEvent**: enum of everything the view layer may need to react to
//! - **EventHandler**: trait for implementing view-layer reactions
//! - **EventPublisher**: publishes events to registered handlers
//!
//! This crate has no dependencies on internal crates (channel, domain, etc.),
//! avoiding circular dependencies. Opaque queue/dashboard payloads are carried
//! as serialized JSON values.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Lifecycle status of a queue ticket as reported by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    Waiting,
    Consulting,
    Completed,
    Cancelled,
    Expired,
}

impl TicketStatus {
    /// Terminal statuses are never left once reached.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TicketStatus::Completed | TicketStatus::Cancelled | TicketStatus::Expired
        )
    }
}

impl fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TicketStatus::Waiting => write!(f, "waiting"),
            TicketStatus::Consulting => write!(f, "consulting"),
            TicketStatus::Completed => write!(f, "completed"),
            TicketStatus::Cancelled => write!(f, "cancelled"),
            TicketStatus::Expired => write!(f, "expired"),
        }
    }
}

/// The reconciled view of a tracked ticket.
///
/// Only the reconciler mutates a snapshot; everything else receives clones.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TicketSnapshot {
    pub id: i64,
    pub number: String,
    pub status: TicketStatus,
    pub position_in_queue: Option<u32>,
    pub estimated_wait_minutes: i64,
    pub service_id: i64,
    pub service_name: String,
    pub created_at: DateTime<Utc>,
    /// Last position a proximity alert was raised for.
    pub last_alerted_position: Option<u32>,
    /// When the last successful update (pull or push) was applied.
    pub last_updated: DateTime<Utc>,
}

/// How a tracked ticket reached its end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FinishKind {
    /// The ticket finished through the normal flow.
    Normal,
    /// The server closed the ticket while it was still being served.
    AutoCompleted,
}

impl fmt::Display for FinishKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FinishKind::Normal => write!(f, "normal"),
            FinishKind::AutoCompleted => write!(f, "auto-completed"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Normal,
    High,
}

/// Notification raised when the tracked ticket is called to a counter.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CallNotice {
    pub ticket_number: String,
    pub counter: Option<String>,
    pub priority: Priority,
    /// Sticky notices stay on screen until the user dismisses them.
    pub sticky: bool,
}

/// Events raised by the reconciliation core for the view layer.
#[derive(Debug, Clone, PartialEq)]
pub enum TrackerEvent {
    /// The reconciled snapshot changed in at least one field.
    SnapshotChanged(TicketSnapshot),
    /// Ordinary status transition, used for non-sticky notifications.
    StatusChanged {
        ticket_number: String,
        from: TicketStatus,
        to: TicketStatus,
    },
    /// The tracked ticket finished; the snapshot has been cleared.
    /// Raised exactly once per tracker.
    EntityFinished {
        ticket_number: String,
        kind: FinishKind,
    },
    /// The ticket moved into the configured proximity band.
    ProximityAlert { ticket_number: String, position: u32 },
    /// The ticket was called. Always delivered, never suppressed.
    PatientCalled(CallNotice),
    /// A refresh failed; the last good snapshot is still being shown.
    Stale { last_updated: Option<DateTime<Utc>> },
    /// Push channel connectivity changed. `failed` marks an exhausted
    /// reconnection budget and stays until the user resubscribes.
    ConnectionChanged { connected: bool, failed: bool },
    /// Latest service queue or dashboard state.
    QueueChanged { topic: String, state: Value },
    /// Emergency broadcast received on a service topic.
    EmergencyAlert { topic: String, payload: Value },
}

/// Trait for handling tracker events.
/// Implementations perform view-layer side effects like rendering,
/// notifications, indicators, etc.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &TrackerEvent);
}

/// Publishes tracker events to registered handlers.
/// Handlers are called sequentially in registration order.
#[derive(Clone)]
pub struct EventPublisher {
    handlers: Arc<Vec<Arc<dyn EventHandler>>>,
}

impl EventPublisher {
    pub fn new() -> Self {
        Self {
            handlers: Arc::new(Vec::new()),
        }
    }

    /// Register a new event handler.
    /// Note: This creates a new publisher instance with the additional handler.
    /// Store the returned publisher where the tracker can reach it.
    pub fn with_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        let mut handlers = (*self.handlers).clone();
        handlers.push(handler);
        self.handlers = Arc::new(handlers);
        self
    }

    /// Publish an event to all registered handlers, one after another.
    pub async fn publish(&self, event: TrackerEvent) {
        for handler in self.handlers.iter() {
            handler.handle(&event).await;
        }
    }

    /// Publish a batch of events in order.
    pub async fn publish_all(&self, events: Vec<TrackerEvent>) {
        for event in events {
            self.publish(event).await;
        }
    }
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new()
    }
}
