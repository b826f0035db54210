use chrono::{DateTime, Utc};
use events::TicketStatus;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;

/// Trait for getting the wire name of a frame or channel event
pub trait FrameType {
    fn frame_type(&self) -> &'static str;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TopicKind {
    Service,
    Ticket,
    AdminDashboard,
}

/// Logical subscription key. Identity is `(kind, target_id)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Topic {
    pub kind: TopicKind,
    pub target_id: String,
}

impl Topic {
    pub fn service(service_id: impl Into<String>) -> Self {
        Self {
            kind: TopicKind::Service,
            target_id: service_id.into(),
        }
    }

    pub fn ticket(ticket_number: impl Into<String>) -> Self {
        Self {
            kind: TopicKind::Ticket,
            target_id: ticket_number.into(),
        }
    }

    pub fn admin_dashboard() -> Self {
        Self {
            kind: TopicKind::AdminDashboard,
            target_id: "dashboard".to_string(),
        }
    }

    /// Path of this topic relative to the push base address.
    pub fn path(&self) -> String {
        match self.kind {
            TopicKind::Service => format!("service/{}", self.target_id),
            TopicKind::Ticket => format!("ticket/{}", self.target_id),
            TopicKind::AdminDashboard => "admin/dashboard".to_string(),
        }
    }

    pub fn endpoint(&self, base_url: &str) -> String {
        format!("{}/{}", base_url.trim_end_matches('/'), self.path())
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.path())
    }
}

/// Ticket fields as they appear in ticket frames. Every field is optional:
/// `ticket_update` frames only carry what changed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TicketPayload {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub ticket_number: Option<String>,
    #[serde(default)]
    pub status: Option<TicketStatus>,
    /// Outer `None`: field absent. `Some(None)`: explicitly null.
    #[serde(
        default,
        deserialize_with = "present_nullable",
        skip_serializing_if = "Option::is_none"
    )]
    pub position_in_queue: Option<Option<u32>>,
    #[serde(default)]
    pub estimated_wait_time: Option<i64>,
    #[serde(default)]
    pub service_id: Option<i64>,
    #[serde(default)]
    pub service_name: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub should_show_as_done: Option<bool>,
}

fn present_nullable<'de, D>(deserializer: D) -> Result<Option<Option<u32>>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<u32>::deserialize(deserializer).map(Some)
}

/// Payload of a `patient_called` frame on a service topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalledTicket {
    #[serde(default)]
    pub ticket_id: Option<i64>,
    #[serde(default)]
    pub ticket_number: Option<String>,
    #[serde(default)]
    pub service_id: Option<i64>,
    #[serde(default)]
    pub counter: Option<String>,
}

/// Every inbound frame type understood by the client, across all topic kinds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    // Service topics
    InitialQueueState {
        #[serde(default)]
        data: Value,
    },
    QueueUpdate {
        #[serde(default)]
        data: Value,
    },
    PatientCalled {
        data: CalledTicket,
    },
    EmergencyAlert {
        #[serde(default)]
        data: Value,
    },
    ConnectionEstablished {
        #[serde(default)]
        message: Option<String>,
    },

    // Ticket topics
    InitialTicketState {
        data: TicketPayload,
    },
    TicketUpdate {
        data: TicketPayload,
    },
    TicketConnectionEstablished {
        #[serde(default)]
        message: Option<String>,
    },

    // Admin dashboard
    InitialDashboardState {
        #[serde(default)]
        data: Value,
    },
    AdminConnectionEstablished {
        #[serde(default)]
        message: Option<String>,
    },

    // Keep-alive acknowledgement, any topic
    Pong,
}

impl FrameType for Frame {
    fn frame_type(&self) -> &'static str {
        match self {
            Frame::InitialQueueState { .. } => "initial_queue_state",
            Frame::QueueUpdate { .. } => "queue_update",
            Frame::PatientCalled { .. } => "patient_called",
            Frame::EmergencyAlert { .. } => "emergency_alert",
            Frame::ConnectionEstablished { .. } => "connection_established",
            Frame::InitialTicketState { .. } => "initial_ticket_state",
            Frame::TicketUpdate { .. } => "ticket_update",
            Frame::TicketConnectionEstablished { .. } => "ticket_connection_established",
            Frame::InitialDashboardState { .. } => "initial_dashboard_state",
            Frame::AdminConnectionEstablished { .. } => "admin_connection_established",
            Frame::Pong => "pong",
        }
    }
}

impl TopicKind {
    /// Whether `frame` belongs to this kind's closed taxonomy.
    pub fn accepts(&self, frame: &Frame) -> bool {
        match self {
            TopicKind::Service => matches!(
                frame,
                Frame::InitialQueueState { .. }
                    | Frame::QueueUpdate { .. }
                    | Frame::PatientCalled { .. }
                    | Frame::EmergencyAlert { .. }
                    | Frame::ConnectionEstablished { .. }
                    | Frame::Pong
            ),
            TopicKind::Ticket => matches!(
                frame,
                Frame::InitialTicketState { .. }
                    | Frame::TicketUpdate { .. }
                    | Frame::TicketConnectionEstablished { .. }
                    | Frame::Pong
            ),
            TopicKind::AdminDashboard => matches!(
                frame,
                Frame::InitialDashboardState { .. }
                    | Frame::QueueUpdate { .. }
                    | Frame::AdminConnectionEstablished { .. }
                    | Frame::Pong
            ),
        }
    }
}

/// Frames sent by the client.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Outbound {
    Ping,
}

/// Lifecycle of a transport session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Idle,
    Connecting,
    Open,
    Closed,
    /// Closed after the reconnection budget ran out. Terminal.
    Failed,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SessionStatus::Idle => write!(f, "idle"),
            SessionStatus::Connecting => write!(f, "connecting"),
            SessionStatus::Open => write!(f, "open"),
            SessionStatus::Closed => write!(f, "closed"),
            SessionStatus::Failed => write!(f, "failed"),
        }
    }
}

/// What listeners receive: a typed frame or a session status change.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    Frame(Frame),
    Status(SessionStatus),
}

pub const CONNECTION_STATUS: &str = "connection_status";

impl FrameType for ChannelEvent {
    fn frame_type(&self) -> &'static str {
        match self {
            ChannelEvent::Frame(frame) => frame.frame_type(),
            ChannelEvent::Status(_) => CONNECTION_STATUS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_topic_endpoints() {
        let base = "ws://queue.local/ws/";
        assert_eq!(
            Topic::service("7").endpoint(base),
            "ws://queue.local/ws/service/7"
        );
        assert_eq!(
            Topic::ticket("T-2025-001").endpoint(base),
            "ws://queue.local/ws/ticket/T-2025-001"
        );
        assert_eq!(
            Topic::admin_dashboard().endpoint(base),
            "ws://queue.local/ws/admin/dashboard"
        );
    }

    #[test]
    fn test_topic_identity_is_kind_and_target() {
        assert_eq!(Topic::ticket("1"), Topic::ticket("1"));
        assert_ne!(Topic::ticket("1"), Topic::service("1"));
    }

    #[test]
    fn test_ticket_update_distinguishes_absent_and_null_position() {
        let absent: Frame =
            serde_json::from_value(json!({"type": "ticket_update", "data": {"status": "consulting"}}))
                .unwrap();
        let null: Frame = serde_json::from_value(
            json!({"type": "ticket_update", "data": {"position_in_queue": null}}),
        )
        .unwrap();
        let three: Frame = serde_json::from_value(
            json!({"type": "ticket_update", "data": {"position_in_queue": 3}}),
        )
        .unwrap();

        match (absent, null, three) {
            (
                Frame::TicketUpdate { data: a },
                Frame::TicketUpdate { data: n },
                Frame::TicketUpdate { data: t },
            ) => {
                assert_eq!(a.status, Some(TicketStatus::Consulting));
                assert_eq!(a.position_in_queue, None);
                assert_eq!(n.position_in_queue, Some(None));
                assert_eq!(t.position_in_queue, Some(Some(3)));
            }
            other => panic!("unexpected frames: {other:?}"),
        }
    }

    #[test]
    fn test_unit_and_message_frames_parse() {
        let pong: Frame = serde_json::from_str(r#"{"type":"pong","timestamp":"x"}"#).unwrap();
        assert_eq!(pong, Frame::Pong);

        let hello: Frame =
            serde_json::from_str(r#"{"type":"ticket_connection_established"}"#).unwrap();
        assert_eq!(
            hello,
            Frame::TicketConnectionEstablished { message: None }
        );
    }

    #[test]
    fn test_unknown_frame_type_is_rejected() {
        assert!(serde_json::from_str::<Frame>(r#"{"type":"surprise"}"#).is_err());
    }

    #[test]
    fn test_taxonomy_per_topic_kind() {
        let queue_update = Frame::QueueUpdate { data: Value::Null };
        let ticket_update = Frame::TicketUpdate {
            data: TicketPayload::default(),
        };

        assert!(TopicKind::Service.accepts(&queue_update));
        assert!(TopicKind::AdminDashboard.accepts(&queue_update));
        assert!(!TopicKind::Ticket.accepts(&queue_update));
        assert!(TopicKind::Ticket.accepts(&ticket_update));
        assert!(!TopicKind::Service.accepts(&ticket_update));
        assert!(TopicKind::AdminDashboard.accepts(&Frame::Pong));
    }

    #[test]
    fn test_ping_wire_format() {
        assert_eq!(
            serde_json::to_string(&Outbound::Ping).unwrap(),
            r#"{"type":"ping"}"#
        );
    }
}
