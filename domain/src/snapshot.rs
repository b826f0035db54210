//! Building and field-diffing ticket snapshots from wire payloads.

use channel::message::TicketPayload;
use chrono::{DateTime, Utc};
use events::{TicketSnapshot, TicketStatus};

/// What a merge changed on a snapshot.
#[derive(Debug, Default, PartialEq)]
pub(crate) struct Changes {
    pub(crate) fields: usize,
    /// Previous status, when the status field changed.
    pub(crate) status_from: Option<TicketStatus>,
}

impl Changes {
    pub(crate) fn any(&self) -> bool {
        self.fields > 0
    }
}

/// Build a fresh snapshot from a full record. Returns `None` when the
/// record carries no status, since nothing sensible can be shown then.
pub(crate) fn create(
    ticket_number: &str,
    payload: &TicketPayload,
    now: DateTime<Utc>,
) -> Option<TicketSnapshot> {
    let status = payload.status?;

    Some(TicketSnapshot {
        id: payload.id.unwrap_or_default(),
        number: payload
            .ticket_number
            .clone()
            .unwrap_or_else(|| ticket_number.to_string()),
        status,
        position_in_queue: payload.position_in_queue.flatten(),
        estimated_wait_minutes: payload.estimated_wait_time.unwrap_or_default(),
        service_id: payload.service_id.unwrap_or_default(),
        service_name: payload.service_name.clone().unwrap_or_default(),
        created_at: payload.created_at.unwrap_or(now),
        last_alerted_position: None,
        last_updated: now,
    })
}

fn assign<T: PartialEq>(slot: &mut T, incoming: Option<T>, changes: &mut Changes) {
    if let Some(value) = incoming {
        if *slot != value {
            *slot = value;
            changes.fields += 1;
        }
    }
}

/// Overwrite every field the payload carries and whose value differs.
///
/// `accept_status` decides whether an incoming status may replace the
/// current one; rejected statuses leave the field untouched.
pub(crate) fn merge(
    snapshot: &mut TicketSnapshot,
    payload: &TicketPayload,
    accept_status: impl Fn(TicketStatus, TicketStatus) -> bool,
) -> Changes {
    let mut changes = Changes::default();

    if let Some(status) = payload.status {
        let current = snapshot.status;
        if status != current && accept_status(current, status) {
            snapshot.status = status;
            changes.fields += 1;
            changes.status_from = Some(current);
        }
    }

    assign(&mut snapshot.id, payload.id, &mut changes);
    assign(&mut snapshot.number, payload.ticket_number.clone(), &mut changes);
    assign(&mut snapshot.position_in_queue, payload.position_in_queue, &mut changes);
    assign(
        &mut snapshot.estimated_wait_minutes,
        payload.estimated_wait_time,
        &mut changes,
    );
    assign(&mut snapshot.service_id, payload.service_id, &mut changes);
    assign(&mut snapshot.service_name, payload.service_name.clone(), &mut changes);
    assign(&mut snapshot.created_at, payload.created_at, &mut changes);

    changes
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(json: serde_json::Value) -> TicketPayload {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn test_create_requires_status() {
        let now = Utc::now();
        assert!(create("T-1", &payload(serde_json::json!({"id": 1})), now).is_none());

        let snapshot = create(
            "T-1",
            &payload(serde_json::json!({"status": "waiting", "position_in_queue": 4})),
            now,
        )
        .unwrap();
        assert_eq!(snapshot.number, "T-1");
        assert_eq!(snapshot.position_in_queue, Some(4));
        assert_eq!(snapshot.last_alerted_position, None);
        assert_eq!(snapshot.last_updated, now);
    }

    #[test]
    fn test_merge_only_counts_differing_fields() {
        let now = Utc::now();
        let mut snapshot = create(
            "T-1",
            &payload(serde_json::json!({
                "status": "waiting",
                "position_in_queue": 4,
                "estimated_wait_time": 20
            })),
            now,
        )
        .unwrap();

        let unchanged = merge(
            &mut snapshot,
            &payload(serde_json::json!({"status": "waiting", "position_in_queue": 4})),
            |_, _| true,
        );
        assert!(!unchanged.any());

        let changed = merge(
            &mut snapshot,
            &payload(serde_json::json!({"position_in_queue": 3, "estimated_wait_time": 15})),
            |_, _| true,
        );
        assert_eq!(changed.fields, 2);
        assert_eq!(changed.status_from, None);
        assert_eq!(snapshot.estimated_wait_minutes, 15);
    }

    #[test]
    fn test_merge_clears_position_on_explicit_null() {
        let mut snapshot = create(
            "T-1",
            &payload(serde_json::json!({"status": "waiting", "position_in_queue": 1})),
            Utc::now(),
        )
        .unwrap();

        let changes = merge(
            &mut snapshot,
            &payload(serde_json::json!({"position_in_queue": null})),
            |_, _| true,
        );
        assert!(changes.any());
        assert_eq!(snapshot.position_in_queue, None);
    }

    #[test]
    fn test_rejected_status_is_left_alone() {
        let mut snapshot = create(
            "T-1",
            &payload(serde_json::json!({"status": "consulting"})),
            Utc::now(),
        )
        .unwrap();

        let changes = merge(
            &mut snapshot,
            &payload(serde_json::json!({"status": "waiting"})),
            |_, to| to != TicketStatus::Waiting,
        );
        assert!(!changes.any());
        assert_eq!(snapshot.status, TicketStatus::Consulting);
    }
}
