//! Merges pull results and push frames for one tracked ticket into a single
//! snapshot and decides which view events follow from each input.
//!
//! The reconciler is plain synchronous state. Every input is applied to
//! completion and returns the events it produced, so there is no way for a
//! reaction to an event to mutate the snapshot halfway through an update.

use crate::snapshot;
use channel::message::{CalledTicket, TicketPayload};
use chrono::{DateTime, Utc};
use events::{
    CallNotice, FinishKind, Priority, TicketSnapshot, TicketStatus, TrackerEvent,
};
use log::*;

/// One input to the reconciler, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum Update {
    /// Complete record: a pull result or the initial state pushed after every
    /// (re)connect. Can create the snapshot.
    Full(TicketPayload),
    /// A `ticket_update` push carrying only the fields that changed.
    Partial(TicketPayload),
    /// A `patient_called` push from the owning service topic.
    Called(CalledTicket),
    /// A refresh failed.
    PullFailed,
}

#[derive(Debug)]
pub struct Reconciler {
    ticket_number: String,
    proximity_threshold: u32,
    snapshot: Option<TicketSnapshot>,
    /// Set by a `patient_called` push; `waiting` cannot be restored after it.
    called: bool,
    finished: bool,
}

impl Reconciler {
    pub fn new(ticket_number: impl Into<String>, proximity_threshold: u32) -> Self {
        Self {
            ticket_number: ticket_number.into(),
            proximity_threshold,
            snapshot: None,
            called: false,
            finished: false,
        }
    }

    pub fn ticket_number(&self) -> &str {
        &self.ticket_number
    }

    pub fn snapshot(&self) -> Option<&TicketSnapshot> {
        self.snapshot.as_ref()
    }

    /// The ticket reached its end. A finished reconciler ignores all input.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn apply(&mut self, update: Update, now: DateTime<Utc>) -> Vec<TrackerEvent> {
        if self.finished {
            trace!("Ignoring update for finished ticket {}", self.ticket_number);
            return Vec::new();
        }

        match update {
            Update::Full(payload) => self.apply_payload(payload, true, now),
            Update::Partial(payload) => self.apply_payload(payload, false, now),
            Update::Called(called) => self.apply_called(called, now),
            Update::PullFailed => vec![TrackerEvent::Stale {
                last_updated: self.snapshot.as_ref().map(|s| s.last_updated),
            }],
        }
    }

    fn names_other_ticket(&self, ticket_number: Option<&str>) -> bool {
        matches!(ticket_number, Some(number) if number != self.ticket_number)
    }

    fn apply_payload(
        &mut self,
        payload: TicketPayload,
        full: bool,
        now: DateTime<Utc>,
    ) -> Vec<TrackerEvent> {
        if self.names_other_ticket(payload.ticket_number.as_deref()) {
            warn!(
                "Ignoring update for ticket {:?} while tracking {}",
                payload.ticket_number, self.ticket_number
            );
            return Vec::new();
        }

        let mut events = Vec::new();
        let called = self.called;

        let Some(current) = self.snapshot.as_mut() else {
            if !full {
                debug!(
                    "No snapshot yet for {}, waiting for a full record",
                    self.ticket_number
                );
                return events;
            }
            let Some(mut created) = snapshot::create(&self.ticket_number, &payload, now) else {
                warn!("Record for {} carries no status", self.ticket_number);
                return events;
            };
            if called && created.status == TicketStatus::Waiting {
                created.status = TicketStatus::Consulting;
            }
            info!(
                "Tracking {} ({}, position {:?})",
                created.number, created.status, created.position_in_queue
            );
            if self.is_done(&payload, created.status.is_terminal()) {
                return self.finish(created.status);
            }
            self.snapshot = Some(created);
            return self.after_change(events, true);
        };

        let changes = snapshot::merge(current, &payload, |from, to| {
            if from.is_terminal() && !to.is_terminal() {
                return false;
            }
            !(called && to == TicketStatus::Waiting)
        });
        current.last_updated = now;
        let status = current.status;
        let number = current.number.clone();

        let entered_terminal = changes.status_from.is_some() && status.is_terminal();
        if self.is_done(&payload, entered_terminal) {
            return self.finish(status);
        }

        if let Some(from) = changes.status_from {
            info!("Ticket {number} moved from {from} to {status}");
            events.push(TrackerEvent::StatusChanged {
                ticket_number: number,
                from,
                to: status,
            });
        }

        self.after_change(events, changes.any())
    }

    /// The server flag wins whenever it is present. Without it only an update
    /// that moved the ticket into a terminal status finishes it.
    fn is_done(&self, payload: &TicketPayload, entered_terminal: bool) -> bool {
        payload.should_show_as_done.unwrap_or(entered_terminal)
    }

    /// A call names the ticket by number, or only by id once the snapshot
    /// knows it.
    fn is_ours(&self, called: &CalledTicket) -> bool {
        if let Some(number) = &called.ticket_number {
            return *number == self.ticket_number;
        }
        called
            .ticket_id
            .is_some_and(|id| self.snapshot.as_ref().is_some_and(|s| s.id == id))
    }

    fn apply_called(&mut self, called: CalledTicket, now: DateTime<Utc>) -> Vec<TrackerEvent> {
        if !self.is_ours(&called) {
            trace!(
                "Ticket {:?} (id {:?}) called, not ours",
                called.ticket_number, called.ticket_id
            );
            return Vec::new();
        }

        info!(
            "Ticket {} called to counter {:?}",
            self.ticket_number, called.counter
        );
        self.called = true;

        if let Some(current) = self.snapshot.as_mut() {
            if !current.status.is_terminal() {
                current.status = TicketStatus::Consulting;
            }
            current.last_updated = now;
        }

        let mut events = self.after_change(Vec::new(), true);
        events.push(TrackerEvent::PatientCalled(CallNotice {
            ticket_number: self.ticket_number.clone(),
            counter: called.counter,
            priority: Priority::High,
            sticky: true,
        }));
        events
    }

    /// Snapshot-changed and proximity events for the current snapshot.
    fn after_change(&mut self, mut events: Vec<TrackerEvent>, changed: bool) -> Vec<TrackerEvent> {
        let threshold = self.proximity_threshold;
        let Some(current) = self.snapshot.as_mut() else {
            return events;
        };

        let alert = match (current.status, current.position_in_queue) {
            (TicketStatus::Waiting, Some(position)) if position <= threshold => {
                match current.last_alerted_position {
                    Some(last) if position >= last => None,
                    _ => Some(position),
                }
            }
            _ => {
                current.last_alerted_position = None;
                None
            }
        };

        if let Some(position) = alert {
            current.last_alerted_position = Some(position);
        }

        if changed || alert.is_some() {
            events.push(TrackerEvent::SnapshotChanged(current.clone()));
        }
        if let Some(position) = alert {
            info!("Ticket {} is at position {position}", current.number);
            events.push(TrackerEvent::ProximityAlert {
                ticket_number: current.number.clone(),
                position,
            });
        }
        events
    }

    fn finish(&mut self, status: TicketStatus) -> Vec<TrackerEvent> {
        let kind = if status == TicketStatus::Consulting {
            FinishKind::AutoCompleted
        } else {
            FinishKind::Normal
        };
        info!("Ticket {} finished ({kind})", self.ticket_number);

        self.snapshot = None;
        self.finished = true;
        vec![TrackerEvent::EntityFinished {
            ticket_number: self.ticket_number.clone(),
            kind,
        }]
    }
}
