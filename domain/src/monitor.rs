//! Watches a service queue or the admin dashboard and republishes its state.

use crate::error::{DomainErrorKind, Error, InternalErrorKind};
use channel::message::{ChannelEvent, Frame, SessionStatus, Topic};
use channel::Manager;
use events::{EventPublisher, TrackerEvent};
use log::*;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// Latest known state of one queue topic.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueState {
    topic: Topic,
    state: Value,
    connection: Option<(bool, bool)>,
}

impl QueueState {
    pub fn new(topic: Topic) -> Self {
        Self {
            topic,
            state: Value::Null,
            connection: None,
        }
    }

    pub fn state(&self) -> &Value {
        &self.state
    }

    /// Apply one channel event. `initial_*` frames replace the state,
    /// `queue_update` merges its top-level keys into it.
    pub fn apply(&mut self, event: ChannelEvent) -> Vec<TrackerEvent> {
        match event {
            ChannelEvent::Frame(frame) => self.apply_frame(frame),
            ChannelEvent::Status(status) => self.apply_status(status),
        }
    }

    fn apply_frame(&mut self, frame: Frame) -> Vec<TrackerEvent> {
        let changed = match frame {
            Frame::InitialQueueState { data } | Frame::InitialDashboardState { data } => {
                let changed = self.state != data;
                self.state = data;
                changed
            }
            Frame::QueueUpdate { data } => merge(&mut self.state, data),
            Frame::EmergencyAlert { data } => {
                warn!("Emergency alert on {}", self.topic);
                return vec![TrackerEvent::EmergencyAlert {
                    topic: self.topic.to_string(),
                    payload: data,
                }];
            }
            other => {
                trace!("Ignoring {other:?} on {}", self.topic);
                false
            }
        };

        if !changed {
            return Vec::new();
        }
        vec![TrackerEvent::QueueChanged {
            topic: self.topic.to_string(),
            state: self.state.clone(),
        }]
    }

    fn apply_status(&mut self, status: SessionStatus) -> Vec<TrackerEvent> {
        let state = match status {
            SessionStatus::Open => (true, false),
            SessionStatus::Closed => (false, false),
            SessionStatus::Failed => (false, true),
            SessionStatus::Idle | SessionStatus::Connecting => return Vec::new(),
        };
        if self.connection.replace(state) == Some(state) {
            return Vec::new();
        }
        let (connected, failed) = state;
        vec![TrackerEvent::ConnectionChanged { connected, failed }]
    }
}

/// Merge `update` into `state` key by key. Non-object values replace the
/// state outright. Returns whether anything changed.
fn merge(state: &mut Value, update: Value) -> bool {
    match (state, update) {
        (Value::Object(current), Value::Object(update)) => {
            let mut changed = false;
            for (key, value) in update {
                if current.get(&key) != Some(&value) {
                    current.insert(key, value);
                    changed = true;
                }
            }
            changed
        }
        (state, update) => {
            if *state == update {
                return false;
            }
            *state = update;
            true
        }
    }
}

pub struct MonitorHandle {
    topic: Topic,
    stop: mpsc::UnboundedSender<()>,
    state: watch::Receiver<Value>,
    task: JoinHandle<()>,
}

impl MonitorHandle {
    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    pub fn state(&self) -> Value {
        self.state.borrow().clone()
    }

    pub fn stop(&self) -> Result<(), Error> {
        self.stop.send(()).map_err(|_| Error {
            source: None,
            error_kind: DomainErrorKind::Internal(InternalErrorKind::TaskStopped),
        })
    }

    pub async fn finished(&mut self) {
        if let Err(e) = (&mut self.task).await {
            warn!("Monitor for {} ended abnormally: {e}", self.topic);
        }
    }
}

pub struct QueueMonitor;

impl QueueMonitor {
    /// Subscribe to `topic` and publish its state until stopped.
    pub fn spawn(topic: Topic, manager: Arc<Manager>, publisher: EventPublisher) -> MonitorHandle {
        let (events_tx, mut events) = mpsc::unbounded_channel::<ChannelEvent>();
        let (stop_tx, mut stop) = mpsc::unbounded_channel::<()>();
        let (state_tx, state) = watch::channel(Value::Null);

        let subscription = manager.subscribe(
            topic.clone(),
            Arc::new(move |_: &Topic, event: &ChannelEvent| {
                let _ = events_tx.send(event.clone());
            }),
        );

        let mut queue = QueueState::new(topic.clone());
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = stop.recv() => break,
                    event = events.recv() => {
                        let Some(event) = event else { break };
                        let updates = queue.apply(event);
                        state_tx.send_replace(queue.state().clone());
                        publisher.publish_all(updates).await;
                    }
                }
            }
            manager.unsubscribe(&subscription);
            info!("Stopped watching {}", subscription.topic);
        });

        MonitorHandle {
            topic,
            stop: stop_tx,
            state,
            task,
        }
    }
}
