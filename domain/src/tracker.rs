//! Tracks one ticket: owns its reconciler, subscribes to the ticket topic and
//! the owning service topic, runs the refresh cycle and publishes the
//! resulting events.
//!
//! Everything funnels into a single task. Channel callbacks only forward into
//! the task's queue, and a pull is awaited inside the task, so frames that
//! arrive meanwhile are applied afterwards in arrival order.

use crate::error::{DomainErrorKind, Error, InternalErrorKind};
use crate::gateway::queue_api::TicketSource;
use crate::reconciler::{Reconciler, Update};
use channel::clock::Scheduler;
use channel::message::{ChannelEvent, Frame, SessionStatus, Topic, TopicKind};
use channel::{Manager, SubscriptionHandle};
use events::{EventPublisher, TicketSnapshot, TrackerEvent};
use futures::future::BoxFuture;
use log::*;
use service::config::Config;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

#[derive(Debug, Clone, PartialEq)]
pub struct TrackerConfig {
    pub refresh_interval: Duration,
    /// Positions at or below this raise a proximity alert while waiting.
    pub proximity_threshold: u32,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_secs(30),
            proximity_threshold: 3,
        }
    }
}

impl From<&Config> for TrackerConfig {
    fn from(config: &Config) -> Self {
        Self {
            refresh_interval: config.refresh_interval(),
            proximity_threshold: config.proximity_threshold,
        }
    }
}

#[derive(Debug)]
enum Input {
    Channel(Topic, ChannelEvent),
    Visible(bool),
    RefreshNow,
    Stop,
}

/// Handle on a running tracker task.
pub struct TrackerHandle {
    ticket_number: String,
    inputs: mpsc::UnboundedSender<Input>,
    snapshot: watch::Receiver<Option<TicketSnapshot>>,
    task: JoinHandle<()>,
}

impl TrackerHandle {
    pub fn ticket_number(&self) -> &str {
        &self.ticket_number
    }

    /// Latest reconciled snapshot. `None` before the first record arrives and
    /// after the ticket finished.
    pub fn snapshot(&self) -> Option<TicketSnapshot> {
        self.snapshot.borrow().clone()
    }

    /// Pause the refresh cycle while the view is hidden. Becoming visible
    /// again refreshes immediately and resumes the cycle.
    pub fn set_visible(&self, visible: bool) -> Result<(), Error> {
        self.send(Input::Visible(visible))
    }

    pub fn refresh_now(&self) -> Result<(), Error> {
        self.send(Input::RefreshNow)
    }

    /// Stop tracking and release the tracker's subscriptions.
    pub fn stop(&self) -> Result<(), Error> {
        self.send(Input::Stop)
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Wait until the task ends, either because the ticket finished or
    /// because `stop` was called.
    pub async fn finished(&mut self) {
        if let Err(e) = (&mut self.task).await {
            warn!("Tracker task for {} ended abnormally: {e}", self.ticket_number);
        }
    }

    fn send(&self, input: Input) -> Result<(), Error> {
        self.inputs.send(input).map_err(|_| Error {
            source: None,
            error_kind: DomainErrorKind::Internal(InternalErrorKind::TaskStopped),
        })
    }
}

pub struct Tracker {
    reconciler: Reconciler,
    config: TrackerConfig,
    manager: Arc<Manager>,
    source: Arc<dyn TicketSource>,
    publisher: EventPublisher,
    scheduler: Arc<dyn Scheduler>,
    inputs_tx: mpsc::UnboundedSender<Input>,
    inputs: mpsc::UnboundedReceiver<Input>,
    snapshot_tx: watch::Sender<Option<TicketSnapshot>>,
    ticket_topic: Topic,
    subscriptions: Vec<SubscriptionHandle>,
    service_topic: Option<Topic>,
    visible: bool,
    ticker: Option<BoxFuture<'static, ()>>,
    ticket_connected: bool,
    /// Owned topics whose session gave up. Cleared when a fresh session on
    /// the topic reports in.
    failed_topics: HashSet<Topic>,
    connection: Option<(bool, bool)>,
}

impl Tracker {
    /// Start tracking `ticket_number`. Must be called within a tokio runtime.
    pub fn spawn(
        ticket_number: impl Into<String>,
        config: TrackerConfig,
        manager: Arc<Manager>,
        source: Arc<dyn TicketSource>,
        publisher: EventPublisher,
    ) -> TrackerHandle {
        let ticket_number = ticket_number.into();
        let (inputs_tx, inputs) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot) = watch::channel(None);

        let tracker = Tracker {
            reconciler: Reconciler::new(ticket_number.clone(), config.proximity_threshold),
            config,
            scheduler: manager.scheduler(),
            manager,
            source,
            publisher,
            inputs_tx: inputs_tx.clone(),
            inputs,
            snapshot_tx,
            ticket_topic: Topic::ticket(ticket_number.clone()),
            subscriptions: Vec::new(),
            service_topic: None,
            visible: true,
            ticker: None,
            ticket_connected: false,
            failed_topics: HashSet::new(),
            connection: None,
        };

        info!("Starting tracker for ticket {ticket_number}");
        let task = tokio::spawn(tracker.run());

        TrackerHandle {
            ticket_number,
            inputs: inputs_tx,
            snapshot,
            task,
        }
    }

    async fn run(mut self) {
        let ticket_topic = self.ticket_topic.clone();
        self.subscribe(ticket_topic);

        self.refresh().await;
        self.restart_ticker();

        while !self.reconciler.is_finished() {
            tokio::select! {
                _ = next_tick(&mut self.ticker) => {
                    self.refresh().await;
                    self.restart_ticker();
                }
                input = self.inputs.recv() => match input {
                    Some(Input::Stop) | None => {
                        info!("Tracker for {} stopped", self.reconciler.ticket_number());
                        break;
                    }
                    Some(input) => self.handle(input).await,
                },
            }
        }

        self.ticker = None;
        for handle in self.subscriptions.drain(..) {
            self.manager.unsubscribe(&handle);
        }
        debug!("Tracker for {} released its topics", self.reconciler.ticket_number());
    }

    async fn handle(&mut self, input: Input) {
        match input {
            Input::Channel(topic, ChannelEvent::Status(status)) => {
                self.connection_changed(&topic, status).await
            }
            Input::Channel(topic, ChannelEvent::Frame(frame)) => {
                self.frame_received(&topic, frame).await
            }
            Input::Visible(visible) => {
                let was_visible = std::mem::replace(&mut self.visible, visible);
                if visible && !was_visible {
                    debug!("View visible again, refreshing now");
                    self.refresh().await;
                    self.restart_ticker();
                } else if !visible {
                    debug!("View hidden, pausing refresh");
                    self.ticker = None;
                }
            }
            Input::RefreshNow => {
                self.refresh().await;
                self.restart_ticker();
            }
            Input::Stop => {}
        }
    }

    async fn frame_received(&mut self, topic: &Topic, frame: Frame) {
        let update = match (topic.kind, frame) {
            (TopicKind::Ticket, Frame::InitialTicketState { data }) => Update::Full(data),
            (TopicKind::Ticket, Frame::TicketUpdate { data }) => Update::Partial(data),
            (TopicKind::Service, Frame::PatientCalled { data }) => Update::Called(data),
            (TopicKind::Service, Frame::QueueUpdate { .. }) => {
                // The queue moved; our position probably did too.
                self.refresh().await;
                return;
            }
            (_, frame) => {
                trace!("Nothing to reconcile in {frame:?} on {topic}");
                return;
            }
        };
        self.apply(update).await;
    }

    /// Publishes the ticket topic's liveness, or `failed` while any owned
    /// topic is in `Failed`.
    async fn connection_changed(&mut self, topic: &Topic, status: SessionStatus) {
        let relevant = match status {
            SessionStatus::Failed => {
                warn!("Gave up reconnecting {topic}");
                self.failed_topics.insert(topic.clone());
                if *topic == self.ticket_topic {
                    self.ticket_connected = false;
                }
                true
            }
            _ => {
                let recovered = self.failed_topics.remove(topic);
                match status {
                    SessionStatus::Open | SessionStatus::Closed if *topic == self.ticket_topic => {
                        self.ticket_connected = status == SessionStatus::Open;
                        true
                    }
                    _ => recovered,
                }
            }
        };
        if !relevant {
            return;
        }

        let state = if self.failed_topics.is_empty() {
            (self.ticket_connected, false)
        } else {
            (false, true)
        };
        if self.connection == Some(state) {
            return;
        }
        self.connection = Some(state);
        let (connected, failed) = state;
        self.publisher
            .publish(TrackerEvent::ConnectionChanged { connected, failed })
            .await;
    }

    async fn refresh(&mut self) {
        let ticket_number = self.reconciler.ticket_number().to_string();
        let update = match self.source.fetch_ticket(&ticket_number).await {
            Ok(record) => Update::Full(record),
            Err(e) => {
                warn!("Refresh of {ticket_number} failed, keeping last snapshot: {e}");
                Update::PullFailed
            }
        };
        self.apply(update).await;
    }

    async fn apply(&mut self, update: Update) {
        let events = self.reconciler.apply(update, self.scheduler.now());
        self.snapshot_tx
            .send_replace(self.reconciler.snapshot().cloned());
        self.follow_service();
        self.publisher.publish_all(events).await;

        if self.reconciler.is_finished() {
            self.ticker = None;
        }
    }

    /// Subscribe to the owning service topic once the snapshot names it.
    fn follow_service(&mut self) {
        if self.service_topic.is_some() {
            return;
        }
        let Some(service_id) = self
            .reconciler
            .snapshot()
            .map(|s| s.service_id)
            .filter(|id| *id > 0)
        else {
            return;
        };

        let topic = Topic::service(service_id.to_string());
        self.service_topic = Some(topic.clone());
        self.subscribe(topic);
    }

    fn subscribe(&mut self, topic: Topic) {
        let inputs = self.inputs_tx.clone();
        let handle = self.manager.subscribe(
            topic,
            Arc::new(move |topic: &Topic, event: &ChannelEvent| {
                let _ = inputs.send(Input::Channel(topic.clone(), event.clone()));
            }),
        );
        self.subscriptions.push(handle);
    }

    fn restart_ticker(&mut self) {
        self.ticker = if self.visible && !self.reconciler.is_finished() {
            Some(self.scheduler.sleep(self.config.refresh_interval))
        } else {
            None
        };
    }
}

async fn next_tick(ticker: &mut Option<BoxFuture<'static, ()>>) {
    match ticker {
        Some(tick) => tick.await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PullErrorKind;
    use async_trait::async_trait;
    use channel::clock::TokioScheduler;
    use channel::message::TicketPayload;
    use channel::mock::MockConnector;
    use channel::ChannelConfig;
    use events::{EventHandler, FinishKind, TicketStatus};
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Serves scripted pull responses; repeats the last one when the script
    /// runs out.
    #[derive(Default)]
    struct ScriptedSource {
        responses: Mutex<VecDeque<serde_json::Value>>,
        calls: Mutex<usize>,
    }

    impl ScriptedSource {
        fn new(responses: Vec<serde_json::Value>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                calls: Mutex::new(0),
            })
        }

        fn calls(&self) -> usize {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl TicketSource for ScriptedSource {
        async fn fetch_ticket(&self, _ticket_number: &str) -> Result<TicketPayload, Error> {
            *self.calls.lock().unwrap() += 1;
            let response = {
                let mut responses = self.responses.lock().unwrap();
                if responses.len() > 1 {
                    responses.pop_front()
                } else {
                    responses.front().cloned()
                }
            };
            match response {
                Some(serde_json::Value::Null) | None => Err(Error {
                    source: None,
                    error_kind: DomainErrorKind::Pull(PullErrorKind::Network),
                }),
                Some(value) => Ok(serde_json::from_value(value)?),
            }
        }
    }

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<TrackerEvent>>,
    }

    #[async_trait]
    impl EventHandler for Recorder {
        async fn handle(&self, event: &TrackerEvent) {
            self.events.lock().unwrap().push(event.clone());
        }
    }

    impl Recorder {
        fn take(&self) -> Vec<TrackerEvent> {
            std::mem::take(&mut *self.events.lock().unwrap())
        }
    }

    fn record(status: &str, position: Option<u32>) -> serde_json::Value {
        json!({
            "id": 42,
            "ticket_number": "T-2025-001",
            "status": status,
            "position_in_queue": position,
            "estimated_wait_time": 20,
            "service_id": 3,
            "service_name": "General Consultation",
            "created_at": "2025-01-10T08:30:00Z",
            "should_show_as_done": false
        })
    }

    struct Harness {
        connector: MockConnector,
        manager: Arc<Manager>,
        recorder: Arc<Recorder>,
    }

    impl Harness {
        fn new() -> Self {
            let connector = MockConnector::new();
            let manager = Arc::new(Manager::with_parts(
                ChannelConfig::default(),
                Arc::new(connector.clone()),
                Arc::new(TokioScheduler),
            ));
            Self {
                connector,
                manager,
                recorder: Arc::new(Recorder::default()),
            }
        }

        fn track(&self, source: Arc<ScriptedSource>) -> TrackerHandle {
            Tracker::spawn(
                "T-2025-001",
                TrackerConfig::default(),
                self.manager.clone(),
                source,
                EventPublisher::new().with_handler(self.recorder.clone()),
            )
        }
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticket_lifecycle_from_waiting_to_finished() {
        let harness = Harness::new();
        let source = ScriptedSource::new(vec![
            record("waiting", Some(4)),
            json!({
                "id": 42,
                "ticket_number": "T-2025-001",
                "status": "completed",
                "position_in_queue": null,
                "should_show_as_done": true
            }),
        ]);
        let tracker = harness.track(source.clone());
        settle().await;

        let snapshot = tracker.snapshot().unwrap();
        assert_eq!(snapshot.status, TicketStatus::Waiting);
        assert_eq!(snapshot.position_in_queue, Some(4));
        assert_eq!(
            harness.connector.peer(0).unwrap().endpoint,
            "ws://localhost:8000/ws/ticket/T-2025-001"
        );
        assert_eq!(
            harness.connector.peer(1).unwrap().endpoint,
            "ws://localhost:8000/ws/service/3"
        );
        harness.recorder.take();

        let ticket = harness.connector.peer(0).unwrap();
        ticket.send_json(json!({"type": "ticket_update", "data": {"position_in_queue": 3}}));
        ticket.send_json(json!({"type": "ticket_update", "data": {"position_in_queue": 3}}));
        settle().await;
        let alerts: Vec<_> = harness
            .recorder
            .take()
            .into_iter()
            .filter(|e| matches!(e, TrackerEvent::ProximityAlert { .. }))
            .collect();
        assert_eq!(
            alerts,
            vec![TrackerEvent::ProximityAlert {
                ticket_number: "T-2025-001".to_string(),
                position: 3
            }]
        );

        ticket.send_json(json!({"type": "ticket_update", "data": {"status": "consulting"}}));
        settle().await;
        assert_eq!(tracker.snapshot().unwrap().status, TicketStatus::Consulting);

        tokio::time::sleep(Duration::from_secs(31)).await;
        let finished: Vec<_> = harness
            .recorder
            .take()
            .into_iter()
            .filter_map(|e| match e {
                TrackerEvent::EntityFinished { kind, .. } => Some(kind),
                _ => None,
            })
            .collect();
        assert_eq!(finished, vec![FinishKind::Normal]);
        assert!(tracker.snapshot().is_none());

        // Refresh cycle stopped and topics released.
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(source.calls(), 2);
        assert!(!tracker.is_running());
        assert_eq!(harness.manager.connection_status().active_topics, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_patient_called_on_service_topic() {
        let harness = Harness::new();
        let source = ScriptedSource::new(vec![record("waiting", Some(2))]);
        let tracker = harness.track(source);
        settle().await;
        harness.recorder.take();

        harness.connector.peer(1).unwrap().send_json(json!({
            "type": "patient_called",
            "data": {"ticket_id": 42, "ticket_number": "T-2025-001", "counter": "Desk 4"}
        }));
        settle().await;

        let events = harness.recorder.take();
        assert!(events.iter().any(|e| matches!(
            e,
            TrackerEvent::PatientCalled(notice) if notice.sticky && notice.counter.as_deref() == Some("Desk 4")
        )));
        assert_eq!(tracker.snapshot().unwrap().status, TicketStatus::Consulting);

        // The next pull still says waiting; the call is not undone.
        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(tracker.snapshot().unwrap().status, TicketStatus::Consulting);
        tracker.stop().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_pauses_while_hidden() {
        let harness = Harness::new();
        let source = ScriptedSource::new(vec![record("waiting", Some(8))]);
        let tracker = harness.track(source.clone());
        settle().await;
        assert_eq!(source.calls(), 1);

        tokio::time::sleep(Duration::from_secs(30)).await;
        settle().await;
        assert_eq!(source.calls(), 2);

        tracker.set_visible(false).unwrap();
        tokio::time::sleep(Duration::from_secs(300)).await;
        assert_eq!(source.calls(), 2);

        tracker.set_visible(true).unwrap();
        settle().await;
        assert_eq!(source.calls(), 3);

        tokio::time::sleep(Duration::from_secs(30)).await;
        settle().await;
        assert_eq!(source.calls(), 4);
        tracker.stop().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_pull_failure_reports_stale() {
        let harness = Harness::new();
        let source = ScriptedSource::new(vec![record("waiting", Some(6)), json!(null)]);
        let tracker = harness.track(source);
        settle().await;
        let last_updated = tracker.snapshot().unwrap().last_updated;

        tracker.refresh_now().unwrap();
        settle().await;

        assert!(harness
            .recorder
            .take()
            .contains(&TrackerEvent::Stale { last_updated: Some(last_updated) }));
        assert_eq!(tracker.snapshot().unwrap().position_in_queue, Some(6));
        tracker.stop().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_releases_topics() {
        let harness = Harness::new();
        let mut tracker = harness.track(ScriptedSource::new(vec![record("waiting", Some(5))]));
        settle().await;
        assert_eq!(harness.manager.connection_status().active_topics, 2);

        tracker.stop().unwrap();
        tracker.finished().await;
        assert_eq!(harness.manager.connection_status().active_topics, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connection_changes_are_published_once() {
        let harness = Harness::new();
        let tracker = harness.track(ScriptedSource::new(vec![record("waiting", Some(5))]));
        settle().await;

        let changes: Vec<_> = harness
            .recorder
            .take()
            .into_iter()
            .filter(|e| matches!(e, TrackerEvent::ConnectionChanged { .. }))
            .collect();
        assert_eq!(
            changes,
            vec![TrackerEvent::ConnectionChanged { connected: true, failed: false }]
        );

        harness.connector.peer(0).unwrap().close();
        settle().await;
        assert!(harness
            .recorder
            .take()
            .contains(&TrackerEvent::ConnectionChanged { connected: false, failed: false }));
        tracker.stop().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_patient_called_by_ticket_id() {
        let harness = Harness::new();
        let tracker = harness.track(ScriptedSource::new(vec![record("waiting", Some(2))]));
        settle().await;
        harness.recorder.take();

        harness.connector.peer(1).unwrap().send_json(json!({
            "type": "patient_called",
            "data": {"ticket_id": 42, "service_id": 3, "counter": "Desk 4"}
        }));
        settle().await;

        assert!(harness
            .recorder
            .take()
            .iter()
            .any(|e| matches!(e, TrackerEvent::PatientCalled(_))));
        assert_eq!(tracker.snapshot().unwrap().status, TicketStatus::Consulting);
        tracker.stop().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_service_topic_stays_reported_until_resubscribed() {
        let harness = Harness::new();
        let tracker = harness.track(ScriptedSource::new(vec![record("waiting", Some(5))]));
        settle().await;
        harness.recorder.take();

        harness.connector.refuse_connections(true);
        harness.connector.peer(1).unwrap().close();
        tokio::time::sleep(Duration::from_secs(40)).await;
        settle().await;
        assert_eq!(
            harness.manager.session_status(&Topic::service("3")),
            Some(SessionStatus::Failed)
        );

        // The ticket topic drops and comes back; the service topic is still dead.
        harness.connector.refuse_connections(false);
        harness.connector.peer(0).unwrap().close();
        tokio::time::sleep(Duration::from_secs(5)).await;
        settle().await;

        let changes: Vec<_> = harness
            .recorder
            .take()
            .into_iter()
            .filter(|e| matches!(e, TrackerEvent::ConnectionChanged { .. }))
            .collect();
        assert_eq!(
            changes,
            vec![TrackerEvent::ConnectionChanged { connected: false, failed: true }]
        );

        let again = harness
            .manager
            .subscribe(Topic::service("3"), Arc::new(|_: &Topic, _: &ChannelEvent| {}));
        settle().await;
        assert!(harness
            .recorder
            .take()
            .contains(&TrackerEvent::ConnectionChanged { connected: true, failed: false }));

        harness.manager.unsubscribe(&again);
        tracker.stop().unwrap();
    }
}
