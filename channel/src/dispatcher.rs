use crate::error::{protocol_error, Error, ProtocolErrorKind};
use crate::message::{ChannelEvent, Frame, FrameType, SessionStatus, Topic};
use dashmap::DashMap;
use log::*;
use std::sync::Arc;

/// Callback invoked for every event a listener is registered for.
pub type Listener = Arc<dyn Fn(&Topic, &ChannelEvent) + Send + Sync>;

/// Unique identifier for a registered listener
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ListenerId(String);

impl ListenerId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ListenerId {
    fn default() -> Self {
        Self::new()
    }
}

/// Parses inbound frames and fans them out.
///
/// Two tables, both keeping registration order:
/// - per topic: the callbacks passed to `subscribe`, run first
/// - global, keyed by event type name: cross-cutting reactions, run after
pub struct Dispatcher {
    topic_listeners: DashMap<Topic, Vec<(ListenerId, Listener)>>,
    global_listeners: DashMap<&'static str, Vec<(ListenerId, Listener)>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            topic_listeners: DashMap::new(),
            global_listeners: DashMap::new(),
        }
    }

    pub fn add_topic_listener(&self, topic: &Topic, listener: Listener) -> ListenerId {
        let id = ListenerId::new();
        self.topic_listeners
            .entry(topic.clone())
            .or_default()
            .push((id.clone(), listener));
        id
    }

    /// Remove a topic listener and return how many remain for that topic.
    pub fn remove_topic_listener(&self, topic: &Topic, id: &ListenerId) -> usize {
        let remaining = match self.topic_listeners.get_mut(topic) {
            Some(mut listeners) => {
                listeners.retain(|(listener_id, _)| listener_id != id);
                listeners.len()
            }
            None => 0,
        };

        if remaining == 0 {
            self.topic_listeners
                .remove_if(topic, |_, listeners| listeners.is_empty());
        }
        remaining
    }

    pub fn topic_listener_count(&self, topic: &Topic) -> usize {
        self.topic_listeners
            .get(topic)
            .map(|listeners| listeners.len())
            .unwrap_or(0)
    }

    /// Register a cross-cutting listener for one event type, e.g.
    /// `"patient_called"` or `message::CONNECTION_STATUS`.
    pub fn on(&self, event_type: &'static str, listener: Listener) -> ListenerId {
        let id = ListenerId::new();
        self.global_listeners
            .entry(event_type)
            .or_default()
            .push((id.clone(), listener));
        id
    }

    /// Remove a global listener. Returns whether it was registered.
    pub fn off(&self, id: &ListenerId) -> bool {
        let mut removed = false;
        for mut entry in self.global_listeners.iter_mut() {
            let before = entry.len();
            entry.retain(|(listener_id, _)| listener_id != id);
            removed |= entry.len() != before;
        }
        removed
    }

    /// Parse a raw frame and check it against the topic's taxonomy.
    pub fn parse(topic: &Topic, text: &str) -> Result<Frame, Error> {
        let frame: Frame = serde_json::from_str(text)?;
        if !topic.kind.accepts(&frame) {
            return Err(protocol_error(
                ProtocolErrorKind::UnexpectedForTopic,
                &format!("{} is not a {:?} frame", frame.frame_type(), topic.kind),
            ));
        }
        Ok(frame)
    }

    /// Parse and deliver one inbound frame. Protocol errors are logged and
    /// the frame is dropped.
    pub fn dispatch_text(&self, topic: &Topic, text: &str) {
        match Self::parse(topic, text) {
            Ok(frame) => {
                trace!("Dispatching {} on {}", frame.frame_type(), topic);
                self.dispatch(topic, &ChannelEvent::Frame(frame));
            }
            Err(e) => warn!("Dropping frame on {topic}: {e}"),
        }
    }

    pub fn notify_status(&self, topic: &Topic, status: SessionStatus) {
        self.dispatch(topic, &ChannelEvent::Status(status));
    }

    /// Topic callbacks first, then global listeners for the event's type.
    /// Listener lists are copied out so callbacks run without holding a lock
    /// and may subscribe or unsubscribe themselves.
    pub fn dispatch(&self, topic: &Topic, event: &ChannelEvent) {
        let scoped: Vec<Listener> = self
            .topic_listeners
            .get(topic)
            .map(|listeners| listeners.iter().map(|(_, l)| l.clone()).collect())
            .unwrap_or_default();

        let global: Vec<Listener> = self
            .global_listeners
            .get(event.frame_type())
            .map(|listeners| listeners.iter().map(|(_, l)| l.clone()).collect())
            .unwrap_or_default();

        for listener in scoped.iter().chain(global.iter()) {
            listener(topic, event);
        }
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::CONNECTION_STATUS;
    use std::sync::Mutex;

    fn recorder(label: &'static str, log: &Arc<Mutex<Vec<String>>>) -> Listener {
        let log = log.clone();
        Arc::new(move |_topic: &Topic, event: &ChannelEvent| {
            log.lock()
                .unwrap()
                .push(format!("{label}:{}", event.frame_type()));
        })
    }

    #[test]
    fn test_topic_callbacks_run_before_global_listeners() {
        let dispatcher = Dispatcher::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let topic = Topic::service("4");

        dispatcher.on("patient_called", recorder("global", &log));
        dispatcher.add_topic_listener(&topic, recorder("first", &log));
        dispatcher.add_topic_listener(&topic, recorder("second", &log));

        dispatcher.dispatch_text(
            &topic,
            r#"{"type":"patient_called","data":{"ticket_number":"T-1"}}"#,
        );

        assert_eq!(
            *log.lock().unwrap(),
            vec![
                "first:patient_called",
                "second:patient_called",
                "global:patient_called"
            ]
        );
    }

    #[test]
    fn test_global_listeners_only_see_their_event_type() {
        let dispatcher = Dispatcher::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let topic = Topic::ticket("T-1");

        dispatcher.on("ticket_update", recorder("updates", &log));
        dispatcher.on(CONNECTION_STATUS, recorder("status", &log));

        dispatcher.dispatch_text(&topic, r#"{"type":"pong"}"#);
        dispatcher.dispatch_text(&topic, r#"{"type":"ticket_update","data":{}}"#);
        dispatcher.notify_status(&topic, SessionStatus::Open);

        assert_eq!(
            *log.lock().unwrap(),
            vec!["updates:ticket_update", "status:connection_status"]
        );
    }

    #[test]
    fn test_malformed_and_foreign_frames_are_dropped() {
        let dispatcher = Dispatcher::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let topic = Topic::ticket("T-1");
        dispatcher.add_topic_listener(&topic, recorder("ticket", &log));

        dispatcher.dispatch_text(&topic, "not json");
        dispatcher.dispatch_text(&topic, r#"{"type":"brand_new_type"}"#);
        dispatcher.dispatch_text(&topic, r#"{"type":"emergency_alert","data":{}}"#);

        assert!(log.lock().unwrap().is_empty());

        let err = Dispatcher::parse(&topic, r#"{"type":"emergency_alert"}"#).unwrap_err();
        assert_eq!(
            err.error_kind,
            crate::error::ChannelErrorKind::Protocol(ProtocolErrorKind::UnexpectedForTopic)
        );
    }

    #[test]
    fn test_remove_topic_listener_reports_remaining() {
        let dispatcher = Dispatcher::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let topic = Topic::ticket("T-1");

        let first = dispatcher.add_topic_listener(&topic, recorder("a", &log));
        let second = dispatcher.add_topic_listener(&topic, recorder("b", &log));

        assert_eq!(dispatcher.remove_topic_listener(&topic, &first), 1);
        assert_eq!(dispatcher.remove_topic_listener(&topic, &second), 0);
        assert_eq!(dispatcher.topic_listener_count(&topic), 0);
    }

    #[test]
    fn test_off_removes_global_listener() {
        let dispatcher = Dispatcher::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let topic = Topic::ticket("T-1");

        let id = dispatcher.on("pong", recorder("pong", &log));
        assert!(dispatcher.off(&id));
        assert!(!dispatcher.off(&id));

        dispatcher.dispatch_text(&topic, r#"{"type":"pong"}"#);
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn test_listener_may_unsubscribe_itself_during_dispatch() {
        let dispatcher = Arc::new(Dispatcher::new());
        let topic = Topic::ticket("T-1");
        let slot: Arc<Mutex<Option<ListenerId>>> = Arc::new(Mutex::new(None));

        let (d, t, s) = (dispatcher.clone(), topic.clone(), slot.clone());
        let id = dispatcher.add_topic_listener(
            &topic,
            Arc::new(move |_: &Topic, _: &ChannelEvent| {
                if let Some(id) = s.lock().unwrap().take() {
                    d.remove_topic_listener(&t, &id);
                }
            }),
        );
        *slot.lock().unwrap() = Some(id);

        dispatcher.dispatch_text(&topic, r#"{"type":"pong"}"#);
        assert_eq!(dispatcher.topic_listener_count(&topic), 0);
    }
}
