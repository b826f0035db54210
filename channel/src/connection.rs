use crate::dispatcher::{Dispatcher, Listener, ListenerId};
use crate::message::{SessionStatus, Topic};
use crate::session::{SessionContext, SessionHandle};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use log::*;
use std::sync::Arc;

/// Identifies one `subscribe` call; pass it back to `unsubscribe`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    pub topic: Topic,
    pub listener_id: ListenerId,
}

/// Aggregate view over every live session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConnectionStatus {
    /// At least one session is open.
    pub connected: bool,
    pub active_topics: usize,
    /// Sum of the current retry counts of all sessions.
    pub retry_attempts: u32,
}

/// Topic registry with two tables sharing the topic key:
/// - sessions: exactly one live session per topic identity
/// - listeners: held by the dispatcher, one ordered list per topic
///
/// Subscribe and unsubscribe for a topic are serialized on the session
/// table's entry lock, so a session is never spawned twice or closed while a
/// listener is being attached.
pub struct ConnectionRegistry {
    sessions: DashMap<Topic, SessionHandle>,
    dispatcher: Arc<Dispatcher>,
    context: SessionContext,
}

impl ConnectionRegistry {
    pub(crate) fn new(context: SessionContext) -> Self {
        Self {
            sessions: DashMap::new(),
            dispatcher: context.dispatcher.clone(),
            context,
        }
    }

    /// Attach `listener` to `topic`, spawning the topic's session if needed.
    /// A session that has given up is replaced by a fresh one.
    pub fn subscribe(&self, topic: Topic, listener: Listener) -> SubscriptionHandle {
        let listener_id = self.dispatcher.add_topic_listener(&topic, listener);

        match self.sessions.entry(topic.clone()) {
            Entry::Occupied(mut entry) => {
                if entry.get().status() == SessionStatus::Failed {
                    info!("Restarting failed session for {topic}");
                    let fresh = SessionHandle::spawn(topic.clone(), self.context.clone());
                    entry.insert(fresh).close();
                } else {
                    debug!("Attached listener to existing session for {topic}");
                }
            }
            Entry::Vacant(entry) => {
                info!("Opening session for {topic}");
                entry.insert(SessionHandle::spawn(topic.clone(), self.context.clone()));
            }
        }

        SubscriptionHandle { topic, listener_id }
    }

    /// Detach a listener. The topic's session is closed once no listener is
    /// left. Returns whether the session was closed.
    pub fn unsubscribe(&self, handle: &SubscriptionHandle) -> bool {
        let Entry::Occupied(entry) = self.sessions.entry(handle.topic.clone()) else {
            self.dispatcher
                .remove_topic_listener(&handle.topic, &handle.listener_id);
            return false;
        };

        let remaining = self
            .dispatcher
            .remove_topic_listener(&handle.topic, &handle.listener_id);
        if remaining > 0 {
            debug!("{remaining} listener(s) left on {}", handle.topic);
            return false;
        }

        info!("Last listener left {}, closing session", handle.topic);
        entry.remove().close();
        true
    }

    pub fn on(&self, event_type: &'static str, listener: Listener) -> ListenerId {
        self.dispatcher.on(event_type, listener)
    }

    pub fn off(&self, id: &ListenerId) -> bool {
        self.dispatcher.off(id)
    }

    pub fn status(&self) -> ConnectionStatus {
        let mut status = ConnectionStatus::default();
        for session in self.sessions.iter() {
            status.active_topics += 1;
            status.connected |= session.status() == SessionStatus::Open;
            status.retry_attempts += session.retry_count();
        }
        status
    }

    pub fn session_status(&self, topic: &Topic) -> Option<SessionStatus> {
        self.sessions.get(topic).map(|session| session.status())
    }

    /// Close every session. Listener registrations are left in place.
    pub fn shutdown(&self) {
        let topics: Vec<Topic> = self.sessions.iter().map(|s| s.key().clone()).collect();
        for topic in topics {
            if let Some((_, session)) = self.sessions.remove(&topic) {
                session.close();
            }
        }
        info!("All sessions closed");
    }
}
