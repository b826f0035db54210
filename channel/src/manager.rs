use crate::clock::{Scheduler, TokioScheduler};
use crate::config::ChannelConfig;
use crate::connection::{ConnectionRegistry, ConnectionStatus, SubscriptionHandle};
use crate::dispatcher::{Dispatcher, Listener, ListenerId};
use crate::message::{SessionStatus, Topic};
use crate::session::SessionContext;
use crate::transport::{Connector, WsConnector};
use log::*;
use std::sync::Arc;

/// Entry point for everything that talks to the push service. One explicit
/// instance per process, shared behind an `Arc`.
pub struct Manager {
    registry: ConnectionRegistry,
    scheduler: Arc<dyn Scheduler>,
}

impl Manager {
    /// A manager that opens real WebSocket connections.
    pub fn new(config: ChannelConfig) -> Self {
        let connector = Arc::new(WsConnector::new(config.connect_timeout));
        Self::with_parts(config, connector, Arc::new(TokioScheduler))
    }

    pub fn with_parts(
        config: ChannelConfig,
        connector: Arc<dyn Connector>,
        scheduler: Arc<dyn Scheduler>,
    ) -> Self {
        let context = SessionContext {
            dispatcher: Arc::new(Dispatcher::new()),
            connector,
            scheduler: scheduler.clone(),
            base_url: config.base_url,
            keep_alive_interval: config.keep_alive_interval,
            reconnect: config.reconnect,
        };

        Self {
            registry: ConnectionRegistry::new(context),
            scheduler,
        }
    }

    pub fn subscribe(&self, topic: Topic, on_event: Listener) -> SubscriptionHandle {
        let handle = self.registry.subscribe(topic, on_event);
        info!("Subscribed to {}", handle.topic);
        handle
    }

    pub fn unsubscribe(&self, handle: &SubscriptionHandle) {
        info!("Unsubscribing from {}", handle.topic);
        self.registry.unsubscribe(handle);
    }

    /// Register a listener for every event named `event_type` on any topic.
    pub fn on(&self, event_type: &'static str, listener: Listener) -> ListenerId {
        self.registry.on(event_type, listener)
    }

    pub fn off(&self, id: &ListenerId) -> bool {
        self.registry.off(id)
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        self.registry.status()
    }

    pub fn session_status(&self, topic: &Topic) -> Option<SessionStatus> {
        self.registry.session_status(topic)
    }

    /// The timer capability sessions use, shared with higher layers so that
    /// refresh cycles run on the same clock.
    pub fn scheduler(&self) -> Arc<dyn Scheduler> {
        self.scheduler.clone()
    }

    pub fn shutdown(&self) {
        info!("Shutting down push channel");
        self.registry.shutdown();
    }
}

impl Default for Manager {
    fn default() -> Self {
        Self::new(ChannelConfig::default())
    }
}
