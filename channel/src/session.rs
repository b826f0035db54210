//! One physical connection per topic, wrapped by the reconnection supervisor.
//!
//! ```text
//! Idle -> Connecting -> Open -> Closed -> (backoff) -> Connecting -> ...
//!                                  \-> Failed   (budget exhausted, terminal)
//! ```
//!
//! The keep-alive ticker only sends pings. A missing pong never forces a
//! reconnect: failure detection relies on the transport's own close or error
//! signal.

use crate::clock::Scheduler;
use crate::dispatcher::Dispatcher;
use crate::message::{Outbound, SessionStatus, Topic};
use crate::supervisor::{ReconnectPolicy, Supervisor};
use crate::transport::{Connector, Link};
use futures::{SinkExt, StreamExt};
use log::*;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;

/// Everything a session needs besides its topic.
#[derive(Clone)]
pub(crate) struct SessionContext {
    pub(crate) dispatcher: Arc<Dispatcher>,
    pub(crate) connector: Arc<dyn Connector>,
    pub(crate) scheduler: Arc<dyn Scheduler>,
    pub(crate) base_url: String,
    pub(crate) keep_alive_interval: Duration,
    pub(crate) reconnect: ReconnectPolicy,
}

/// Observable state shared between the session task and its handle.
#[derive(Debug)]
pub struct SessionState {
    status: Mutex<SessionStatus>,
    retry_count: AtomicU32,
}

impl SessionState {
    fn new() -> Self {
        Self {
            status: Mutex::new(SessionStatus::Idle),
            retry_count: AtomicU32::new(0),
        }
    }

    pub fn status(&self) -> SessionStatus {
        *self.status.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count.load(Ordering::SeqCst)
    }

    fn set_status(&self, status: SessionStatus) {
        *self.status.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = status;
    }
}

/// Owner's handle on a running session task.
pub struct SessionHandle {
    topic: Topic,
    state: Arc<SessionState>,
    task: JoinHandle<()>,
}

impl SessionHandle {
    /// Spawn the session task. Must be called within a tokio runtime.
    pub(crate) fn spawn(topic: Topic, ctx: SessionContext) -> Self {
        let state = Arc::new(SessionState::new());
        let session = Session {
            endpoint: topic.endpoint(&ctx.base_url),
            topic: topic.clone(),
            state: state.clone(),
            supervisor: Supervisor::new(ctx.reconnect),
            ctx,
        };

        debug!("Spawning session for {topic}");
        let task = tokio::spawn(session.run());

        Self { topic, state, task }
    }

    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    pub fn status(&self) -> SessionStatus {
        self.state.status()
    }

    pub fn retry_count(&self) -> u32 {
        self.state.retry_count()
    }

    /// Stop the session now. The task is cancelled at its current suspension
    /// point, which drops the connection along with the keep-alive ticker and
    /// any pending reconnection timer. No status event follows.
    pub fn close(self) {
        self.task.abort();
        self.state.set_status(SessionStatus::Closed);
        debug!("Closed session for {}", self.topic);
    }
}

struct Session {
    topic: Topic,
    endpoint: String,
    state: Arc<SessionState>,
    supervisor: Supervisor,
    ctx: SessionContext,
}

impl Session {
    async fn run(mut self) {
        loop {
            self.transition(SessionStatus::Connecting);

            match self.ctx.connector.connect(&self.endpoint).await {
                Ok(link) => {
                    self.supervisor.reset();
                    self.state.retry_count.store(0, Ordering::SeqCst);
                    info!("Connected to {}", self.endpoint);
                    self.transition(SessionStatus::Open);

                    self.pump(link).await;

                    self.transition(SessionStatus::Closed);
                }
                Err(e) => {
                    warn!("Connection to {} failed: {e}", self.endpoint);
                    self.transition(SessionStatus::Closed);
                }
            }

            match self.supervisor.next_delay() {
                Some(delay) => {
                    let attempt = self.supervisor.attempts();
                    self.state.retry_count.store(attempt, Ordering::SeqCst);
                    info!(
                        "Reconnecting to {} in {:?} (attempt {attempt}/{})",
                        self.endpoint,
                        delay,
                        self.ctx.reconnect.max_attempts()
                    );
                    self.ctx.scheduler.sleep(delay).await;
                }
                None => {
                    error!(
                        "Giving up on {} after {} reconnection attempts",
                        self.endpoint,
                        self.supervisor.attempts()
                    );
                    self.transition(SessionStatus::Failed);
                    return;
                }
            }
        }
    }

    /// Drive an open connection until the transport closes or errors.
    async fn pump(&self, link: Link) {
        let Link {
            mut sink,
            mut stream,
        } = link;

        let ping = match serde_json::to_string(&Outbound::Ping) {
            Ok(ping) => ping,
            Err(e) => {
                error!("Failed to serialize keep-alive ping: {e}");
                return;
            }
        };

        let mut keep_alive = self.ctx.scheduler.sleep(self.ctx.keep_alive_interval);

        loop {
            tokio::select! {
                _ = &mut keep_alive => {
                    trace!("Sending keep-alive ping on {}", self.topic);
                    if let Err(e) = sink.send(ping.clone()).await {
                        warn!("Keep-alive ping on {} failed: {e}", self.topic);
                        return;
                    }
                    keep_alive = self.ctx.scheduler.sleep(self.ctx.keep_alive_interval);
                }
                frame = stream.next() => match frame {
                    Some(Ok(text)) => self.ctx.dispatcher.dispatch_text(&self.topic, &text),
                    Some(Err(e)) if e.is_protocol() => {
                        warn!("Dropping undecodable frame on {}: {e}", self.topic);
                    }
                    Some(Err(e)) => {
                        warn!("Connection to {} errored: {e}", self.endpoint);
                        return;
                    }
                    None => {
                        info!("Connection to {} closed by server", self.endpoint);
                        return;
                    }
                },
            }
        }
    }

    fn transition(&self, status: SessionStatus) {
        self.state.set_status(status);
        self.ctx.dispatcher.notify_status(&self.topic, status);
    }
}
