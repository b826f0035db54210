//! In-memory connector for exercising sessions without a network.
//!
//! Every accepted connection is exposed as a `MockPeer`, the server side of
//! the link: tests push frames through it, read what the client sent, and
//! close or break it.

use crate::error::{transport_error, Error, TransportErrorKind};
use crate::transport::{Connector, Link};
use async_trait::async_trait;
use futures::{sink, stream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

#[derive(Clone)]
pub struct MockPeer {
    pub endpoint: String,
    inbound: Arc<Mutex<Option<mpsc::UnboundedSender<Result<String, Error>>>>>,
    outbound: Arc<Mutex<mpsc::UnboundedReceiver<String>>>,
}

impl MockPeer {
    /// Deliver a text frame to the client.
    pub fn send(&self, text: impl Into<String>) {
        if let Some(tx) = self.inbound.lock().unwrap().as_ref() {
            let _ = tx.send(Ok(text.into()));
        }
    }

    pub fn send_json(&self, value: serde_json::Value) {
        self.send(value.to_string());
    }

    /// Server-side close: the client's stream ends.
    pub fn close(&self) {
        self.inbound.lock().unwrap().take();
    }

    /// Transport error followed by close.
    pub fn fail(&self) {
        if let Some(tx) = self.inbound.lock().unwrap().take() {
            let _ = tx.send(Err(transport_error(
                TransportErrorKind::ReceiveFailed,
                "connection reset by peer",
            )));
        }
    }

    /// Frames the client has sent since the last call.
    pub fn received(&self) -> Vec<String> {
        let mut outbound = self.outbound.lock().unwrap();
        let mut frames = Vec::new();
        while let Ok(frame) = outbound.try_recv() {
            frames.push(frame);
        }
        frames
    }
}

#[derive(Clone, Default)]
pub struct MockConnector {
    refuse: Arc<AtomicBool>,
    attempts: Arc<Mutex<Vec<String>>>,
    peers: Arc<Mutex<Vec<MockPeer>>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following connection attempt fail (or succeed again).
    pub fn refuse_connections(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    /// Endpoints of every attempt, successful or not, in order.
    pub fn attempts(&self) -> Vec<String> {
        self.attempts.lock().unwrap().clone()
    }

    /// Server side of the `index`-th accepted connection.
    pub fn peer(&self, index: usize) -> Option<MockPeer> {
        self.peers.lock().unwrap().get(index).cloned()
    }

    pub fn last_peer(&self) -> Option<MockPeer> {
        self.peers.lock().unwrap().last().cloned()
    }

    pub fn accepted(&self) -> usize {
        self.peers.lock().unwrap().len()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, endpoint: &str) -> Result<Link, Error> {
        self.attempts.lock().unwrap().push(endpoint.to_string());

        if self.refuse.load(Ordering::SeqCst) {
            return Err(transport_error(
                TransportErrorKind::ConnectFailed,
                "connection refused",
            ));
        }

        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<Result<String, Error>>();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel::<String>();

        self.peers.lock().unwrap().push(MockPeer {
            endpoint: endpoint.to_string(),
            inbound: Arc::new(Mutex::new(Some(inbound_tx))),
            outbound: Arc::new(Mutex::new(outbound_rx)),
        });

        let sink = sink::unfold(outbound_tx, |tx, text: String| async move {
            tx.send(text)
                .map_err(|_| transport_error(TransportErrorKind::SendFailed, "peer gone"))?;
            Ok::<_, Error>(tx)
        });

        let stream = stream::unfold(inbound_rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        });

        Ok(Link {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        })
    }
}
