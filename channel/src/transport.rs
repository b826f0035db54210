//! Physical connections. A `Connector` turns an endpoint into a `Link`: a
//! sink of outbound text frames and a stream of inbound ones. The stream
//! ending, or yielding an error, is the only close/error signal a session
//! relies on.

use crate::error::{
    protocol_error, transport_error, ChannelErrorKind, Error, ProtocolErrorKind,
    TransportErrorKind,
};
use async_trait::async_trait;
use futures::future;
use futures::{Sink, SinkExt, Stream, StreamExt};
use log::*;
use std::pin::Pin;
use std::time::Duration;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

pub type FrameSink = Pin<Box<dyn Sink<String, Error = Error> + Send>>;
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<String, Error>> + Send>>;

/// One open bidirectional connection.
pub struct Link {
    pub sink: FrameSink,
    pub stream: FrameStream,
}

#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, endpoint: &str) -> Result<Link, Error>;
}

/// WebSocket connector built on `tokio-tungstenite`.
#[derive(Debug, Clone)]
pub struct WsConnector {
    connect_timeout: Duration,
}

impl WsConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, endpoint: &str) -> Result<Link, Error> {
        let (ws_stream, _response) =
            tokio::time::timeout(self.connect_timeout, connect_async(endpoint))
                .await
                .map_err(|_| {
                    transport_error(
                        TransportErrorKind::ConnectTimeout,
                        &format!("no handshake from {endpoint} within {:?}", self.connect_timeout),
                    )
                })?
                .map_err(|e| Error {
                    source: Some(Box::new(e)),
                    error_kind: ChannelErrorKind::Transport(TransportErrorKind::ConnectFailed),
                })?;

        debug!("WebSocket handshake completed with {endpoint}");

        let (write, read) = ws_stream.split();

        let sink = write
            .sink_map_err(Error::from)
            .with(|text: String| future::ready(Ok::<_, Error>(Message::text(text))));

        // A close frame ends the stream; control frames are answered by tungstenite.
        let stream = read
            .take_while(|msg| future::ready(!matches!(msg, Ok(Message::Close(_)))))
            .filter_map(|msg| {
                future::ready(match msg {
                    Ok(Message::Text(text)) => Some(Ok(text.as_str().to_owned())),
                    Ok(Message::Binary(bytes)) => Some(String::from_utf8(bytes.to_vec()).map_err(
                        |_| protocol_error(ProtocolErrorKind::InvalidEncoding, "binary frame"),
                    )),
                    Ok(_) => None,
                    Err(e) => Some(Err(Error::from(e))),
                })
            });

        Ok(Link {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        })
    }
}
