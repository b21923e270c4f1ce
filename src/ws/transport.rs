//! Transport seam between the connection driver and the network.
//!
//! The driver only ever sees a [`Link`]: a sink of outgoing text frames and a
//! stream of incoming ones. The stream ending (or yielding an error) is how a
//! transport reports that the connection is gone.

use std::pin::Pin;

use async_trait::async_trait;
use futures::{Sink, Stream};

use crate::Result;
use crate::error::Error;

/// Outgoing half of a [`Link`].
pub type FrameSink = Pin<Box<dyn Sink<String, Error = Error> + Send>>;

/// Incoming half of a [`Link`].
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// An established transport connection split into its two halves.
#[non_exhaustive]
pub struct Link {
    /// Text frames written here are transmitted to the server
    pub sink: FrameSink,
    /// Text frames received from the server
    pub stream: FrameStream,
}

impl Link {
    pub fn new<Si, St>(sink: Si, stream: St) -> Self
    where
        Si: Sink<String, Error = Error> + Send + 'static,
        St: Stream<Item = Result<String>> + Send + 'static,
    {
        Self {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        }
    }
}

/// Opens connections to the chat server.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Establish a connection to `url`.
    async fn open(&self, url: &str) -> Result<Link>;
}

/// [`Transport`] backed by `tokio-tungstenite`.
#[cfg(feature = "ws")]
#[derive(Debug, Clone, Copy, Default)]
pub struct TungsteniteTransport;

#[cfg(feature = "ws")]
#[async_trait]
impl Transport for TungsteniteTransport {
    async fn open(&self, url: &str) -> Result<Link> {
        use futures::future;
        use futures::{SinkExt as _, StreamExt as _};
        use tokio_tungstenite::{connect_async, tungstenite::Message};

        use super::error::WsError;

        let (ws_stream, _) = connect_async(url).await?;
        let (write, read) = ws_stream.split();

        let sink = write
            .sink_map_err(Error::from)
            .with(|text: String| future::ready(Ok::<_, Error>(Message::Text(text.into()))));

        let stream = read.filter_map(|msg| {
            future::ready(match msg {
                Ok(Message::Text(text)) => Some(Ok(text.to_string())),
                Ok(Message::Close(_)) => Some(Err(WsError::ConnectionClosed.into())),
                Err(e) => Some(Err(Error::from(e))),
                // Binary frames and ping/pong are handled by tungstenite or ignored
                Ok(_) => None,
            })
        });

        Ok(Link::new(sink, stream))
    }
}
