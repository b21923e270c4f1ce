#![allow(
    clippy::unwrap_used,
    clippy::missing_panics_doc,
    reason = "Do not need additional syntax for setting up tests"
)]
#![allow(
    unused,
    reason = "Each test binary uses a different subset of these helpers"
)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chat_client_sdk::Result;
use chat_client_sdk::chat::types::response::InboundEvent;
use chat_client_sdk::chat::{ClientEvent, ConnectionState, MessageStore};
use chat_client_sdk::error::Error;
use chat_client_sdk::session::Session;
use chat_client_sdk::ws::{Link, Transport, WsError};
use futures::channel::mpsc as chan;
use futures::{SinkExt as _, StreamExt as _};
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::timeout;

pub const USER_ID: &str = "u1";
pub const TOKEN: &str = "t1";
pub const URL: &str = "wss://x";

/// Generous bound for waits; under paused time it only matters if something hangs.
pub const WAIT: Duration = Duration::from_secs(600);

#[must_use]
pub fn session() -> Session {
    Session::new(USER_ID.to_owned(), TOKEN.to_owned(), URL.to_owned()).unwrap()
}

/// How the next call to [`Transport::open`] behaves.
#[derive(Debug, Clone, Copy)]
pub enum Outcome {
    Accept,
    Refuse,
    Delay(Duration),
    Hang,
}

/// In-memory transport. Each accepted connection is handed to the paired
/// [`MockServer`] as a [`ServerEnd`].
#[derive(Clone)]
pub struct MockTransport {
    opens: Arc<AtomicUsize>,
    script: Arc<Mutex<VecDeque<Outcome>>>,
    fallback: Arc<Mutex<Outcome>>,
    /// Per-connection cap on frames the sink accepts before failing
    frame_limits: Arc<Mutex<VecDeque<usize>>>,
    accepted: mpsc::UnboundedSender<ServerEnd>,
}

pub struct MockServer {
    accepted: mpsc::UnboundedReceiver<ServerEnd>,
}

impl MockTransport {
    #[must_use]
    pub fn new() -> (Self, MockServer) {
        let (accepted, accepted_rx) = mpsc::unbounded_channel();
        let transport = Self {
            opens: Arc::new(AtomicUsize::new(0)),
            script: Arc::new(Mutex::new(VecDeque::new())),
            fallback: Arc::new(Mutex::new(Outcome::Accept)),
            frame_limits: Arc::new(Mutex::new(VecDeque::new())),
            accepted,
        };
        (
            transport,
            MockServer {
                accepted: accepted_rx,
            },
        )
    }

    /// Queue outcomes for the next calls to `open`.
    pub fn script<I: IntoIterator<Item = Outcome>>(&self, outcomes: I) {
        self.script.lock().unwrap().extend(outcomes);
    }

    /// Make the sinks of the next accepted connections fail after the given
    /// number of frames. Later connections are unlimited.
    pub fn limit_frames<I: IntoIterator<Item = usize>>(&self, limits: I) {
        self.frame_limits.lock().unwrap().extend(limits);
    }

    /// Outcome once the script runs out.
    pub fn set_fallback(&self, outcome: Outcome) {
        *self.fallback.lock().unwrap() = outcome;
    }

    /// Number of times `open` was called.
    #[must_use]
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    fn next_outcome(&self) -> Outcome {
        let scripted = self.script.lock().unwrap().pop_front();
        scripted.unwrap_or_else(|| *self.fallback.lock().unwrap())
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn open(&self, _url: &str) -> Result<Link> {
        self.opens.fetch_add(1, Ordering::SeqCst);

        match self.next_outcome() {
            Outcome::Accept => {}
            Outcome::Refuse => return Err(WsError::ConnectionClosed.into()),
            Outcome::Delay(delay) => tokio::time::sleep(delay).await,
            Outcome::Hang => std::future::pending::<()>().await,
        }

        let (client_tx, server_rx) = chan::unbounded::<String>();
        let (server_tx, client_rx) = chan::unbounded::<Result<String>>();

        drop(self.accepted.send(ServerEnd {
            received: server_rx,
            outgoing: server_tx,
        }));

        let limit = self
            .frame_limits
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(usize::MAX);
        let written = AtomicUsize::new(0);
        let sink = client_tx
            .sink_map_err(|_e| Error::from(WsError::ConnectionClosed))
            .with(move |text: String| {
                let frame = if written.fetch_add(1, Ordering::SeqCst) < limit {
                    Ok(text)
                } else {
                    Err(Error::from(WsError::ConnectionClosed))
                };
                std::future::ready(frame)
            });
        Ok(Link::new(sink, client_rx))
    }
}

impl MockServer {
    /// Next connection the client opened.
    pub async fn accept(&mut self) -> ServerEnd {
        timeout(WAIT, self.accepted.recv())
            .await
            .expect("client never connected")
            .unwrap()
    }

    /// Connection accepted so far but not yet taken, if any.
    pub fn try_accept(&mut self) -> Option<ServerEnd> {
        self.accepted.try_recv().ok()
    }
}

/// Server side of one accepted connection.
pub struct ServerEnd {
    /// Frames the client transmitted
    pub received: chan::UnboundedReceiver<String>,
    /// Frames for the client; dropping it closes the connection
    pub outgoing: chan::UnboundedSender<Result<String>>,
}

impl ServerEnd {
    /// Next frame from the client as JSON, or `None` if the client closed.
    pub async fn recv(&mut self) -> Option<Value> {
        let text = timeout(WAIT, self.received.next()).await.ok()??;
        Some(serde_json::from_str(&text).unwrap())
    }

    /// Assert the client does not send anything within a second.
    pub async fn assert_silent(&mut self) {
        let next = timeout(Duration::from_secs(1), self.received.next()).await;
        assert!(next.is_err(), "unexpected frame: {next:?}");
    }

    pub fn push(&self, frame: &Value) {
        self.push_raw(&frame.to_string());
    }

    pub fn push_raw(&self, text: &str) {
        self.outgoing.unbounded_send(Ok(text.to_owned())).unwrap();
    }
}

/// Message store that records every dispatched event.
#[must_use]
pub fn recording_store() -> (impl MessageStore, Arc<Mutex<Vec<InboundEvent>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let store = {
        let seen = Arc::clone(&seen);
        move |event: InboundEvent| seen.lock().unwrap().push(event)
    };
    (store, seen)
}

pub async fn wait_for_state(rx: &mut watch::Receiver<ConnectionState>, state: ConnectionState) {
    timeout(WAIT, rx.wait_for(|current| *current == state))
        .await
        .unwrap_or_else(|_| panic!("never reached {state}"))
        .unwrap();
}

pub async fn next_event(rx: &mut broadcast::Receiver<ClientEvent>) -> ClientEvent {
    timeout(WAIT, rx.recv()).await.expect("no event").unwrap()
}

/// Skip events until one matches.
pub async fn wait_for_event<F>(rx: &mut broadcast::Receiver<ClientEvent>, mut matches: F) -> ClientEvent
where
    F: FnMut(&ClientEvent) -> bool,
{
    loop {
        let event = next_event(rx).await;
        if matches(&event) {
            return event;
        }
    }
}
