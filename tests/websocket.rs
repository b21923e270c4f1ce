#![cfg(feature = "ws")]
#![allow(
    clippy::unwrap_used,
    clippy::missing_panics_doc,
    reason = "Do not need additional syntax for setting up tests"
)]

mod common;

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chat_client_sdk::chat::{BroadcastStore, Client, ConnectionState};
use chat_client_sdk::session::{MemorySessionStore, Session};
use chat_client_sdk::ws::TungsteniteTransport;
use chat_client_sdk::ws::config::Config;
use futures_util::{SinkExt as _, StreamExt as _};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;

use crate::common::{TOKEN, USER_ID};

/// Mock chat server that can drop every connection on demand.
struct MockWsServer {
    addr: SocketAddr,
    /// Broadcast frames to ALL connected clients
    message_tx: broadcast::Sender<String>,
    /// Frames received from clients
    frame_rx: mpsc::UnboundedReceiver<String>,
    disconnect_signal: Arc<AtomicBool>,
}

impl MockWsServer {
    /// Start a mock server on a random port.
    async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (message_tx, _) = broadcast::channel::<String>(100);
        let (frame_tx, frame_rx) = mpsc::unbounded_channel::<String>();
        let disconnect_signal = Arc::new(AtomicBool::new(false));

        let broadcast_tx = message_tx.clone();
        let disconnect = Arc::clone(&disconnect_signal);

        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };

                let Ok(ws_stream) = tokio_tungstenite::accept_async(stream).await else {
                    continue;
                };

                let (mut write, mut read) = ws_stream.split();
                let frame_tx = frame_tx.clone();
                let mut msg_rx = broadcast_tx.subscribe();
                let disconnect = Arc::clone(&disconnect);

                tokio::spawn(async move {
                    loop {
                        if disconnect.load(Ordering::SeqCst) {
                            break;
                        }

                        tokio::select! {
                            msg = read.next() => {
                                match msg {
                                    Some(Ok(Message::Text(text))) => {
                                        drop(frame_tx.send(text.to_string()));
                                    }
                                    Some(Ok(_)) => {}
                                    _ => break,
                                }
                            }
                            msg = msg_rx.recv() => {
                                match msg {
                                    Ok(text) => {
                                        if write.send(Message::Text(text.into())).await.is_err() {
                                            break;
                                        }
                                    }
                                    Err(_) => break,
                                }
                            }
                            () = tokio::time::sleep(Duration::from_millis(50)) => {}
                        }
                    }
                });
            }
        });

        Self {
            addr,
            message_tx,
            frame_rx,
            disconnect_signal,
        }
    }

    fn ws_url(&self) -> String {
        format!("ws://{}/chat", self.addr)
    }

    fn disconnect_all(&self) {
        self.disconnect_signal.store(true, Ordering::SeqCst);
    }

    fn allow_reconnect(&self) {
        self.disconnect_signal.store(false, Ordering::SeqCst);
    }

    /// Send a frame to all connected clients.
    fn send(&self, frame: &Value) {
        drop(self.message_tx.send(frame.to_string()));
    }

    /// Next frame received from any client.
    async fn recv_frame(&mut self) -> Option<Value> {
        let text = timeout(Duration::from_secs(2), self.frame_rx.recv())
            .await
            .ok()
            .flatten()?;
        Some(serde_json::from_str(&text).unwrap())
    }

    /// Skip frames until one of type `kind` arrives.
    async fn recv_frame_of(&mut self, kind: &str) -> Value {
        loop {
            let frame = self.recv_frame().await.expect("no frame received");
            if frame["type"] == kind {
                return frame;
            }
        }
    }
}

fn config() -> Config {
    let mut config = Config::default();
    config.reconnect.max_attempts = 5;
    config.reconnect.base_delay = Duration::from_millis(50);
    config.connect_timeout = Some(Duration::from_secs(2));
    config.close_timeout = Duration::from_millis(500);
    config
}

fn client(server: &MockWsServer, store: BroadcastStore) -> Client {
    let client = Client::with_transport(
        config(),
        TungsteniteTransport,
        store,
        MemorySessionStore::new(),
    );
    let session = Session::new(USER_ID.to_owned(), TOKEN.to_owned(), server.ws_url())
        .unwrap()
        .with_nickname("Ada".to_owned());
    client.initialize(session).unwrap();
    client
}

#[tokio::test]
async fn validates_then_flushes_queued_message() {
    let mut server = MockWsServer::start().await;
    let client = client(&server, BroadcastStore::new());

    client
        .send_message("hello".to_owned(), "c1".to_owned())
        .unwrap();

    let validate = server.recv_frame().await.unwrap();
    assert_eq!(
        validate,
        json!({ "type": "Validate", "user_id": USER_ID, "token": TOKEN })
    );

    let chat = server.recv_frame().await.unwrap();
    assert_eq!(chat["type"], "Chat");
    assert_eq!(chat["message"], "hello");
    assert_eq!(chat["chat_id"], "c1");

    assert!(client.is_connected());
    assert_eq!(client.queued_messages().await.unwrap(), 0);
}

#[tokio::test]
async fn dispatches_inbound_chat_to_store() {
    let mut server = MockWsServer::start().await;
    let store = BroadcastStore::new();
    let mut messages = Box::pin(store.subscribe_chat("c1".to_owned()));
    let client = client(&server, store);

    assert!(client.connect().await.unwrap());
    server.recv_frame_of("Validate").await;

    server.send(&json!({
        "type": "Chat",
        "chat_id": "c2",
        "message_id": "m0",
        "message": "elsewhere"
    }));
    server.send(&json!({
        "type": "Chat",
        "chat_id": "c1",
        "message_id": 17,
        "user_id": "u2",
        "message": "hi there",
        "at": "2024-05-01T12:00:00Z",
        "nickname": "Bob"
    }));

    let event = timeout(Duration::from_secs(2), messages.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(event.message_id, "17");
    assert_eq!(event.user_id.as_deref(), Some("u2"));
    assert_eq!(event.message.as_deref(), Some("hi there"));
    assert_eq!(event.nickname.as_deref(), Some("Bob"));
    assert!(event.at.is_some());
}

#[tokio::test]
async fn reconnects_and_rejoins_after_server_drop() {
    let mut server = MockWsServer::start().await;
    let store = BroadcastStore::new();
    let mut messages = Box::pin(store.subscribe_chat("c1".to_owned()));
    let client = client(&server, store);

    assert!(client.join_chat("c1".to_owned()).await.unwrap());
    server.recv_frame_of("Validate").await;
    let join = server.recv_frame_of("Join").await;
    assert_eq!(join["chat_id"], json!(["c1"]));

    server.disconnect_all();
    tokio::time::sleep(Duration::from_millis(100)).await;
    server.allow_reconnect();

    // A rejoin proves the client reconnected and restored membership
    let rejoin = server.recv_frame_of("Join").await;
    assert_eq!(rejoin["chat_id"], json!(["c1"]));

    server.send(&json!({ "chat_id": "c1", "message_id": "after" }));
    let event = timeout(Duration::from_secs(2), messages.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(event.message_id, "after");
    assert!(client.is_connected());
}

#[tokio::test]
async fn disconnect_closes_and_stays_closed() {
    let mut server = MockWsServer::start().await;
    let client = client(&server, BroadcastStore::new());

    assert!(client.connect().await.unwrap());
    server.recv_frame_of("Validate").await;

    client.disconnect().await.unwrap();
    assert_eq!(client.connection_state(), ConnectionState::Closed);

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(
        server.recv_frame().await.is_none(),
        "client must not reconnect after disconnect"
    );
    assert_eq!(client.connection_state(), ConnectionState::Closed);
}

#[tokio::test]
async fn connect_to_unreachable_server_reports_false() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let client = Client::with_transport(
        config(),
        TungsteniteTransport,
        BroadcastStore::new(),
        MemorySessionStore::new(),
    );
    let session =
        Session::new(USER_ID.to_owned(), TOKEN.to_owned(), format!("ws://{addr}/chat")).unwrap();
    client.initialize(session).unwrap();

    assert!(!client.connect().await.unwrap());
    assert!(!client.is_connected());

    client.disconnect().await.unwrap();
}
