//! Chat connection walkthrough.
//!
//! Installs a session, sends a message, joins a chat and prints what arrives
//! for a while, logging every connection lifecycle event along the way. The
//! session is persisted to the system temp directory so a second run can pick
//! it up with `resume` alone.
//!
//! Run with tracing enabled:
//! ```sh
//! CHAT_URL=wss://chat.example.com/ws CHAT_USER_ID=u1 CHAT_TOKEN=secret \
//!     RUST_LOG=info,chat_client_sdk=debug cargo run --example chat --features tracing
//! ```

use std::env;
use std::time::Duration;

use chat_client_sdk::chat::{BroadcastStore, Client};
use chat_client_sdk::session::{FileSessionStore, Session};
use chat_client_sdk::ws::TungsteniteTransport;
use chat_client_sdk::ws::config::Config;
use futures::StreamExt as _;
use tokio::time::timeout;
use tracing::{debug, info, warn};

const CHAT_ID: &str = "lobby";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let store = BroadcastStore::new();
    let sessions = FileSessionStore::new(env::temp_dir());
    let client = Client::with_transport(
        Config::default(),
        TungsteniteTransport,
        store.clone(),
        sessions,
    );

    let mut events = client.events();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            info!(?event, "Lifecycle");
        }
    });

    match (
        env::var("CHAT_URL"),
        env::var("CHAT_USER_ID"),
        env::var("CHAT_TOKEN"),
    ) {
        (Ok(url), Ok(user_id), Ok(token)) => {
            client.initialize(Session::new(user_id, token, url)?)?;
            info!(connected = client.connect().await?, "Connected with fresh session");
        }
        _ => {
            info!("CHAT_URL/CHAT_USER_ID/CHAT_TOKEN not set, resuming persisted session");
            info!(connected = client.resume().await?, "Resumed");
        }
    }

    client.send_message("hello from the demo".to_owned(), CHAT_ID.to_owned())?;

    if !client.join_chat(CHAT_ID.to_owned()).await? {
        warn!(chat_id = CHAT_ID, "Join failed; will keep retrying in the background");
    }

    let mut messages = Box::pin(store.subscribe_chat(CHAT_ID.to_owned()));
    let mut count = 0;
    while let Ok(Some(result)) = timeout(Duration::from_secs(30), messages.next()).await {
        match result {
            Ok(event) => {
                info!(
                    chat_id = %event.chat_id,
                    message_id = %event.message_id,
                    from = ?event.nickname.as_deref().or(event.user_id.as_deref()),
                    message = ?event.message,
                );
                count += 1;
                if count >= 10 {
                    break;
                }
            }
            Err(e) => debug!(error = %e),
        }
    }

    info!(received = count, state = %client.connection_state());
    client.disconnect().await?;

    Ok(())
}
