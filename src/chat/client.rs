use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot, watch};

use super::connection::{ClientEvent, Command, ConnectionState, Driver};
use super::queue::OutboundItem;
use super::store::MessageStore;
use crate::Result;
use crate::error::Error;
use crate::session::{Session, SessionHolder, SessionStore};
use crate::ws::config::Config;
use crate::ws::{Transport, WsError};

/// Handle to the chat connection manager.
///
/// One manager keeps one logical connection to the chat server. Build it once
/// in the app's context and hand out clones: every clone talks to the same
/// background driver task, which stops when the last clone is dropped.
///
/// Network trouble never shows up as an `Err` here. Sends are queued until the
/// connection opens, dropped connections are retried with linear backoff, and
/// connect/join report failure as `Ok(false)`. `Err` is reserved for misuse,
/// such as sending before a session was installed.
///
/// # Examples
///
/// ```rust, no_run
/// use chat_client_sdk::chat::{BroadcastStore, Client};
/// use chat_client_sdk::session::Session;
/// use chat_client_sdk::ws::config::Config;
/// use futures::StreamExt as _;
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let store = BroadcastStore::new();
///     let client = Client::new(Config::default(), store.clone());
///
///     let session = Session::new(
///         "u1".to_owned(),
///         "token".to_owned(),
///         "wss://chat.example.com/ws".to_owned(),
///     )?;
///     client.initialize(session)?;
///
///     client.send_message("hi".to_owned(), "c1".to_owned())?;
///     client.join_chat("c1".to_owned()).await?;
///
///     let mut events = Box::pin(store.subscribe_chat("c1".to_owned()));
///     while let Some(event) = events.next().await {
///         println!("{:?}", event?.message);
///     }
///
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    /// Commands for the driver task
    commands: mpsc::UnboundedSender<Command>,
    /// Current connection state, published by the driver
    state_rx: watch::Receiver<ConnectionState>,
    /// Lifecycle events, published by the driver
    events: broadcast::Sender<ClientEvent>,
    /// Session the driver reads at every connect attempt
    session: Arc<SessionHolder>,
    /// Durable copy of the session
    sessions: Box<dyn SessionStore>,
}

#[cfg(feature = "ws")]
impl Client {
    /// Create a client that connects with `tokio-tungstenite` and keeps the
    /// persisted session in memory.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime.
    #[must_use]
    pub fn new<S: MessageStore>(config: Config, store: S) -> Self {
        Self::with_transport(
            config,
            crate::ws::TungsteniteTransport,
            store,
            crate::session::MemorySessionStore::new(),
        )
    }
}

impl Client {
    /// Create a client from its collaborators and start the driver task.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime.
    #[must_use]
    pub fn with_transport<T, S, P>(config: Config, transport: T, store: S, sessions: P) -> Self
    where
        T: Transport,
        S: MessageStore,
        P: SessionStore,
    {
        let (commands, commands_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Closed);
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let session = Arc::new(SessionHolder::default());

        Driver::new(
            config,
            Arc::new(transport),
            Arc::new(store),
            Arc::clone(&session),
            commands_rx,
            state_tx,
            events.clone(),
        )
        .spawn();

        Self {
            inner: Arc::new(ClientInner {
                commands,
                state_rx,
                events,
                session,
                sessions: Box::new(sessions),
            }),
        }
    }

    fn command(&self, command: Command) -> Result<()> {
        self.inner
            .commands
            .send(command)
            .map_err(|_e| WsError::ManagerStopped)?;
        Ok(())
    }

    fn ensure_session(&self) -> Result<()> {
        if self.inner.session.is_present() {
            return Ok(());
        }

        #[cfg(feature = "tracing")]
        tracing::error!("Chat client used before a session was initialized");
        Err(Error::missing_session())
    }

    /// Install or replace the session, reset the reconnect counter and persist
    /// the session for [`Client::resume`].
    ///
    /// The session is installed even if persisting it fails. An open
    /// connection keeps running; the new session is used from the next
    /// connect attempt on.
    pub fn initialize(&self, session: Session) -> Result<()> {
        self.inner.session.replace(session.clone());
        self.command(Command::ResetAttempts)?;
        self.inner.sessions.save(&session)
    }

    /// The session currently installed.
    #[must_use]
    pub fn session(&self) -> Option<Session> {
        self.inner.session.current()
    }

    /// Foreground-resume helper: restore the persisted session if none is
    /// installed, then [`Client::check_and_reconnect`].
    pub async fn resume(&self) -> Result<bool> {
        if !self.inner.session.is_present() {
            let Some(session) = self.inner.sessions.load()? else {
                return Err(Error::missing_session());
            };

            #[cfg(feature = "tracing")]
            tracing::debug!(user_id = %session.user_id(), "Restored persisted session");

            self.inner.session.replace(session);
            self.command(Command::ResetAttempts)?;
        }

        self.check_and_reconnect().await
    }

    /// Open the connection, or join the attempt already in flight.
    ///
    /// Resolves `true` once the connection is open and validated, `false` if
    /// the attempt failed (a retry is then scheduled automatically).
    pub async fn connect(&self) -> Result<bool> {
        self.ensure_session()?;

        let (reply, rx) = oneshot::channel();
        self.command(Command::Connect { reply })?;
        Ok(rx.await.unwrap_or(false))
    }

    /// [`Client::connect`], then join `chat_ids` if the connection opened.
    pub async fn connect_and_join(&self, chat_ids: Vec<String>) -> Result<bool> {
        if !self.connect().await? {
            return Ok(false);
        }
        self.join_chats(chat_ids).await
    }

    /// Send a chat message without waiting.
    ///
    /// Goes out immediately when the connection is open; otherwise it is
    /// queued, a connection attempt is started, and the queue is flushed in
    /// order once the connection opens. Queued messages are discarded only by
    /// [`Client::disconnect`].
    ///
    /// While an automatic retry is pending no extra attempt is started: the
    /// message waits for the scheduled retry, so sending cannot bypass the
    /// backoff. Call [`Client::check_and_reconnect`] to connect right away.
    pub fn send_message(&self, message: String, chat_id: String) -> Result<()> {
        self.ensure_session()?;
        self.command(Command::Send(OutboundItem::new(message, chat_id)))
    }

    pub async fn join_chat(&self, chat_id: String) -> Result<bool> {
        self.join_chats(vec![chat_id]).await
    }

    /// Join several chats with a single Join frame.
    ///
    /// Opens the connection first if needed. Joins are never queued: this
    /// returns `Ok(false)` when the connection cannot be established. Chats
    /// joined successfully are joined again automatically after a reconnect.
    pub async fn join_chats(&self, chat_ids: Vec<String>) -> Result<bool> {
        if chat_ids.is_empty() {
            return Err(Error::validation(
                "chat_ids cannot be empty: at least one chat must be provided",
            ));
        }

        if !self.check_and_reconnect().await? {
            return Ok(false);
        }

        let (reply, rx) = oneshot::channel();
        self.command(Command::Join { chat_ids, reply })?;
        Ok(rx.await.unwrap_or(false))
    }

    /// Close the connection and stop reconnecting.
    ///
    /// Cancels any pending retry, aborts an in-flight attempt, discards queued
    /// messages and forgets joined chats. Resolves once the state is `closed`.
    pub async fn disconnect(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.command(Command::Disconnect { reply })?;
        rx.await.map_err(|_e| WsError::ManagerStopped)?;
        Ok(())
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connection_state().is_connected()
    }

    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        *self.inner.state_rx.borrow()
    }

    /// Heal a silently dropped connection.
    ///
    /// Returns `true` straight away when already open, without touching the
    /// transport. Otherwise connects and reports whether the connection is
    /// open afterwards.
    pub async fn check_and_reconnect(&self) -> Result<bool> {
        if self.is_connected() {
            return Ok(true);
        }

        self.connect().await?;
        Ok(self.is_connected())
    }

    /// Number of messages waiting for the connection to open.
    pub async fn queued_messages(&self) -> Result<usize> {
        let (reply, rx) = oneshot::channel();
        self.command(Command::QueueLen { reply })?;
        Ok(rx.await.map_err(|_e| WsError::ManagerStopped)?)
    }

    /// Subscribe to lifecycle events published after this call.
    #[must_use]
    pub fn events(&self) -> broadcast::Receiver<ClientEvent> {
        self.inner.events.subscribe()
    }

    /// Subscribe to connection state changes.
    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_rx.clone()
    }
}
