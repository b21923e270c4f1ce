#![expect(
    clippy::module_name_repetitions,
    reason = "Connection types expose their domain in the name for clarity"
)]

use std::future::{Future, pending};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use backoff::backoff::Backoff as _;
use futures::{SinkExt as _, StreamExt as _};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{Sleep, sleep, timeout};

use super::queue::{OutboundItem, OutboundQueue};
use super::store::MessageStore;
use super::types::request::OutboundFrame;
use super::types::response::parse_frame;
use crate::Result;
use crate::error::{Error, Kind};
use crate::session::{Session, SessionHolder};
use crate::ws::config::{Config, LinearBackoff};
use crate::ws::{Link, Transport, WsError};

/// Connection state tracking.
#[non_exhaustive]
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display, strum_macros::IntoStaticStr,
)]
#[strum(serialize_all = "lowercase")]
pub enum ConnectionState {
    /// No connection and none in progress
    Closed,
    /// Opening the transport and sending the Validate frame
    Connecting,
    /// Validated; sends go straight to the server
    Open,
    /// Shutting down after an explicit disconnect
    Closing,
}

impl ConnectionState {
    /// Check if the connection is currently usable.
    #[must_use]
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Open)
    }
}

/// Lifecycle notifications published by the connection driver.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// The connection opened and the Validate frame went out
    Connected,
    /// A connection attempt failed
    ConnectFailed { reason: String },
    /// An automatic retry will run after `delay`
    ReconnectScheduled { attempt: u32, delay: Duration },
    /// Automatic retries are used up; only an explicit connect starts a new attempt
    ReconnectExhausted { attempts: u32 },
    /// The connection closed, either by request (`planned`) or not
    Disconnected { planned: bool },
    /// An inbound frame was dropped
    FrameRejected { reason: String },
}

pub(crate) enum Command {
    Connect { reply: oneshot::Sender<bool> },
    Send(OutboundItem),
    Join {
        chat_ids: Vec<String>,
        reply: oneshot::Sender<bool>,
    },
    Disconnect { reply: oneshot::Sender<()> },
    ResetAttempts,
    QueueLen { reply: oneshot::Sender<usize> },
}

/// What woke the driver loop.
enum Wake {
    Command(Option<Command>),
    Attempt(std::result::Result<Result<Link>, JoinError>),
    Inbound(Option<Result<String>>),
    Retry,
}

/// Owns the connection state machine.
///
/// Every state transition and queue mutation happens on this one task;
/// [`super::Client`] talks to it through [`Command`]s. Connection attempts run
/// in a separate task so commands keep being served while connecting.
pub(crate) struct Driver {
    config: Config,
    transport: Arc<dyn Transport>,
    store: Arc<dyn MessageStore>,
    session: Arc<SessionHolder>,
    commands: mpsc::UnboundedReceiver<Command>,
    state_tx: watch::Sender<ConnectionState>,
    events: broadcast::Sender<ClientEvent>,
    queue: OutboundQueue,
    backoff: LinearBackoff,
    /// Callers of `connect` waiting on the in-flight attempt
    waiters: Vec<oneshot::Sender<bool>>,
    attempt: Option<JoinHandle<Result<Link>>>,
    link: Option<Link>,
    retry: Option<Pin<Box<Sleep>>>,
    /// Chats re-joined after every reconnect, in join order
    joined: Vec<String>,
}

impl Driver {
    pub(crate) fn new(
        config: Config,
        transport: Arc<dyn Transport>,
        store: Arc<dyn MessageStore>,
        session: Arc<SessionHolder>,
        commands: mpsc::UnboundedReceiver<Command>,
        state_tx: watch::Sender<ConnectionState>,
        events: broadcast::Sender<ClientEvent>,
    ) -> Self {
        let backoff = config.reconnect.clone().into();
        Self {
            config,
            transport,
            store,
            session,
            commands,
            state_tx,
            events,
            queue: OutboundQueue::default(),
            backoff,
            waiters: Vec::new(),
            attempt: None,
            link: None,
            retry: None,
            joined: Vec::new(),
        }
    }

    pub(crate) fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Main loop; ends when every client handle has been dropped.
    async fn run(mut self) {
        loop {
            let wake = tokio::select! {
                command = self.commands.recv() => Wake::Command(command),
                outcome = until_ready(self.attempt.as_mut()) => Wake::Attempt(outcome),
                frame = next_frame(self.link.as_mut()) => Wake::Inbound(frame),
                () = until_ready(self.retry.as_mut()) => Wake::Retry,
            };

            match wake {
                Wake::Command(None) => break,
                Wake::Command(Some(command)) => self.handle_command(command).await,
                Wake::Attempt(outcome) => self.finish_attempt(outcome).await,
                Wake::Inbound(frame) => self.handle_inbound(frame),
                Wake::Retry => {
                    self.retry = None;
                    if self.state() == ConnectionState::Closed {
                        #[cfg(feature = "tracing")]
                        tracing::debug!(attempt = self.backoff.attempt(), "Retrying connection");
                        self.connect(None);
                    }
                }
            }
        }

        self.shutdown().await;
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect { reply } => self.connect(Some(reply)),
            Command::Send(item) => self.send(item).await,
            Command::Join { chat_ids, reply } => {
                let joined = self.join(chat_ids).await;
                _ = reply.send(joined);
            }
            Command::Disconnect { reply } => {
                self.disconnect().await;
                _ = reply.send(());
            }
            Command::ResetAttempts => self.backoff.reset(),
            Command::QueueLen { reply } => {
                _ = reply.send(self.queue.len());
            }
        }
    }

    fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.state_tx.send_replace(state);
        #[cfg(feature = "tracing")]
        if previous != state {
            tracing::debug!(from = %previous, to = %state, "Connection state changed");
        }
        #[cfg(not(feature = "tracing"))]
        let _ = previous;
    }

    fn emit(&self, event: ClientEvent) {
        // Nobody listening is fine
        _ = self.events.send(event);
    }

    fn resolve_waiters(&mut self, connected: bool) {
        for waiter in self.waiters.drain(..) {
            _ = waiter.send(connected);
        }
    }

    /// Start an attempt unless one is running or the connection is already open.
    fn connect(&mut self, reply: Option<oneshot::Sender<bool>>) {
        match self.state() {
            ConnectionState::Open => {
                if let Some(reply) = reply {
                    _ = reply.send(true);
                }
            }
            ConnectionState::Connecting => self.waiters.extend(reply),
            ConnectionState::Closing => {
                if let Some(reply) = reply {
                    _ = reply.send(false);
                }
            }
            ConnectionState::Closed => {
                let Some(session) = self.session.current() else {
                    #[cfg(feature = "tracing")]
                    tracing::error!("Connect requested without a session");
                    if let Some(reply) = reply {
                        _ = reply.send(false);
                    }
                    return;
                };

                // A manual attempt supersedes any pending retry
                self.retry = None;
                self.waiters.extend(reply);
                self.start_attempt(session);
            }
        }
    }

    fn start_attempt(&mut self, session: Session) {
        #[cfg(feature = "tracing")]
        tracing::debug!(url = %session.url(), user_id = %session.user_id(), "Opening chat connection");

        self.set_state(ConnectionState::Connecting);
        self.attempt = Some(tokio::spawn(open_and_validate(
            Arc::clone(&self.transport),
            session,
            self.config.connect_timeout,
        )));
    }

    async fn finish_attempt(&mut self, outcome: std::result::Result<Result<Link>, JoinError>) {
        self.attempt = None;

        match outcome.unwrap_or_else(|e| Err(Error::with_source(Kind::Internal, e))) {
            Ok(link) => self.on_open(link).await,
            Err(e) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(error = %e, "Unable to connect");

                self.set_state(ConnectionState::Closed);
                self.resolve_waiters(false);
                self.emit(ClientEvent::ConnectFailed {
                    reason: e.to_string(),
                });
                self.schedule_reconnect();
            }
        }
    }

    async fn on_open(&mut self, link: Link) {
        self.link = Some(link);
        self.set_state(ConnectionState::Open);
        self.backoff.reset();
        self.emit(ClientEvent::Connected);

        #[cfg(feature = "tracing")]
        tracing::info!(
            queued = self.queue.len(),
            joined = self.joined.len(),
            "Chat connection open"
        );

        // Membership has to be back in place before queued messages reach those chats
        let healthy = self.rejoin().await && self.flush().await;
        self.resolve_waiters(healthy);
    }

    async fn transmit(&mut self, frame: &OutboundFrame) -> Result<()> {
        let Some(link) = self.link.as_mut() else {
            return Err(WsError::ConnectionClosed.into());
        };
        let text = frame.to_json()?;
        link.sink.send(text).await
    }

    async fn rejoin(&mut self) -> bool {
        if self.joined.is_empty() {
            return true;
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(count = self.joined.len(), "Re-joining chats after reconnect");

        let frame = OutboundFrame::join(self.joined.clone());
        match self.transmit(&frame).await {
            Ok(()) => true,
            Err(e) => {
                self.connection_lost(&e);
                false
            }
        }
    }

    /// Transmit queued items oldest first. On the first failure the item and
    /// everything behind it go back to the front of the queue.
    async fn flush(&mut self) -> bool {
        let mut pending = self.queue.take();

        while let Some(item) = pending.pop_front() {
            if let Err(e) = self.transmit(&OutboundFrame::chat(&item)).await {
                pending.push_front(item);
                self.queue.restore(pending);
                self.connection_lost(&e);
                return false;
            }
        }

        true
    }

    async fn send(&mut self, item: OutboundItem) {
        if self.state().is_connected() {
            if let Err(e) = self.transmit(&OutboundFrame::chat(&item)).await {
                self.queue.push(item);
                self.connection_lost(&e);
            }
            return;
        }

        self.queue.push(item);

        // With a retry pending the message waits for it instead of bypassing the backoff
        if self.state() == ConnectionState::Closed && self.retry.is_none() {
            self.connect(None);
        }
    }

    async fn join(&mut self, chat_ids: Vec<String>) -> bool {
        if !self.state().is_connected() {
            return false;
        }

        if let Err(e) = self.transmit(&OutboundFrame::join(chat_ids.clone())).await {
            self.connection_lost(&e);
            return false;
        }

        for chat_id in chat_ids {
            if !self.joined.contains(&chat_id) {
                self.joined.push(chat_id);
            }
        }
        true
    }

    fn handle_inbound(&mut self, frame: Option<Result<String>>) {
        match frame {
            Some(Ok(text)) => match parse_frame(text.as_bytes()) {
                Ok(event) => {
                    #[cfg(feature = "tracing")]
                    tracing::trace!(?event, "Dispatching inbound event");
                    self.store.dispatch(event);
                }
                Err(e) => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(%text, error = %e, "Dropping malformed frame");
                    self.emit(ClientEvent::FrameRejected {
                        reason: e.to_string(),
                    });
                }
            },
            Some(Err(e)) => self.connection_lost(&e),
            None => self.connection_lost(&WsError::ConnectionClosed.into()),
        }
    }

    /// Unplanned loss of an open connection.
    fn connection_lost(&mut self, error: &Error) {
        #[cfg(feature = "tracing")]
        tracing::warn!(%error, "Chat connection lost");
        #[cfg(not(feature = "tracing"))]
        let _ = error;

        self.link = None;
        self.set_state(ConnectionState::Closed);
        self.emit(ClientEvent::Disconnected { planned: false });
        self.schedule_reconnect();
    }

    fn schedule_reconnect(&mut self) {
        if let Some(delay) = self.backoff.next_backoff() {
            let attempt = self.backoff.attempt();

            #[cfg(feature = "tracing")]
            tracing::info!(attempt, ?delay, "Scheduling reconnect");

            self.retry = Some(Box::pin(sleep(delay)));
            self.emit(ClientEvent::ReconnectScheduled { attempt, delay });
        } else {
            let attempts = self.config.reconnect.max_attempts;

            #[cfg(feature = "tracing")]
            tracing::warn!(attempts, "Reconnect attempts exhausted, giving up");

            self.retry = None;
            self.emit(ClientEvent::ReconnectExhausted { attempts });
        }
    }

    async fn disconnect(&mut self) {
        let was = self.state();

        self.retry = None;
        self.backoff.reset();
        self.queue.clear();
        self.joined.clear();
        if let Some(attempt) = self.attempt.take() {
            attempt.abort();
        }
        self.resolve_waiters(false);

        if let Some(mut link) = self.link.take() {
            self.set_state(ConnectionState::Closing);

            if let Err(e) = link.sink.close().await {
                #[cfg(feature = "tracing")]
                tracing::debug!(error = %e, "Error closing chat connection");
                #[cfg(not(feature = "tracing"))]
                let _ = &e;
            }

            // Wait for the server to confirm; anything still arriving is dropped
            let confirmed = timeout(self.config.close_timeout, async {
                while let Some(Ok(_)) = link.stream.next().await {}
            })
            .await;

            #[cfg(feature = "tracing")]
            if confirmed.is_err() {
                tracing::debug!("Server did not confirm close in time");
            }
            #[cfg(not(feature = "tracing"))]
            let _ = confirmed;
        }

        self.set_state(ConnectionState::Closed);
        if was != ConnectionState::Closed {
            self.emit(ClientEvent::Disconnected { planned: true });
        }
    }

    async fn shutdown(&mut self) {
        if let Some(attempt) = self.attempt.take() {
            attempt.abort();
        }
        if let Some(mut link) = self.link.take() {
            _ = link.sink.close().await;
        }
        self.set_state(ConnectionState::Closed);
    }
}

/// Open the transport and transmit the Validate frame, bounded by `limit`.
async fn open_and_validate(
    transport: Arc<dyn Transport>,
    session: Session,
    limit: Option<Duration>,
) -> Result<Link> {
    let handshake = async {
        let mut link = transport.open(session.url()).await?;
        link.sink
            .send(OutboundFrame::validate(&session).to_json()?)
            .await?;
        Ok::<_, Error>(link)
    };

    match limit {
        Some(limit) => timeout(limit, handshake)
            .await
            .map_err(|_e| WsError::Timeout)?,
        None => handshake.await,
    }
}

/// Resolve with `fut`'s output, or never if there is nothing to wait on.
async fn until_ready<F: Future + Unpin>(fut: Option<&mut F>) -> F::Output {
    match fut {
        Some(fut) => fut.await,
        None => pending().await,
    }
}

async fn next_frame(link: Option<&mut Link>) -> Option<Result<String>> {
    match link {
        Some(link) => link.stream.next().await,
        None => pending().await,
    }
}
