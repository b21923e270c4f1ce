use futures::Stream;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

use super::types::response::InboundEvent;
use crate::Result;
use crate::ws::WsError;

/// Broadcast channel capacity for [`BroadcastStore`].
const BROADCAST_CAPACITY: usize = 1024;

/// Receives every valid inbound event, in arrival order.
///
/// This is the hand-off point to the app's message store. `dispatch` is
/// called from the connection driver, so it must not block.
pub trait MessageStore: Send + Sync + 'static {
    fn dispatch(&self, event: InboundEvent);
}

impl<F> MessageStore for F
where
    F: Fn(InboundEvent) + Send + Sync + 'static,
{
    fn dispatch(&self, event: InboundEvent) {
        self(event);
    }
}

/// [`MessageStore`] that fans events out to any number of streams.
#[derive(Debug, Clone)]
pub struct BroadcastStore {
    tx: broadcast::Sender<InboundEvent>,
}

impl Default for BroadcastStore {
    fn default() -> Self {
        Self::new()
    }
}

impl BroadcastStore {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self { tx }
    }

    /// Stream of events dispatched after this call.
    ///
    /// A subscriber that falls more than the channel capacity behind gets a
    /// [`WsError::Lagged`] error and the stream ends.
    pub fn subscribe(&self) -> impl Stream<Item = Result<InboundEvent>> + use<> {
        let mut rx = self.tx.subscribe();

        async_stream::try_stream! {
            loop {
                match rx.recv().await {
                    Ok(event) => yield event,
                    Err(RecvError::Lagged(count)) => {
                        #[cfg(feature = "tracing")]
                        tracing::warn!("Inbound event subscriber lagged, missed {count} events");
                        Err(WsError::Lagged { count })?;
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }
    }

    /// Events for a single chat.
    pub fn subscribe_chat(
        &self,
        chat_id: String,
    ) -> impl Stream<Item = Result<InboundEvent>> + use<> {
        use futures::StreamExt as _;

        self.subscribe().filter(move |item| {
            let keep = match item {
                Ok(event) => event.chat_id == chat_id,
                Err(_) => true,
            };
            std::future::ready(keep)
        })
    }
}

impl MessageStore for BroadcastStore {
    fn dispatch(&self, event: InboundEvent) {
        // No subscribers is not an error
        _ = self.tx.send(event);
    }
}
