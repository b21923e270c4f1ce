use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// A chat message that has not been transmitted yet.
///
/// The message id and timestamp are fixed when the item is created, so a
/// message that is re-queued after a failed transmission goes out with the
/// same identity and the server can recognise a duplicate.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundItem {
    pub message: String,
    pub chat_id: String,
    pub message_id: Uuid,
    pub enqueued_at: DateTime<Utc>,
}

impl OutboundItem {
    #[must_use]
    pub fn new(message: String, chat_id: String) -> Self {
        Self {
            message,
            chat_id,
            message_id: Uuid::now_v7(),
            enqueued_at: Utc::now(),
        }
    }
}

/// FIFO buffer of [`OutboundItem`]s waiting for an open connection.
#[derive(Debug, Default)]
pub(crate) struct OutboundQueue {
    items: VecDeque<OutboundItem>,
}

impl OutboundQueue {
    pub(crate) fn push(&mut self, item: OutboundItem) {
        self.items.push_back(item);
    }

    /// Take everything out for a flush, oldest first.
    pub(crate) fn take(&mut self) -> VecDeque<OutboundItem> {
        std::mem::take(&mut self.items)
    }

    /// Put back items a flush could not transmit, ahead of anything queued since.
    pub(crate) fn restore(&mut self, mut remaining: VecDeque<OutboundItem>) {
        remaining.append(&mut self.items);
        self.items = remaining;
    }

    pub(crate) fn clear(&mut self) {
        self.items.clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.items.len()
    }
}
