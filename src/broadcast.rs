use std::sync::{Mutex, PoisonError};

use axum_tws::Message;
use tokio::sync::broadcast;
use tracing::{debug, error, trace};

use crate::{
    constants::BROADCAST_CHANNEL_CAPACITY,
    protocol::{PixelUpdate, ServerMessage, encode_server_message},
};

/// Collects accepted draws and fans them out to every connection as one
/// `batchUpdate` per tick.
#[derive(Debug)]
pub struct BroadcastScheduler {
    pending: Mutex<Vec<PixelUpdate>>,
    channel: broadcast::Sender<Message>,
}

impl Default for BroadcastScheduler {
    fn default() -> Self {
        Self::new(BROADCAST_CHANNEL_CAPACITY)
    }
}

impl BroadcastScheduler {
    pub fn new(channel_cap: usize) -> Self {
        Self {
            pending: Mutex::new(Vec::new()),
            channel: broadcast::Sender::new(channel_cap),
        }
    }

    pub fn enqueue(&self, update: PixelUpdate) {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(update);
    }

    pub fn pending_len(&self) -> usize {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Swaps the pending queue for an empty one. Updates enqueued after this
    /// returns belong to the next batch.
    pub fn take_batch(&self) -> Vec<PixelUpdate> {
        std::mem::take(&mut *self.pending.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// New receivers only see batches flushed after they subscribed.
    pub fn subscribe(&self) -> broadcast::Receiver<Message> {
        self.channel.subscribe()
    }

    /// Drains the queue and publishes it. Returns the number of updates sent,
    /// or `None` when there was nothing to send.
    pub fn flush(&self) -> Option<usize> {
        let updates = self.take_batch();
        if updates.is_empty() {
            trace!("No pending updates, skipping broadcast");
            return None;
        }

        let count = updates.len();
        let msg = match encode_server_message(&ServerMessage::BatchUpdate { updates }) {
            Ok(msg) => msg,
            Err(e) => {
                error!("Failed to encode batch of {} updates: {:#}", count, e);
                return None;
            }
        };

        // Only fails when nobody is connected, in which case the batch has no
        // audience and is dropped.
        match self.channel.send(msg) {
            Ok(receivers) => debug!("Broadcasted {} updates to {} receivers", count, receivers),
            Err(_) => trace!("No active receivers, dropped batch of {} updates", count),
        }
        Some(count)
    }
}
