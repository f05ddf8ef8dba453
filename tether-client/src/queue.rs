//! Outbound message queue
//!
//! Messages submitted while the connection is not usable wait here in
//! submission order. Once connected the state machine drains the queue into
//! the socket one message at a time: a message is only considered sent once
//! the socket accepted the write, and the next one is not attempted before
//! that.
//!
//! If a write fails mid-drain the message goes back to the head of the
//! queue, so the next successful drain starts with it and relative order is
//! preserved. The queue never deduplicates or reorders.

use crate::transport::Socket;
use std::collections::VecDeque;
use tether_core::{Envelope, Error, WireMessage};
use tokio::time::Instant;

/// A message waiting for a usable connection
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedMessage {
    /// The payload to send
    pub envelope: Envelope,
    /// When `send()` handed it over
    pub enqueued_at: Instant,
}

impl QueuedMessage {
    /// Stamp a message with the current time
    pub fn new(envelope: Envelope) -> Self {
        Self {
            envelope,
            enqueued_at: Instant::now(),
        }
    }
}

/// A drain that stopped because the socket rejected a write
#[derive(Debug, Clone)]
pub struct DrainError {
    /// Messages written before the failure
    pub sent: usize,
    /// The write error
    pub error: Error,
}

/// FIFO buffer of messages awaiting transmission
#[derive(Debug, Default)]
pub struct OutboundQueue {
    messages: VecDeque<QueuedMessage>,
}

impl OutboundQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Append to the tail
    pub fn enqueue(&mut self, envelope: Envelope) {
        self.messages.push_back(QueuedMessage::new(envelope));
    }

    /// Put messages back at the head, keeping their relative order
    pub fn requeue_front(&mut self, messages: impl IntoIterator<Item = QueuedMessage>) {
        let messages: Vec<_> = messages.into_iter().collect();
        for message in messages.into_iter().rev() {
            self.messages.push_front(message);
        }
    }

    /// Number of waiting messages
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// True when nothing is waiting
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Look at the waiting messages in send order
    pub fn iter(&self) -> impl Iterator<Item = &QueuedMessage> {
        self.messages.iter()
    }

    /// Drop everything, returning how many messages were discarded
    pub fn clear(&mut self) -> usize {
        let discarded = self.messages.len();
        self.messages.clear();
        discarded
    }

    /// Write every queued message to `socket` in FIFO order
    ///
    /// `on_sent` runs after each accepted write, in order. On the first
    /// failed write that message is pushed back to the head and draining
    /// stops; everything behind it stays queued untouched.
    pub async fn drain_into<F>(
        &mut self,
        socket: &mut dyn Socket,
        mut on_sent: F,
    ) -> Result<usize, DrainError>
    where
        F: FnMut(&QueuedMessage),
    {
        let mut sent = 0;
        while let Some(message) = self.messages.pop_front() {
            let frame = WireMessage::Payload(message.envelope.clone());
            match socket.send(&frame).await {
                Ok(()) => {
                    sent += 1;
                    on_sent(&message);
                }
                Err(error) => {
                    self.requeue_front(std::iter::once(message));
                    return Err(DrainError { sent, error });
                }
            }
        }
        Ok(sent)
    }
}
