//! In-process event bus
//!
//! Fans out every store append to live subscribers over a Tokio broadcast
//! channel. Publishing never blocks and never errors; a subscriber that stops
//! reading has its oldest undelivered events dropped by the channel, and the
//! receiving wrapper surfaces the count.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::broadcast;
use tracing::debug;

use crate::domain::SlotEvent;

#[derive(Debug, Error)]
pub enum BusError {
    #[error("Subscriber limit reached ({0})")]
    SubscriberLimit(usize),
}

/// Shared reference to the event bus.
pub type SharedEventBus = Arc<EventBus>;

pub struct EventBus {
    sender: broadcast::Sender<SlotEvent>,
    max_subscribers: usize,
}

impl EventBus {
    pub fn new(capacity: usize, max_subscribers: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            max_subscribers,
        }
    }

    pub fn shared(self) -> SharedEventBus {
        Arc::new(self)
    }

    /// Publish an event to all subscribers. Never blocks; an absent audience
    /// is not an error.
    pub fn publish(&self, event: SlotEvent) {
        match self.sender.send(event) {
            Ok(receivers) => debug!(receivers, "Event published"),
            Err(_) => debug!("Event published (no receivers)"),
        }
    }

    /// Subscribe to events published from now on. Missed history is not
    /// replayed.
    pub fn subscribe(&self, filter: EventFilter) -> Result<EventStream, BusError> {
        if self.sender.receiver_count() >= self.max_subscribers {
            return Err(BusError::SubscriberLimit(self.max_subscribers));
        }
        Ok(EventStream {
            receiver: self.sender.subscribe(),
            filter,
            dropped: 0,
        })
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// Receiver-side filter by slot and/or session.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub slot: Option<String>,
    pub session: Option<String>,
}

impl EventFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn slot(mut self, slot: &str) -> Self {
        self.slot = Some(slot.to_string());
        self
    }

    pub fn session(mut self, session: &str) -> Self {
        self.session = Some(session.to_string());
        self
    }

    pub fn matches(&self, event: &SlotEvent) -> bool {
        if let Some(slot) = &self.slot {
            if &event.slot != slot {
                return false;
            }
        }
        if let Some(session) = &self.session {
            if &event.session != session {
                return false;
            }
        }
        true
    }
}

/// A live subscription. Dropping the stream cancels the subscription.
pub struct EventStream {
    receiver: broadcast::Receiver<SlotEvent>,
    filter: EventFilter,
    dropped: u64,
}

impl EventStream {
    /// Receive the next matching event. Returns `None` once the bus has shut
    /// down. Overflow is absorbed by counting the skipped events and
    /// continuing with the oldest still-buffered one.
    pub async fn recv(&mut self) -> Option<SlotEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => {
                    if self.filter.matches(&event) {
                        return Some(event);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    self.dropped += n;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Events dropped for this subscriber because it fell behind.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}
