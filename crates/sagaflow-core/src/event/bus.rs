//! Broadcast bus for saga lifecycle events.
//!
//! One bus may be shared by many orchestrators. Observers either take the
//! raw stream of every saga's events with [`SagaEventBus::subscribe`], or
//! follow a single saga with [`SagaEventBus::watch`].

use sagaflow_types::event::SagaEvent;
use tokio::sync::broadcast::{self, error::RecvError};

/// Channel capacity used by [`SagaEventBus::default`].
pub const DEFAULT_CAPACITY: usize = 256;

/// Cloneable handle to a broadcast channel of [`SagaEvent`]s.
///
/// Publishing never blocks and never fails: with no subscribers the event is
/// dropped, and slow subscribers lose the oldest events.
#[derive(Clone, Debug)]
pub struct SagaEventBus {
    sender: broadcast::Sender<SagaEvent>,
}

impl SagaEventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Every event published after this call, from every saga.
    pub fn subscribe(&self) -> broadcast::Receiver<SagaEvent> {
        self.sender.subscribe()
    }

    /// Events of the saga `saga_id` only.
    pub fn watch(&self, saga_id: impl Into<String>) -> SagaWatch {
        SagaWatch {
            saga_id: saga_id.into(),
            receiver: self.sender.subscribe(),
        }
    }

    pub fn publish(&self, event: SagaEvent) {
        // Err only means nobody is listening.
        let _ = self.sender.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for SagaEventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// Receiver filtered to one saga id.
#[derive(Debug)]
pub struct SagaWatch {
    saga_id: String,
    receiver: broadcast::Receiver<SagaEvent>,
}

impl SagaWatch {
    pub fn saga_id(&self) -> &str {
        &self.saga_id
    }

    /// Next event for the watched saga, or `None` once every bus handle is
    /// dropped. Events lost to lag are skipped with a warning.
    pub async fn recv(&mut self) -> Option<SagaEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) if event.saga_id() == self.saga_id => return Some(event),
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(saga_id = %self.saga_id, skipped, "saga event watcher lagged");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Wait for the watched saga's `SagaFinished` event and return it.
    pub async fn finished(&mut self) -> Option<SagaEvent> {
        while let Some(event) = self.recv().await {
            if matches!(event, SagaEvent::SagaFinished { .. }) {
                return Some(event);
            }
        }
        None
    }
}
