//! Multi-subscriber event fanout for the authority.
//!
//! Each `subscribe` call gets an independent feed; dropping the returned
//! [`Subscription`] unsubscribes it. No global listener state: every bus is
//! owned by the bridge instance that emits on it.

use futures::Stream;
use reelhouse_types::{ClientId, EngineId, Outcome};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// The network accepted a wager and assigned its engine id.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubmissionEvent {
    pub client_id: ClientId,
    pub engine_id: EngineId,
}

/// A wager confirmed with an outcome.
#[derive(Clone, Debug, PartialEq)]
pub struct OutcomeEvent {
    pub client_id: ClientId,
    pub engine_id: EngineId,
    pub outcome: Outcome,
}

/// A wager failed, or a session-level fault occurred (`client_id` absent).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ErrorEvent {
    pub client_id: Option<ClientId>,
    pub message: String,
}

struct Registry<T> {
    next_id: u64,
    senders: HashMap<u64, mpsc::UnboundedSender<T>>,
}

impl<T> Default for Registry<T> {
    fn default() -> Self {
        Self {
            next_id: 0,
            senders: HashMap::new(),
        }
    }
}

/// One event topic with any number of independent listeners.
pub struct EventBus<T> {
    registry: Arc<Mutex<Registry<T>>>,
}

impl<T> Default for EventBus<T> {
    fn default() -> Self {
        Self {
            registry: Arc::new(Mutex::new(Registry::default())),
        }
    }
}

impl<T: Clone> EventBus<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open an independent feed. Dropping the subscription closes it.
    pub fn subscribe(&self) -> Subscription<T> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut registry = self.registry.lock().unwrap();
        let id = registry.next_id;
        registry.next_id += 1;
        registry.senders.insert(id, tx);
        Subscription {
            id,
            registry: self.registry.clone(),
            receiver: rx,
        }
    }

    /// Deliver `event` to every live subscriber, at most once each.
    pub fn emit(&self, event: T) {
        let mut registry = self.registry.lock().unwrap();
        registry
            .senders
            .retain(|_, sender| sender.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.registry.lock().unwrap().senders.len()
    }
}

/// A live feed from an [`EventBus`]. Unsubscribes on drop.
pub struct Subscription<T> {
    id: u64,
    registry: Arc<Mutex<Registry<T>>>,
    receiver: mpsc::UnboundedReceiver<T>,
}

impl<T> Subscription<T> {
    /// Receive the next event, or `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<T> {
        self.receiver.recv().await
    }

    /// Drain without waiting.
    pub fn try_recv(&mut self) -> Option<T> {
        self.receiver.try_recv().ok()
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.registry.lock().unwrap().senders.remove(&self.id);
    }
}

impl<T> Stream for Subscription<T> {
    type Item = T;

    fn poll_next(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}
