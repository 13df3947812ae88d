//! Lifecycle event broadcasting.
//!
//! Each database handle owns an [`EventBus`]. Events reported by the store
//! connection are relayed onto it, and the handle adds its own `Ready`.
//! Listeners either hold a raw receiver from [`EventBus::subscribe`] or
//! register a callback for one event kind with [`EventBus::on`].

use std::sync::Arc;

use quickdoc_core::{EventKind, LifecycleEvent};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Broadcast channel of lifecycle events.
///
/// Cloning yields another sender on the same channel.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<LifecycleEvent>,
}

impl EventBus {
    /// Create a bus buffering up to `capacity` events per slow listener.
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Send an event to every current listener.
    ///
    /// Events sent while nobody listens are dropped.
    pub fn emit(&self, event: LifecycleEvent) {
        let kind = event.kind();
        match self.tx.send(event) {
            Ok(receivers) => debug!(event = %kind, receivers, "Lifecycle event"),
            Err(_) => debug!(event = %kind, "No listeners for lifecycle event"),
        }
    }

    /// Receive every future event.
    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.tx.subscribe()
    }

    pub fn listener_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Call `handler` for every future event of `kind`.
    ///
    /// The subscription is taken before this returns, so events emitted right
    /// after are not missed. The task ends when the bus is dropped or the
    /// handle is aborted.
    pub fn on<F>(&self, kind: EventKind, handler: F) -> JoinHandle<()>
    where
        F: Fn(LifecycleEvent) + Send + Sync + 'static,
    {
        let mut rx = self.subscribe();
        let handler = Arc::new(handler);
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) if event.kind() == kind => handler(event),
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(event = %kind, skipped, "Listener lagged, events were dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    /// Forward everything `source` receives onto this bus.
    ///
    /// Events already queued on `source` are forwarded before this returns,
    /// which keeps connection handshake events ahead of anything the handle
    /// emits next. The rest are relayed from a background task that ends
    /// with the source channel.
    pub fn relay_from(&self, mut source: broadcast::Receiver<LifecycleEvent>) -> JoinHandle<()> {
        while let Ok(event) = source.try_recv() {
            self.emit(event);
        }

        let bus = self.clone();
        tokio::spawn(async move {
            loop {
                match source.recv().await {
                    Ok(event) => bus.emit(event),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Connection event relay lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        debug!("Connection event source closed");
                        break;
                    }
                }
            }
        })
    }
}
