//! Status observer registry
//!
//! Broadcast list of status sinks. Sinks are unbounded channel senders keyed
//! by registration id, so de-duplication is by handle rather than callback
//! identity and a closed subscriber can never block delivery to the others.
//! A new subscription immediately replays the last known status, closing the
//! startup race where the first real change lands before the subscriber
//! attaches.

use futures::Stream;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tracing::debug;

use crate::status::VpnStatus;

/// Opaque handle identifying one registered sink
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegistrationId(u64);

struct Sink {
    id: RegistrationId,
    tx: mpsc::UnboundedSender<VpnStatus>,
}

#[derive(Default)]
struct RegistryInner {
    next_id: u64,
    sinks: Vec<Sink>,
    last: Option<VpnStatus>,
}

#[derive(Default)]
pub struct ObserverRegistry {
    inner: Arc<Mutex<RegistryInner>>,
}

impl ObserverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new sink and replay the last known status into it
    pub fn subscribe(&self) -> StatusSubscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.inner.lock().unwrap();
        inner.next_id += 1;
        let id = RegistrationId(inner.next_id);
        if let Some(last) = inner.last {
            let _ = tx.send(last);
        }
        inner.sinks.push(Sink { id, tx });
        debug!("Registered status observer {:?}", id);
        StatusSubscription {
            id,
            rx,
            registry: self.inner.clone(),
        }
    }

    pub fn unregister(&self, id: RegistrationId) {
        unregister(&self.inner, id);
    }

    /// Deliver one canonical status to every registered sink. The same value
    /// goes to all sinks; closed sinks are pruned.
    pub fn broadcast(&self, status: VpnStatus) {
        let mut inner = self.inner.lock().unwrap();
        inner.last = Some(status);
        inner.sinks.retain(|sink| sink.tx.send(status).is_ok());
        debug!(
            "Broadcast status '{}' to {} observer(s)",
            status,
            inner.sinks.len()
        );
    }

    /// Drop every registered sink
    pub fn clear(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.sinks.clear();
        inner.last = None;
    }

    pub fn observer_count(&self) -> usize {
        self.inner.lock().unwrap().sinks.len()
    }
}

fn unregister(inner: &Arc<Mutex<RegistryInner>>, id: RegistrationId) {
    let mut inner = inner.lock().unwrap();
    inner.sinks.retain(|sink| sink.id != id);
}

/// Receiving side of one registration; unregisters itself on drop
pub struct StatusSubscription {
    id: RegistrationId,
    rx: mpsc::UnboundedReceiver<VpnStatus>,
    registry: Arc<Mutex<RegistryInner>>,
}

impl StatusSubscription {
    pub fn id(&self) -> RegistrationId {
        self.id
    }

    /// Next broadcast status; `None` once the registry dropped this sink
    pub async fn recv(&mut self) -> Option<VpnStatus> {
        self.rx.recv().await
    }

    /// Non-blocking drain helper
    pub fn try_recv(&mut self) -> Option<VpnStatus> {
        self.rx.try_recv().ok()
    }
}

impl Stream for StatusSubscription {
    type Item = VpnStatus;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for StatusSubscription {
    fn drop(&mut self) {
        unregister(&self.registry, self.id);
    }
}
