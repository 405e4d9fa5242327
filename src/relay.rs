use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::models::ShareRecord;
use crate::store::ShareStore;

/// A page's message to the worker. The oneshot sender is the dedicated
/// reply port travelling with the request.
pub enum PageMessage {
    GetSharedData {
        share_id: String,
        reply: oneshot::Sender<SharedDataResponse>,
    },
}

/// Worker's reply on the port. `payload: None` covers a miss, an expired
/// record, and an already-consumed record alike.
#[derive(Debug)]
pub struct SharedDataResponse {
    pub payload: Option<ShareRecord>,
}

/// Unsolicited worker-to-page delivery.
#[derive(Debug, Clone)]
pub enum RelayPush {
    DirectSharedData { payload: ShareRecord },
}

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("Relay channel closed")]
    ChannelClosed,
    #[error("Reply port dropped before a response arrived")]
    ReplyDropped,
}

struct PageRegistry {
    next_id: AtomicU64,
    pages: DashMap<u64, mpsc::UnboundedSender<RelayPush>>,
}

/// Cloneable handle pages use to talk to the relay worker. The worker
/// itself never times anything out; a bounded wait is the caller's job.
#[derive(Clone)]
pub struct RelayHandle {
    tx: mpsc::Sender<PageMessage>,
    registry: Arc<PageRegistry>,
}

/// A page's registration for unsolicited pushes. Deregisters on drop.
pub struct PageConnection {
    id: u64,
    pub rx: mpsc::UnboundedReceiver<RelayPush>,
    registry: Arc<PageRegistry>,
}

impl Drop for PageConnection {
    fn drop(&mut self) {
        self.registry.pages.remove(&self.id);
    }
}

/// Spawns the relay worker loop over the given store and returns its handle.
pub fn spawn(store: ShareStore) -> RelayHandle {
    let (tx, rx) = mpsc::channel(32);
    let registry = Arc::new(PageRegistry {
        next_id: AtomicU64::new(0),
        pages: DashMap::new(),
    });
    tokio::spawn(run(rx, store));
    RelayHandle { tx, registry }
}

async fn run(mut rx: mpsc::Receiver<PageMessage>, store: ShareStore) {
    while let Some(msg) = rx.recv().await {
        match msg {
            PageMessage::GetSharedData { share_id, reply } => {
                // take() deletes on read, so a second request for the same
                // id gets the "not found" reply rather than the payload twice.
                let payload = match store.take(&share_id).await {
                    Ok(payload) => payload,
                    Err(e) => {
                        warn!("Lookup failed for share {}: {}", share_id, e);
                        None
                    }
                };
                // The page may have stopped waiting; that is its call.
                let _ = reply.send(SharedDataResponse { payload });
            }
        }
    }
}

impl RelayHandle {
    /// Operation A: request a stored share and wait for the reply on a
    /// dedicated port. The record is deleted by the worker on a hit.
    pub async fn get_shared_data(&self, share_id: &str) -> Result<SharedDataResponse, RelayError> {
        let (reply, reply_rx) = oneshot::channel();
        self.tx
            .send(PageMessage::GetSharedData {
                share_id: share_id.to_string(),
                reply,
            })
            .await
            .map_err(|_| RelayError::ChannelClosed)?;
        reply_rx.await.map_err(|_| RelayError::ReplyDropped)
    }

    /// Operation B: fire-and-forget push to every registered page. Nobody
    /// listening is a silent no-op; closed pages are pruned as we go.
    pub fn push_shared_data(&self, record: ShareRecord) {
        self.registry.pages.retain(|_, page| {
            page.send(RelayPush::DirectSharedData {
                payload: record.clone(),
            })
            .is_ok()
        });
        debug!(
            "Pushed share {} to {} page(s)",
            record.id,
            self.registry.pages.len()
        );
    }

    /// Registers a page to receive unsolicited pushes for its lifetime.
    pub fn register_page(&self) -> PageConnection {
        let id = self.registry.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        self.registry.pages.insert(id, tx);
        PageConnection {
            id,
            rx,
            registry: Arc::clone(&self.registry),
        }
    }
}

#[cfg(test)]
pub(crate) fn unresponsive_handle() -> RelayHandle {
    // Accepts requests but never replies: the worker half is leaked
    // without ever being polled, like a terminated-and-not-respawned worker.
    let (tx, rx) = mpsc::channel(32);
    std::mem::forget(rx);
    RelayHandle {
        tx,
        registry: Arc::new(PageRegistry {
            next_id: AtomicU64::new(0),
            pages: DashMap::new(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tests::{memory_store, payload_with_files};

    #[tokio::test]
    async fn round_trip_returns_payload_then_not_found() {
        let store = memory_store().await;
        let relay = spawn(store.clone());
        store.save("s1", payload_with_files()).await.unwrap();

        let first = relay.get_shared_data("s1").await.unwrap();
        let record = first.payload.expect("payload on first request");
        assert_eq!(record.id, "s1");
        assert_eq!(record.files.len(), 2);

        // Already consumed: the relay replies null, not the payload twice.
        let second = relay.get_shared_data("s1").await.unwrap();
        assert!(second.payload.is_none());
    }

    #[tokio::test]
    async fn unknown_share_id_replies_null() {
        let relay = spawn(memory_store().await);
        let resp = relay.get_shared_data("missing").await.unwrap();
        assert!(resp.payload.is_none());
    }

    #[tokio::test]
    async fn direct_push_reaches_every_registered_page() {
        let store = memory_store().await;
        let relay = spawn(store.clone());
        let mut page_a = relay.register_page();
        let mut page_b = relay.register_page();

        let record = store.save("s1", payload_with_files()).await.unwrap();
        relay.push_shared_data(record.clone());

        for page in [&mut page_a, &mut page_b] {
            let RelayPush::DirectSharedData { payload } =
                page.rx.recv().await.expect("push delivered");
            assert_eq!(payload, record);
        }
    }

    #[tokio::test]
    async fn push_with_no_pages_is_a_no_op() {
        let store = memory_store().await;
        let relay = spawn(store.clone());

        let record = store.save("s1", payload_with_files()).await.unwrap();
        relay.push_shared_data(record);

        // Fire-and-forget: the store copy stays available for a later pull.
        assert!(store.get("s1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn dropped_page_is_pruned_from_the_registry() {
        let store = memory_store().await;
        let relay = spawn(store.clone());
        let mut kept = relay.register_page();
        let dropped = relay.register_page();
        drop(dropped);

        let record = store.save("s1", payload_with_files()).await.unwrap();
        relay.push_shared_data(record);

        assert!(kept.rx.recv().await.is_some());
        assert_eq!(relay.registry.pages.len(), 1);
    }
}
