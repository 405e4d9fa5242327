use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use url::Url;

use crate::models::{IntakeParams, SharedDataView};
use crate::relay::{RelayHandle, RelayPush};

/// Bounded wait on the share-id round trip. A worker that never responds
/// must leave the page with "no shared data", not a hang.
pub const SHARE_FETCH_TIMEOUT: Duration = Duration::from_secs(3);

/// Per-page resolution state.
#[derive(Debug, Clone, PartialEq)]
pub enum IntakeState {
    Idle,
    Resolving,
    Resolved(SharedDataView),
}

struct Inner {
    state: IntakeState,
    /// Set when an unsolicited push produced the current state. A push
    /// overrides the other strategies, including ones still in flight, so
    /// a slower resolution must not clobber it.
    push_owned: bool,
}

/// Page-side coordinator: reconciles the three retrieval paths (URL
/// parameters, share-id round trip, unsolicited push) into one
/// [`SharedDataView`], exactly once per share.
pub struct IntakeCoordinator {
    relay: RelayHandle,
    inner: Arc<Mutex<Inner>>,
    listener: JoinHandle<()>,
}

impl IntakeCoordinator {
    /// Creates the coordinator and attaches the always-on push listener for
    /// the page's full lifetime.
    pub fn new(relay: RelayHandle) -> Self {
        let inner = Arc::new(Mutex::new(Inner {
            state: IntakeState::Idle,
            push_owned: false,
        }));

        let mut page = relay.register_page();
        let listener_inner = Arc::clone(&inner);
        let listener = tokio::spawn(async move {
            while let Some(push) = page.rx.recv().await {
                let RelayPush::DirectSharedData { payload } = push;
                debug!("Direct share push received for {}", payload.id);
                let mut guard = listener_inner.lock().unwrap();
                guard.state = IntakeState::Resolved(SharedDataView::from(payload));
                guard.push_owned = true;
            }
        });

        Self {
            relay,
            inner,
            listener,
        }
    }

    /// Runs the retrieval strategies for the given page URL, in precedence
    /// order, stopping at the first that yields data. Call on mount and on
    /// each tracked navigation. Returns the resolved view, if any.
    pub async fn resolve(&self, page_url: &str) -> Option<SharedDataView> {
        {
            let mut guard = self.inner.lock().unwrap();
            if guard.push_owned {
                if let IntakeState::Resolved(view) = &guard.state {
                    return Some(view.clone());
                }
            }
            guard.state = IntakeState::Resolving;
        }

        let resolved = self.run_strategies(parse_intake_params(page_url)).await;

        let mut guard = self.inner.lock().unwrap();
        if guard.push_owned {
            // A push landed while we were resolving; it wins.
            if let IntakeState::Resolved(view) = &guard.state {
                return Some(view.clone());
            }
        }
        match resolved {
            Some(view) => {
                guard.state = IntakeState::Resolved(view.clone());
                Some(view)
            }
            None => {
                guard.state = IntakeState::Idle;
                None
            }
        }
    }

    async fn run_strategies(&self, params: IntakeParams) -> Option<SharedDataView> {
        // Direct URL values are synchronous and need no cross-context call,
        // so they are checked first. No file support on this path.
        if params.has_direct_values() {
            return Some(SharedDataView {
                title: params.title,
                text: params.text,
                url: params.url,
                images: Vec::new(),
            });
        }

        // Share-id round trip, with a bounded wait on the reply port.
        let share_id = params.share_id?;
        match tokio::time::timeout(SHARE_FETCH_TIMEOUT, self.relay.get_shared_data(&share_id))
            .await
        {
            Ok(Ok(response)) => response.payload.map(SharedDataView::from),
            Ok(Err(e)) => {
                warn!("Share lookup failed for {}: {}", share_id, e);
                None
            }
            Err(_) => {
                warn!(
                    "Timed out waiting for share {} after {:?}",
                    share_id, SHARE_FETCH_TIMEOUT
                );
                None
            }
        }
    }

    /// The currently resolved view, if any.
    pub fn shared_data(&self) -> Option<SharedDataView> {
        match &self.inner.lock().unwrap().state {
            IntakeState::Resolved(view) => Some(view.clone()),
            _ => None,
        }
    }

    pub fn state(&self) -> IntakeState {
        self.inner.lock().unwrap().state.clone()
    }

    /// The "consumed" transition: the UI used or rejected the data. Drops
    /// the view (releasing any image buffers) and returns to Idle so the
    /// same share is never reprocessed.
    pub fn clear(&self) {
        let mut guard = self.inner.lock().unwrap();
        guard.state = IntakeState::Idle;
        guard.push_owned = false;
    }
}

impl Drop for IntakeCoordinator {
    fn drop(&mut self) {
        // Tears down the push listener, which deregisters the page.
        self.listener.abort();
    }
}

/// Extracts intake parameters from a full page URL. Any malformed input
/// degrades to "no parameters"; a bad URL must never break the page.
fn parse_intake_params(page_url: &str) -> IntakeParams {
    let url = match Url::parse(page_url) {
        Ok(url) => url,
        Err(e) => {
            warn!("Unparseable intake URL {:?}: {}", page_url, e);
            return IntakeParams::default();
        }
    };
    let Some(query) = url.query() else {
        return IntakeParams::default();
    };
    match serde_qs::from_str(query) {
        Ok(params) => params,
        Err(e) => {
            warn!("Unparseable intake query {:?}: {}", query, e);
            IntakeParams::default()
        }
    }
}
