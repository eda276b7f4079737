//! Session id -> live transport.

use crate::transport::SessionTransport;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Tracks the live transport of every session.
///
/// Each operation holds the lock only for the map access itself.
#[derive(Default)]
pub struct TransportStore {
    transports: RwLock<HashMap<String, Arc<dyn SessionTransport>>>,
}

impl TransportStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite.
    pub fn store(&self, session_id: impl Into<String>, transport: Arc<dyn SessionTransport>) {
        self.transports.write().insert(session_id.into(), transport);
    }

    #[must_use]
    pub fn get(&self, session_id: &str) -> Option<Arc<dyn SessionTransport>> {
        self.transports.read().get(session_id).cloned()
    }

    /// Forget a session without closing its transport.
    pub fn remove(&self, session_id: &str) -> Option<Arc<dyn SessionTransport>> {
        self.transports.write().remove(session_id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.transports.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.transports.read().is_empty()
    }

    /// Close every tracked transport and empty the store. Close failures are logged.
    pub async fn clear(&self) {
        let drained: Vec<(String, Arc<dyn SessionTransport>)> =
            self.transports.write().drain().collect();

        for (session_id, transport) in drained {
            if let Err(e) = transport.close().await {
                tracing::error!(session_id = %session_id, error = %e, "Error closing transport");
            }
        }
    }
}
