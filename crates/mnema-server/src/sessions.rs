use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

/// Per-connection outbound queue capacity. A slow SSE consumer applies
/// backpressure to the message endpoint rather than buffering unboundedly.
const SESSION_QUEUE_CAP: usize = 64;

/// Open SSE sessions: hex session id to the sender feeding that stream.
///
/// Entries are removed when a push discovers the receiver is gone, so the
/// table tracks live connections only.
#[derive(Clone, Default)]
pub struct Sessions {
    inner: Arc<Mutex<HashMap<String, mpsc::Sender<String>>>>,
}

impl Sessions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mint a new session and its payload receiver.
    pub async fn create(&self) -> (String, mpsc::Receiver<String>) {
        let session_id = Uuid::new_v4().simple().to_string();
        let (tx, rx) = mpsc::channel(SESSION_QUEUE_CAP);
        self.inner.lock().await.insert(session_id.clone(), tx);
        (session_id, rx)
    }

    pub async fn sender(&self, session_id: &str) -> Option<mpsc::Sender<String>> {
        self.inner.lock().await.get(session_id).cloned()
    }

    pub async fn remove(&self, session_id: &str) {
        self.inner.lock().await.remove(session_id);
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }
}
