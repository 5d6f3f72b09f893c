use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

/// Per-user serialisation for mutating engine paths.
///
/// Each user gets a lightweight async mutex; the map entry is dropped once
/// no caller holds or awaits it (strong count back to 1), so the table does
/// not grow with the historical user population. Cross-user operations
/// proceed in parallel.
#[derive(Clone, Default)]
pub struct UserLocks {
    inner: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl UserLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, user_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().await;
            map.retain(|_, l| Arc::strong_count(l) > 1);
            map.entry(user_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }

    #[cfg(test)]
    async fn tracked_users(&self) -> usize {
        self.inner.lock().await.len()
    }
}
