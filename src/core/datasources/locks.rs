use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use uuid::Uuid;

/// One async mutex per data source. Status transitions and metric updates
/// are read-modify-write sequences and must hold the guard; network calls
/// must not.
#[derive(Clone, Default)]
pub struct DataSourceLocks {
    locks: Arc<RwLock<HashMap<Uuid, Arc<Mutex<()>>>>>,
}

impl DataSourceLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, id: Uuid) -> OwnedMutexGuard<()> {
        let existing = self.locks.read().await.get(&id).cloned();
        let lock = match existing {
            Some(lock) => lock,
            None => self.locks.write().await.entry(id).or_default().clone(),
        };
        lock.lock_owned().await
    }

    /// Drop the mutex of a deleted data source.
    pub async fn forget(&self, id: Uuid) {
        self.locks.write().await.remove(&id);
    }
}
