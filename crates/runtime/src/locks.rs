use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Per-name mutual exclusion. Operations on the same container or service name
/// run one at a time; different names never block each other.
#[derive(Clone, Default)]
pub struct NameLocks {
    inner: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

pub struct NameGuard {
    name: String,
    _guard: OwnedMutexGuard<()>,
}

impl NameGuard {
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl NameLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, name: &str) -> NameGuard {
        let mutex = self
            .inner
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        NameGuard {
            name: name.to_string(),
            _guard: mutex.lock_owned().await,
        }
    }

    pub fn try_lock(&self, name: &str) -> Option<NameGuard> {
        let mutex = self
            .inner
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        mutex.try_lock_owned().ok().map(|guard| NameGuard {
            name: name.to_string(),
            _guard: guard,
        })
    }

    /// Drops entries nobody holds or waits on.
    pub fn prune_idle(&self) {
        self.inner.retain(|_, mutex| Arc::strong_count(mutex) > 1);
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}
