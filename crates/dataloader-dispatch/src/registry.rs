use std::sync::Mutex;

use indexmap::IndexMap;

/// The batch-loader registry seam: named loaders accumulating pending keys
/// until a flush.
///
/// `dispatch_all` only *initiates* the bulk resolution; completion is
/// asynchronous and nothing in this crate ever waits on it. Failures of the
/// underlying bulk fetches are the registry's concern and must not feed back
/// into dispatch coordination.
pub trait LoaderRegistry: Send + Sync {
    /// Flush every loader that has pending keys.
    fn dispatch_all(&self);

    /// Read-only snapshot for observability surfaces.
    fn statistics(&self) -> RegistryStatistics;
}

#[derive(Clone, PartialEq, Eq, Debug, serde::Serialize)]
pub struct LoaderStatistics {
    pub name: String,
    pub pending_keys: usize,
    pub dispatched_batches: usize,
    pub dispatched_keys: usize,
}

#[derive(Clone, Default, PartialEq, Eq, Debug, serde::Serialize)]
pub struct RegistryStatistics {
    pub loaders: Vec<LoaderStatistics>,
}

impl RegistryStatistics {
    pub fn pending_keys(&self) -> usize {
        self.loaders.iter().map(|loader| loader.pending_keys).sum()
    }

    pub fn dispatched_batches(&self) -> usize {
        self.loaders.iter().map(|loader| loader.dispatched_batches).sum()
    }
}

#[derive(Clone, Copy, Default, Debug)]
struct LoaderState {
    pending_keys: usize,
    dispatched_batches: usize,
    dispatched_keys: usize,
}

/// Pending/dispatched key ledger for embedders that only need dispatch
/// accounting, and for tests.
#[derive(Default, Debug)]
pub struct InMemoryRegistry {
    loaders: Mutex<IndexMap<String, LoaderState>>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accumulates `key_count` keys on the named loader until the next
    /// dispatch.
    pub fn enqueue(&self, loader: &str, key_count: usize) {
        let mut loaders = self.loaders.lock().expect("loader ledger lock poisoned");
        loaders.entry(loader.to_string()).or_default().pending_keys += key_count;
    }
}

impl LoaderRegistry for InMemoryRegistry {
    fn dispatch_all(&self) {
        let mut loaders = self.loaders.lock().expect("loader ledger lock poisoned");
        for (name, state) in loaders.iter_mut() {
            if state.pending_keys == 0 {
                continue;
            }
            tracing::trace!("dispatching {} keys on loader {name}", state.pending_keys);
            state.dispatched_batches += 1;
            state.dispatched_keys += state.pending_keys;
            state.pending_keys = 0;
        }
    }

    fn statistics(&self) -> RegistryStatistics {
        let loaders = self.loaders.lock().expect("loader ledger lock poisoned");
        RegistryStatistics {
            loaders: loaders
                .iter()
                .map(|(name, state)| LoaderStatistics {
                    name: name.clone(),
                    pending_keys: state.pending_keys,
                    dispatched_batches: state.dispatched_batches,
                    dispatched_keys: state.dispatched_keys,
                })
                .collect(),
        }
    }
}
