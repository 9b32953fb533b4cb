//! Transactional store over the object graph
//!
//! Readers take an immutable snapshot (`Arc<Graph>`) and never wait for
//! writers. Writers are serialised by a single transaction lock: each one
//! works on a private copy of the graph, and the copy replaces the
//! published snapshot only when the closure succeeds and the backend has
//! saved it. A failed transaction leaves no trace.

use std::sync::Arc;

use adcm_common::{AdcmError, Result};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info};

use crate::backend::{GraphPersistence, MemoryPersistence};
use crate::graph::Graph;

pub struct Store {
    published: RwLock<Arc<Graph>>,
    transaction: Mutex<()>,
    backend: Arc<dyn GraphPersistence>,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("backend", &self.backend.describe())
            .finish_non_exhaustive()
    }
}

impl Store {
    /// Open a store, loading the last committed graph from `backend`
    pub fn open(backend: Arc<dyn GraphPersistence>) -> anyhow::Result<Self> {
        let graph = match backend.load()? {
            Some(graph) => {
                info!(backend = %backend.describe(), "Loaded object graph snapshot");
                graph
            }
            None => {
                info!(backend = %backend.describe(), "Starting with an empty object graph");
                Graph::new()
            }
        };
        Ok(Self {
            published: RwLock::new(Arc::new(graph)),
            transaction: Mutex::new(()),
            backend,
        })
    }

    /// Volatile store for tests and dry runs
    pub fn in_memory() -> Self {
        Self {
            published: RwLock::new(Arc::new(Graph::new())),
            transaction: Mutex::new(()),
            backend: Arc::new(MemoryPersistence::new()),
        }
    }

    /// Consistent view of the last committed graph
    pub fn snapshot(&self) -> Arc<Graph> {
        self.published.read().clone()
    }

    pub fn read<T>(&self, f: impl FnOnce(&Graph) -> T) -> T {
        f(&self.snapshot())
    }

    /// Run a transaction; commits only when `f` succeeds
    pub fn write<T>(&self, f: impl FnOnce(&mut Graph) -> Result<T>) -> Result<T> {
        let _guard = self.transaction.lock();
        let mut working = (*self.snapshot()).clone();
        let value = f(&mut working)?;
        if let Err(e) = self.backend.save(&working) {
            error!(error = %format!("{:#}", e), "Failed to persist object graph");
            return Err(AdcmError::Storage(format!("{:#}", e)));
        }
        *self.published.write() = Arc::new(working);
        debug!("Committed transaction");
        Ok(value)
    }

    pub fn backend(&self) -> &Arc<dyn GraphPersistence> {
        &self.backend
    }
}
