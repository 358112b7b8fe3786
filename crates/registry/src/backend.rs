//! Backend identity, grounded on `amqpprox_backend.h`/`amqpprox_backendstore.h`.

use std::collections::HashMap;
use std::fmt;
use std::net::IpAddr;
use std::sync::{Arc, Mutex};

use crate::error::RegistryError;

/// Immutable backend identity. Farms and in-flight sessions hold `Arc`
/// clones; a backend removed from the store stays alive until the last
/// clone is dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backend {
    pub name: String,
    pub datacenter: String,
    pub host: String,
    pub ip: Option<IpAddr>,
    pub port: u16,
    pub proxy_protocol: bool,
    pub tls: bool,
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} -> {}:{} (dc={}, proxy_protocol={}, tls={})",
            self.name, self.host, self.port, self.datacenter, self.proxy_protocol, self.tls
        )
    }
}

/// Name-keyed store of backends. `insert` is atomic under a single mutex
/// guard: the original's `BackendStore::insert` looked up the name
/// without holding the lock, then reacquired it to insert, leaving a
/// window for two concurrent inserts of the same name to both succeed;
/// here the whole check-then-insert happens under one guard.
#[derive(Default)]
pub struct BackendStore {
    backends: Mutex<HashMap<String, Arc<Backend>>>,
}

impl BackendStore {
    pub fn new() -> Self {
        BackendStore::default()
    }

    pub fn insert(&self, backend: Backend) -> Result<Arc<Backend>, RegistryError> {
        let mut guard = self.backends.lock().unwrap();
        if guard.contains_key(&backend.name) {
            return Err(RegistryError::DuplicateBackend(backend.name));
        }
        let arc = Arc::new(backend);
        guard.insert(arc.name.clone(), arc.clone());
        Ok(arc)
    }

    pub fn remove(&self, name: &str) -> Result<Arc<Backend>, RegistryError> {
        self.backends
            .lock()
            .unwrap()
            .remove(name)
            .ok_or_else(|| RegistryError::UnknownBackend(name.to_string()))
    }

    pub fn lookup(&self, name: &str) -> Option<Arc<Backend>> {
        self.backends.lock().unwrap().get(name).cloned()
    }

    pub fn lookup_by_address(&self, host: &str, port: u16) -> Option<Arc<Backend>> {
        self.backends
            .lock()
            .unwrap()
            .values()
            .find(|b| b.host == host && b.port == port)
            .cloned()
    }

    /// Sorted by name so `BACKEND PRINT` output is deterministic, the way
    /// the original prints from a `std::map` rather than a hash map.
    pub fn all(&self) -> Vec<Arc<Backend>> {
        let mut backends: Vec<_> = self.backends.lock().unwrap().values().cloned().collect();
        backends.sort_by(|a, b| a.name.cmp(&b.name));
        backends
    }
}
