//! Given a materialized `BackendSet`, yields the next backend to attempt
//! for a given retry count. Grounded on `amqpprox_connectionmanager.cpp`.

use std::sync::{Arc, Mutex};

use crate::backend::Backend;
use crate::backend_set::{BackendSet, Marker};
use crate::selector::BackendSelector;

pub struct ConnectionManager {
    backend_set: Mutex<BackendSet>,
    /// Markers as they stood when this manager was built. Every retry
    /// within this manager's lifetime selects against this fixed
    /// snapshot, not the live (mutating) markers, so repeated retries
    /// for one connection attempt don't compound with concurrent
    /// attempts sharing the same farm.
    marker_snapshot: Vec<Marker>,
    selector: Option<Arc<dyn BackendSelector>>,
}

impl ConnectionManager {
    pub fn new(backend_set: BackendSet, selector: Option<Arc<dyn BackendSelector>>) -> Self {
        let marker_snapshot = backend_set.markers().to_vec();
        ConnectionManager {
            backend_set: Mutex::new(backend_set),
            marker_snapshot,
            selector,
        }
    }

    /// A vhost mapped directly to a backend has no selector: the set has
    /// one partition of one entry, returned once on `retry_count == 0`
    /// and never retried.
    pub fn get_connection(&self, retry_count: u64) -> Option<Arc<Backend>> {
        let mut guard = self.backend_set.lock().unwrap();
        match &self.selector {
            Some(selector) => selector.select(&mut guard, &self.marker_snapshot, retry_count),
            None => {
                if retry_count > 0 {
                    return None;
                }
                guard.partitions().first()?.first().cloned()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend_set::Partition;
    use crate::selector::RoundRobinSelector;

    fn backend(name: &str) -> Arc<Backend> {
        Arc::new(Backend {
            name: name.to_string(),
            datacenter: "NY".into(),
            host: "127.0.0.1".into(),
            ip: None,
            port: 5672,
            proxy_protocol: false,
            tls: false,
        })
    }

    #[test]
    fn direct_backend_is_returned_once() {
        let partition: Partition = vec![backend("b1")];
        let set = BackendSet::new(vec![partition]);
        let manager = ConnectionManager::new(set, None);

        assert_eq!(manager.get_connection(0).unwrap().name, "b1");
        assert!(manager.get_connection(1).is_none());
    }

    #[test]
    fn farm_backed_manager_delegates_to_selector() {
        let set = BackendSet::new(vec![vec![backend("b1"), backend("b2")]]);
        let manager = ConnectionManager::new(set, Some(Arc::new(RoundRobinSelector)));

        assert_eq!(manager.get_connection(0).unwrap().name, "b1");
        assert_eq!(manager.get_connection(1).unwrap().name, "b2");
    }

    #[test]
    fn empty_backend_set_with_no_selector_returns_none() {
        let set = BackendSet::new(vec![]);
        let manager = ConnectionManager::new(set, None);
        assert!(manager.get_connection(0).is_none());
    }
}
