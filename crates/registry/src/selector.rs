//! Backend selection over a [`BackendSet`], grounded on
//! `amqpprox_backendselector.h` / `amqpprox_robinbackendselector.h`.

use std::sync::Arc;

use crate::backend::Backend;
use crate::backend_set::{BackendSet, Marker};

pub trait BackendSelector: Send + Sync {
    fn name(&self) -> &str;

    /// Select the backend for the given `retry_count` against a fixed
    /// `markers` snapshot, mutating the live partition marker consumed so
    /// the *next* connection manager built from this backend set starts
    /// from a different point. Returns `None` once `retry_count` exhausts
    /// every partition.
    ///
    /// `markers` is a snapshot taken once when the owning connection
    /// manager was constructed, not `backend_set`'s live markers — every
    /// retry within one connection attempt must be computed against the
    /// same starting point, or two failed attempts within one retry loop
    /// skip twice as far as intended.
    fn select(
        &self,
        backend_set: &mut BackendSet,
        markers: &[Marker],
        retry_count: u64,
    ) -> Option<Arc<Backend>>;
}

/// Scans partitions in order, consuming `retry_count` attempts across the
/// flattened partition budget: if `retry_count >= partition.len()`, it
/// subtracts and moves to the next partition; otherwise it returns entry
/// `(marker + retry_count) % partition.len()` and bumps that partition's
/// marker.
pub struct RoundRobinSelector;

impl BackendSelector for RoundRobinSelector {
    fn name(&self) -> &str {
        "round-robin"
    }

    fn select(
        &self,
        backend_set: &mut BackendSet,
        markers: &[Marker],
        retry_count: u64,
    ) -> Option<Arc<Backend>> {
        let mut retry = retry_count;

        for (i, marker) in markers.iter().enumerate() {
            let partition_size = backend_set.partitions()[i].len() as u64;
            if partition_size == 0 {
                continue;
            }
            if retry >= partition_size {
                retry -= partition_size;
                continue;
            }
            let point = ((marker + retry) % partition_size) as usize;
            let backend = backend_set.partitions()[i][point].clone();
            backend_set.mark_partition(i);
            return Some(backend);
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Backend;

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

    /// Two independent connections each starting at `retry_count == 0`
    /// round-robin across separate calls because the *live* marker moves
    /// between them, even though a single connection's own retries
    /// within one call would all see the same snapshot.
    #[test]
    fn single_partition_wraps_by_marker_plus_retry() {
        let selector = RoundRobinSelector;
        let mut set = BackendSet::new(vec![vec![backend("b1"), backend("b2"), backend("b3")]]);
        let markers = set.markers().to_vec();
        let first = selector.select(&mut set, &markers, 0).unwrap();
        assert_eq!(first.name, "b1");
        let markers = set.markers().to_vec();
        let second = selector.select(&mut set, &markers, 0).unwrap();
        assert_eq!(second.name, "b2");
    }

    #[test]
    fn retry_exceeding_partition_moves_to_next_partition() {
        let selector = RoundRobinSelector;
        let mut set = BackendSet::new(vec![vec![backend("b1"), backend("b2")], vec![backend("b3")]]);
        let markers = set.markers().to_vec();
        let chosen = selector.select(&mut set, &markers, 2).unwrap();
        assert_eq!(chosen.name, "b3");
    }

    #[test]
    fn exhausted_retry_returns_none() {
        let selector = RoundRobinSelector;
        let mut set = BackendSet::new(vec![vec![backend("b1")]]);
        let markers = set.markers().to_vec();
        assert!(selector.select(&mut set, &markers, 5).is_none());
    }

    #[test]
    fn no_partitions_returns_none() {
        let selector = RoundRobinSelector;
        let mut set = BackendSet::new(vec![]);
        let markers = set.markers().to_vec();
        assert!(selector.select(&mut set, &markers, 0).is_none());
    }

    /// Retries *within one connection attempt* must use the marker
    /// snapshot from when the attempt started, not the live marker —
    /// otherwise two failed attempts against the same partition skip an
    /// extra slot each time instead of stepping through it once.
    #[test]
    fn retries_within_one_attempt_use_a_fixed_marker_snapshot() {
        let selector = RoundRobinSelector;
        let mut set = BackendSet::new(vec![vec![backend("b1"), backend("b2"), backend("b3")]]);
        let snapshot = set.markers().to_vec();

        let first = selector.select(&mut set, &snapshot, 0).unwrap();
        assert_eq!(first.name, "b1");
        let second = selector.select(&mut set, &snapshot, 1).unwrap();
        assert_eq!(second.name, "b2");
        let third = selector.select(&mut set, &snapshot, 2).unwrap();
        assert_eq!(third.name, "b3");
    }
}
