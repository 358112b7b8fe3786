//! Ordered partitions of backends with per-partition round-robin markers,
//! grounded on `amqpprox_backendset.h`.

use std::sync::Arc;

use crate::backend::Backend;

pub type Partition = Vec<Arc<Backend>>;
pub type Marker = u64;

/// A snapshot of partitions built fresh for each connection attempt;
/// markers mutate as the selector consumes entries.
#[derive(Debug, Clone)]
pub struct BackendSet {
    partitions: Vec<Partition>,
    markers: Vec<Marker>,
}

impl BackendSet {
    pub fn new(partitions: Vec<Partition>) -> Self {
        let markers = vec![0; partitions.len()];
        BackendSet { partitions, markers }
    }

    pub fn partitions(&self) -> &[Partition] {
        &self.partitions
    }

    pub fn markers(&self) -> &[Marker] {
        &self.markers
    }

    /// Bump the marker for `partition_id`, returning its new value.
    ///
    /// The original compares `partitionId > size()`, which lets
    /// `partitionId == size()` through and indexes one past the end;
    /// this is the strict `>=` bound check the spec calls out as the
    /// correct behavior.
    pub fn mark_partition(&mut self, partition_id: usize) -> Marker {
        if partition_id >= self.markers.len() {
            return 0;
        }
        self.markers[partition_id] += 1;
        self.markers[partition_id]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::IpAddr;

    fn backend(name: &str) -> Arc<Backend> {
        Arc::new(Backend {
            name: name.to_string(),
            datacenter: "NY".into(),
            host: "127.0.0.1".into(),
            ip: None::<IpAddr>,
            port: 5672,
            proxy_protocol: false,
            tls: false,
        })
    }

    #[test]
    fn mark_partition_out_of_bounds_is_a_no_op() {
        let mut set = BackendSet::new(vec![vec![backend("b1")]]);
        assert_eq!(set.mark_partition(1), 0);
        assert_eq!(set.markers(), &[0]);
    }

    #[test]
    fn mark_partition_increments_in_bounds() {
        let mut set = BackendSet::new(vec![vec![backend("b1")], vec![backend("b2")]]);
        assert_eq!(set.mark_partition(1), 1);
        assert_eq!(set.mark_partition(1), 2);
        assert_eq!(set.markers(), &[0, 2]);
    }
}
