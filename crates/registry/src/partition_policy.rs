//! Partition policies: pure transforms over a [`BackendSet`]'s partitions.
//! Grounded on `amqpprox_partitionpolicy.h` / `amqpprox_affinitypartitionpolicy.h`.

use std::sync::Arc;

use crate::backend_set::BackendSet;
use crate::datacenter::Datacenter;

pub trait PartitionPolicy: Send + Sync {
    fn name(&self) -> &str;
    fn partition(&self, backend_set: BackendSet) -> BackendSet;
}

/// Splits each input partition in two: entries whose datacenter tag
/// matches the local datacenter first, everything else second; empty
/// partitions are dropped and inter-partition order is otherwise kept.
pub struct AffinityPartitionPolicy {
    datacenter: Arc<Datacenter>,
}

impl AffinityPartitionPolicy {
    pub fn new(datacenter: Arc<Datacenter>) -> Self {
        AffinityPartitionPolicy { datacenter }
    }
}

impl PartitionPolicy for AffinityPartitionPolicy {
    fn name(&self) -> &str {
        "datacenter-affinity"
    }

    fn partition(&self, backend_set: BackendSet) -> BackendSet {
        let local = self.datacenter.get();
        let mut partitions = Vec::new();

        for partition in backend_set.partitions() {
            let (with_affinity, no_affinity): (Vec<_>, Vec<_>) = partition
                .iter()
                .cloned()
                .partition(|backend| backend.datacenter == local);

            if !with_affinity.is_empty() {
                partitions.push(with_affinity);
            }
            if !no_affinity.is_empty() {
                partitions.push(no_affinity);
            }
        }

        BackendSet::new(partitions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Backend;
    use std::sync::Arc;

    fn backend(name: &str, dc: &str) -> Arc<Backend> {
        Arc::new(Backend {
            name: name.to_string(),
            datacenter: dc.to_string(),
            host: "127.0.0.1".into(),
            ip: None,
            port: 5672,
            proxy_protocol: false,
            tls: false,
        })
    }

    #[test]
    fn affinity_matching_partition_precedes_non_matching() {
        let datacenter = Arc::new(Datacenter::new("NY".to_string()));
        let policy = AffinityPartitionPolicy::new(datacenter);
        let input = BackendSet::new(vec![vec![
            backend("b1", "NY"),
            backend("b2", "LN"),
            backend("b3", "NY"),
        ]]);

        let output = policy.partition(input);
        assert_eq!(output.partitions().len(), 2);
        let names = |p: &[Arc<Backend>]| p.iter().map(|b| b.name.clone()).collect::<Vec<_>>();
        assert_eq!(names(&output.partitions()[0]), vec!["b1", "b3"]);
        assert_eq!(names(&output.partitions()[1]), vec!["b2"]);
    }

    #[test]
    fn all_backends_preserved_and_no_partition_is_empty() {
        let datacenter = Arc::new(Datacenter::new("NY".to_string()));
        let policy = AffinityPartitionPolicy::new(datacenter);
        let input = BackendSet::new(vec![
            vec![backend("b1", "NY")],
            vec![backend("b2", "LN"), backend("b3", "LN")],
        ]);

        let output = policy.partition(input);
        let total: usize = output.partitions().iter().map(|p| p.len()).sum();
        assert_eq!(total, 3);
        assert!(output.partitions().iter().all(|p| !p.is_empty()));
    }

    #[test]
    fn fully_matching_partition_produces_no_second_half() {
        let datacenter = Arc::new(Datacenter::new("NY".to_string()));
        let policy = AffinityPartitionPolicy::new(datacenter);
        let input = BackendSet::new(vec![vec![backend("b1", "NY"), backend("b2", "NY")]]);
        let output = policy.partition(input);
        assert_eq!(output.partitions().len(), 1);
    }
}
