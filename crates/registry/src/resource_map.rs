//! vhost → {Farm, Backend} mapping, grounded on `amqpprox_resourcemapper.h`.

use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resource {
    Farm(String),
    Backend(String),
}

#[derive(Default)]
pub struct ResourceMapper {
    mappings: Mutex<HashMap<String, Resource>>,
    default_resource: Mutex<Option<Resource>>,
}

impl ResourceMapper {
    pub fn new() -> Self {
        ResourceMapper::default()
    }

    pub fn map_vhost_to_farm(&self, vhost: &str, farm_name: &str) {
        self.mappings
            .lock()
            .unwrap()
            .insert(vhost.to_string(), Resource::Farm(farm_name.to_string()));
    }

    pub fn map_vhost_to_backend(&self, vhost: &str, backend_name: &str) {
        self.mappings
            .lock()
            .unwrap()
            .insert(vhost.to_string(), Resource::Backend(backend_name.to_string()));
    }

    /// Last write wins: re-mapping an already-mapped vhost silently
    /// replaces the prior entry.
    pub fn unmap_vhost(&self, vhost: &str) -> bool {
        self.mappings.lock().unwrap().remove(vhost).is_some()
    }

    pub fn set_default(&self, resource: Resource) {
        *self.default_resource.lock().unwrap() = Some(resource);
    }

    pub fn remove_default(&self) -> bool {
        self.default_resource.lock().unwrap().take().is_some()
    }

    /// Resolve a vhost; falls back to the default resource if no
    /// per-vhost mapping exists.
    pub fn resolve(&self, vhost: &str) -> Option<Resource> {
        if let Some(resource) = self.mappings.lock().unwrap().get(vhost).cloned() {
            return Some(resource);
        }
        self.default_resource.lock().unwrap().clone()
    }

    /// Sorted by vhost so `MAP PRINT` output is deterministic, matching
    /// the original's `std::map`-backed print order.
    pub fn entries(&self) -> Vec<(String, Resource)> {
        let mut entries: Vec<_> = self
            .mappings
            .lock()
            .unwrap()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_write_wins_per_vhost() {
        let mapper = ResourceMapper::new();
        mapper.map_vhost_to_backend("/", "b1");
        mapper.map_vhost_to_farm("/", "f1");
        assert_eq!(mapper.resolve("/"), Some(Resource::Farm("f1".into())));
    }

    #[test]
    fn unmap_removes_only_the_specified_vhost() {
        let mapper = ResourceMapper::new();
        mapper.map_vhost_to_backend("/a", "b1");
        mapper.map_vhost_to_backend("/b", "b2");
        mapper.unmap_vhost("/a");
        assert_eq!(mapper.resolve("/a"), None);
        assert_eq!(mapper.resolve("/b"), Some(Resource::Backend("b2".into())));
    }

    #[test]
    fn falls_back_to_default_when_unmapped() {
        let mapper = ResourceMapper::new();
        mapper.set_default(Resource::Farm("default-farm".into()));
        assert_eq!(mapper.resolve("/unknown"), Some(Resource::Farm("default-farm".into())));
    }
}
