//! Named collections of backends plus their partition policies and
//! selector, grounded on `amqpprox_farmstore.h`/`amqpprox_farm.h`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::backend::Backend;
use crate::backend_set::{BackendSet, Partition};
use crate::error::RegistryError;
use crate::partition_policy::PartitionPolicy;
use crate::selector::BackendSelector;

pub struct Farm {
    pub name: String,
    pub members: Vec<Arc<Backend>>,
    pub policy_names: Vec<String>,
    pub selector_name: String,
}

impl Farm {
    pub fn new(name: impl Into<String>, selector_name: impl Into<String>) -> Self {
        Farm {
            name: name.into(),
            members: Vec::new(),
            policy_names: Vec::new(),
            selector_name: selector_name.into(),
        }
    }

    /// The un-partitioned base set: one partition holding every member,
    /// in insertion order.
    fn base_backend_set(&self) -> BackendSet {
        let partition: Partition = self.members.clone();
        if partition.is_empty() {
            BackendSet::new(Vec::new())
        } else {
            BackendSet::new(vec![partition])
        }
    }
}

/// Owns named farms plus the named selectors and partition policies farms
/// reference, so a `Farm` can stay a plain data record instead of holding
/// trait objects directly — mirrors the original's separation between
/// `Farm` and the `BackendSelector`/`PartitionPolicy` singletons it names.
pub struct FarmStore {
    farms: Mutex<HashMap<String, Farm>>,
    selectors: HashMap<String, Arc<dyn BackendSelector>>,
    policies: HashMap<String, Arc<dyn PartitionPolicy>>,
}

impl FarmStore {
    pub fn new(
        selectors: HashMap<String, Arc<dyn BackendSelector>>,
        policies: HashMap<String, Arc<dyn PartitionPolicy>>,
    ) -> Self {
        FarmStore {
            farms: Mutex::new(HashMap::new()),
            selectors,
            policies,
        }
    }

    pub fn insert(&self, farm: Farm) -> Result<(), RegistryError> {
        let mut guard = self.farms.lock().unwrap();
        if guard.contains_key(&farm.name) {
            return Err(RegistryError::DuplicateFarm(farm.name));
        }
        guard.insert(farm.name.clone(), farm);
        Ok(())
    }

    pub fn remove(&self, name: &str) -> Result<(), RegistryError> {
        self.farms
            .lock()
            .unwrap()
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| RegistryError::UnknownFarm(name.to_string()))
    }

    pub fn add_member(&self, farm_name: &str, backend: Arc<Backend>) -> Result<(), RegistryError> {
        let mut guard = self.farms.lock().unwrap();
        let farm = guard
            .get_mut(farm_name)
            .ok_or_else(|| RegistryError::UnknownFarm(farm_name.to_string()))?;
        farm.members.push(backend);
        Ok(())
    }

    pub fn set_selector(&self, farm_name: &str, selector_name: &str) -> Result<(), RegistryError> {
        if !self.selectors.contains_key(selector_name) {
            return Err(RegistryError::UnknownSelector(selector_name.to_string()));
        }
        let mut guard = self.farms.lock().unwrap();
        let farm = guard
            .get_mut(farm_name)
            .ok_or_else(|| RegistryError::UnknownFarm(farm_name.to_string()))?;
        farm.selector_name = selector_name.to_string();
        Ok(())
    }

    pub fn add_policy(&self, farm_name: &str, policy_name: &str) -> Result<(), RegistryError> {
        if !self.policies.contains_key(policy_name) {
            return Err(RegistryError::UnknownPartitionPolicy(
                policy_name.to_string(),
            ));
        }
        let mut guard = self.farms.lock().unwrap();
        let farm = guard
            .get_mut(farm_name)
            .ok_or_else(|| RegistryError::UnknownFarm(farm_name.to_string()))?;
        farm.policy_names.push(policy_name.to_string());
        Ok(())
    }

    /// Build the materialized `BackendSet` and resolve the named selector
    /// for `farm_name`, applying its partition policies in order.
    pub fn materialize(
        &self,
        farm_name: &str,
    ) -> Result<(BackendSet, Arc<dyn BackendSelector>), RegistryError> {
        let guard = self.farms.lock().unwrap();
        let farm = guard
            .get(farm_name)
            .ok_or_else(|| RegistryError::UnknownFarm(farm_name.to_string()))?;

        let mut set = farm.base_backend_set();
        for policy_name in &farm.policy_names {
            let policy = self
                .policies
                .get(policy_name)
                .ok_or_else(|| RegistryError::UnknownPartitionPolicy(policy_name.clone()))?;
            set = policy.partition(set);
        }

        let selector = self
            .selectors
            .get(&farm.selector_name)
            .ok_or_else(|| RegistryError::UnknownSelector(farm.selector_name.clone()))?
            .clone();

        Ok((set, selector))
    }

    /// Sorted so `FARM PRINT` output is deterministic, matching the
    /// original's `std::map`-backed print order.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.farms.lock().unwrap().keys().cloned().collect();
        names.sort();
        names
    }
}
