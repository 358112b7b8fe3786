//! Holds the proxy's local datacenter tag, grounded on `amqpprox_datacenter.h`.

use std::sync::RwLock;

pub struct Datacenter {
    tag: RwLock<String>,
}

impl Datacenter {
    pub fn new(tag: String) -> Self {
        Datacenter {
            tag: RwLock::new(tag),
        }
    }

    pub fn get(&self) -> String {
        self.tag.read().unwrap().clone()
    }

    pub fn set(&self, tag: String) {
        *self.tag.write().unwrap() = tag;
    }
}
