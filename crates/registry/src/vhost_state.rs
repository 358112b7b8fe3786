//! Per-vhost pause flag, consulted by sessions when entering the spliced
//! phase and toggled by `VHOST PAUSE|UNPAUSE`.

use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Default)]
pub struct VhostState {
    paused: Mutex<HashMap<String, bool>>,
}

impl VhostState {
    pub fn new() -> Self {
        VhostState::default()
    }

    pub fn pause(&self, vhost: &str) {
        self.paused.lock().unwrap().insert(vhost.to_string(), true);
    }

    pub fn unpause(&self, vhost: &str) {
        self.paused.lock().unwrap().insert(vhost.to_string(), false);
    }

    pub fn is_paused(&self, vhost: &str) -> bool {
        self.paused.lock().unwrap().get(vhost).copied().unwrap_or(false)
    }
}
