//! Process-wide shared state: one `Arc` field per registry, mirroring the
//! teacher's `AppState` shape in `server/src/state.rs`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use amqpprox_core::Config;
use amqpprox_registry::{
    AffinityPartitionPolicy, AuthIntercept, BackendSelector, BackendStore, Datacenter,
    DataRateLimitManager, DefaultAuthIntercept, FarmStore, FixedWindowConnectionRateLimiter,
    PartitionPolicy, ResourceMapper, RoundRobinSelector, TotalConnectionLimiter, VhostState,
};
use amqpprox_storage::{BufferPool, DnsCache};
use tokio::sync::{mpsc, Notify};

use crate::session::SessionCommand;
use crate::stats::Stats;

pub const ROUND_ROBIN_SELECTOR: &str = "round-robin";
pub const DATACENTER_AFFINITY_POLICY: &str = "datacenter-affinity";

/// A running session's control surface, reachable from the control
/// channel by numeric id.
pub struct SessionHandle {
    pub id: u64,
    pub peer_addr: String,
    pub vhost: Mutex<Option<String>>,
    pub backend: Mutex<Option<String>>,
    pub commands: mpsc::Sender<SessionCommand>,
}

#[derive(Default)]
pub struct SessionRegistry {
    next_id: AtomicU64,
    sessions: Mutex<HashMap<u64, Arc<SessionHandle>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        SessionRegistry::default()
    }

    pub fn register(
        &self,
        peer_addr: String,
        commands: mpsc::Sender<SessionCommand>,
    ) -> Arc<SessionHandle> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let handle = Arc::new(SessionHandle {
            id,
            peer_addr,
            vhost: Mutex::new(None),
            backend: Mutex::new(None),
            commands,
        });
        self.sessions.lock().unwrap().insert(id, handle.clone());
        handle
    }

    pub fn unregister(&self, id: u64) {
        self.sessions.lock().unwrap().remove(&id);
    }

    pub fn get(&self, id: u64) -> Option<Arc<SessionHandle>> {
        self.sessions.lock().unwrap().get(&id).cloned()
    }

    pub fn all(&self) -> Vec<Arc<SessionHandle>> {
        self.sessions.lock().unwrap().values().cloned().collect()
    }
}

pub struct AppState {
    pub config: Config,
    pub backends: Arc<BackendStore>,
    pub farms: Arc<FarmStore>,
    pub resource_map: Arc<ResourceMapper>,
    pub vhost_state: Arc<VhostState>,
    pub datacenter: Arc<Datacenter>,
    pub dns: Arc<DnsCache>,
    pub buffer_pool: Arc<BufferPool>,
    pub conn_rate_limiter: Arc<FixedWindowConnectionRateLimiter>,
    pub total_conn_limiter: Arc<TotalConnectionLimiter>,
    pub data_rate_limiters: Arc<DataRateLimitManager>,
    pub auth: Arc<dyn AuthIntercept>,
    pub stats: Arc<Stats>,
    pub sessions: SessionRegistry,
    /// Notified by the `EXIT` control verb; `run()` races its accept loops
    /// against this so the process actually terminates instead of EXIT
    /// being a disguised no-op success.
    pub shutdown: Arc<Notify>,
}

impl AppState {
    pub fn new(config: Config) -> Arc<Self> {
        let datacenter = Arc::new(Datacenter::new(
            config.routing.datacenter.clone().unwrap_or_default(),
        ));

        let mut selectors: HashMap<String, Arc<dyn BackendSelector>> = HashMap::new();
        selectors.insert(ROUND_ROBIN_SELECTOR.to_string(), Arc::new(RoundRobinSelector));

        let mut policies: HashMap<String, Arc<dyn PartitionPolicy>> = HashMap::new();
        policies.insert(
            DATACENTER_AFFINITY_POLICY.to_string(),
            Arc::new(AffinityPartitionPolicy::new(datacenter.clone())),
        );

        let dns = DnsCache::spawn(Duration::from_millis(config.dns.sweep_interval_ms));
        let buffer_pool = BufferPool::new(&config.buffer_pool.bucket_sizes);

        Arc::new(AppState {
            backends: Arc::new(BackendStore::new()),
            farms: Arc::new(FarmStore::new(selectors, policies)),
            resource_map: Arc::new(ResourceMapper::new()),
            vhost_state: Arc::new(VhostState::new()),
            datacenter,
            dns,
            buffer_pool,
            conn_rate_limiter: Arc::new(FixedWindowConnectionRateLimiter::new(u32::MAX, 1)),
            total_conn_limiter: Arc::new(TotalConnectionLimiter::new(u32::MAX)),
            data_rate_limiters: Arc::new(DataRateLimitManager::new()),
            auth: Arc::new(DefaultAuthIntercept),
            stats: Arc::new(Stats::new()),
            sessions: SessionRegistry::new(),
            shutdown: Arc::new(Notify::new()),
            config,
        })
    }
}
