pub mod auth;
pub mod backend;
pub mod backend_set;
pub mod connection_manager;
pub mod datacenter;
pub mod error;
pub mod farm;
pub mod limiter;
pub mod partition_policy;
pub mod resource_map;
pub mod selector;
pub mod vhost_state;

pub use auth::{AuthDecision, AuthIntercept, AuthRequestData, AuthResponseData, DefaultAuthIntercept};
pub use backend::{Backend, BackendStore};
pub use backend_set::{BackendSet, Marker, Partition};
pub use connection_manager::ConnectionManager;
pub use datacenter::Datacenter;
pub use error::RegistryError;
pub use farm::{Farm, FarmStore};
pub use limiter::{
    ConnectionLimiter, DataRateLimit, DataRateLimitManager, FixedWindowConnectionRateLimiter,
    LimiterClock, TotalConnectionLimiter,
};
pub use partition_policy::{AffinityPartitionPolicy, PartitionPolicy};
pub use resource_map::{Resource, ResourceMapper};
pub use selector::{BackendSelector, RoundRobinSelector};
pub use vhost_state::VhostState;
