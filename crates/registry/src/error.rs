use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum RegistryError {
    #[error("backend {0:?} already exists")]
    DuplicateBackend(String),

    #[error("backend {0:?} not found")]
    UnknownBackend(String),

    #[error("farm {0:?} already exists")]
    DuplicateFarm(String),

    #[error("farm {0:?} not found")]
    UnknownFarm(String),

    #[error("farm {0:?} references unknown backend {1:?}")]
    FarmReferencesUnknownBackend(String, String),

    #[error("unknown selector {0:?}")]
    UnknownSelector(String),

    #[error("unknown partition policy {0:?}")]
    UnknownPartitionPolicy(String),

    #[error("vhost {0:?} is not mapped")]
    UnmappedVhost(String),

    #[error("invalid port {0}")]
    InvalidPort(String),
}
