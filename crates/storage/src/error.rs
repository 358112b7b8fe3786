use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("dns resolution failed for {host}:{service}: {source}")]
    Resolve {
        host: String,
        service: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{0}")]
    Other(String),
}
