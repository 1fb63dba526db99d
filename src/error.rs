use std::net::SocketAddr;
use std::path::PathBuf;

use thiserror::Error;

/// Fatal at startup: the exporter never starts serving.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid polling interval {0:?}: expected 1 to 86400 seconds")]
    InvalidInterval(String),

    #[error(
        "function name not set: pass --function-name, \
         set $TAGS_EXPORTER_FUNCTION_NAME or .function_name in the config file"
    )]
    MissingFunctionName,

    #[error("invalid listen address {0:?}")]
    InvalidListenAddr(String),

    #[error("could not read config file {path}: {source}")]
    File {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("could not parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    #[error("invalid metric for {resource:?}: {source}")]
    InvalidMetric {
        resource: String,
        source: prometheus::Error,
    },

    #[error("metric {name} is already registered")]
    DuplicateRegistration { name: String },
}

/// Recoverable: the current poll cycle is skipped.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("resource identifier is empty")]
    EmptyIdentifier,

    #[error("function {0} not found")]
    NotFound(String),

    #[error("GetFunction({resource}) failed: {message}")]
    Api { resource: String, message: String },
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("could not bind metrics server to {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },

    #[error("metrics server: {0}")]
    Serve(#[from] hyper::Error),
}
