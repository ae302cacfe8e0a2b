use thiserror::Error;

/// Failures of the persistent key/value store.
///
/// Decoding failures of individual entries are not errors: the store resets
/// the entry and carries on. Only I/O and encoding problems surface here.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("state file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("could not encode entry '{key}': {source}")]
    Encode {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Rejected user configuration input.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("request id cannot be empty")]
    EmptyRequestId,

    #[error("request id must contain only digits, got '{0}'")]
    InvalidRequestId(String),

    #[error("activation instant '{0}' is not RFC 3339 or YYYY-MM-DDTHH:MM[:SS]")]
    InvalidActivation(String),

    #[error("invalid base url '{0}'")]
    InvalidBaseUrl(String),
}
