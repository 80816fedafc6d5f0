//! Error of ddll-core.

/// A wrap `Result` contains custom errors.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors collections in ddll-core.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error("Node state lock poisoned")]
    StateLock,

    #[error("Local peer holds no inserted keys")]
    Unavailable,

    #[error("Operation {0} is not allowed in the current node status")]
    InvalidState(&'static str),

    #[error("Request {0} timed out waiting for a response")]
    ResponseTimeout(u64),

    #[error("Response channel dropped before a terminal outcome")]
    ResponseDropped,

    #[error("Closest-links search exceeded {0} hops")]
    SearchHopsExceeded(usize),

    #[error("Transport error: {0}")]
    Transport(#[from] ddll_transport::error::Error),

    #[error("Bincode serialization error")]
    BincodeSerialize(#[source] bincode::Error),

    #[error("Bincode deserialization error")]
    BincodeDeserialize(#[source] bincode::Error),
}
