#![allow(missing_docs)]

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Endpoint {0} is not listening")]
    EndpointNotFound(String),

    #[error("Endpoint {0} is already listening")]
    EndpointAlreadyExists(String),

    #[error("Message to {0} was dropped by fault injection")]
    MessageDropped(String),

    #[error("Callback error: {0}")]
    Callback(String),
}
