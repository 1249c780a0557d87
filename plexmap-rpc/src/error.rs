use crate::locality::Locality;

/// Errors produced by the fabric and its service handlers.
///
/// Variants carry rendered strings rather than source errors so a single
/// failure can be recorded on a [`crate::Handle`] and cloned out to every
/// waiter.
#[derive(thiserror::Error, Debug, Clone)]
pub enum RpcError {
    #[error("no locality {0} in the fleet")]
    NoSuchLocality(Locality),
    #[error("no service '{0}' registered at {1}")]
    NoSuchService(String, Locality),
    #[error("encode error: {0}")]
    Encode(String),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("service error: {0}")]
    Service(String),
    #[error("link to {0} closed")]
    LinkClosed(Locality),
}

impl From<bincode::error::EncodeError> for RpcError {
    fn from(value: bincode::error::EncodeError) -> Self {
        RpcError::Encode(value.to_string())
    }
}

impl From<bincode::error::DecodeError> for RpcError {
    fn from(value: bincode::error::DecodeError) -> Self {
        RpcError::Decode(value.to_string())
    }
}
