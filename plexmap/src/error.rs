use plexmap_rpc::{Locality, RpcError};

use crate::registry::GlobalId;

#[derive(thiserror::Error, Debug)]
pub enum PlexError {
    #[error("no map instance {0} on locality {1}")]
    NoInstance(GlobalId, Locality),
    #[error("map instance {0} already initialized on locality {1}")]
    AlreadyInitialized(GlobalId, Locality),
    #[error("no function registered under symbol '{0}'")]
    NoSuchFunction(String),
    #[error("function '{0}' does not match the requested signature")]
    SignatureMismatch(String),
    #[error("result not ready; wait on the handle first")]
    Incomplete,
    #[error("invalid: {0}")]
    InvalidArgument(String),
    #[error("rpc error: {0}")]
    Rpc(#[from] RpcError),
}
