mod error;
mod fabric;
mod handle;
mod locality;
mod mesh;
mod msg;
mod service;

pub use error::RpcError;
pub use fabric::Fabric;
pub use fabric::RetSlot;
pub use handle::Handle;
pub use locality::Locality;
pub use mesh::Mesh;
pub use msg::decode;
pub use msg::encode;
pub use msg::encode_bytes;
pub use service::Call;
pub use service::CallCtx;
pub use service::CallHandler;
pub use service::DispatchTable;
