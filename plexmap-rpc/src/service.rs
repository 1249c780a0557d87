use std::sync::Arc;

use bytes::Bytes;
use tracing::info;

use crate::error::RpcError;
use crate::fabric::Fabric;
use crate::handle::Handle;
use crate::locality::Locality;

/// An invocation addressed to a named service on some locality.
///
/// The payload is opaque to the fabric; the receiving handler decodes it.
#[derive(Debug, Clone)]
pub struct Call {
    pub service: String,
    pub payload: Bytes,
}

impl Call {
    pub fn new(service: impl Into<String>, payload: Bytes) -> Self {
        Call {
            service: service.into(),
            payload,
        }
    }
}

/// Per-invocation context handed to a [`CallHandler`].
#[derive(Clone)]
pub struct CallCtx {
    /// Locality that issued the call.
    pub from: Locality,
    /// Locality executing the call.
    pub here: Locality,
    /// Completion group of the originating async operation, if any.
    pub handle: Option<Handle>,
    /// Sub-task index for `for_each_at` fan-outs.
    pub index: Option<usize>,
    /// The executing locality's view of the fabric, for nested calls.
    pub fabric: Arc<dyn Fabric>,
}

#[async_trait::async_trait]
pub trait CallHandler: Send + Sync {
    async fn handle(
        &self,
        ctx: CallCtx,
        payload: Bytes,
    ) -> Result<Vec<u8>, RpcError>;
}

/// Service registry of one locality.
#[derive(Default)]
pub struct DispatchTable {
    services: scc::HashMap<String, Arc<dyn CallHandler>>,
}

impl DispatchTable {
    pub fn register(&self, service: &str, handler: Arc<dyn CallHandler>) {
        info!("registering service '{}'", service);
        self.services.upsert(service.to_owned(), handler);
    }

    pub fn unregister(&self, service: &str) {
        self.services.remove(service);
    }

    pub fn resolve(&self, service: &str) -> Option<Arc<dyn CallHandler>> {
        self.services.get(service).map(|entry| entry.get().clone())
    }
}
