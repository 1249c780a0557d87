use std::sync::{Arc, OnceLock};

use crate::error::RpcError;
use crate::handle::Handle;
use crate::locality::Locality;
use crate::service::{Call, CallHandler};

/// Write-once byte slot filled by the completion path of an asynchronous
/// with-return call. Safe to read only after the owning handle's wait.
#[derive(Clone, Default)]
pub struct RetSlot {
    cell: Arc<OnceLock<Result<Vec<u8>, RpcError>>>,
}

impl RetSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, value: Result<Vec<u8>, RpcError>) {
        let _ = self.cell.set(value);
    }

    pub fn get(&self) -> Option<Result<Vec<u8>, RpcError>> {
        self.cell.get().cloned()
    }
}

/// Point-to-point invocation runtime over a fixed fleet of localities.
///
/// A `Fabric` value is one locality's view of the fleet: `here()` names
/// the local node and every dispatch method addresses a target by
/// [`Locality`]. Synchronous methods resolve when the remote handler has
/// run; `async_*` methods enqueue, attach the operation to the given
/// [`Handle`], and return immediately. Calls from one source to one
/// destination are delivered and executed in submission order; no other
/// cross-locality ordering is provided.
#[async_trait::async_trait]
pub trait Fabric: Send + Sync + 'static {
    fn here(&self) -> Locality;

    fn num_localities(&self) -> usize;

    fn localities(&self) -> Vec<Locality> {
        (0..self.num_localities() as u32).map(Locality).collect()
    }

    fn register_service(&self, service: &str, handler: Arc<dyn CallHandler>);

    fn unregister_service(&self, service: &str);

    async fn execute_at(
        &self,
        target: Locality,
        call: Call,
    ) -> Result<(), RpcError>;

    async fn execute_at_with_ret(
        &self,
        target: Locality,
        call: Call,
    ) -> Result<Vec<u8>, RpcError>;

    fn async_execute_at(&self, handle: &Handle, target: Locality, call: Call);

    fn async_execute_at_with_ret(
        &self,
        handle: &Handle,
        target: Locality,
        call: Call,
        ret: RetSlot,
    );

    async fn execute_on_all(&self, call: Call) -> Result<(), RpcError>;

    fn async_execute_on_all(&self, handle: &Handle, call: Call);

    /// Run `call` at `target` once per index in `0..iterations`, all
    /// concurrently; resolves when every sub-task has finished.
    async fn for_each_at(
        &self,
        target: Locality,
        call: Call,
        iterations: usize,
    ) -> Result<(), RpcError>;

    /// As [`Fabric::for_each_at`], but each sub-task is attached to
    /// `handle` individually so one wait covers the whole fan-out.
    fn async_for_each_at(
        &self,
        handle: &Handle,
        target: Locality,
        call: Call,
        iterations: usize,
    );
}
