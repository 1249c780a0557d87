use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;
use tracing::debug;

use crate::error::RpcError;
use crate::fabric::{Fabric, RetSlot};
use crate::handle::Handle;
use crate::locality::Locality;
use crate::service::{Call, CallCtx, CallHandler, DispatchTable};

/// In-process mesh transport.
///
/// Builds `N` localities inside one process, each with its own service
/// table, and wires every (source, destination) pair with an ordered
/// channel drained by a dedicated pump task. Delivery and execution on a
/// pair are strictly FIFO, which is the transport-level guarantee the
/// buffered-insert path relies on. Async envelopes carry the caller's
/// [`Handle`], so nested async operations issued by a remote handler
/// against the same handle extend the same group.
///
/// Self-targeted calls execute without traversing a link, as a real
/// transport would; handlers may therefore issue synchronous calls to
/// their own locality without tying up the link they arrived on.
///
/// Must be built from inside a tokio runtime; pump tasks are spawned at
/// construction and exit when the mesh and every fabric view are dropped.
pub struct Mesh {
    shared: Arc<MeshShared>,
    fabrics: Vec<Arc<dyn Fabric>>,
}

struct MeshShared {
    nodes: Vec<Node>,
}

struct Node {
    table: DispatchTable,
    /// Outbound links of this node, indexed by destination locality.
    links: Vec<mpsc::UnboundedSender<Envelope>>,
}

struct Envelope {
    call: Call,
    outcome: Outcome,
}

enum Outcome {
    Fire(oneshot::Sender<Result<(), RpcError>>),
    AsyncFire(Handle),
    Ret(oneshot::Sender<Result<Vec<u8>, RpcError>>),
    AsyncRet(Handle, RetSlot),
    Sweep {
        iterations: usize,
        done: oneshot::Sender<Result<(), RpcError>>,
    },
    AsyncSweep {
        iterations: usize,
        handle: Handle,
    },
}

impl Mesh {
    pub fn new(num_localities: usize) -> Self {
        assert!(num_localities > 0, "a mesh needs at least one locality");
        let mut links = Vec::with_capacity(num_localities);
        let mut pumps = Vec::with_capacity(num_localities * num_localities);
        for src in 0..num_localities {
            let mut outbound = Vec::with_capacity(num_localities);
            for dst in 0..num_localities {
                let (tx, rx) = mpsc::unbounded_channel();
                outbound.push(tx);
                pumps.push((
                    Locality(src as u32),
                    Locality(dst as u32),
                    rx,
                ));
            }
            links.push(outbound);
        }
        let nodes = links
            .into_iter()
            .map(|outbound| Node {
                table: DispatchTable::default(),
                links: outbound,
            })
            .collect();
        let shared = Arc::new(MeshShared { nodes });
        for (src, dst, rx) in pumps {
            tokio::spawn(pump(src, dst, rx, shared.clone()));
        }
        let fabrics = (0..num_localities as u32)
            .map(|id| {
                Arc::new(MeshFabric {
                    here: Locality(id),
                    shared: shared.clone(),
                }) as Arc<dyn Fabric>
            })
            .collect();
        Mesh { shared, fabrics }
    }

    pub fn num_localities(&self) -> usize {
        self.shared.nodes.len()
    }

    /// This locality's view of the fabric.
    pub fn fabric(&self, locality: u32) -> Arc<dyn Fabric> {
        self.fabrics[locality as usize].clone()
    }

    pub fn fabrics(&self) -> &[Arc<dyn Fabric>] {
        &self.fabrics
    }
}

async fn pump(
    src: Locality,
    dst: Locality,
    mut rx: mpsc::UnboundedReceiver<Envelope>,
    shared: Arc<MeshShared>,
) {
    while let Some(envelope) = rx.recv().await {
        deliver(src, dst, envelope, &shared).await;
    }
    debug!("link {} -> {} drained", src, dst);
}

async fn deliver(
    src: Locality,
    dst: Locality,
    envelope: Envelope,
    shared: &Arc<MeshShared>,
) {
    let Envelope { call, outcome } = envelope;
    match outcome {
        Outcome::Fire(ack) => {
            let result =
                run_one(shared, src, dst, None, None, &call).await.map(|_| ());
            let _ = ack.send(result);
        }
        Outcome::AsyncFire(handle) => {
            let result =
                run_one(shared, src, dst, Some(handle.clone()), None, &call)
                    .await;
            match result {
                Ok(_) => handle.complete(),
                Err(error) => handle.fail(error),
            }
        }
        Outcome::Ret(ack) => {
            let result = run_one(shared, src, dst, None, None, &call).await;
            let _ = ack.send(result);
        }
        Outcome::AsyncRet(handle, slot) => {
            let result =
                run_one(shared, src, dst, Some(handle.clone()), None, &call)
                    .await;
            match result {
                Ok(bytes) => {
                    slot.set(Ok(bytes));
                    handle.complete();
                }
                Err(error) => {
                    slot.set(Err(error.clone()));
                    handle.fail(error);
                }
            }
        }
        Outcome::Sweep { iterations, done } => {
            let result = run_sweep(shared, src, dst, &call, iterations).await;
            let _ = done.send(result);
        }
        Outcome::AsyncSweep { iterations, handle } => {
            // Sub-tasks were attached at enqueue time; run them without
            // holding up the link.
            for index in 0..iterations {
                let shared = shared.clone();
                let call = call.clone();
                let handle = handle.clone();
                tokio::spawn(async move {
                    let result = run_one(
                        &shared,
                        src,
                        dst,
                        Some(handle.clone()),
                        Some(index),
                        &call,
                    )
                    .await;
                    match result {
                        Ok(_) => handle.complete(),
                        Err(error) => handle.fail(error),
                    }
                });
            }
        }
    }
}

async fn run_one(
    shared: &Arc<MeshShared>,
    src: Locality,
    dst: Locality,
    handle: Option<Handle>,
    index: Option<usize>,
    call: &Call,
) -> Result<Vec<u8>, RpcError> {
    let node = &shared.nodes[dst.0 as usize];
    let handler = node.table.resolve(&call.service).ok_or_else(|| {
        RpcError::NoSuchService(call.service.clone(), dst)
    })?;
    let ctx = CallCtx {
        from: src,
        here: dst,
        handle,
        index,
        fabric: Arc::new(MeshFabric {
            here: dst,
            shared: shared.clone(),
        }),
    };
    handler.handle(ctx, call.payload.clone()).await
}

async fn run_sweep(
    shared: &Arc<MeshShared>,
    src: Locality,
    dst: Locality,
    call: &Call,
    iterations: usize,
) -> Result<(), RpcError> {
    let mut tasks = JoinSet::new();
    for index in 0..iterations {
        let shared = shared.clone();
        let call = call.clone();
        tasks.spawn(async move {
            run_one(&shared, src, dst, None, Some(index), &call)
                .await
                .map(|_| ())
        });
    }
    let mut first_error = None;
    while let Some(joined) = tasks.join_next().await {
        let result = match joined {
            Ok(result) => result,
            Err(join_error) => Err(RpcError::Service(join_error.to_string())),
        };
        if let Err(error) = result {
            if first_error.is_none() {
                first_error = Some(error);
            }
        }
    }
    match first_error {
        None => Ok(()),
        Some(error) => Err(error),
    }
}

#[derive(Clone)]
struct MeshFabric {
    here: Locality,
    shared: Arc<MeshShared>,
}

impl MeshFabric {
    fn send(&self, target: Locality, envelope: Envelope) -> Result<(), RpcError> {
        let node = &self.shared.nodes[self.here.0 as usize];
        let link = node
            .links
            .get(target.0 as usize)
            .ok_or(RpcError::NoSuchLocality(target))?;
        link.send(envelope).map_err(|_| RpcError::LinkClosed(target))
    }

    /// Spawn a self-targeted async call off the pumps.
    fn spawn_local(&self, handle: &Handle, call: Call, slot: Option<RetSlot>) {
        handle.attach();
        let shared = self.shared.clone();
        let here = self.here;
        let handle = handle.clone();
        tokio::spawn(async move {
            let result =
                run_one(&shared, here, here, Some(handle.clone()), None, &call)
                    .await;
            match result {
                Ok(bytes) => {
                    if let Some(slot) = slot {
                        slot.set(Ok(bytes));
                    }
                    handle.complete();
                }
                Err(error) => {
                    if let Some(slot) = &slot {
                        slot.set(Err(error.clone()));
                    }
                    handle.fail(error);
                }
            }
        });
    }
}

#[async_trait::async_trait]
impl Fabric for MeshFabric {
    fn here(&self) -> Locality {
        self.here
    }

    fn num_localities(&self) -> usize {
        self.shared.nodes.len()
    }

    fn register_service(&self, service: &str, handler: Arc<dyn CallHandler>) {
        self.shared.nodes[self.here.0 as usize]
            .table
            .register(service, handler);
    }

    fn unregister_service(&self, service: &str) {
        self.shared.nodes[self.here.0 as usize].table.unregister(service);
    }

    async fn execute_at(
        &self,
        target: Locality,
        call: Call,
    ) -> Result<(), RpcError> {
        if target == self.here {
            return run_one(&self.shared, self.here, target, None, None, &call)
                .await
                .map(|_| ());
        }
        let (tx, rx) = oneshot::channel();
        self.send(
            target,
            Envelope {
                call,
                outcome: Outcome::Fire(tx),
            },
        )?;
        rx.await.map_err(|_| RpcError::LinkClosed(target))?
    }

    async fn execute_at_with_ret(
        &self,
        target: Locality,
        call: Call,
    ) -> Result<Vec<u8>, RpcError> {
        if target == self.here {
            return run_one(&self.shared, self.here, target, None, None, &call)
                .await;
        }
        let (tx, rx) = oneshot::channel();
        self.send(
            target,
            Envelope {
                call,
                outcome: Outcome::Ret(tx),
            },
        )?;
        rx.await.map_err(|_| RpcError::LinkClosed(target))?
    }

    fn async_execute_at(&self, handle: &Handle, target: Locality, call: Call) {
        if target == self.here {
            self.spawn_local(handle, call, None);
            return;
        }
        handle.attach();
        let outcome = Outcome::AsyncFire(handle.clone());
        if let Err(error) = self.send(target, Envelope { call, outcome }) {
            handle.fail(error);
        }
    }

    fn async_execute_at_with_ret(
        &self,
        handle: &Handle,
        target: Locality,
        call: Call,
        ret: RetSlot,
    ) {
        if target == self.here {
            self.spawn_local(handle, call, Some(ret));
            return;
        }
        handle.attach();
        let outcome = Outcome::AsyncRet(handle.clone(), ret.clone());
        if let Err(error) = self.send(target, Envelope { call, outcome }) {
            ret.set(Err(error.clone()));
            handle.fail(error);
        }
    }

    async fn execute_on_all(&self, call: Call) -> Result<(), RpcError> {
        for target in self.localities() {
            self.execute_at(target, call.clone()).await?;
        }
        Ok(())
    }

    fn async_execute_on_all(&self, handle: &Handle, call: Call) {
        for target in self.localities() {
            self.async_execute_at(handle, target, call.clone());
        }
    }

    async fn for_each_at(
        &self,
        target: Locality,
        call: Call,
        iterations: usize,
    ) -> Result<(), RpcError> {
        if iterations == 0 {
            return Ok(());
        }
        if target == self.here {
            return run_sweep(&self.shared, self.here, target, &call, iterations)
                .await;
        }
        let (tx, rx) = oneshot::channel();
        self.send(
            target,
            Envelope {
                call,
                outcome: Outcome::Sweep {
                    iterations,
                    done: tx,
                },
            },
        )?;
        rx.await.map_err(|_| RpcError::LinkClosed(target))?
    }

    fn async_for_each_at(
        &self,
        handle: &Handle,
        target: Locality,
        call: Call,
        iterations: usize,
    ) {
        if iterations == 0 {
            return;
        }
        if target == self.here {
            handle.attach_many(iterations as u64);
            for index in 0..iterations {
                let shared = self.shared.clone();
                let here = self.here;
                let call = call.clone();
                let handle = handle.clone();
                tokio::spawn(async move {
                    let result = run_one(
                        &shared,
                        here,
                        here,
                        Some(handle.clone()),
                        Some(index),
                        &call,
                    )
                    .await;
                    match result {
                        Ok(_) => handle.complete(),
                        Err(error) => handle.fail(error),
                    }
                });
            }
            return;
        }
        handle.attach_many(iterations as u64);
        let outcome = Outcome::AsyncSweep {
            iterations,
            handle: handle.clone(),
        };
        if let Err(error) = self.send(target, Envelope { call, outcome }) {
            handle.fail(error);
            for _ in 1..iterations {
                handle.complete();
            }
        }
    }
}
