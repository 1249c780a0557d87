use std::fmt;
use std::hash::Hash;
use std::marker::PhantomData;
use std::sync::Arc;

use bytes::Bytes;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::info;

use plexmap_rpc::{
    decode, encode, encode_bytes, Call, CallCtx, CallHandler, Fabric, Handle,
    Locality, RetSlot, RpcError,
};

use crate::apply;
use crate::buffer::BuffersVector;
use crate::config::MapConfig;
use crate::error::PlexError;
use crate::policy::{InsertPolicy, Overwrite};
use crate::registry::{
    self, BootstrapRequest, GlobalId, KindConstructor, BOOTSTRAP_SERVICE,
};
use crate::router::{Murmur3Route, RouteHasher, Router};
use crate::shard::LocalShard;

/// Requirements on map keys: routable, hashable, wire-serializable.
pub trait MapKey:
    Clone
    + Eq
    + Hash
    + fmt::Debug
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
}

impl<T> MapKey for T where
    T: Clone
        + Eq
        + Hash
        + fmt::Debug
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static
{
}

/// Requirements on map values: copyable and wire-serializable.
pub trait MapValue:
    Clone + fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

impl<T> MapValue for T where
    T: Clone + fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

/// A key-value pair as staged in aggregation buffers and shipped in
/// batches.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Entry<K, V> {
    pub key: K,
    pub value: V,
}

impl<K, V> Entry<K, V> {
    pub fn new(key: K, value: V) -> Self {
        Entry { key, value }
    }
}

/// Wire operations of one map instance; the per-locality service decodes
/// and executes them against its local shard.
#[derive(Serialize, Deserialize, Debug)]
pub(crate) enum MapOp<K, V> {
    Insert { key: K, value: V },
    Erase { key: K },
    Lookup { key: K },
    Apply { symbol: String, key: K, args: Vec<u8> },
    AsyncApply { symbol: String, key: K, args: Vec<u8> },
    InstallBatch { entries: Vec<Entry<K, V>> },
    Flush,
    Clear,
    Size,
    Sweep { mode: SweepMode, symbol: String, args: Vec<u8> },
    Print,
    Destroy,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SweepMode {
    Entries,
    Keys,
}

/// Result slot of an asynchronous lookup. Written by the completion
/// path; read it only after waiting on the handle the lookup was
/// attached to.
pub struct LookupSlot<V> {
    slot: RetSlot,
    _value: PhantomData<fn() -> V>,
}

impl<V: MapValue> LookupSlot<V> {
    pub fn get(&self) -> Result<Option<V>, PlexError> {
        match self.slot.get() {
            None => Err(PlexError::Incomplete),
            Some(Err(error)) => Err(error.into()),
            Some(Ok(bytes)) => Ok(decode(&bytes)?),
        }
    }
}

/// Distributed, partitioned, thread-safe hashmap.
///
/// One shard lives on every locality; a deterministic hash routes each
/// key to its owner. The handle is cheap to clone and all clones address
/// the same instance. Created collectively with [`PlexMap::create`];
/// other tasks on a locality attach with [`PlexMap::get`].
pub struct PlexMap<K, V, P = Overwrite, H = Murmur3Route> {
    inner: Arc<MapInstance<K, V, P, H>>,
}

impl<K, V, P, H> Clone for PlexMap<K, V, P, H> {
    fn clone(&self) -> Self {
        PlexMap {
            inner: self.inner.clone(),
        }
    }
}

struct MapInstance<K, V, P, H> {
    id: GlobalId,
    service: String,
    fabric: Arc<dyn Fabric>,
    router: Router<K, H>,
    shard: LocalShard<K, V, P>,
    buffers: BuffersVector<K, V>,
}

struct Constructor<K, V, P, H>(PhantomData<fn() -> (K, V, P, H)>);

impl<K, V, P, H> KindConstructor for Constructor<K, V, P, H>
where
    K: MapKey,
    V: MapValue,
    P: InsertPolicy<V>,
    H: RouteHasher<K>,
{
    fn construct(
        &self,
        fabric: Arc<dyn Fabric>,
        id: GlobalId,
        config: MapConfig,
    ) -> Result<(), RpcError> {
        let instance = MapInstance::<K, V, P, H>::new(fabric.clone(), id, config);
        let any: Arc<dyn std::any::Any + Send + Sync> = instance.clone();
        registry::register_instance(fabric.here(), id, any)
            .map_err(service_error)?;
        let service = instance.service.clone();
        fabric.register_service(&service, instance);
        Ok(())
    }
}

fn kind_tag<K, V, P, H>() -> String
where
    K: 'static,
    V: 'static,
    P: 'static,
    H: 'static,
{
    std::any::type_name::<(K, V, P, H)>().to_owned()
}

fn service_error(error: PlexError) -> RpcError {
    RpcError::Service(error.to_string())
}

impl<K, V, P, H> MapInstance<K, V, P, H>
where
    K: MapKey,
    V: MapValue,
    P: InsertPolicy<V>,
    H: RouteHasher<K>,
{
    fn new(fabric: Arc<dyn Fabric>, id: GlobalId, config: MapConfig) -> Arc<Self> {
        let service = id.service_id();
        info!(
            "creating map {} on {} with {} buckets",
            id,
            fabric.here(),
            config.bucket_count()
        );
        Arc::new(MapInstance {
            id,
            service: service.clone(),
            router: Router::new(fabric.num_localities()),
            shard: LocalShard::new(config.bucket_count()),
            buffers: BuffersVector::new(
                service,
                fabric.clone(),
                config.buffer_capacity,
            ),
            fabric,
        })
    }

    #[inline]
    fn here(&self) -> Locality {
        self.fabric.here()
    }

    fn call(&self, payload: Bytes) -> Call {
        Call::new(self.service.as_str(), payload)
    }

    fn print(&self) {
        info!("---- locality {}", self.here());
        for bucket in 0..self.shard.num_buckets() {
            self.shard.for_each_entry_in_bucket(bucket, |key, value| {
                info!("{:?} -> {:?}", key, value);
            });
        }
    }

    /// Per-locality step of a collective sweep: fan the call back out to
    /// one sub-call per bucket, reusing the payload.
    async fn sweep(
        &self,
        ctx: &CallCtx,
        payload: Bytes,
    ) -> Result<(), RpcError> {
        let buckets = self.shard.num_buckets();
        match &ctx.handle {
            Some(handle) => {
                self.fabric.async_for_each_at(
                    handle,
                    self.here(),
                    self.call(payload),
                    buckets,
                );
                Ok(())
            }
            None => {
                self.fabric
                    .for_each_at(self.here(), self.call(payload), buckets)
                    .await
            }
        }
    }

    /// One bucket of a sweep. The signature kind is picked by the
    /// presence of a completion handle.
    fn sweep_bucket(
        &self,
        ctx: &CallCtx,
        mode: SweepMode,
        symbol: &str,
        args: &[u8],
        bucket: usize,
    ) -> Result<(), RpcError> {
        let mut out = Ok(());
        match (mode, &ctx.handle) {
            (SweepMode::Entries, None) => {
                let function =
                    apply::apply_wire::<K, V>(symbol).map_err(service_error)?;
                self.shard.for_each_entry_in_bucket(bucket, |key, value| {
                    if out.is_ok() {
                        out = function(key, value, args);
                    }
                });
            }
            (SweepMode::Entries, Some(handle)) => {
                let function = apply::async_apply_wire::<K, V>(symbol)
                    .map_err(service_error)?;
                self.shard.for_each_entry_in_bucket(bucket, |key, value| {
                    if out.is_ok() {
                        out = function(handle, key, value, args);
                    }
                });
            }
            (SweepMode::Keys, None) => {
                let function =
                    apply::key_fn_wire::<K>(symbol).map_err(service_error)?;
                self.shard.for_each_key_in_bucket(bucket, |key| {
                    if out.is_ok() {
                        out = function(key, args);
                    }
                });
            }
            (SweepMode::Keys, Some(handle)) => {
                let function = apply::async_key_fn_wire::<K>(symbol)
                    .map_err(service_error)?;
                self.shard.for_each_key_in_bucket(bucket, |key| {
                    if out.is_ok() {
                        out = function(handle, key, args);
                    }
                });
            }
        }
        out
    }
}

#[async_trait::async_trait]
impl<K, V, P, H> CallHandler for MapInstance<K, V, P, H>
where
    K: MapKey,
    V: MapValue,
    P: InsertPolicy<V>,
    H: RouteHasher<K>,
{
    async fn handle(
        &self,
        ctx: CallCtx,
        payload: Bytes,
    ) -> Result<Vec<u8>, RpcError> {
        let op: MapOp<K, V> = decode(&payload)?;
        match op {
            MapOp::Insert { key, value } => {
                self.shard.insert(key, value);
                Ok(Vec::new())
            }
            MapOp::Erase { key } => {
                self.shard.erase(&key);
                Ok(Vec::new())
            }
            MapOp::Lookup { key } => encode(&self.shard.lookup(&key)),
            MapOp::Apply { symbol, key, args } => {
                let function =
                    apply::apply_wire::<K, V>(&symbol).map_err(service_error)?;
                let mut out = Ok(());
                self.shard.apply(&key, |k, v| out = function(k, v, &args));
                out?;
                Ok(Vec::new())
            }
            MapOp::AsyncApply { symbol, key, args } => {
                let handle = ctx.handle.clone().ok_or_else(|| {
                    RpcError::Service(
                        "async apply arrived without a completion handle"
                            .into(),
                    )
                })?;
                let function = apply::async_apply_wire::<K, V>(&symbol)
                    .map_err(service_error)?;
                let mut out = Ok(());
                self.shard
                    .apply(&key, |k, v| out = function(&handle, k, v, &args));
                out?;
                Ok(Vec::new())
            }
            MapOp::InstallBatch { entries } => {
                for entry in entries {
                    self.shard.insert(entry.key, entry.value);
                }
                Ok(Vec::new())
            }
            MapOp::Flush => {
                self.buffers.flush_all().map_err(service_error)?;
                Ok(Vec::new())
            }
            MapOp::Clear => {
                self.shard.clear();
                Ok(Vec::new())
            }
            MapOp::Size => encode(&(self.shard.len() as u64)),
            MapOp::Sweep { mode, symbol, args } => match ctx.index {
                Some(bucket) => {
                    self.sweep_bucket(&ctx, mode, &symbol, &args, bucket)?;
                    Ok(Vec::new())
                }
                None => {
                    self.sweep(&ctx, payload.clone()).await?;
                    Ok(Vec::new())
                }
            },
            MapOp::Print => {
                self.print();
                Ok(Vec::new())
            }
            MapOp::Destroy => {
                info!("destroying map {} on {}", self.id, self.here());
                self.fabric.unregister_service(&self.service);
                registry::remove_instance(self.here(), self.id);
                Ok(Vec::new())
            }
        }
    }
}

impl<K, V, P, H> PlexMap<K, V, P, H>
where
    K: MapKey,
    V: MapValue,
    P: InsertPolicy<V>,
    H: RouteHasher<K>,
{
    /// Collectively create a map instance across the whole fleet.
    ///
    /// Every locality ends up with an identically configured shard
    /// registered under the same [`GlobalId`]; `crate::attach` must have
    /// run on each locality first. `num_entries` in the config sizes the
    /// initial per-shard bucket count.
    pub async fn create(
        fabric: &Arc<dyn Fabric>,
        config: MapConfig,
    ) -> Result<Self, PlexError> {
        registry::register_kind(
            &kind_tag::<K, V, P, H>(),
            Arc::new(Constructor::<K, V, P, H>(PhantomData)),
        );
        let id = GlobalId::allocate(fabric.here());
        let request = BootstrapRequest {
            kind: kind_tag::<K, V, P, H>(),
            id,
            config,
        };
        fabric
            .execute_on_all(Call::new(
                BOOTSTRAP_SERVICE,
                encode_bytes(&request)?,
            ))
            .await?;
        Self::get(fabric, id)
    }

    /// Attach to an instance already created on this locality.
    pub fn get(
        fabric: &Arc<dyn Fabric>,
        id: GlobalId,
    ) -> Result<Self, PlexError> {
        let any = registry::instance(fabric.here(), id)
            .ok_or(PlexError::NoInstance(id, fabric.here()))?;
        let inner = any
            .downcast::<MapInstance<K, V, P, H>>()
            .map_err(|_| PlexError::NoInstance(id, fabric.here()))?;
        Ok(PlexMap { inner })
    }

    pub fn global_id(&self) -> GlobalId {
        self.inner.id
    }

    /// The locality this handle operates from.
    pub fn locality(&self) -> Locality {
        self.inner.here()
    }

    /// The locality owning `key`.
    pub fn owner(&self, key: &K) -> Locality {
        self.inner.router.owner(key)
    }

    /// Insert a key-value pair; conflicts resolve through the insert
    /// policy. Blocks until the owning shard acknowledged the write.
    pub async fn insert(&self, key: K, value: V) -> Result<(), PlexError> {
        let target = self.inner.router.owner(&key);
        if target == self.inner.here() {
            self.inner.shard.insert(key, value);
            return Ok(());
        }
        let payload = encode_bytes(&MapOp::Insert { key, value })?;
        self.inner
            .fabric
            .execute_at(target, self.inner.call(payload))
            .await?;
        Ok(())
    }

    /// Insert attached to `handle`; returns immediately. Completion is
    /// observed by waiting on the handle.
    pub fn async_insert(
        &self,
        handle: &Handle,
        key: K,
        value: V,
    ) -> Result<(), PlexError> {
        let target = self.inner.router.owner(&key);
        if target == self.inner.here() {
            // Local inserters contribute to the same completion group as
            // remote ones.
            handle.attach();
            let inner = self.inner.clone();
            let handle = handle.clone();
            tokio::spawn(async move {
                inner.shard.insert(key, value);
                handle.complete();
            });
            return Ok(());
        }
        let payload = encode_bytes(&MapOp::Insert { key, value })?;
        self.inner
            .fabric
            .async_execute_at(handle, target, self.inner.call(payload));
        Ok(())
    }

    /// Insert through the per-destination aggregation buffers. The write
    /// becomes visible only after [`PlexMap::wait_for_buffered_insert`];
    /// a local owner is written directly.
    pub fn buffered_insert(&self, key: K, value: V) -> Result<(), PlexError> {
        let target = self.inner.router.owner(&key);
        if target == self.inner.here() {
            self.inner.shard.insert(key, value);
            return Ok(());
        }
        self.inner.buffers.insert(Entry::new(key, value), target)
    }

    /// As [`PlexMap::buffered_insert`], with threshold-triggered batch
    /// ships attached to `handle`. Wait on the handle first, then call
    /// [`PlexMap::wait_for_buffered_insert`]; the two waits do not
    /// commute.
    pub fn buffered_async_insert(
        &self,
        handle: &Handle,
        key: K,
        value: V,
    ) -> Result<(), PlexError> {
        let target = self.inner.router.owner(&key);
        if target == self.inner.here() {
            handle.attach();
            let inner = self.inner.clone();
            let handle = handle.clone();
            tokio::spawn(async move {
                inner.shard.insert(key, value);
                handle.complete();
            });
            return Ok(());
        }
        self.inner
            .buffers
            .async_insert(handle, Entry::new(key, value), target)
    }

    /// Collective: every locality ships its residual outbound batches.
    /// Returns once all flush calls have been dispatched; ship failures
    /// recorded so far surface here.
    pub async fn wait_for_buffered_insert(&self) -> Result<(), PlexError> {
        let payload = encode_bytes(&MapOp::<K, V>::Flush)?;
        self.inner
            .fabric
            .execute_on_all(self.inner.call(payload))
            .await?;
        Ok(())
    }

    /// Remove the entry for `key` if present; absent keys are a no-op.
    pub async fn erase(&self, key: K) -> Result<(), PlexError> {
        let target = self.inner.router.owner(&key);
        if target == self.inner.here() {
            self.inner.shard.erase(&key);
            return Ok(());
        }
        let payload = encode_bytes(&MapOp::<K, V>::Erase { key })?;
        self.inner
            .fabric
            .execute_at(target, self.inner.call(payload))
            .await?;
        Ok(())
    }

    pub fn async_erase(&self, handle: &Handle, key: K) -> Result<(), PlexError> {
        let target = self.inner.router.owner(&key);
        if target == self.inner.here() {
            handle.attach();
            let inner = self.inner.clone();
            let handle = handle.clone();
            tokio::spawn(async move {
                inner.shard.erase(&key);
                handle.complete();
            });
            return Ok(());
        }
        let payload = encode_bytes(&MapOp::<K, V>::Erase { key })?;
        self.inner
            .fabric
            .async_execute_at(handle, target, self.inner.call(payload));
        Ok(())
    }

    /// Read the value for `key` from its owning shard.
    pub async fn lookup(&self, key: &K) -> Result<Option<V>, PlexError> {
        let target = self.inner.router.owner(key);
        if target == self.inner.here() {
            return Ok(self.inner.shard.lookup(key));
        }
        let payload =
            encode_bytes(&MapOp::<K, V>::Lookup { key: key.clone() })?;
        let bytes = self
            .inner
            .fabric
            .execute_at_with_ret(target, self.inner.call(payload))
            .await?;
        Ok(decode(&bytes)?)
    }

    /// Lookup attached to `handle`; the returned slot is safe to read
    /// after the handle's wait completes.
    pub fn async_lookup(
        &self,
        handle: &Handle,
        key: &K,
    ) -> Result<LookupSlot<V>, PlexError> {
        let slot = RetSlot::new();
        let target = self.inner.router.owner(key);
        if target == self.inner.here() {
            handle.attach();
            let inner = self.inner.clone();
            let handle = handle.clone();
            let slot_task = slot.clone();
            let key = key.clone();
            tokio::spawn(async move {
                let found = inner.shard.lookup(&key);
                match encode(&found) {
                    Ok(bytes) => {
                        slot_task.set(Ok(bytes));
                        handle.complete();
                    }
                    Err(error) => {
                        slot_task.set(Err(error.clone()));
                        handle.fail(error);
                    }
                }
            });
        } else {
            let payload =
                encode_bytes(&MapOp::<K, V>::Lookup { key: key.clone() })?;
            self.inner.fabric.async_execute_at_with_ret(
                handle,
                target,
                self.inner.call(payload),
                slot.clone(),
            );
        }
        Ok(LookupSlot {
            slot,
            _value: PhantomData,
        })
    }

    /// Run a registered pure function on the entry for `key`, under the
    /// owning shard's bucket write lock. Ships the symbol plus a flat
    /// argument tuple to a remote owner and blocks until it ran. Absent
    /// keys are a no-op. Register the function on every locality with
    /// [`crate::apply::register_apply`].
    pub async fn apply<A>(
        &self,
        key: &K,
        symbol: &str,
        args: &A,
    ) -> Result<(), PlexError>
    where
        A: Serialize + DeserializeOwned + Send + Sync + 'static,
    {
        let function = apply::apply_direct::<K, V, A>(symbol)?;
        let target = self.inner.router.owner(key);
        if target == self.inner.here() {
            self.inner.shard.apply(key, |k, v| function(k, v, args));
            return Ok(());
        }
        let payload = encode_bytes(&MapOp::<K, V>::Apply {
            symbol: symbol.to_owned(),
            key: key.clone(),
            args: encode(args)?,
        })?;
        self.inner
            .fabric
            .execute_at(target, self.inner.call(payload))
            .await?;
        Ok(())
    }

    /// As [`PlexMap::apply`], attached to `handle`. The registered
    /// function takes the handle first, so async operations it issues on
    /// the same handle extend the group.
    pub fn async_apply<A>(
        &self,
        handle: &Handle,
        key: &K,
        symbol: &str,
        args: &A,
    ) -> Result<(), PlexError>
    where
        A: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
    {
        let function = apply::async_apply_direct::<K, V, A>(symbol)?;
        let target = self.inner.router.owner(key);
        if target == self.inner.here() {
            handle.attach();
            let inner = self.inner.clone();
            let handle = handle.clone();
            let key = key.clone();
            let args = args.clone();
            tokio::spawn(async move {
                inner
                    .shard
                    .apply(&key, |k, v| function(&handle, k, v, &args));
                handle.complete();
            });
            return Ok(());
        }
        let payload = encode_bytes(&MapOp::<K, V>::AsyncApply {
            symbol: symbol.to_owned(),
            key: key.clone(),
            args: encode(args)?,
        })?;
        self.inner
            .fabric
            .async_execute_at(handle, target, self.inner.call(payload));
        Ok(())
    }

    /// Collective: run a registered function on every entry of every
    /// shard, one bucket at a time in parallel. Visit order is
    /// unspecified; the function may mutate values in place but must not
    /// insert into or erase from this map.
    pub async fn for_each_entry<A>(
        &self,
        symbol: &str,
        args: &A,
    ) -> Result<(), PlexError>
    where
        A: Serialize + DeserializeOwned + Send + Sync + 'static,
    {
        apply::apply_direct::<K, V, A>(symbol)?;
        let payload = self.sweep_payload(SweepMode::Entries, symbol, args)?;
        self.inner
            .fabric
            .execute_on_all(self.inner.call(payload))
            .await?;
        Ok(())
    }

    /// As [`PlexMap::for_each_entry`], grouping every per-bucket
    /// sub-task under `handle` so a single wait covers the whole sweep.
    pub fn async_for_each_entry<A>(
        &self,
        handle: &Handle,
        symbol: &str,
        args: &A,
    ) -> Result<(), PlexError>
    where
        A: Serialize + DeserializeOwned + Send + Sync + 'static,
    {
        apply::async_apply_direct::<K, V, A>(symbol)?;
        let payload = self.sweep_payload(SweepMode::Entries, symbol, args)?;
        self.inner
            .fabric
            .async_execute_on_all(handle, self.inner.call(payload));
        Ok(())
    }

    /// Collective: run a registered visitor on every key of every shard.
    pub async fn for_each_key<A>(
        &self,
        symbol: &str,
        args: &A,
    ) -> Result<(), PlexError>
    where
        A: Serialize + DeserializeOwned + Send + Sync + 'static,
    {
        apply::key_fn_direct::<K, A>(symbol)?;
        let payload = self.sweep_payload(SweepMode::Keys, symbol, args)?;
        self.inner
            .fabric
            .execute_on_all(self.inner.call(payload))
            .await?;
        Ok(())
    }

    pub fn async_for_each_key<A>(
        &self,
        handle: &Handle,
        symbol: &str,
        args: &A,
    ) -> Result<(), PlexError>
    where
        A: Serialize + DeserializeOwned + Send + Sync + 'static,
    {
        apply::async_key_fn_direct::<K, A>(symbol)?;
        let payload = self.sweep_payload(SweepMode::Keys, symbol, args)?;
        self.inner
            .fabric
            .async_execute_on_all(handle, self.inner.call(payload));
        Ok(())
    }

    fn sweep_payload<A: Serialize>(
        &self,
        mode: SweepMode,
        symbol: &str,
        args: &A,
    ) -> Result<Bytes, PlexError> {
        Ok(encode_bytes(&MapOp::<K, V>::Sweep {
            mode,
            symbol: symbol.to_owned(),
            args: encode(args)?,
        })?)
    }

    /// Collective: clear every shard. Not synchronized with concurrent
    /// writers.
    pub async fn clear(&self) -> Result<(), PlexError> {
        let payload = encode_bytes(&MapOp::<K, V>::Clear)?;
        self.inner
            .fabric
            .execute_on_all(self.inner.call(payload))
            .await?;
        Ok(())
    }

    /// Total entry count, summed across localities without a global
    /// lock; eventually consistent under concurrent mutation.
    pub async fn size(&self) -> Result<usize, PlexError> {
        let mut total = self.inner.shard.len();
        let payload = encode_bytes(&MapOp::<K, V>::Size)?;
        for target in self.inner.fabric.localities() {
            if target == self.inner.here() {
                continue;
            }
            let bytes = self
                .inner
                .fabric
                .execute_at_with_ret(target, self.inner.call(payload.clone()))
                .await?;
            let remote: u64 = decode(&bytes)?;
            total += remote as usize;
        }
        Ok(total)
    }

    /// Collective diagnostic: log every resident entry per locality.
    pub async fn print_all_entries(&self) -> Result<(), PlexError> {
        let payload = encode_bytes(&MapOp::<K, V>::Print)?;
        self.inner
            .fabric
            .execute_on_all(self.inner.call(payload))
            .await?;
        Ok(())
    }

    /// Entries resident in this locality's shard.
    pub fn local_len(&self) -> usize {
        self.inner.shard.len()
    }

    /// Shard-local probe, regardless of key ownership.
    pub fn local_lookup(&self, key: &K) -> Option<V> {
        self.inner.shard.lookup(key)
    }

    /// Collective teardown: drains pending buffers, then deregisters the
    /// instance on every locality.
    pub async fn destroy(self) -> Result<(), PlexError> {
        self.wait_for_buffered_insert().await?;
        let payload = encode_bytes(&MapOp::<K, V>::Destroy)?;
        self.inner
            .fabric
            .execute_on_all(self.inner.call(payload))
            .await?;
        Ok(())
    }
}
