use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use once_cell::sync::Lazy;
use tracing::info;

use plexmap_rpc::{
    decode, CallCtx, CallHandler, Fabric, Locality, RpcError,
};

use crate::config::MapConfig;
use crate::error::PlexError;

/// Fleet-wide identifier of one distributed map instance.
///
/// The creating locality occupies the high bits and the low bits are a
/// process-local sequence, so ids are unique without coordination and
/// never recycled within a run. The collective create installs the same
/// id on every locality.
#[derive(
    serde::Serialize,
    serde::Deserialize,
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
)]
pub struct GlobalId(u64);

static NEXT_SEQUENCE: AtomicU64 = AtomicU64::new(1);

impl GlobalId {
    pub(crate) fn allocate(creator: Locality) -> Self {
        let sequence = NEXT_SEQUENCE.fetch_add(1, Ordering::Relaxed);
        GlobalId(((creator.id() as u64) << 32) | (sequence & 0xffff_ffff))
    }

    /// Service name the instance registers on its locality's dispatch
    /// table; the buffers keep this string as their only back-reference
    /// to the facade.
    pub(crate) fn service_id(&self) -> String {
        format!("plexmap/{:#x}", self.0)
    }
}

impl fmt::Display for GlobalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Bootstrap service name, registered once per locality via [`attach`].
pub(crate) const BOOTSTRAP_SERVICE: &str = "plexmap/bootstrap";

type AnyInstance = Arc<dyn Any + Send + Sync>;

/// Instance table: recovers the local instance of a map inside incoming
/// calls. Keyed by locality so several in-process localities can coexist.
static INSTANCES: Lazy<scc::HashMap<(Locality, GlobalId), AnyInstance>> =
    Lazy::new(scc::HashMap::new);

/// Constructs one monomorphization of the map on a locality during a
/// collective create. Registered under a stable kind tag; the same-binary
/// model guarantees every locality resolves the tag to the same types.
pub(crate) trait KindConstructor: Send + Sync {
    fn construct(
        &self,
        fabric: Arc<dyn Fabric>,
        id: GlobalId,
        config: MapConfig,
    ) -> Result<(), RpcError>;
}

static KINDS: Lazy<scc::HashMap<String, Arc<dyn KindConstructor>>> =
    Lazy::new(scc::HashMap::new);

pub(crate) fn register_kind(tag: &str, constructor: Arc<dyn KindConstructor>) {
    let _ = KINDS.insert(tag.to_owned(), constructor);
}

pub(crate) fn register_instance(
    here: Locality,
    id: GlobalId,
    instance: AnyInstance,
) -> Result<(), PlexError> {
    INSTANCES
        .insert((here, id), instance)
        .map_err(|_| PlexError::AlreadyInitialized(id, here))
}

pub(crate) fn remove_instance(here: Locality, id: GlobalId) {
    INSTANCES.remove(&(here, id));
}

pub(crate) fn instance(here: Locality, id: GlobalId) -> Option<AnyInstance> {
    INSTANCES.get(&(here, id)).map(|entry| entry.get().clone())
}

#[derive(serde::Serialize, serde::Deserialize, Debug)]
pub(crate) struct BootstrapRequest {
    pub kind: String,
    pub id: GlobalId,
    pub config: MapConfig,
}

struct BootstrapService;

#[async_trait::async_trait]
impl CallHandler for BootstrapService {
    async fn handle(
        &self,
        ctx: CallCtx,
        payload: Bytes,
    ) -> Result<Vec<u8>, RpcError> {
        let request: BootstrapRequest = decode(&payload)?;
        let constructor = KINDS
            .get(request.kind.as_str())
            .map(|entry| entry.get().clone())
            .ok_or_else(|| {
                RpcError::Service(format!(
                    "unknown map kind '{}'",
                    request.kind
                ))
            })?;
        info!("bootstrapping map {} on {}", request.id, ctx.here);
        constructor.construct(ctx.fabric.clone(), request.id, request.config)?;
        Ok(Vec::new())
    }
}

/// Register the bootstrap service on a locality. Must run once per
/// locality before any collective create reaches it.
pub fn attach(fabric: &Arc<dyn Fabric>) {
    fabric.register_service(BOOTSTRAP_SERVICE, Arc::new(BootstrapService));
}
