//! Stable-symbol registry for the user functions shipped by `apply` and
//! the `for_each` sweeps.
//!
//! Remote invocation cannot marshal arbitrary closures, so callers
//! register a plain `fn` under a symbol on every locality (same-binary
//! model) and operations ship the symbol plus a flat, bincode-encoded
//! argument tuple. Captures are rejected at the type level: only `fn`
//! pointers are accepted.
//!
//! Four signature kinds exist. Entry visitors share the apply signature;
//! the async kinds take the completion handle first so nested async
//! operations extend the caller's group.

use std::any::Any;
use std::sync::Arc;

use once_cell::sync::Lazy;
use serde::{de::DeserializeOwned, Serialize};

use plexmap_rpc::{decode, Handle, RpcError};

use crate::error::PlexError;
use crate::map::{MapKey, MapValue};

/// Receiver-side adapter: decodes the argument bytes, then runs the
/// registered function.
pub(crate) type WireApplyFn<K, V> =
    Arc<dyn Fn(&K, &mut V, &[u8]) -> Result<(), RpcError> + Send + Sync>;
pub(crate) type WireAsyncApplyFn<K, V> = Arc<
    dyn Fn(&Handle, &K, &mut V, &[u8]) -> Result<(), RpcError> + Send + Sync,
>;
pub(crate) type WireKeyFn<K> =
    Arc<dyn Fn(&K, &[u8]) -> Result<(), RpcError> + Send + Sync>;
pub(crate) type WireAsyncKeyFn<K> =
    Arc<dyn Fn(&Handle, &K, &[u8]) -> Result<(), RpcError> + Send + Sync>;

struct Registered {
    /// The typed `fn` pointer, for the owner-local fast path.
    direct: Arc<dyn Any + Send + Sync>,
    /// The monomorphized wire adapter, for remote dispatch.
    wire: Arc<dyn Any + Send + Sync>,
}

type Table = Lazy<scc::HashMap<String, Arc<Registered>>>;

static APPLY: Table = Lazy::new(scc::HashMap::new);
static ASYNC_APPLY: Table = Lazy::new(scc::HashMap::new);
static KEY: Table = Lazy::new(scc::HashMap::new);
static ASYNC_KEY: Table = Lazy::new(scc::HashMap::new);

fn lookup(table: &Table, symbol: &str) -> Result<Arc<Registered>, PlexError> {
    table
        .get(symbol)
        .map(|entry| entry.get().clone())
        .ok_or_else(|| PlexError::NoSuchFunction(symbol.to_owned()))
}

/// Register a value mutator usable by `apply` and `for_each_entry`.
pub fn register_apply<K, V, A>(symbol: &str, function: fn(&K, &mut V, &A))
where
    K: MapKey,
    V: MapValue,
    A: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    let wire: WireApplyFn<K, V> = Arc::new(move |key, value, raw| {
        let args: A = decode(raw)?;
        function(key, value, &args);
        Ok(())
    });
    APPLY.upsert(
        symbol.to_owned(),
        Arc::new(Registered {
            direct: Arc::new(function),
            wire: Arc::new(wire),
        }),
    );
}

/// Register a value mutator usable by `async_apply` and
/// `async_for_each_entry`. The handle argument is the group the
/// triggering operation belongs to.
pub fn register_async_apply<K, V, A>(
    symbol: &str,
    function: fn(&Handle, &K, &mut V, &A),
) where
    K: MapKey,
    V: MapValue,
    A: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    let wire: WireAsyncApplyFn<K, V> =
        Arc::new(move |handle, key, value, raw| {
            let args: A = decode(raw)?;
            function(handle, key, value, &args);
            Ok(())
        });
    ASYNC_APPLY.upsert(
        symbol.to_owned(),
        Arc::new(Registered {
            direct: Arc::new(function),
            wire: Arc::new(wire),
        }),
    );
}

/// Register a key visitor usable by `for_each_key`.
pub fn register_key_fn<K, A>(symbol: &str, function: fn(&K, &A))
where
    K: MapKey,
    A: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    let wire: WireKeyFn<K> = Arc::new(move |key, raw| {
        let args: A = decode(raw)?;
        function(key, &args);
        Ok(())
    });
    KEY.upsert(
        symbol.to_owned(),
        Arc::new(Registered {
            direct: Arc::new(function),
            wire: Arc::new(wire),
        }),
    );
}

/// Register a key visitor usable by `async_for_each_key`.
pub fn register_async_key_fn<K, A>(symbol: &str, function: fn(&Handle, &K, &A))
where
    K: MapKey,
    A: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    let wire: WireAsyncKeyFn<K> = Arc::new(move |handle, key, raw| {
        let args: A = decode(raw)?;
        function(handle, key, &args);
        Ok(())
    });
    ASYNC_KEY.upsert(
        symbol.to_owned(),
        Arc::new(Registered {
            direct: Arc::new(function),
            wire: Arc::new(wire),
        }),
    );
}

pub(crate) fn apply_direct<K, V, A>(
    symbol: &str,
) -> Result<fn(&K, &mut V, &A), PlexError>
where
    K: MapKey,
    V: MapValue,
    A: 'static,
{
    let entry = lookup(&APPLY, symbol)?;
    entry
        .direct
        .downcast_ref::<fn(&K, &mut V, &A)>()
        .copied()
        .ok_or_else(|| PlexError::SignatureMismatch(symbol.to_owned()))
}

pub(crate) fn apply_wire<K, V>(
    symbol: &str,
) -> Result<WireApplyFn<K, V>, PlexError>
where
    K: MapKey,
    V: MapValue,
{
    let entry = lookup(&APPLY, symbol)?;
    entry
        .wire
        .downcast_ref::<WireApplyFn<K, V>>()
        .cloned()
        .ok_or_else(|| PlexError::SignatureMismatch(symbol.to_owned()))
}

pub(crate) fn async_apply_direct<K, V, A>(
    symbol: &str,
) -> Result<fn(&Handle, &K, &mut V, &A), PlexError>
where
    K: MapKey,
    V: MapValue,
    A: 'static,
{
    let entry = lookup(&ASYNC_APPLY, symbol)?;
    entry
        .direct
        .downcast_ref::<fn(&Handle, &K, &mut V, &A)>()
        .copied()
        .ok_or_else(|| PlexError::SignatureMismatch(symbol.to_owned()))
}

pub(crate) fn async_apply_wire<K, V>(
    symbol: &str,
) -> Result<WireAsyncApplyFn<K, V>, PlexError>
where
    K: MapKey,
    V: MapValue,
{
    let entry = lookup(&ASYNC_APPLY, symbol)?;
    entry
        .wire
        .downcast_ref::<WireAsyncApplyFn<K, V>>()
        .cloned()
        .ok_or_else(|| PlexError::SignatureMismatch(symbol.to_owned()))
}

pub(crate) fn key_fn_direct<K, A>(
    symbol: &str,
) -> Result<fn(&K, &A), PlexError>
where
    K: MapKey,
    A: 'static,
{
    let entry = lookup(&KEY, symbol)?;
    entry
        .direct
        .downcast_ref::<fn(&K, &A)>()
        .copied()
        .ok_or_else(|| PlexError::SignatureMismatch(symbol.to_owned()))
}

pub(crate) fn key_fn_wire<K>(symbol: &str) -> Result<WireKeyFn<K>, PlexError>
where
    K: MapKey,
{
    let entry = lookup(&KEY, symbol)?;
    entry
        .wire
        .downcast_ref::<WireKeyFn<K>>()
        .cloned()
        .ok_or_else(|| PlexError::SignatureMismatch(symbol.to_owned()))
}

pub(crate) fn async_key_fn_direct<K, A>(
    symbol: &str,
) -> Result<fn(&Handle, &K, &A), PlexError>
where
    K: MapKey,
    A: 'static,
{
    let entry = lookup(&ASYNC_KEY, symbol)?;
    entry
        .direct
        .downcast_ref::<fn(&Handle, &K, &A)>()
        .copied()
        .ok_or_else(|| PlexError::SignatureMismatch(symbol.to_owned()))
}

pub(crate) fn async_key_fn_wire<K>(
    symbol: &str,
) -> Result<WireAsyncKeyFn<K>, PlexError>
where
    K: MapKey,
{
    let entry = lookup(&ASYNC_KEY, symbol)?;
    entry
        .wire
        .downcast_ref::<WireAsyncKeyFn<K>>()
        .cloned()
        .ok_or_else(|| PlexError::SignatureMismatch(symbol.to_owned()))
}
