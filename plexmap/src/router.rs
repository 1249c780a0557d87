use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

use mur3::Hasher32;
use plexmap_rpc::Locality;

/// Seed of the routing hash. Fixed so every locality computes the same
/// owner for the same key.
pub const ROUTE_SEED: u32 = 0;

/// Cross-locality routing hash policy. Implementations must be
/// deterministic and identical on every locality, and should be
/// independent of whatever hash the local shard uses for its buckets.
pub trait RouteHasher<K>: Send + Sync + 'static {
    fn hash(key: &K) -> u32;
}

/// Murmur3 routing hash (the default).
#[derive(Debug, Default, Clone, Copy)]
pub struct Murmur3Route;

impl<K: Hash> RouteHasher<K> for Murmur3Route {
    fn hash(key: &K) -> u32 {
        let mut hasher = Hasher32::with_seed(ROUTE_SEED);
        key.hash(&mut hasher);
        hasher.finish32()
    }
}

/// Maps each key to its owning locality: `hash(key) mod N`, with `N`
/// captured at creation. Rebalancing is unsupported.
pub struct Router<K, H = Murmur3Route> {
    total: u32,
    _hash: PhantomData<fn(&K) -> H>,
}

impl<K, H: RouteHasher<K>> Router<K, H> {
    pub fn new(locality_count: usize) -> Self {
        Router {
            total: locality_count as u32,
            _hash: PhantomData,
        }
    }

    #[inline]
    pub fn owner(&self, key: &K) -> Locality {
        Locality(H::hash(key) % self.total)
    }
}
