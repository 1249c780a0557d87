use std::hash::{BuildHasher, Hash};
use std::marker::PhantomData;
use std::sync::atomic::{AtomicUsize, Ordering};

use ahash::RandomState;
use hashbrown::hash_map::Entry as BucketEntry;
use hashbrown::HashMap;
use parking_lot::RwLock;

use crate::policy::InsertPolicy;

/// Bucketed concurrent hashmap holding one locality's share of the map.
///
/// Buckets are guarded independently, so operations on different buckets
/// never contend. The bucket index comes from a per-instance random hash
/// state: intra-shard skew does not correlate with the cross-locality
/// routing hash.
pub struct LocalShard<K, V, P> {
    buckets: Vec<RwLock<HashMap<K, V>>>,
    index_state: RandomState,
    mask: usize,
    size: AtomicUsize,
    _policy: PhantomData<fn() -> P>,
}

impl<K, V, P> LocalShard<K, V, P>
where
    K: Eq + Hash,
    P: InsertPolicy<V>,
{
    /// `bucket_count` is rounded up to a power of two.
    pub fn new(bucket_count: usize) -> Self {
        let bucket_count = bucket_count.max(1).next_power_of_two();
        let buckets = (0..bucket_count)
            .map(|_| RwLock::new(HashMap::new()))
            .collect();
        LocalShard {
            buckets,
            index_state: RandomState::new(),
            mask: bucket_count - 1,
            size: AtomicUsize::new(0),
            _policy: PhantomData,
        }
    }

    #[inline]
    fn bucket_of(&self, key: &K) -> usize {
        (self.index_state.hash_one(key) as usize) & self.mask
    }

    /// Insert under the bucket write lock; conflicts go through the
    /// insert policy.
    pub fn insert(&self, key: K, value: V) {
        let mut bucket = self.buckets[self.bucket_of(&key)].write();
        match bucket.entry(key) {
            BucketEntry::Occupied(mut occupied) => {
                P::resolve(occupied.get_mut(), value);
            }
            BucketEntry::Vacant(vacant) => {
                vacant.insert(value);
                self.size.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Remove the entry if present; absent keys are a no-op.
    pub fn erase(&self, key: &K) -> bool {
        let mut bucket = self.buckets[self.bucket_of(key)].write();
        if bucket.remove(key).is_some() {
            self.size.fetch_sub(1, Ordering::Relaxed);
            true
        } else {
            false
        }
    }

    pub fn lookup(&self, key: &K) -> Option<V>
    where
        V: Clone,
    {
        self.buckets[self.bucket_of(key)].read().get(key).cloned()
    }

    /// Run `function` on the entry under the bucket write lock. Absent
    /// key is a no-op; returns whether the key was found. The callback
    /// must be short, must not block, and must not call back into the
    /// owning map.
    pub fn apply<F>(&self, key: &K, function: F) -> bool
    where
        F: FnOnce(&K, &mut V),
    {
        let mut bucket = self.buckets[self.bucket_of(key)].write();
        match bucket.get_key_value_mut(key) {
            Some((stored, value)) => {
                function(stored, value);
                true
            }
            None => false,
        }
    }

    /// Clear bucket by bucket. Not synchronized with concurrent writers.
    pub fn clear(&self) {
        for bucket in &self.buckets {
            let mut bucket = bucket.write();
            self.size.fetch_sub(bucket.len(), Ordering::Relaxed);
            bucket.clear();
        }
    }

    pub fn len(&self) -> usize {
        self.size.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn num_buckets(&self) -> usize {
        self.buckets.len()
    }

    /// Visit every entry of one bucket under its write lock; the visitor
    /// may mutate values in place.
    pub fn for_each_entry_in_bucket<F>(&self, index: usize, mut function: F)
    where
        F: FnMut(&K, &mut V),
    {
        let mut bucket = self.buckets[index].write();
        for (key, value) in bucket.iter_mut() {
            function(key, value);
        }
    }

    /// Visit every key of one bucket under its read lock.
    pub fn for_each_key_in_bucket<F>(&self, index: usize, mut function: F)
    where
        F: FnMut(&K),
    {
        let bucket = self.buckets[index].read();
        for key in bucket.keys() {
            function(key);
        }
    }
}
