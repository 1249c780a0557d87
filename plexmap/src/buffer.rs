use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use plexmap_rpc::{encode_bytes, Call, Fabric, Handle, Locality};

use crate::error::PlexError;
use crate::map::{Entry, MapKey, MapOp, MapValue};

/// Outbound insertion-aggregation buffers: one bounded batch per remote
/// locality.
///
/// Appending past the bound swaps the full batch out and ships it as a
/// single call that replays each entry into the destination shard. Ships
/// are enqueued while the destination's lock is held; the fabric enqueue
/// is non-blocking and the mesh delivers a (src, dst) pair FIFO, so
/// entries from one sender to one destination install in submission
/// order. Sync-path ships ride an internal shipper handle; async-path
/// ships attach to the caller's handle, one operation per batch.
///
/// The only back-reference to the facade is its service id string.
pub(crate) struct BuffersVector<K, V> {
    service: String,
    capacity: usize,
    fabric: Arc<dyn Fabric>,
    shipper: Handle,
    slots: Vec<Mutex<Vec<Entry<K, V>>>>,
}

impl<K: MapKey, V: MapValue> BuffersVector<K, V> {
    pub fn new(
        service: String,
        fabric: Arc<dyn Fabric>,
        capacity: usize,
    ) -> Self {
        let slots = (0..fabric.num_localities())
            .map(|_| Mutex::new(Vec::new()))
            .collect();
        BuffersVector {
            service,
            capacity,
            fabric,
            shipper: Handle::new(),
            slots,
        }
    }

    /// Queue an entry for `target`; ships the batch once it reaches the
    /// bound.
    pub fn insert(
        &self,
        entry: Entry<K, V>,
        target: Locality,
    ) -> Result<(), PlexError> {
        self.push(entry, target, &self.shipper)
    }

    /// As [`BuffersVector::insert`], but a threshold-triggered ship
    /// counts as one in-flight operation on `handle`.
    pub fn async_insert(
        &self,
        handle: &Handle,
        entry: Entry<K, V>,
        target: Locality,
    ) -> Result<(), PlexError> {
        self.push(entry, target, handle)
    }

    fn push(
        &self,
        entry: Entry<K, V>,
        target: Locality,
        handle: &Handle,
    ) -> Result<(), PlexError> {
        let mut slot = self.slots[target.id() as usize].lock();
        slot.push(entry);
        if slot.len() >= self.capacity {
            let batch =
                std::mem::replace(&mut *slot, Vec::with_capacity(self.capacity));
            // Shipped under the lock: the ordered enqueue keeps batches
            // to this destination in submission order.
            self.ship(target, batch, handle)?;
        }
        Ok(())
    }

    /// Ship every non-empty residual batch. Idempotent on empty buffers;
    /// surfaces any ship failure recorded so far.
    pub fn flush_all(&self) -> Result<(), PlexError> {
        let here = self.fabric.here();
        for (id, slot) in self.slots.iter().enumerate() {
            let target = Locality(id as u32);
            if target == here {
                continue;
            }
            let mut slot = slot.lock();
            if slot.is_empty() {
                continue;
            }
            let batch = std::mem::take(&mut *slot);
            self.ship(target, batch, &self.shipper)?;
        }
        if let Some(error) = self.shipper.failure() {
            return Err(error.into());
        }
        Ok(())
    }

    fn ship(
        &self,
        target: Locality,
        batch: Vec<Entry<K, V>>,
        handle: &Handle,
    ) -> Result<(), PlexError> {
        debug!("shipping {} buffered entries to {}", batch.len(), target);
        let payload =
            encode_bytes(&MapOp::<K, V>::InstallBatch { entries: batch })?;
        self.fabric.async_execute_at(
            handle,
            target,
            Call::new(self.service.as_str(), payload),
        );
        Ok(())
    }
}
