/// Conflict resolution for inserting an already-present key.
///
/// Bound at construction as a type parameter of the map, so every
/// locality resolves conflicts identically. Custom reducers implement
/// this trait on a unit struct.
pub trait InsertPolicy<V>: Default + Send + Sync + 'static {
    /// Invoked under the bucket write lock when `key` is already present.
    fn resolve(current: &mut V, incoming: V);
}

/// Last write wins (the default).
#[derive(Debug, Default, Clone, Copy)]
pub struct Overwrite;

impl<V> InsertPolicy<V> for Overwrite {
    #[inline]
    fn resolve(current: &mut V, incoming: V) {
        *current = incoming;
    }
}

/// First write wins; a conflicting insert is discarded silently.
#[derive(Debug, Default, Clone, Copy)]
pub struct KeepExisting;

impl<V> InsertPolicy<V> for KeepExisting {
    #[inline]
    fn resolve(_current: &mut V, _incoming: V) {}
}
