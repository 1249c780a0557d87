use crate::error::PlexError;

/// Expected entries per shard bucket; drives the initial bucket count.
pub const DEFAULT_ENTRIES_PER_BUCKET: usize = 16;

/// Entries an outbound aggregation buffer holds before it auto-ships.
pub const DEFAULT_BUFFER_CAPACITY: usize = 1024;

/// Sizing parameters of a map instance. Travels in the collective create,
/// so every locality builds an identically shaped shard.
#[derive(serde::Serialize, serde::Deserialize, Debug, Clone)]
pub struct MapConfig {
    pub(crate) num_entries: usize,
    pub(crate) buffer_capacity: usize,
}

impl MapConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Expected total number of entries across the fleet.
    pub fn num_entries(mut self, num_entries: usize) -> Self {
        self.num_entries = num_entries;
        self
    }

    /// Per-destination aggregation buffer bound. Must be positive.
    pub fn buffer_capacity(
        mut self,
        buffer_capacity: usize,
    ) -> Result<Self, PlexError> {
        if buffer_capacity == 0 {
            return Err(PlexError::InvalidArgument(
                "buffer capacity must be positive".into(),
            ));
        }
        self.buffer_capacity = buffer_capacity;
        Ok(self)
    }

    pub(crate) fn bucket_count(&self) -> usize {
        (self.num_entries / DEFAULT_ENTRIES_PER_BUCKET)
            .max(1)
            .next_power_of_two()
    }
}

impl Default for MapConfig {
    fn default() -> Self {
        MapConfig {
            num_entries: 1024,
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
        }
    }
}
