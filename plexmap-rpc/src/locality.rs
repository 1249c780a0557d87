use std::fmt;

/// One node of the fleet, addressed by a dense id in `0..N`.
///
/// The locality count is fixed when a mesh is built; ids are totally
/// ordered and stable for the lifetime of the process.
#[derive(
    serde::Serialize,
    serde::Deserialize,
    Debug,
    Default,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
)]
pub struct Locality(pub u32);

impl Locality {
    #[inline]
    pub fn id(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for Locality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}", self.0)
    }
}

impl From<u32> for Locality {
    #[inline]
    fn from(id: u32) -> Self {
        Locality(id)
    }
}
