use std::collections::BTreeMap;

use crate::address::Address;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchKind {
    Code,
    Memory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchRegion {
    pub start: Address,
    pub size: u32,
    pub kind: WatchKind,
}

impl WatchRegion {
    pub fn matches_addr(&self, addr: Address) -> bool {
        self.start.contains(self.size, addr)
    }
}

/// Watched ranges of one kind, keyed by start address.
///
/// Regions may overlap. Lookup returns the containing region with the lowest
/// start address.
#[derive(Debug, Clone)]
pub struct WatchSet {
    kind: WatchKind,
    regions: BTreeMap<Address, WatchRegion>,
}

impl WatchSet {
    pub fn new(kind: WatchKind) -> Self {
        Self {
            kind,
            regions: BTreeMap::new(),
        }
    }

    pub fn kind(&self) -> WatchKind {
        self.kind
    }

    /// Adds a region. A region already starting at `start` is replaced.
    pub fn add(&mut self, start: Address, size: u32) {
        let region = WatchRegion {
            start,
            size,
            kind: self.kind,
        };
        self.regions.insert(start, region);
    }

    pub fn remove(&mut self, start: Address) -> Option<WatchRegion> {
        self.regions.remove(&start)
    }

    /// Start address of the first region containing `addr`.
    pub fn find(&self, addr: Address) -> Option<Address> {
        self.regions
            .range(..=addr)
            .map(|(_, region)| region)
            .find(|region| region.matches_addr(addr))
            .map(|region| region.start)
    }

    pub fn regions(&self) -> impl Iterator<Item = &WatchRegion> {
        self.regions.values()
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }
}
