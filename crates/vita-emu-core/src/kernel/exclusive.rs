use std::sync::{Mutex, MutexGuard};

use log::error;

use super::corenum::CoreNum;
use crate::address::Address;

/// Guest range claimed by a load-exclusive instruction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExclusiveRegion {
    pub address: Address,
    pub size: u32,
}

impl ExclusiveRegion {
    fn covers(&self, address: Address, size: u32) -> bool {
        let start = u64::from(self.address.raw());
        let end = start + u64::from(self.size);
        let want = u64::from(address.raw());
        start <= want && want + u64::from(size) <= end
    }

    fn overlaps(&self, address: Address, size: u32) -> bool {
        self.address.overlaps(self.size, address, size)
    }
}

/// Local exclusive monitors for every core number.
///
/// The slot table always matches the allocator maximum. Claims from one
/// core are invalidated by stores from any other core to an overlapping range,
/// and every store-exclusive clears the issuing core's claim whether it
/// succeeds or not.
#[derive(Debug)]
pub struct ExclusiveMonitor {
    slots: Mutex<Vec<Option<ExclusiveRegion>>>,
}

impl ExclusiveMonitor {
    pub fn new(core_count: usize) -> Self {
        Self {
            slots: Mutex::new(vec![None; core_count]),
        }
    }

    fn slots(&self) -> MutexGuard<'_, Vec<Option<ExclusiveRegion>>> {
        self.slots.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn core_count(&self) -> usize {
        self.slots().len()
    }

    /// Grows or shrinks the slot table. Dropped slots lose their claims.
    pub(crate) fn resize(&self, core_count: usize) {
        self.slots().resize(core_count, None);
    }

    /// Records the range claimed by `core`, replacing any previous claim.
    pub fn mark_exclusive(&self, core: CoreNum, address: Address, size: u32) {
        let mut slots = self.slots();
        match slots.get_mut(core) {
            Some(slot) => *slot = Some(ExclusiveRegion { address, size }),
            None => error!("Exclusive monitor: core {core} out of range ({})", slots.len()),
        }
    }

    /// Returns whether `core` still holds a claim covering the range, then
    /// clears the claim unconditionally.
    pub fn check_and_clear_exclusive(&self, core: CoreNum, address: Address, size: u32) -> bool {
        let mut slots = self.slots();
        Self::take_claim(&mut slots, core, address, size)
    }

    /// Performs a store-exclusive: when the claim is valid, `store` runs while
    /// the monitor is locked and overlapping claims on other cores are
    /// invalidated. Returns whether the store happened.
    pub fn exclusive_store<F>(&self, core: CoreNum, address: Address, size: u32, store: F) -> bool
    where
        F: FnOnce(),
    {
        let mut slots = self.slots();
        if !Self::take_claim(&mut slots, core, address, size) {
            return false;
        }
        store();
        Self::invalidate_others(&mut slots, core, address, size);
        true
    }

    /// A plain store by `core` kills overlapping claims held by other cores.
    pub fn notify_store(&self, core: CoreNum, address: Address, size: u32) {
        let mut slots = self.slots();
        Self::invalidate_others(&mut slots, core, address, size);
    }

    /// Drops the claim held by `core` (CLREX, thread exit).
    pub fn clear_exclusive(&self, core: CoreNum) {
        if let Some(slot) = self.slots().get_mut(core) {
            *slot = None;
        }
    }

    pub fn claim(&self, core: CoreNum) -> Option<ExclusiveRegion> {
        self.slots().get(core).copied().flatten()
    }

    fn take_claim(
        slots: &mut [Option<ExclusiveRegion>],
        core: CoreNum,
        address: Address,
        size: u32,
    ) -> bool {
        let count = slots.len();
        let Some(slot) = slots.get_mut(core) else {
            error!("Exclusive monitor: core {core} out of range ({count})");
            return false;
        };
        slot.take().is_some_and(|claim| claim.covers(address, size))
    }

    fn invalidate_others(
        slots: &mut [Option<ExclusiveRegion>],
        core: CoreNum,
        address: Address,
        size: u32,
    ) {
        for (idx, slot) in slots.iter_mut().enumerate() {
            if idx == core {
                continue;
            }
            if slot.is_some_and(|claim| claim.overlaps(address, size)) {
                *slot = None;
            }
        }
    }
}
