use std::fmt;
use std::ops::Add;

/// A 32-bit guest virtual address.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Address(pub u32);

impl Address {
    pub const NULL: Address = Address(0);

    #[inline]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn raw(self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Returns whether `[self, self + size)` and `[other, other + other_size)`
    /// share at least one byte. Zero-sized ranges never overlap.
    pub fn overlaps(self, size: u32, other: Address, other_size: u32) -> bool {
        if size == 0 || other_size == 0 {
            return false;
        }
        let a_start = u64::from(self.0);
        let a_end = a_start + u64::from(size);
        let b_start = u64::from(other.0);
        let b_end = b_start + u64::from(other_size);
        a_start < b_end && b_start < a_end
    }

    /// Returns whether `addr` lies in `[self, self + size)`.
    pub fn contains(self, size: u32, addr: Address) -> bool {
        let start = u64::from(self.0);
        let addr = u64::from(addr.0);
        start <= addr && addr < start + u64::from(size)
    }
}

impl Add<u32> for Address {
    type Output = Address;

    fn add(self, rhs: u32) -> Address {
        Address(self.0.wrapping_add(rhs))
    }
}

impl From<u32> for Address {
    fn from(raw: u32) -> Self {
        Self(raw)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08X}", self.0)
    }
}
