use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use super::corenum::CoreNum;
use crate::address::Address;

/// Guest-visible thread identifier.
pub type ThreadId = i32;

/// Number of pointer-sized TLS slots a thread may address (inclusive upper
/// bound). The block behind the last slot is reserved by the guest system.
pub const TLS_SLOT_MAX: i32 = 0x100;

/// Size in bytes of one TLS slot (a 32-bit guest pointer).
pub const TLS_SLOT_SIZE: u32 = 4;

/// Execution context of one emulated CPU thread.
///
/// Implemented by the CPU backend. Every method may be called from a thread
/// other than the one executing guest code.
pub trait CpuContext: Send + Sync {
    fn log_code(&self) -> bool;
    fn set_log_code(&self, enabled: bool);
    fn log_mem(&self) -> bool;
    fn set_log_mem(&self, enabled: bool);
    /// Asks the context to leave its run loop at the next opportunity.
    fn request_stop(&self);
}

/// Thread-local storage block of one guest thread.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TlsBlock {
    pub base: Address,
}

impl TlsBlock {
    /// Address of `slot`, or `None` if outside `0..=TLS_SLOT_MAX`.
    pub fn slot_addr(&self, slot: i32) -> Option<Address> {
        if !(0..=TLS_SLOT_MAX).contains(&slot) {
            return None;
        }
        Some(self.base + slot as u32 * TLS_SLOT_SIZE)
    }
}

/// One entry in the kernel thread table.
pub struct ThreadState {
    pub id: ThreadId,
    pub name: String,
    pub core_num: CoreNum,
    pub tls: TlsBlock,
    pub cpu: Arc<dyn CpuContext>,
}

impl fmt::Debug for ThreadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadState")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("core_num", &self.core_num)
            .field("tls", &self.tls)
            .finish_non_exhaustive()
    }
}

/// Minimal [`CpuContext`] backed by atomics.
///
/// Used by frontends that do not execute guest code (headless runs,
/// tooling) and by tests.
#[derive(Debug, Default)]
pub struct FlagContext {
    log_code: AtomicBool,
    log_mem: AtomicBool,
    stop_requested: AtomicBool,
}

impl FlagContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::Acquire)
    }
}

impl CpuContext for FlagContext {
    fn log_code(&self) -> bool {
        self.log_code.load(Ordering::Relaxed)
    }

    fn set_log_code(&self, enabled: bool) {
        self.log_code.store(enabled, Ordering::Relaxed);
    }

    fn log_mem(&self) -> bool {
        self.log_mem.load(Ordering::Relaxed)
    }

    fn set_log_mem(&self, enabled: bool) {
        self.log_mem.store(enabled, Ordering::Relaxed);
    }

    fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::Release);
    }
}
