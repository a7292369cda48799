//! Kernel-side bookkeeping shared by every emulated CPU thread.
//!
//! [`Kernel`] owns the thread table, TLS addressing and debug watches, and
//! composes the [`CoreNumAllocator`] and [`ExclusiveMonitor`] primitives.

pub mod corenum;
pub mod exclusive;
pub mod thread;
pub mod watch;

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use log::{debug, error, info};
use thiserror::Error;

use crate::address::Address;

pub use corenum::{CoreNum, CoreNumAllocator, CoreNumUsage};
pub use exclusive::{ExclusiveMonitor, ExclusiveRegion};
pub use thread::{CpuContext, FlagContext, TLS_SLOT_MAX, ThreadId, ThreadState, TlsBlock};
pub use watch::{WatchKind, WatchRegion, WatchSet};

/// Default number of core numbers available to guest threads.
pub const MAX_CORE_COUNT: usize = 150;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KernelError {
    #[error("all {maximum} core numbers are in use")]
    CoreNumbersExhausted { maximum: usize },
    #[error("unknown thread id {0}")]
    UnknownThread(ThreadId),
    #[error("cannot shrink to {requested} core numbers while higher ones are in use")]
    CoreNumbersInUse { requested: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelConfig {
    pub max_core_count: usize,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            max_core_count: MAX_CORE_COUNT,
        }
    }
}

#[derive(Debug)]
struct KernelInner {
    threads: BTreeMap<ThreadId, Arc<ThreadState>>,
    next_thread_id: ThreadId,
    watch_code: bool,
    watch_memory: bool,
    watch_code_addrs: WatchSet,
    watch_memory_addrs: WatchSet,
}

impl KernelInner {
    fn watch_set(&self, kind: WatchKind) -> &WatchSet {
        match kind {
            WatchKind::Code => &self.watch_code_addrs,
            WatchKind::Memory => &self.watch_memory_addrs,
        }
    }

    fn watch_set_mut(&mut self, kind: WatchKind) -> &mut WatchSet {
        match kind {
            WatchKind::Code => &mut self.watch_code_addrs,
            WatchKind::Memory => &mut self.watch_memory_addrs,
        }
    }
}

/// Thread table and watch registry guarded by one coordinator lock.
///
/// The allocator and the exclusive monitor keep their own locks and are never
/// taken while that lock is held for longer than a single call.
#[derive(Debug)]
pub struct Kernel {
    inner: Mutex<KernelInner>,
    corenum_allocator: CoreNumAllocator,
    exclusive_monitor: ExclusiveMonitor,
    start_tick: Instant,
}

impl Default for Kernel {
    fn default() -> Self {
        Self::new(KernelConfig::default())
    }
}

impl Kernel {
    pub fn new(config: KernelConfig) -> Self {
        let corenum_allocator = CoreNumAllocator::new(config.max_core_count);
        info!(
            "Kernel: {} core numbers available for guest threads",
            config.max_core_count
        );

        Self {
            inner: Mutex::new(KernelInner {
                threads: BTreeMap::new(),
                next_thread_id: 0x4001_0001,
                watch_code: false,
                watch_memory: false,
                watch_code_addrs: WatchSet::new(WatchKind::Code),
                watch_memory_addrs: WatchSet::new(WatchKind::Memory),
            }),
            corenum_allocator,
            exclusive_monitor: ExclusiveMonitor::new(config.max_core_count),
            start_tick: Instant::now(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, KernelInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Allocation state of the core numbers. The maximum can only change
    /// through [`Kernel::set_max_core_count`].
    pub fn corenum_allocator(&self) -> CoreNumUsage<'_> {
        CoreNumUsage::new(&self.corenum_allocator)
    }

    /// Changes the number of core numbers, keeping the exclusive monitor
    /// sized to match.
    ///
    /// Shrinking below a live core number is rejected.
    pub fn set_max_core_count(&self, max_core_count: usize) -> Result<(), KernelError> {
        let in_use = KernelError::CoreNumbersInUse {
            requested: max_core_count,
        };
        // Every valid core number must have a monitor slot at all times.
        if max_core_count >= self.exclusive_monitor.core_count() {
            self.exclusive_monitor.resize(max_core_count);
            if !self.corenum_allocator.try_set_maximum(max_core_count) {
                return Err(in_use);
            }
        } else {
            if !self.corenum_allocator.try_set_maximum(max_core_count) {
                return Err(in_use);
            }
            self.exclusive_monitor.resize(max_core_count);
        }
        info!("Kernel: {max_core_count} core numbers available for guest threads");
        Ok(())
    }

    pub fn exclusive_monitor(&self) -> &ExclusiveMonitor {
        &self.exclusive_monitor
    }

    /// Microseconds since the kernel was initialised.
    pub fn uptime_us(&self) -> u64 {
        self.start_tick.elapsed().as_micros() as u64
    }

    /// Registers a new guest thread and assigns it a core number.
    ///
    /// The context picks up the current watch toggles before it becomes
    /// visible in the thread table.
    pub fn create_thread(
        &self,
        name: &str,
        cpu: Arc<dyn CpuContext>,
        tls_base: Address,
    ) -> Result<ThreadId, KernelError> {
        let core_num = self.corenum_allocator.allocate().inspect_err(|e| {
            error!("Kernel: cannot create thread {name}: {e}");
        })?;

        let mut inner = self.lock();
        cpu.set_log_code(inner.watch_code);
        cpu.set_log_mem(inner.watch_memory);

        let id = inner.next_thread_id;
        inner.next_thread_id = inner.next_thread_id.wrapping_add(1);
        let thread = Arc::new(ThreadState {
            id,
            name: name.to_owned(),
            core_num,
            tls: TlsBlock { base: tls_base },
            cpu,
        });
        inner.threads.insert(id, thread);
        debug!("Kernel: created thread {name} id={id} core={core_num}");
        Ok(id)
    }

    /// Exit path run by the thread itself once its context has unwound.
    ///
    /// Removes the record, drops any exclusive claim and frees the core number.
    pub fn exit_thread(&self, thread_id: ThreadId) -> Result<(), KernelError> {
        let thread = self
            .lock()
            .threads
            .remove(&thread_id)
            .ok_or(KernelError::UnknownThread(thread_id))?;
        self.exclusive_monitor.clear_exclusive(thread.core_num);
        self.corenum_allocator.free(thread.core_num);
        debug!(
            "Kernel: thread {} id={} exited, core {} released",
            thread.name, thread.id, thread.core_num
        );
        Ok(())
    }

    pub fn thread(&self, thread_id: ThreadId) -> Option<Arc<ThreadState>> {
        self.lock().threads.get(&thread_id).cloned()
    }

    pub fn thread_count(&self) -> usize {
        self.lock().threads.len()
    }

    /// Address of TLS slot `key` for `thread_id`.
    ///
    /// Out-of-range keys and unknown threads are reported and resolve to the
    /// null address.
    pub fn resolve_tls_address(&self, thread_id: ThreadId, key: i32) -> Address {
        if !(0..=TLS_SLOT_MAX).contains(&key) {
            error!("Kernel: TLS slot {key} out of range for thread {thread_id}");
            return Address::NULL;
        }
        let Some(thread) = self.thread(thread_id) else {
            error!("Kernel: TLS slot {key} requested for unknown thread {thread_id}");
            return Address::NULL;
        };
        thread.tls.slot_addr(key).unwrap_or(Address::NULL)
    }

    /// Requests every live context to stop.
    ///
    /// Records and core numbers stay in place; each thread releases them from
    /// its own exit path via [`Kernel::exit_thread`].
    pub fn exit_all_threads(&self) {
        let inner = self.lock();
        for thread in inner.threads.values() {
            thread.cpu.request_stop();
        }
        info!("Kernel: requested stop of {} threads", inner.threads.len());
    }

    pub fn set_watch_code(&self, enabled: bool) {
        self.lock().watch_code = enabled;
    }

    pub fn set_watch_memory(&self, enabled: bool) {
        self.lock().watch_memory = enabled;
    }

    pub fn watch_code(&self) -> bool {
        self.lock().watch_code
    }

    pub fn watch_memory(&self) -> bool {
        self.lock().watch_memory
    }

    /// Pushes the global watch toggles into every context whose flags differ.
    pub fn refresh_watch_flags(&self) {
        let inner = self.lock();
        for thread in inner.threads.values() {
            let cpu = &thread.cpu;
            if cpu.log_code() != inner.watch_code {
                cpu.set_log_code(inner.watch_code);
            }
            if cpu.log_mem() != inner.watch_memory {
                cpu.set_log_mem(inner.watch_memory);
            }
        }
    }

    /// Registers a watched range. A region already starting at `addr` is
    /// replaced.
    pub fn add_watch(&self, kind: WatchKind, addr: Address, size: u32) {
        self.lock().watch_set_mut(kind).add(addr, size);
    }

    pub fn remove_watch(&self, kind: WatchKind, addr: Address) {
        self.lock().watch_set_mut(kind).remove(addr);
    }

    /// Start of the first watched region of `kind` containing `addr`.
    pub fn find_watch(&self, kind: WatchKind, addr: Address) -> Option<Address> {
        self.lock().watch_set(kind).find(addr)
    }

    /// Snapshot of registered watches of `kind`.
    pub fn watches(&self, kind: WatchKind) -> Vec<WatchRegion> {
        self.lock().watch_set(kind).regions().copied().collect()
    }
}
