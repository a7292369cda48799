//! Integration tests for kernel bookkeeping.
//!
//! These tests verify:
//! 1. Core number uniqueness and exhaustion
//! 2. Exclusive monitor behavior across cores and threads
//! 3. TLS addressing, watches and thread lifecycle

use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

use vita_emu_core::Address;
use vita_emu_core::kernel::{
    CoreNumAllocator, CpuContext, ExclusiveMonitor, FlagContext, Kernel, KernelConfig,
    KernelError, WatchKind,
};

const TLS_BASE: Address = Address(0x8100_0000);

/// Context that counts how often each flag was written.
#[derive(Default)]
struct CountingContext {
    inner: FlagContext,
    code_writes: AtomicU32,
    mem_writes: AtomicU32,
}

impl CpuContext for CountingContext {
    fn log_code(&self) -> bool {
        self.inner.log_code()
    }

    fn set_log_code(&self, enabled: bool) {
        self.code_writes.fetch_add(1, Ordering::Relaxed);
        self.inner.set_log_code(enabled);
    }

    fn log_mem(&self) -> bool {
        self.inner.log_mem()
    }

    fn set_log_mem(&self, enabled: bool) {
        self.mem_writes.fetch_add(1, Ordering::Relaxed);
        self.inner.set_log_mem(enabled);
    }

    fn request_stop(&self) {
        self.inner.request_stop();
    }
}

fn kernel_with_cores(max_core_count: usize) -> Kernel {
    Kernel::new(KernelConfig { max_core_count })
}

#[test]
fn set_maximum_then_one_more_allocation_is_exhausted() {
    let alloc = CoreNumAllocator::default();
    alloc.set_maximum(5);
    for _ in 0..5 {
        alloc.allocate().unwrap();
    }
    assert_eq!(
        alloc.allocate(),
        Err(KernelError::CoreNumbersExhausted { maximum: 5 })
    );
}

#[test]
fn concurrent_allocations_never_collide() {
    let alloc = Arc::new(CoreNumAllocator::new(150));
    let barrier = Arc::new(Barrier::new(6));
    let handles: Vec<_> = (0..6)
        .map(|_| {
            let alloc = Arc::clone(&alloc);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                let mut mine = Vec::new();
                for round in 0..200 {
                    if let Ok(num) = alloc.allocate() {
                        mine.push(num);
                    }
                    if round % 3 == 0 {
                        if let Some(num) = mine.pop() {
                            alloc.free(num);
                        }
                    }
                }
                mine
            })
        })
        .collect();

    let mut live = HashSet::new();
    for handle in handles {
        for num in handle.join().unwrap() {
            assert!(live.insert(num), "core number {num} handed out twice");
        }
    }
    assert_eq!(live.len(), alloc.allocated_count());
}

#[test]
fn store_from_other_core_invalidates_claim_exactly_once() {
    let monitor = ExclusiveMonitor::new(4);
    let addr = Address(0x8100_1000);

    monitor.mark_exclusive(0, addr, 4);
    monitor.notify_store(1, addr + 2, 4);

    assert!(!monitor.check_and_clear_exclusive(0, addr, 4));
    assert_eq!(monitor.claim(0), None);
    // A new claim after the failure works normally.
    monitor.mark_exclusive(0, addr, 4);
    assert!(monitor.check_and_clear_exclusive(0, addr, 4));
}

#[test]
fn successful_store_exclusive_breaks_other_claims() {
    let monitor = ExclusiveMonitor::new(3);
    let addr = Address(0x8100_2000);
    let mut memory = 0u32;

    monitor.mark_exclusive(0, addr, 4);
    monitor.mark_exclusive(1, addr, 4);
    monitor.mark_exclusive(2, addr + 0x40, 4);

    assert!(monitor.exclusive_store(1, addr, 4, || memory = 7));
    assert_eq!(memory, 7);
    assert!(!monitor.exclusive_store(0, addr, 4, || memory = 9));
    assert_eq!(memory, 7);
    assert!(monitor.check_and_clear_exclusive(2, addr + 0x40, 4));
}

#[test]
fn contended_increments_are_atomic_across_cores() {
    const CORES: usize = 4;
    const ITERS: u32 = 500;

    let monitor = Arc::new(ExclusiveMonitor::new(CORES));
    let value = Arc::new(AtomicU32::new(0));
    let addr = Address(0x8100_3000);

    let handles: Vec<_> = (0..CORES)
        .map(|core| {
            let monitor = Arc::clone(&monitor);
            let value = Arc::clone(&value);
            thread::spawn(move || {
                let mut done = 0;
                while done < ITERS {
                    // ldrex
                    monitor.mark_exclusive(core, addr, 4);
                    let loaded = value.load(Ordering::SeqCst);
                    thread::yield_now();
                    // strex
                    let stored = monitor.exclusive_store(core, addr, 4, || {
                        value.store(loaded + 1, Ordering::SeqCst);
                    });
                    if stored {
                        done += 1;
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(value.load(Ordering::SeqCst), CORES as u32 * ITERS);
}

#[test]
fn tls_address_bounds() {
    let kernel = Kernel::default();
    let tid = kernel
        .create_thread("main", Arc::new(FlagContext::new()), TLS_BASE)
        .unwrap();

    assert_eq!(kernel.resolve_tls_address(tid, 0), TLS_BASE);
    assert_eq!(kernel.resolve_tls_address(tid, 0x100), TLS_BASE + 0x400);
    assert_eq!(kernel.resolve_tls_address(tid, 0x101), Address::NULL);
    assert_eq!(kernel.resolve_tls_address(tid, -1), Address::NULL);
    assert_eq!(kernel.resolve_tls_address(tid + 1000, 0), Address::NULL);
}

#[test]
fn thread_creation_fails_when_core_numbers_run_out() {
    let kernel = kernel_with_cores(2);
    let a = kernel
        .create_thread("a", Arc::new(FlagContext::new()), TLS_BASE)
        .unwrap();
    kernel
        .create_thread("b", Arc::new(FlagContext::new()), TLS_BASE)
        .unwrap();
    assert!(matches!(
        kernel.create_thread("c", Arc::new(FlagContext::new()), TLS_BASE),
        Err(KernelError::CoreNumbersExhausted { maximum: 2 })
    ));

    kernel.exit_thread(a).unwrap();
    let c = kernel
        .create_thread("c", Arc::new(FlagContext::new()), TLS_BASE)
        .unwrap();
    assert_eq!(kernel.thread(c).unwrap().core_num, 0);
}

#[test]
fn exit_thread_releases_core_and_claim() {
    let kernel = kernel_with_cores(4);
    let tid = kernel
        .create_thread("worker", Arc::new(FlagContext::new()), TLS_BASE)
        .unwrap();
    let core = kernel.thread(tid).unwrap().core_num;
    kernel
        .exclusive_monitor()
        .mark_exclusive(core, Address(0x1000), 4);

    kernel.exit_thread(tid).unwrap();
    assert!(!kernel.corenum_allocator().is_allocated(core));
    assert_eq!(kernel.exclusive_monitor().claim(core), None);
    assert_eq!(kernel.exit_thread(tid), Err(KernelError::UnknownThread(tid)));
}

#[test]
fn exit_all_threads_signals_without_releasing() {
    let kernel = kernel_with_cores(8);
    let contexts: Vec<_> = (0..3).map(|_| Arc::new(FlagContext::new())).collect();
    for (i, ctx) in contexts.iter().enumerate() {
        kernel
            .create_thread(&format!("t{i}"), ctx.clone(), TLS_BASE)
            .unwrap();
    }

    kernel.exit_all_threads();
    assert!(contexts.iter().all(|ctx| ctx.stop_requested()));
    assert_eq!(kernel.thread_count(), 3);
    assert_eq!(kernel.corenum_allocator().allocated_count(), 3);
}

#[test]
fn refresh_watch_flags_only_writes_changes() {
    let kernel = Kernel::default();
    let ctx = Arc::new(CountingContext::default());
    kernel.create_thread("main", ctx.clone(), TLS_BASE).unwrap();
    let code_writes = ctx.code_writes.load(Ordering::Relaxed);
    let mem_writes = ctx.mem_writes.load(Ordering::Relaxed);

    kernel.refresh_watch_flags();
    assert_eq!(ctx.code_writes.load(Ordering::Relaxed), code_writes);

    kernel.set_watch_code(true);
    kernel.refresh_watch_flags();
    kernel.refresh_watch_flags();
    assert!(ctx.log_code());
    assert!(!ctx.log_mem());
    assert_eq!(ctx.code_writes.load(Ordering::Relaxed), code_writes + 1);
    assert_eq!(ctx.mem_writes.load(Ordering::Relaxed), mem_writes);
}

#[test]
fn new_threads_pick_up_current_watch_flags() {
    let kernel = Kernel::default();
    kernel.set_watch_memory(true);
    let ctx = Arc::new(FlagContext::new());
    kernel.create_thread("late", ctx.clone(), TLS_BASE).unwrap();
    assert!(ctx.log_mem());
    assert!(!ctx.log_code());
}

#[test]
fn watch_regions_are_tracked_per_kind() {
    let kernel = Kernel::default();
    kernel.add_watch(WatchKind::Memory, Address(0x8100_0000), 0x100);
    kernel.add_watch(WatchKind::Code, Address(0x8000_0000), 0x10);

    assert_eq!(
        kernel.find_watch(WatchKind::Memory, Address(0x8100_0080)),
        Some(Address(0x8100_0000))
    );
    assert_eq!(
        kernel.find_watch(WatchKind::Code, Address(0x8100_0080)),
        None
    );

    kernel.remove_watch(WatchKind::Memory, Address(0x8100_0000));
    assert_eq!(
        kernel.find_watch(WatchKind::Memory, Address(0x8100_0080)),
        None
    );
    assert_eq!(kernel.watches(WatchKind::Code).len(), 1);
}

#[test]
fn growing_core_count_grows_exclusive_monitor() {
    let kernel = kernel_with_cores(2);
    kernel.set_max_core_count(4).unwrap();
    assert_eq!(kernel.corenum_allocator().maximum(), 4);
    assert_eq!(kernel.exclusive_monitor().core_count(), 4);

    let tids: Vec<_> = (0..3)
        .map(|i| {
            kernel
                .create_thread(&format!("t{i}"), Arc::new(FlagContext::new()), TLS_BASE)
                .unwrap()
        })
        .collect();
    let core = kernel.thread(tids[2]).unwrap().core_num;
    assert_eq!(core, 2);

    let monitor = kernel.exclusive_monitor();
    let mut word = 0u32;
    monitor.mark_exclusive(core, Address(0x8100_4000), 4);
    assert!(monitor.exclusive_store(core, Address(0x8100_4000), 4, || word = 1));
    assert_eq!(word, 1);
}

#[test]
fn shrinking_below_live_core_number_is_rejected() {
    let kernel = kernel_with_cores(4);
    let tids: Vec<_> = (0..3)
        .map(|i| {
            kernel
                .create_thread(&format!("t{i}"), Arc::new(FlagContext::new()), TLS_BASE)
                .unwrap()
        })
        .collect();

    assert_eq!(
        kernel.set_max_core_count(2),
        Err(KernelError::CoreNumbersInUse { requested: 2 })
    );
    assert_eq!(kernel.exclusive_monitor().core_count(), 4);

    kernel.exit_thread(tids[2]).unwrap();
    kernel.set_max_core_count(2).unwrap();
    assert_eq!(kernel.corenum_allocator().maximum(), 2);
    assert_eq!(kernel.exclusive_monitor().core_count(), 2);
    assert!(matches!(
        kernel.create_thread("t3", Arc::new(FlagContext::new()), TLS_BASE),
        Err(KernelError::CoreNumbersExhausted { maximum: 2 })
    ));
}
