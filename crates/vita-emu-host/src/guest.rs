//! Synthetic guest workload used to drive the kernel, renderer and mixer
//! together from the host binary.

use crossbeam_channel as cb;
use log::{debug, info, warn};
use std::collections::HashMap;
use std::f32::consts::TAU;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use vita_emu_core::Address;
use vita_emu_core::audio::OutputPort;
use vita_emu_core::kernel::{FlagContext, Kernel, KernelError, ThreadId};
use vita_emu_core::renderer::driver::{
    ContextHandle, DrawParams, Primitive, RenderTargetHandle, RenderTargetParams,
};
use vita_emu_core::renderer::{CommandKind, CommandSender, RenderError};

const TLS_BASE: u32 = 0x8100_0000;
const TLS_STRIDE: u32 = 0x1000;
const COUNTER_ADDR: Address = Address(0x8200_0000);
const FRAMES_PER_CHUNK: usize = 256;
const WAKE_TIMEOUT: Duration = Duration::from_millis(100);

/// Per-thread wake channels for producers parked on an audio port.
#[derive(Default)]
pub struct WakeBoard {
    waiters: Mutex<HashMap<ThreadId, cb::Sender<()>>>,
}

impl WakeBoard {
    pub fn register(&self, thread: ThreadId) -> cb::Receiver<()> {
        let (tx, rx) = cb::bounded(1);
        self.lock().insert(thread, tx);
        rx
    }

    pub fn unregister(&self, thread: ThreadId) {
        self.lock().remove(&thread);
    }

    /// Never blocks; a wake already pending is coalesced.
    pub fn wake(&self, thread: ThreadId) {
        if let Some(tx) = self.lock().get(&thread) {
            let _ = tx.try_send(());
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<ThreadId, cb::Sender<()>>> {
        self.waiters.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Everything one guest thread needs from the host.
#[derive(Clone)]
pub struct GuestEnv {
    pub kernel: Arc<Kernel>,
    pub render: CommandSender,
    pub wake: Arc<WakeBoard>,
    /// Guest-visible word incremented with exclusive load/store pairs.
    pub counter: Arc<AtomicU32>,
}

#[derive(Debug)]
pub enum GuestExit {
    Stopped { frames: u64 },
    Kernel(KernelError),
    Render(RenderError),
}

impl From<KernelError> for GuestExit {
    fn from(e: KernelError) -> Self {
        Self::Kernel(e)
    }
}

impl From<RenderError> for GuestExit {
    fn from(e: RenderError) -> Self {
        Self::Render(e)
    }
}

struct Tone {
    phase: f32,
    step: f32,
    pcm: Vec<u8>,
    /// Bytes of `pcm` already accepted by the port.
    sent: usize,
}

impl Tone {
    fn new(freq: f32, sample_rate: u32) -> Self {
        Self {
            phase: 0.0,
            step: freq / sample_rate as f32,
            pcm: Vec::with_capacity(FRAMES_PER_CHUNK * 2),
            sent: 0,
        }
    }

    /// PCM not yet accepted by the port. A new chunk of mono S16 at quarter
    /// scale is generated only once the previous one was fully sent.
    fn pending(&mut self) -> &[u8] {
        if self.sent >= self.pcm.len() {
            self.pcm.clear();
            self.sent = 0;
            for _ in 0..FRAMES_PER_CHUNK {
                let sample = ((self.phase * TAU).sin() * f32::from(i16::MAX) * 0.25) as i16;
                self.pcm.extend_from_slice(&sample.to_le_bytes());
                self.phase = (self.phase + self.step).fract();
            }
        }
        &self.pcm[self.sent..]
    }

    fn advance(&mut self, accepted: usize) {
        self.sent = (self.sent + accepted).min(self.pcm.len());
    }
}

/// Runs guest thread `index` until the kernel asks it to stop.
pub fn run(env: GuestEnv, index: u32, port: Option<Arc<OutputPort>>) -> GuestExit {
    let ctx = Arc::new(FlagContext::new());
    let tls = Address(TLS_BASE + index * TLS_STRIDE);
    let tid = match env
        .kernel
        .create_thread(&format!("guest{index}"), ctx.clone(), tls)
    {
        Ok(tid) => tid,
        Err(e) => return e.into(),
    };
    let wake = env.wake.register(tid);

    let result = frame_loop(&env, tid, &ctx, port.as_deref(), &wake, index);

    env.wake.unregister(tid);
    if let Err(e) = env.kernel.exit_thread(tid) {
        warn!("guest{index}: {e}");
    }
    match result {
        Ok(frames) => GuestExit::Stopped { frames },
        Err(e) => e,
    }
}

fn frame_loop(
    env: &GuestEnv,
    tid: ThreadId,
    ctx: &FlagContext,
    port: Option<&OutputPort>,
    wake: &cb::Receiver<()>,
    index: u32,
) -> Result<u64, GuestExit> {
    let Some(thread) = env.kernel.thread(tid) else {
        return Err(KernelError::UnknownThread(tid).into());
    };
    let core = thread.core_num;
    debug!(
        "guest{index}: thread {tid:#x} on core {core}, TLS slot 0 at {}",
        env.kernel.resolve_tls_address(tid, 0)
    );

    let context = ContextHandle::new();
    let target = RenderTargetHandle::new();
    env.render.execute(CommandKind::CreateContext {
        context: context.clone(),
    })?;
    env.render.execute(CommandKind::CreateRenderTarget {
        target: target.clone(),
        params: RenderTargetParams {
            width: 960,
            height: 544,
            scenes_per_frame: 1,
            multisample: Default::default(),
        },
    })?;

    let mut tone = port.map(|p| Tone::new(220.0 * (index + 1) as f32, p.format().sample_rate));
    let mut frames = 0u64;
    while !ctx.stop_requested() {
        exclusive_increment(&env.kernel, core, &env.counter);

        env.render.post(CommandKind::Draw {
            context: context.clone(),
            target: target.clone(),
            params: DrawParams {
                primitive: Primitive::Triangles,
                vertex_count: 3,
                instance_count: 1,
            },
        })?;
        env.render.execute(CommandKind::Sync)?;
        frames += 1;

        if let (Some(port), Some(tone)) = (port, tone.as_mut()) {
            let status = port.output(tone.pending(), tid);
            tone.advance(status.accepted);
            if status.wait {
                // Parked until the mixer drains the port.
                let _ = wake.recv_timeout(WAKE_TIMEOUT);
            }
        }
    }

    env.render.post(CommandKind::DestroyRenderTarget { target })?;
    info!("guest{index}: stopped after {frames} frames");
    Ok(frames)
}

/// Guest equivalent of an ldrex/add/strex retry loop.
fn exclusive_increment(kernel: &Kernel, core: usize, counter: &AtomicU32) {
    let monitor = kernel.exclusive_monitor();
    loop {
        monitor.mark_exclusive(core, COUNTER_ADDR, 4);
        let value = counter.load(Ordering::Acquire);
        let stored = monitor.exclusive_store(core, COUNTER_ADDR, 4, || {
            counter.store(value.wrapping_add(1), Ordering::Release);
        });
        if stored {
            break;
        }
    }
}
