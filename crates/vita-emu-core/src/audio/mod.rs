//! Guest audio output ports mixed into the host audio callback.
//!
//! Producers write S16 PCM into [`OutputPort`]s. The host audio thread runs
//! [`MixCallback::render`] at the device cadence, pulling from every port and
//! resuming parked producers when a port runs low.

pub mod device;
pub mod format;
pub mod mixer;
pub mod port;
pub mod stream;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use log::{error, info};
use thiserror::Error;

use crate::kernel::ThreadId;

pub use device::{AudioDevice, AudioHost};
pub use format::{AudioSpec, MAX_VOLUME, SampleFormat, mix_audio};
pub use mixer::MixCallback;
pub use port::{OutputPort, OutputStatus, PortId};
pub use stream::{AudioStream, PortFormat};

/// Wakes a guest thread parked on an output port. Called from the host audio
/// thread, so it must not block.
pub type ResumeAudioThread = Arc<dyn Fn(ThreadId) + Send + Sync>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AudioError {
    #[error("failed to open audio device: {0}")]
    DeviceOpen(String),
    #[error("audio device error: {0}")]
    Device(String),
    #[error("unsupported device sample format {0}")]
    UnsupportedFormat(String),
    #[error("unknown audio port {0}")]
    UnknownPort(PortId),
    #[error("invalid port format: {rate} Hz, {channels} channels")]
    InvalidPortFormat { rate: u32, channels: u16 },
}

/// Port registry plus read-only device parameters.
pub struct AudioState {
    spec: AudioSpec,
    resume_thread: ResumeAudioThread,
    out_ports: Mutex<BTreeMap<PortId, Arc<OutputPort>>>,
    next_port_id: AtomicI32,
    callback_len: AtomicUsize,
}

impl fmt::Debug for AudioState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioState")
            .field("spec", &self.spec)
            .field("callback_len", &self.callback_len())
            .field("out_ports", &self.ports().len())
            .finish_non_exhaustive()
    }
}

impl AudioState {
    pub fn new(spec: AudioSpec, resume_thread: ResumeAudioThread) -> Self {
        Self {
            spec,
            resume_thread,
            out_ports: Mutex::new(BTreeMap::new()),
            next_port_id: AtomicI32::new(1),
            callback_len: AtomicUsize::new(spec.size()),
        }
    }

    fn ports(&self) -> MutexGuard<'_, BTreeMap<PortId, Arc<OutputPort>>> {
        self.out_ports.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Granted device spec.
    pub fn spec(&self) -> &AudioSpec {
        &self.spec
    }

    pub fn resume_thread(&self) -> &ResumeAudioThread {
        &self.resume_thread
    }

    /// Bytes the device asks for per callback. Starts at `spec().size()` and
    /// changes only when the mixer adopts a device-chosen length.
    pub fn callback_len(&self) -> usize {
        self.callback_len.load(Ordering::Acquire)
    }

    /// Resizes every port's wake threshold and buffer to `len` bytes per
    /// callback.
    pub fn set_callback_len(&self, len: usize) {
        let ports = self.ports();
        self.callback_len.store(len, Ordering::Release);
        for port in ports.values() {
            port.set_callback_len(len);
        }
    }

    pub fn open_port(&self, format: PortFormat) -> Result<Arc<OutputPort>, AudioError> {
        if format.sample_rate == 0 || format.channels == 0 {
            return Err(AudioError::InvalidPortFormat {
                rate: format.sample_rate,
                channels: format.channels,
            });
        }
        let id = self.next_port_id.fetch_add(1, Ordering::Relaxed);
        let port = Arc::new(OutputPort::new(id, format, &self.spec));
        let mut ports = self.ports();
        port.set_callback_len(self.callback_len());
        ports.insert(id, Arc::clone(&port));
        drop(ports);
        info!(
            "Audio: opened port {id} ({} Hz, {} ch)",
            format.sample_rate, format.channels
        );
        Ok(port)
    }

    /// Unregisters `id`. A mix cycle already holding a snapshot may still
    /// drain it once.
    pub fn close_port(&self, id: PortId) -> Result<(), AudioError> {
        self.ports()
            .remove(&id)
            .map(|_| info!("Audio: closed port {id}"))
            .ok_or(AudioError::UnknownPort(id))
    }

    pub fn port(&self, id: PortId) -> Option<Arc<OutputPort>> {
        self.ports().get(&id).cloned()
    }

    pub fn port_count(&self) -> usize {
        self.ports().len()
    }

    /// Copies the current port set into `out` under the registry lock.
    pub fn snapshot_ports(&self, out: &mut Vec<Arc<OutputPort>>) {
        out.clear();
        out.extend(self.ports().values().cloned());
    }
}

/// Audio subsystem with an open host device.
pub struct AudioEngine {
    state: Arc<AudioState>,
    // Dropped last; closes the host stream.
    device: Box<dyn AudioDevice>,
}

impl fmt::Debug for AudioEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioEngine")
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

/// Opens the host device and starts mixing.
///
/// The granted spec, not `desired`, sizes the callback buffers. When the
/// device picks its own callback length (granted `samples` of 0), buffers are
/// provisionally sized from `desired.samples` and the mixer adopts the length
/// of the first buffer the device hands it. Failure to open the device is
/// fatal to audio; there is no fallback device.
pub fn init<H: AudioHost + ?Sized>(
    host: &mut H,
    desired: &AudioSpec,
    resume_thread: ResumeAudioThread,
) -> Result<AudioEngine, AudioError> {
    let granted = host.open(desired).inspect_err(|e| error!("Audio: {e}"))?;
    if granted != *desired {
        info!("Audio: requested {desired:?}, device granted {granted:?}");
    }

    let device_chosen_len = granted.samples == 0;
    let spec = if device_chosen_len {
        AudioSpec {
            samples: desired.samples,
            ..granted
        }
    } else {
        granted
    };

    let state = Arc::new(AudioState::new(spec, resume_thread));
    let mut callback = MixCallback::new(Arc::clone(&state));
    if device_chosen_len {
        callback = callback.adopt_first_buffer_len();
    }
    let device = host
        .start(&spec, callback)
        .inspect_err(|e| error!("Audio: {e}"))?;
    device.pause(false)?;

    if device_chosen_len {
        info!(
            "Audio: {} Hz {:?} x{} ch, device-chosen callback length",
            spec.sample_rate, spec.format, spec.channels
        );
    } else {
        info!(
            "Audio: {} Hz {:?} x{} ch, {} samples per callback",
            spec.sample_rate, spec.format, spec.channels, spec.samples
        );
    }
    Ok(AudioEngine { state, device })
}

impl AudioEngine {
    pub fn state(&self) -> &Arc<AudioState> {
        &self.state
    }

    pub fn spec(&self) -> &AudioSpec {
        self.state.spec()
    }

    pub fn pause(&self, paused: bool) -> Result<(), AudioError> {
        self.device.pause(paused)
    }
}
