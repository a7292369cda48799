use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use super::format::{AudioSpec, MAX_VOLUME};
use super::stream::{AudioStream, PortFormat};
use crate::kernel::ThreadId;

pub type PortId = i32;

/// Callback-cycles worth of device data below which a waiting producer is
/// resumed, and at or above which a writing producer is told to wait.
pub const RESUME_THRESHOLD_CALLBACKS: usize = 3;

/// Callbacks worth of device data a port stream can hold.
pub const PORT_BUFFER_CALLBACKS: usize = 8;

/// Port state shared between the guest producer and the mixer.
#[derive(Debug)]
pub struct PortShared {
    pub stream: AudioStream,
    /// Guest thread parked until the port drains.
    pub thread: Option<ThreadId>,
}

/// Result of [`OutputPort::output`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OutputStatus {
    /// Input bytes accepted into the stream.
    pub accepted: usize,
    /// The caller was registered as waiter and should park until resumed.
    pub wait: bool,
}

/// One guest audio output.
#[derive(Debug)]
pub struct OutputPort {
    id: PortId,
    format: PortFormat,
    callback_len: AtomicUsize,
    volume: AtomicU32,
    shared: Mutex<PortShared>,
}

impl OutputPort {
    pub fn new(id: PortId, format: PortFormat, device: &AudioSpec) -> Self {
        let callback_len = device.size();
        let stream = AudioStream::new(format, *device, callback_len * PORT_BUFFER_CALLBACKS);
        Self {
            id,
            format,
            callback_len: AtomicUsize::new(callback_len),
            volume: AtomicU32::new(MAX_VOLUME.to_bits()),
            shared: Mutex::new(PortShared {
                stream,
                thread: None,
            }),
        }
    }

    pub fn id(&self) -> PortId {
        self.id
    }

    pub fn format(&self) -> PortFormat {
        self.format
    }

    /// Locks the port. Only the mixer and the guest producer take this lock.
    pub fn lock(&self) -> MutexGuard<'_, PortShared> {
        self.shared.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Device bytes per callback this port's thresholds are based on.
    pub fn callback_len(&self) -> usize {
        self.callback_len.load(Ordering::Acquire)
    }

    /// Rebases the wake threshold and stream capacity on `len` bytes per
    /// callback. Buffered data is kept.
    pub fn set_callback_len(&self, len: usize) {
        let mut shared = self.lock();
        self.callback_len.store(len, Ordering::Release);
        shared.stream.set_capacity(len * PORT_BUFFER_CALLBACKS);
    }

    pub fn volume(&self) -> f32 {
        f32::from_bits(self.volume.load(Ordering::Relaxed))
    }

    pub fn set_volume(&self, volume: f32) {
        let volume = volume.clamp(0.0, MAX_VOLUME);
        self.volume.store(volume.to_bits(), Ordering::Relaxed);
    }

    /// Appends guest PCM. Returns the number of bytes accepted.
    pub fn write(&self, bytes: &[u8]) -> usize {
        self.lock().stream.put(bytes)
    }

    /// Appends guest PCM and decides whether `thread` must park.
    ///
    /// Once the stream holds at least [`RESUME_THRESHOLD_CALLBACKS`]
    /// callbacks of data, or could not take everything, `thread` becomes the
    /// port's waiter. The mixer resumes it when the buffer runs low.
    pub fn output(&self, bytes: &[u8], thread: ThreadId) -> OutputStatus {
        let mut shared = self.lock();
        let accepted = shared.stream.put(bytes);
        let buffered = shared.stream.available();
        let wait = accepted < bytes.len()
            || buffered >= self.callback_len() * RESUME_THRESHOLD_CALLBACKS;
        if wait {
            shared.thread = Some(thread);
        }
        OutputStatus { accepted, wait }
    }

    pub fn register_waiter(&self, thread: ThreadId) {
        self.lock().thread = Some(thread);
    }

    pub fn waiting_thread(&self) -> Option<ThreadId> {
        self.lock().thread
    }

    pub fn available(&self) -> usize {
        self.lock().stream.available()
    }

    /// Drops buffered audio, e.g. when the guest releases the port.
    pub fn flush(&self) {
        self.lock().stream.clear();
    }
}
