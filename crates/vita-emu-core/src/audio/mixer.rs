use std::sync::Arc;

use super::format::{SampleFormat, mix_audio};
use super::port::{OutputPort, RESUME_THRESHOLD_CALLBACKS};
use super::{AudioState, ResumeAudioThread};

/// Mixes `port` into `out`.
///
/// `len` is the device callback length that sets the low-buffer threshold.
/// The port lock is released before the additive mix. Returns the number of
/// bytes mixed.
fn mix_out_port(
    out: &mut [u8],
    scratch: &mut [u8],
    len: usize,
    port: &OutputPort,
    format: SampleFormat,
    resume: &ResumeAudioThread,
) -> usize {
    let mut shared = port.lock();
    let bytes_available = shared.stream.available();
    if bytes_available == 0 {
        return 0;
    }

    // Resume the producer before the buffer actually runs dry.
    if bytes_available < len * RESUME_THRESHOLD_CALLBACKS {
        if let Some(thread) = shared.thread.take() {
            resume(thread);
        }
    }

    let bytes_to_get = out.len().min(bytes_available);
    let bytes_got = shared.stream.get(&mut scratch[..bytes_to_get]);
    drop(shared);

    if bytes_got > 0 {
        mix_audio(
            &mut out[..bytes_got],
            &scratch[..bytes_got],
            format,
            port.volume(),
        );
    }
    bytes_got
}

/// State owned by the host audio callback.
///
/// The scratch buffer is sized once for the granted spec and reused for every
/// port on every cycle.
pub struct MixCallback {
    state: Arc<AudioState>,
    scratch: Vec<u8>,
    ports: Vec<Arc<OutputPort>>,
    adopt_len: bool,
}

impl MixCallback {
    pub fn new(state: Arc<AudioState>) -> Self {
        let len = state.spec().size();
        Self {
            scratch: vec![0; len],
            ports: Vec::new(),
            adopt_len: false,
            state,
        }
    }

    /// Takes the callback length from the first non-empty output buffer
    /// instead of the granted `AudioSpec`. The scratch buffer is resized on
    /// that call only.
    pub fn adopt_first_buffer_len(mut self) -> Self {
        self.adopt_len = true;
        self
    }

    pub fn state(&self) -> &Arc<AudioState> {
        &self.state
    }

    /// Fills `out` with the mix of every open port.
    ///
    /// Buffers longer than one granted callback are processed in callback
    /// sized chunks. Regions no port contributed to are silence.
    pub fn render(&mut self, out: &mut [u8]) {
        if self.adopt_len && !out.is_empty() {
            self.adopt_len = false;
            self.scratch.resize(out.len(), 0);
            self.state.set_callback_len(out.len());
        }
        let len = self.scratch.len();
        self.state.snapshot_ports(&mut self.ports);
        out.fill(self.state.spec().silence());
        if len == 0 {
            return;
        }

        let format = self.state.spec().format;
        let resume = self.state.resume_thread();
        for chunk in out.chunks_mut(len) {
            for port in &self.ports {
                mix_out_port(chunk, &mut self.scratch, len, port, format, resume);
            }
        }
        // Keep no port alive past the cycle.
        self.ports.clear();
    }
}
