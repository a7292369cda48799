use std::collections::VecDeque;

use super::format::{AudioSpec, SampleFormat};

/// PCM layout the guest writes into an output port (always S16).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PortFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

impl PortFormat {
    #[inline]
    pub fn frame_bytes(&self) -> usize {
        usize::from(self.channels) * SampleFormat::S16.bytes_per_sample()
    }
}

/// Bounded elastic byte buffer that converts guest PCM into the device
/// format as it is written.
///
/// Handles channel remapping, linear resampling and sample encoding. Bytes
/// of an incomplete input frame are held back until the rest arrives.
#[derive(Debug)]
pub struct AudioStream {
    src: PortFormat,
    dst: AudioSpec,
    capacity: usize,
    buf: VecDeque<u8>,
    partial: Vec<u8>,
    // Resampler state, in device channel layout.
    prev: Vec<f32>,
    primed: bool,
    pos: f64,
    step: f64,
    // Scratch frames reused across writes.
    frame_in: Vec<f32>,
    frame_out: Vec<f32>,
    lerp: Vec<f32>,
    encoded: Vec<u8>,
}

impl AudioStream {
    /// `capacity` is in device-format bytes.
    pub fn new(src: PortFormat, dst: AudioSpec, capacity: usize) -> Self {
        let out_channels = usize::from(dst.channels.max(1));
        Self {
            src,
            dst,
            capacity,
            buf: VecDeque::with_capacity(capacity),
            partial: Vec::with_capacity(src.frame_bytes()),
            prev: vec![0.0; out_channels],
            primed: false,
            pos: 0.0,
            step: f64::from(src.sample_rate.max(1)) / f64::from(dst.sample_rate.max(1)),
            frame_in: vec![0.0; usize::from(src.channels.max(1))],
            frame_out: vec![0.0; out_channels],
            lerp: vec![0.0; out_channels],
            encoded: vec![0; dst.frame_bytes()],
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Changes the capacity for future `put`s. Data already buffered stays.
    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity;
    }

    /// Device-format bytes ready to be read.
    pub fn available(&self) -> usize {
        self.buf.len()
    }

    fn passthrough(&self) -> bool {
        self.src.sample_rate == self.dst.sample_rate
            && self.src.channels == self.dst.channels
            && self.dst.format == SampleFormat::S16
    }

    /// Upper bound on device bytes produced by one input frame.
    fn max_out_per_frame(&self) -> usize {
        (1.0 / self.step).ceil() as usize * self.dst.frame_bytes()
    }

    /// Converts and buffers as much of `bytes` as fits. Returns the number of
    /// input bytes consumed.
    pub fn put(&mut self, bytes: &[u8]) -> usize {
        let frame_bytes = self.src.frame_bytes();
        if frame_bytes == 0 || self.dst.frame_bytes() == 0 {
            return 0;
        }
        let per_frame = self.max_out_per_frame();
        let mut consumed = 0;

        while consumed < bytes.len() {
            let need = frame_bytes - self.partial.len();
            let take = need.min(bytes.len() - consumed);
            if take == need && self.buf.len() + per_frame > self.capacity {
                break;
            }
            self.partial
                .extend_from_slice(&bytes[consumed..consumed + take]);
            consumed += take;
            if self.partial.len() < frame_bytes {
                break;
            }
            let frame = std::mem::take(&mut self.partial);
            self.push_frame(&frame);
            self.partial = frame;
            self.partial.clear();
        }
        consumed
    }

    fn push_frame(&mut self, frame: &[u8]) {
        if self.passthrough() {
            self.buf.extend(frame.iter().copied());
            return;
        }

        for (sample, bytes) in self
            .frame_in
            .iter_mut()
            .zip(frame.chunks_exact(SampleFormat::S16.bytes_per_sample()))
        {
            *sample = SampleFormat::S16.decode(bytes);
        }
        remix(&self.frame_in, &mut self.frame_out);

        if self.src.sample_rate == self.dst.sample_rate {
            let cur = std::mem::take(&mut self.frame_out);
            self.emit(&cur);
            self.frame_out = cur;
            return;
        }

        if !self.primed {
            self.prev.copy_from_slice(&self.frame_out);
            self.primed = true;
            return;
        }

        let cur = std::mem::take(&mut self.frame_out);
        let mut lerp = std::mem::take(&mut self.lerp);
        while self.pos < 1.0 {
            let t = self.pos as f32;
            for ((out, a), b) in lerp.iter_mut().zip(&self.prev).zip(&cur) {
                *out = a + (b - a) * t;
            }
            self.emit(&lerp);
            self.pos += self.step;
        }
        self.pos -= 1.0;
        self.prev.copy_from_slice(&cur);
        self.lerp = lerp;
        self.frame_out = cur;
    }

    fn emit(&mut self, frame: &[f32]) {
        let bps = self.dst.format.bytes_per_sample();
        for (value, out) in frame.iter().zip(self.encoded.chunks_exact_mut(bps)) {
            self.dst.format.encode(*value, out);
        }
        self.buf.extend(self.encoded.iter().copied());
    }

    /// Moves up to `out.len()` buffered bytes into `out`. Returns the count.
    pub fn get(&mut self, out: &mut [u8]) -> usize {
        let n = out.len().min(self.buf.len());
        for (dst, src) in out.iter_mut().zip(self.buf.drain(..n)) {
            *dst = src;
        }
        n
    }

    /// Drops buffered and partially written data.
    pub fn clear(&mut self) {
        self.buf.clear();
        self.partial.clear();
        self.primed = false;
        self.pos = 0.0;
    }
}

/// Maps one decoded frame onto the device channel layout.
fn remix(input: &[f32], output: &mut [f32]) {
    match (input.len(), output.len()) {
        (_, 0) | (0, _) => {}
        (a, b) if a == b => output.copy_from_slice(input),
        (_, 1) => output[0] = input.iter().sum::<f32>() / input.len() as f32,
        (a, _) => {
            for (c, out) in output.iter_mut().enumerate() {
                *out = input[c % a];
            }
        }
    }
}
