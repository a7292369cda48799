/// Device sample encoding. Both are little-endian interleaved.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum SampleFormat {
    #[default]
    S16,
    F32,
}

impl SampleFormat {
    #[inline]
    pub const fn bytes_per_sample(self) -> usize {
        match self {
            SampleFormat::S16 => 2,
            SampleFormat::F32 => 4,
        }
    }

    /// Byte value that fills a silent buffer.
    #[inline]
    pub const fn silence(self) -> u8 {
        0
    }

    /// Decodes one sample starting at `bytes[0]` into `-1.0..=1.0`.
    #[inline]
    pub fn decode(self, bytes: &[u8]) -> f32 {
        match self {
            SampleFormat::S16 => f32::from(i16::from_le_bytes([bytes[0], bytes[1]])) / 32768.0,
            SampleFormat::F32 => f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
        }
    }

    /// Encodes `value` into `out`, saturating at full scale.
    #[inline]
    pub fn encode(self, value: f32, out: &mut [u8]) {
        match self {
            SampleFormat::S16 => {
                let v = (value * 32768.0).round().clamp(-32768.0, 32767.0) as i16;
                out[..2].copy_from_slice(&v.to_le_bytes());
            }
            SampleFormat::F32 => {
                out[..4].copy_from_slice(&value.clamp(-1.0, 1.0).to_le_bytes());
            }
        }
    }
}

/// Audio device configuration, either requested or granted by the host.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AudioSpec {
    pub sample_rate: u32,
    pub format: SampleFormat,
    pub channels: u16,
    /// Sample frames per callback.
    pub samples: u16,
}

impl Default for AudioSpec {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            format: SampleFormat::S16,
            channels: 2,
            samples: 1024,
        }
    }
}

impl AudioSpec {
    #[inline]
    pub fn frame_bytes(&self) -> usize {
        usize::from(self.channels) * self.format.bytes_per_sample()
    }

    /// Bytes delivered per callback.
    #[inline]
    pub fn size(&self) -> usize {
        usize::from(self.samples) * self.frame_bytes()
    }

    #[inline]
    pub fn silence(&self) -> u8 {
        self.format.silence()
    }
}

/// Full-scale volume.
pub const MAX_VOLUME: f32 = 1.0;

/// Adds `src` scaled by `volume` onto `dst`, saturating per sample.
///
/// Both buffers are in `format`. Only the common prefix of whole samples is
/// touched.
pub fn mix_audio(dst: &mut [u8], src: &[u8], format: SampleFormat, volume: f32) {
    let volume = volume.clamp(0.0, MAX_VOLUME);
    if volume == 0.0 {
        return;
    }
    let bps = format.bytes_per_sample();
    let len = dst.len().min(src.len()) / bps * bps;

    match format {
        SampleFormat::S16 => {
            for (d, s) in dst[..len]
                .chunks_exact_mut(2)
                .zip(src[..len].chunks_exact(2))
            {
                let a = i32::from(i16::from_le_bytes([d[0], d[1]]));
                let b = (f32::from(i16::from_le_bytes([s[0], s[1]])) * volume) as i32;
                let mixed = (a + b).clamp(i32::from(i16::MIN), i32::from(i16::MAX)) as i16;
                d.copy_from_slice(&mixed.to_le_bytes());
            }
        }
        SampleFormat::F32 => {
            for (d, s) in dst[..len]
                .chunks_exact_mut(4)
                .zip(src[..len].chunks_exact(4))
            {
                let a = f32::from_le_bytes([d[0], d[1], d[2], d[3]]);
                let b = f32::from_le_bytes([s[0], s[1], s[2], s[3]]) * volume;
                d.copy_from_slice(&(a + b).clamp(-1.0, 1.0).to_le_bytes());
            }
        }
    }
}
