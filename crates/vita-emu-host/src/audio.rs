use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use log::{error, warn};
use vita_emu_core::audio::{
    AudioDevice, AudioError, AudioHost, AudioSpec, MixCallback, SampleFormat,
};

/// Default cpal output device driving the mix callback.
#[derive(Default)]
pub struct CpalHost {
    device: Option<cpal::Device>,
    config: Option<cpal::StreamConfig>,
}

struct CpalDevice {
    stream: cpal::Stream,
}

impl AudioDevice for CpalDevice {
    fn pause(&self, paused: bool) -> Result<(), AudioError> {
        let result = if paused {
            self.stream.pause().map_err(|e| e.to_string())
        } else {
            self.stream.play().map_err(|e| e.to_string())
        };
        result.map_err(AudioError::Device)
    }
}

fn sample_format(format: cpal::SampleFormat) -> Result<SampleFormat, AudioError> {
    match format {
        cpal::SampleFormat::I16 => Ok(SampleFormat::S16),
        cpal::SampleFormat::F32 => Ok(SampleFormat::F32),
        other => Err(AudioError::UnsupportedFormat(format!("{other:?}"))),
    }
}

/// Callback length to request from a device, in frames.
///
/// The desired length is clamped into the device's supported range. `None`
/// when the device does not report one and chooses its own length.
fn callback_frames(supported: &cpal::SupportedBufferSize, desired: u16) -> Option<u16> {
    match supported {
        cpal::SupportedBufferSize::Range { min, max } if min <= max => {
            let frames = u32::from(desired.max(1)).clamp(*min, *max);
            u16::try_from(frames).ok()
        }
        _ => None,
    }
}

impl AudioHost for CpalHost {
    fn open(&mut self, desired: &AudioSpec) -> Result<AudioSpec, AudioError> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| AudioError::DeviceOpen("no default output device".into()))?;
        let supported = device
            .default_output_config()
            .map_err(|e| AudioError::DeviceOpen(e.to_string()))?;
        let format = sample_format(supported.sample_format())?;

        let fixed = callback_frames(supported.buffer_size(), desired.samples);
        let mut config: cpal::StreamConfig = supported.into();
        if let Some(frames) = fixed {
            config.buffer_size = cpal::BufferSize::Fixed(u32::from(frames));
        }

        let granted = AudioSpec {
            sample_rate: config.sample_rate,
            format,
            channels: config.channels,
            // 0: the device picks the length when the stream starts.
            samples: fixed.unwrap_or(0),
        };
        self.device = Some(device);
        self.config = Some(config);
        Ok(granted)
    }

    fn start(
        &mut self,
        granted: &AudioSpec,
        mut callback: MixCallback,
    ) -> Result<Box<dyn AudioDevice>, AudioError> {
        let (Some(device), Some(config)) = (self.device.as_ref(), self.config.as_ref()) else {
            return Err(AudioError::Device("device was not opened".into()));
        };
        let err_fn = |err| error!("cpal stream error: {err}");

        let stream = match granted.format {
            SampleFormat::S16 => device.build_output_stream(
                config,
                move |data: &mut [i16], _| callback.render(bytemuck::cast_slice_mut(data)),
                err_fn,
                None,
            ),
            SampleFormat::F32 => device.build_output_stream(
                config,
                move |data: &mut [f32], _| callback.render(bytemuck::cast_slice_mut(data)),
                err_fn,
                None,
            ),
        }
        .map_err(|e| AudioError::Device(e.to_string()))?;

        if let Err(e) = stream.pause() {
            warn!("cpal stream could not be paused before start: {e}");
        }
        Ok(Box::new(CpalDevice { stream }))
    }
}
