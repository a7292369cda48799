use super::AudioError;
use super::format::AudioSpec;
use super::mixer::MixCallback;

/// Running host audio output. Dropping it closes the device.
pub trait AudioDevice {
    fn pause(&self, paused: bool) -> Result<(), AudioError>;
}

/// Host audio subsystem able to open one output device.
pub trait AudioHost {
    /// Negotiates `desired` with the device and returns what it grants.
    ///
    /// Report `samples: 0` when the device only fixes the callback length
    /// once the stream runs.
    fn open(&mut self, desired: &AudioSpec) -> Result<AudioSpec, AudioError>;

    /// Builds the paused output stream for the granted spec, driving
    /// `callback` from the host audio thread.
    fn start(
        &mut self,
        granted: &AudioSpec,
        callback: MixCallback,
    ) -> Result<Box<dyn AudioDevice>, AudioError>;
}
