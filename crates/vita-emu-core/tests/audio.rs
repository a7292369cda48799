//! Integration tests for the audio output mixer.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use vita_emu_core::audio::{
    self, AudioDevice, AudioError, AudioHost, AudioSpec, AudioState, MixCallback, PortFormat,
    ResumeAudioThread, SampleFormat,
};
use vita_emu_core::kernel::ThreadId;

/// 25 mono S16 frames: a 50 byte callback.
fn small_spec() -> AudioSpec {
    AudioSpec {
        sample_rate: 48_000,
        format: SampleFormat::S16,
        channels: 1,
        samples: 25,
    }
}

fn mono_48k() -> PortFormat {
    PortFormat {
        sample_rate: 48_000,
        channels: 1,
    }
}

fn s16(value: i16, count: usize) -> Vec<u8> {
    std::iter::repeat_n(value.to_le_bytes(), count)
        .flatten()
        .collect()
}

fn samples(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|b| i16::from_le_bytes([b[0], b[1]]))
        .collect()
}

fn recording_resume() -> (ResumeAudioThread, Arc<Mutex<Vec<ThreadId>>>) {
    let woken = Arc::new(Mutex::new(Vec::new()));
    let sink = woken.clone();
    let resume: ResumeAudioThread = Arc::new(move |thread| sink.lock().unwrap().push(thread));
    (resume, woken)
}

#[test]
fn mixes_only_ports_with_data_and_fills_rest_with_silence() {
    let (resume, _) = recording_resume();
    let state = Arc::new(AudioState::new(small_spec(), resume));
    let full = state.open_port(mono_48k()).unwrap();
    let empty = state.open_port(mono_48k()).unwrap();
    assert_eq!(full.write(&s16(1000, 50)), 100);

    let mut callback = MixCallback::new(state.clone());
    let mut out = vec![0xAAu8; 50];
    callback.render(&mut out);

    assert_eq!(samples(&out), vec![1000; 25]);
    assert_eq!(full.available(), 50);
    assert_eq!(empty.available(), 0);

    // Drain the rest, then a cycle with no data is pure silence.
    callback.render(&mut out);
    callback.render(&mut out);
    assert_eq!(out, vec![0u8; 50]);
}

#[test]
fn short_port_fills_prefix_and_leaves_silence() {
    let (resume, _) = recording_resume();
    let state = Arc::new(AudioState::new(small_spec(), resume));
    let port = state.open_port(mono_48k()).unwrap();
    port.write(&s16(-200, 10));

    let mut callback = MixCallback::new(state);
    let mut out = vec![0x55u8; 50];
    callback.render(&mut out);

    let mixed = samples(&out);
    assert_eq!(&mixed[..10], &[-200; 10]);
    assert_eq!(&mixed[10..], &[0; 15]);
}

#[test]
fn low_buffer_wakes_waiter_exactly_once() {
    let (resume, woken) = recording_resume();
    let state = Arc::new(AudioState::new(small_spec(), resume));
    let port = state.open_port(mono_48k()).unwrap();
    port.write(&s16(1, 50));
    port.register_waiter(42);

    let mut callback = MixCallback::new(state);
    let mut out = vec![0u8; 50];
    callback.render(&mut out);
    assert_eq!(*woken.lock().unwrap(), vec![42]);
    assert_eq!(port.waiting_thread(), None);

    callback.render(&mut out);
    assert_eq!(*woken.lock().unwrap(), vec![42]);
}

#[test]
fn waiter_is_kept_while_buffer_is_deep() {
    let (resume, woken) = recording_resume();
    let state = Arc::new(AudioState::new(small_spec(), resume));
    let port = state.open_port(mono_48k()).unwrap();

    // 200 bytes buffered is four callbacks: the producer must park.
    let status = port.output(&s16(3, 100), 7);
    assert!(status.wait);
    assert_eq!(port.waiting_thread(), Some(7));

    let mut callback = MixCallback::new(state);
    let mut out = vec![0u8; 50];
    callback.render(&mut out); // 200 available
    callback.render(&mut out); // 150 available
    assert!(woken.lock().unwrap().is_empty());

    callback.render(&mut out); // 100 available, below three callbacks
    assert_eq!(*woken.lock().unwrap(), vec![7]);
}

#[test]
fn ports_are_summed_with_volume() {
    let (resume, _) = recording_resume();
    let state = Arc::new(AudioState::new(small_spec(), resume));
    let a = state.open_port(mono_48k()).unwrap();
    let b = state.open_port(mono_48k()).unwrap();
    a.write(&s16(1000, 25));
    b.write(&s16(1000, 25));
    b.set_volume(0.5);

    let mut callback = MixCallback::new(state);
    let mut out = vec![0u8; 50];
    callback.render(&mut out);
    assert_eq!(samples(&out), vec![1500; 25]);
}

#[test]
fn long_host_buffer_is_mixed_in_callback_chunks() {
    let (resume, _) = recording_resume();
    let state = Arc::new(AudioState::new(small_spec(), resume));
    let port = state.open_port(mono_48k()).unwrap();
    port.write(&s16(9, 50));

    let mut callback = MixCallback::new(state);
    let mut out = vec![0u8; 120];
    callback.render(&mut out);

    let mixed = samples(&out);
    assert_eq!(&mixed[..50], &[9; 50]);
    assert_eq!(&mixed[50..], &[0; 10]);
}

#[test]
fn closed_port_is_no_longer_mixed() {
    let (resume, _) = recording_resume();
    let state = Arc::new(AudioState::new(small_spec(), resume));
    let port = state.open_port(mono_48k()).unwrap();
    port.write(&s16(5, 25));
    state.close_port(port.id()).unwrap();
    assert_eq!(
        state.close_port(port.id()),
        Err(AudioError::UnknownPort(port.id()))
    );

    let mut callback = MixCallback::new(state);
    let mut out = vec![0u8; 50];
    callback.render(&mut out);
    assert_eq!(out, vec![0u8; 50]);
    assert_eq!(port.available(), 50);
}

#[test]
fn invalid_port_format_is_rejected() {
    let (resume, _) = recording_resume();
    let state = AudioState::new(small_spec(), resume);
    let err = state
        .open_port(PortFormat {
            sample_rate: 48_000,
            channels: 0,
        })
        .unwrap_err();
    assert!(matches!(err, AudioError::InvalidPortFormat { .. }));
}

struct FakeDevice {
    paused: Arc<AtomicBool>,
    closed: Arc<AtomicBool>,
}

impl AudioDevice for FakeDevice {
    fn pause(&self, paused: bool) -> Result<(), AudioError> {
        self.paused.store(paused, Ordering::SeqCst);
        Ok(())
    }
}

impl Drop for FakeDevice {
    fn drop(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Host that grants a fixed spec and hands the callback back to the test.
struct FakeHost {
    grant: Result<AudioSpec, AudioError>,
    callback: Arc<Mutex<Option<MixCallback>>>,
    paused: Arc<AtomicBool>,
    closed: Arc<AtomicBool>,
}

impl FakeHost {
    fn granting(grant: Result<AudioSpec, AudioError>) -> Self {
        Self {
            grant,
            callback: Arc::new(Mutex::new(None)),
            paused: Arc::new(AtomicBool::new(true)),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl AudioHost for FakeHost {
    fn open(&mut self, _desired: &AudioSpec) -> Result<AudioSpec, AudioError> {
        self.grant.clone()
    }

    fn start(
        &mut self,
        _granted: &AudioSpec,
        callback: MixCallback,
    ) -> Result<Box<dyn AudioDevice>, AudioError> {
        *self.callback.lock().unwrap() = Some(callback);
        Ok(Box::new(FakeDevice {
            paused: self.paused.clone(),
            closed: self.closed.clone(),
        }))
    }
}

#[test]
fn init_sizes_everything_from_granted_spec() {
    let desired = AudioSpec::default();
    let granted = AudioSpec {
        sample_rate: 48_000,
        format: SampleFormat::F32,
        channels: 2,
        samples: 480,
    };
    let mut host = FakeHost::granting(Ok(granted));
    let (resume, _) = recording_resume();

    let engine = audio::init(&mut host, &desired, resume).unwrap();
    assert_eq!(*engine.spec(), granted);
    assert!(!host.paused.load(Ordering::SeqCst));

    let port = engine
        .state()
        .open_port(PortFormat {
            sample_rate: 48_000,
            channels: 2,
        })
        .unwrap();
    port.write(&s16(16384, 480 * 2));
    assert_eq!(port.available(), granted.size());

    let mut out = vec![0u8; granted.size()];
    let mut guard = host.callback.lock().unwrap();
    let callback = guard.as_mut().unwrap();
    callback.render(&mut out);
    assert!(
        out.chunks_exact(4)
            .all(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]) == 0.5)
    );
    drop(guard);

    drop(engine);
    assert!(host.closed.load(Ordering::SeqCst));
}

#[test]
fn device_open_failure_is_fatal() {
    let mut host = FakeHost::granting(Err(AudioError::DeviceOpen("no device".into())));
    let (resume, _) = recording_resume();
    let err = audio::init(&mut host, &AudioSpec::default(), resume).unwrap_err();
    assert_eq!(err, AudioError::DeviceOpen("no device".into()));
    assert!(host.callback.lock().unwrap().is_none());
}

#[test]
fn device_chosen_length_is_adopted_from_first_buffer() {
    let desired = small_spec();
    let granted = AudioSpec {
        samples: 0,
        ..small_spec()
    };
    let mut host = FakeHost::granting(Ok(granted));
    let (resume, woken) = recording_resume();

    let engine = audio::init(&mut host, &desired, resume).unwrap();
    assert_eq!(engine.spec().samples, desired.samples);
    assert_eq!(engine.state().callback_len(), 50);

    let port = engine.state().open_port(mono_48k()).unwrap();
    port.write(&s16(2, 75));
    port.register_waiter(9);

    // The device actually asks for 15 frames: 30 bytes per callback.
    let mut out = vec![0u8; 30];
    let mut guard = host.callback.lock().unwrap();
    let callback = guard.as_mut().unwrap();
    callback.render(&mut out);

    assert_eq!(engine.state().callback_len(), 30);
    assert_eq!(port.callback_len(), 30);
    assert_eq!(samples(&out), vec![2; 15]);
    // 150 bytes buffered is above three 30 byte callbacks, so no wake yet.
    assert!(woken.lock().unwrap().is_empty());

    // 120 left, then 90: the wake fires once the buffer falls below 90.
    callback.render(&mut out);
    callback.render(&mut out);
    assert!(woken.lock().unwrap().is_empty());
    callback.render(&mut out);
    assert_eq!(*woken.lock().unwrap(), vec![9]);

    // Later ports start from the adopted length.
    let late = engine.state().open_port(mono_48k()).unwrap();
    assert_eq!(late.callback_len(), 30);
    assert!(late.output(&s16(0, 45), 4).wait);
}
