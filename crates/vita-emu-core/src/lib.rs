//! Host-side bridges for the emulated console's CPU, GPU and audio hardware.
//!
//! This crate contains the platform-agnostic bookkeeping that keeps guest
//! semantics consistent with host threads: core number allocation and
//! exclusive monitors, the deferred render command queue, and the audio output
//! mixer. Frontends own the real devices and drive the core via the traits in
//! [`renderer::driver`] and [`audio::device`].

/// Shared guest address type.
pub mod address;

/// Audio output ports, elastic streams and the host callback mixer.
pub mod audio;

/// Thread table, core numbers, exclusive monitors and debug watches.
pub mod kernel;

/// Deferred GPU command pipeline and backend dispatch.
pub mod renderer;

pub use address::Address;
