//! Runtime engine for frame-oriented media-processing modules.
//!
//! A module owns input and output pins over pluggable transports plus an
//! out-of-band control socket. Frames live in a bounded, reference-counted
//! pool and cross the public surface as opaque integer handles; arriving
//! frames are handed to user code through a per-module callback.

pub mod api;
pub mod callback;
mod control;
mod module;
mod pin;
pub mod transport;

pub use callback::{CallbackEvent, Command, ModuleCallback, UserData};
pub use framewire_core::{
    FrameHandle, FrameHeaders, FrameInit, GlobalParameter, HeaderKind, MediaFormat, ModuleHandle,
    OutputParameter, PinHandle, SamplingFormat,
};
pub use transport::TransportKind;
