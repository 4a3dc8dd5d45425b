//! Handle-based public operation set.
//!
//! Every operation takes and returns opaque handles; failures fold into
//! sentinel values (an invalid handle, `-1`, `None`) plus a log entry, never
//! a panic or a `Result`. This keeps the surface host-language friendly:
//! applications drive modules and frames entirely through integers.

use tracing::{error, warn};

use framewire_core::{pool, FrameHandle, FrameInit, GlobalParameter, HeaderKind, ModuleHandle,
    OutputParameter, PinHandle};

use crate::callback::{inside_callback_of, ModuleCallback, UserData};
use crate::module::{
    self, CloseModule, PinSnapshot, SendFrame, SetOutputParam, Start, Stop, CALL_TIMEOUT,
};

/// Creates and initialises a module from its configuration string.
///
/// `control_port` binds the module's control socket on localhost; port 0
/// disables the control channel. Returns [`ModuleHandle::INVALID`] when the
/// configuration does not build.
pub fn create_module(control_port: u16, callback: ModuleCallback, config: &str) -> ModuleHandle {
    create_module_ext(control_port, callback, config, None)
}

/// [`create_module`] with opaque user data handed back on every callback.
pub fn create_module_ext(
    control_port: u16,
    callback: ModuleCallback,
    config: &str,
    user_data: Option<UserData>,
) -> ModuleHandle {
    module::register(control_port, callback, config, user_data)
}

/// Starts ingesting and emitting data on the module.
///
/// The callback receives `Command::Start` before this returns. Must not be
/// called from inside the module's own callback.
pub fn start_module(module: ModuleHandle) -> i32 {
    lifecycle_call(module, "start_module", Start)
}

/// Stops the module's pins, flushing output queues. Idempotent.
///
/// The callback receives `Command::Stop` before this returns. Must not be
/// called from inside the module's own callback.
pub fn stop_module(module: ModuleHandle) -> i32 {
    lifecycle_call(module, "stop_module", Stop)
}

fn lifecycle_call<M>(module: ModuleHandle, op: &'static str, message: M) -> i32
where
    M: framewire_runtime::Message<Response = i32>,
    module::ModuleController: framewire_runtime::Handler<M>,
{
    if inside_callback_of(module) {
        error!(%module, op, "lifecycle operation called from the module's own callback");
        return -1;
    }
    let Some(actor) = module::actor_for(module) else {
        error!(%module, op, "unknown module handle");
        return -1;
    };
    match actor.call(message, CALL_TIMEOUT) {
        Ok(code) => code,
        Err(err) => {
            error!(%module, op, ?err, "module call failed");
            -1
        }
    }
}

/// Stops the module if running, tears down its pins and control channel and
/// retires the handle. Terminal: no handle of this module is valid afterwards.
pub fn close(module: ModuleHandle) -> i32 {
    if inside_callback_of(module) {
        error!(%module, "close called from the module's own callback");
        return -1;
    }
    let Some(entry) = module::remove(module) else {
        error!(%module, "close on unknown module handle");
        return -1;
    };
    if let Err(err) = entry.actor.call(CloseModule, CALL_TIMEOUT) {
        error!(%module, ?err, "module close call failed");
    }
    drop(entry.actor);
    if entry.join.join().is_err() {
        error!(%module, "module actor panicked during close");
        return -1;
    }
    0
}

fn inventory(module: ModuleHandle) -> Option<PinSnapshot> {
    let actor = module::actor_for(module)?;
    actor.call(module::PinInventory, CALL_TIMEOUT).ok()
}

pub fn get_input_count(module: ModuleHandle) -> i32 {
    match inventory(module) {
        Some(snapshot) => snapshot.inputs.len() as i32,
        None => {
            error!(%module, "get_input_count on unknown module handle");
            0
        }
    }
}

pub fn get_output_count(module: ModuleHandle) -> i32 {
    match inventory(module) {
        Some(snapshot) => snapshot.outputs.len() as i32,
        None => {
            error!(%module, "get_output_count on unknown module handle");
            0
        }
    }
}

pub fn get_input_handle(module: ModuleHandle, index: usize) -> PinHandle {
    let Some(snapshot) = inventory(module) else {
        error!(%module, "get_input_handle on unknown module handle");
        return PinHandle::INVALID;
    };
    match snapshot.inputs.get(index) {
        Some(handle) => *handle,
        None => {
            error!(%module, index, "no input pin at index");
            PinHandle::INVALID
        }
    }
}

pub fn get_output_handle(module: ModuleHandle, index: usize) -> PinHandle {
    let Some(snapshot) = inventory(module) else {
        error!(%module, "get_output_handle on unknown module handle");
        return PinHandle::INVALID;
    };
    match snapshot.outputs.get(index) {
        Some(handle) => *handle,
        None => {
            error!(%module, index, "no output pin at index");
            PinHandle::INVALID
        }
    }
}

/// Applies an output-pin parameter; transports ignore kinds they do not use.
pub fn set_output_parameter(
    module: ModuleHandle,
    output: PinHandle,
    param: OutputParameter,
    value: i64,
) {
    let Some(actor) = module::actor_for(module) else {
        error!(%module, "set_output_parameter on unknown module handle");
        return;
    };
    if let Err(err) = actor.call(
        SetOutputParam {
            output,
            param,
            value,
        },
        CALL_TIMEOUT,
    ) {
        error!(%module, %output, ?err, "set_output_parameter call failed");
    }
}

/// Queues the frame on an output pin and returns immediately.
///
/// The pin holds its own reference until transmission, so the caller may
/// release the frame as soon as this returns. A missing output pin is a
/// logged no-op success; an unknown frame handle is a failure.
pub fn send(module: ModuleHandle, output: PinHandle, frame: FrameHandle) -> i32 {
    let Some(actor) = module::actor_for(module) else {
        error!(%module, "send on unknown module handle");
        return -1;
    };
    match actor.call(SendFrame { output, frame }, CALL_TIMEOUT) {
        Ok(code) => code,
        Err(err) => {
            error!(%module, %output, ?err, "send call failed");
            -1
        }
    }
}

/// Acquires an uninitialised frame from the process-wide pool.
pub fn frame_create() -> FrameHandle {
    pool::global().acquire().unwrap_or(FrameHandle::INVALID)
}

/// Acquires a frame with validated, pre-populated headers and a sized buffer.
pub fn frame_create_ext(init: &FrameInit) -> FrameHandle {
    pool::global()
        .acquire_with_init(init)
        .unwrap_or(FrameHandle::INVALID)
}

/// Increments the frame's reference count. Returns the new count, -1 if the
/// handle is unknown.
pub fn frame_addref(frame: FrameHandle) -> i32 {
    pool::global().addref(frame)
}

/// Decrements the frame's reference count, freeing the slot at zero. Returns
/// the new count, -1 if the handle is unknown.
pub fn frame_release(frame: FrameHandle) -> i32 {
    pool::global().release(frame)
}

/// Media size of the frame in bytes, -1 if the handle is unknown.
pub fn frame_getsize(frame: FrameHandle) -> i32 {
    pool::global().media_size(frame)
}

/// Runs `f` over the frame's media buffer. Stands in for raw buffer access:
/// the closure runs while the frame is pinned, without exposing a pointer.
pub fn with_frame_buffer<R>(frame: FrameHandle, f: impl FnOnce(&mut [u8]) -> R) -> Option<R> {
    pool::global().with_frame(frame, |frame| f(frame.buffer_mut()))
}

/// Copies `data` into the frame, resizing its buffer and size header.
pub fn frame_fill(frame: FrameHandle, data: &[u8]) -> i32 {
    match pool::global().with_frame(frame, |frame| frame.fill(data)) {
        Some(()) => 0,
        None => {
            error!(%frame, "frame_fill on unknown frame handle");
            -1
        }
    }
}

pub fn get_frame_headers(frame: FrameHandle, kind: HeaderKind) -> Option<i64> {
    pool::global().header(frame, kind)
}

pub fn set_frame_headers(frame: FrameHandle, kind: HeaderKind, value: i64) {
    if !pool::global().set_header(frame, kind, value) {
        error!(%frame, ?kind, value, "header not set");
    }
}

pub fn get_parameter(param: GlobalParameter) -> i64 {
    match param {
        GlobalParameter::MaxFramesInList => pool::global().max_frames() as i64,
        GlobalParameter::CurFramesInList => pool::global().frames_in_list() as i64,
    }
}

pub fn set_parameter(param: GlobalParameter, value: i64) {
    match param {
        GlobalParameter::MaxFramesInList if value > 0 => {
            pool::global().set_max_frames(value as usize);
        }
        GlobalParameter::MaxFramesInList => {
            warn!(value, "ignoring non-positive frame list cap");
        }
        GlobalParameter::CurFramesInList => {
            warn!("CurFramesInList is read-only");
        }
    }
}
