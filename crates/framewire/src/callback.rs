use std::any::Any;
use std::cell::Cell;
use std::sync::Arc;

use framewire_core::{FrameHandle, ModuleHandle, PinHandle};

/// Lifecycle and data events delivered through the module callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Start,
    Stop,
    Quit,
    Tick,
}

/// Opaque per-module state handed back on every callback invocation.
pub type UserData = Arc<dyn Any + Send + Sync>;

/// One callback invocation.
///
/// `Tick` carries a valid frame handle; the lifecycle commands carry
/// [`FrameHandle::INVALID`]. The frame behind a `Tick` is only guaranteed
/// alive for the duration of the callback — add a reference before returning
/// to retain it.
pub struct CallbackEvent<'a> {
    pub module: ModuleHandle,
    pub pin: PinHandle,
    pub frame: FrameHandle,
    pub command: Command,
    user_data: Option<&'a UserData>,
}

impl CallbackEvent<'_> {
    pub fn user_data<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.user_data.and_then(|data| data.downcast_ref::<T>())
    }
}

pub type ModuleCallback = Arc<dyn Fn(&CallbackEvent<'_>) + Send + Sync>;

thread_local! {
    // Module whose callback is running on this thread, if any. Guards the
    // documented "no start/stop/close from your own callback" contract.
    static CALLBACK_MODULE: Cell<i32> = const { Cell::new(-1) };
}

/// True when the current thread is inside `module`'s own callback.
pub(crate) fn inside_callback_of(module: ModuleHandle) -> bool {
    CALLBACK_MODULE.with(|cell| cell.get() == module.raw())
}

/// Everything a pin worker needs to invoke the module callback.
#[derive(Clone)]
pub(crate) struct CallbackTarget {
    pub module: ModuleHandle,
    pub callback: ModuleCallback,
    pub user_data: Option<UserData>,
}

impl CallbackTarget {
    pub fn emit(&self, pin: PinHandle, frame: FrameHandle, command: Command) {
        let event = CallbackEvent {
            module: self.module,
            pin,
            frame,
            command,
            user_data: self.user_data.as_ref(),
        };
        let previous = CALLBACK_MODULE.with(|cell| cell.replace(self.module.raw()));
        (self.callback)(&event);
        CALLBACK_MODULE.with(|cell| cell.set(previous));
    }
}
