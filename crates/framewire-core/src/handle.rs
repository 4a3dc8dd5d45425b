use std::fmt;

macro_rules! define_handle {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(i32);

        impl $name {
            /// Sentinel for "no such object".
            pub const INVALID: $name = $name(-1);

            pub const fn from_raw(raw: i32) -> Self {
                Self(raw)
            }

            pub const fn raw(self) -> i32 {
                self.0
            }

            pub const fn is_valid(self) -> bool {
                self.0 >= 0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

define_handle! {
    /// Opaque key for a frame held by a [`crate::pool::FramePool`].
    ///
    /// Handles are unique per live frame and strictly increasing across the
    /// pool's lifetime; a released handle is never reissued, though its slot is.
    FrameHandle
}

define_handle! {
    /// Opaque key for an input or output pin, unique within its module.
    PinHandle
}

define_handle! {
    /// Opaque key for a module in the process-wide registry.
    ModuleHandle
}
