pub mod config;
pub mod error;
pub mod frame;
pub mod handle;
pub mod headers;
pub mod params;
pub mod pool;

pub use config::{parse_module_config, ParsedConfig, PinParams};
pub use error::{ConfigError, PoolError};
pub use frame::{Frame, FrameCell};
pub use handle::{FrameHandle, ModuleHandle, PinHandle};
pub use headers::{FrameHeaders, FrameInit, HeaderKind, MediaFormat, SamplingFormat};
pub use params::{GlobalParameter, OutputParameter};
pub use pool::{FramePool, DEFAULT_MAX_FRAMES};
