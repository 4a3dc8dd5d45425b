use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum PoolError {
    #[error("frame pool exhausted: {size} frames in list (max {max})")]
    Exhausted { size: usize, max: usize },
    #[error("invalid frame init: {0}")]
    InvalidInit(String),
}

#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    #[error("missing required parameter '{0}'")]
    MissingParameter(String),
    #[error("invalid value '{value}' for parameter '{key}'")]
    InvalidValue { key: String, value: String },
}
