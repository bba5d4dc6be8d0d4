use thiserror::Error;

use crate::Capability;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("render context doesn't support {0:?}, which resampling requires")]
    UnsupportedCapability(Capability),

    #[error("invalid number of channels in env map: {0}")]
    InvalidEnvMapChannels(u32),

    #[error("env map is empty")]
    EmptyEnvMap,

    #[error("image has {actual} values, expected {expected}")]
    InvalidImageSize { expected: usize, actual: usize },

    #[error("light count {count} is too large to be represented in 30 bits")]
    LightCountOverflow { count: u32 },

    #[error("onion layout has {count} layer groups, at most {max} supported")]
    TooManyLayerGroups { count: usize, max: usize },

    #[error("invalid context parameters: {0}")]
    InvalidContextParams(String),
}
