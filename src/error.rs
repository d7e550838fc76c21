use thiserror::Error;

/// Rejected heap configuration.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("nursery ratio must be at least 1")]
    ZeroNurseryRatio,
    #[error("{generation} headroom multiplier must be at least 1")]
    ZeroHeadroom { generation: &'static str },
    #[error("the old generation needs at least one initial pool")]
    NoInitialOldPools,
    #[error("initial pool count {requested} exceeds the provider limit of {limit}")]
    ProviderTooSmall { requested: usize, limit: usize },
}
