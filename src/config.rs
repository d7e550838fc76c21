use crate::error::ConfigError;
use crate::globals::{
    DEFAULT_FREELIST_HOP_LIMIT, DEFAULT_NURSERY_RATIO, DEFAULT_OLD_HEADROOM,
    DEFAULT_YOUNG_HEADROOM,
};

/// Configuration for heap constructor.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HeapConfig {
    /// Log a summary of every collection pause at `info` level.
    pub verbose: bool,
    /// Nursery pools kept per young pool.
    pub nursery_ratio: usize,
    /// Young generation is sized to this many times the words promoted by
    /// the last minor collection.
    pub young_headroom: usize,
    /// Old generation is sized to this many times the words found live by
    /// the last major collection.
    pub old_headroom: usize,
    /// `yield_point` starts a major collection once a free-list search had to
    /// skip more runs than this.
    pub freelist_hop_limit: usize,
    pub initial_old_pools: usize,
}

impl HeapConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.nursery_ratio == 0 {
            return Err(ConfigError::ZeroNurseryRatio);
        }
        if self.young_headroom == 0 {
            return Err(ConfigError::ZeroHeadroom { generation: "young" });
        }
        if self.old_headroom == 0 {
            return Err(ConfigError::ZeroHeadroom { generation: "old" });
        }
        if self.initial_old_pools == 0 {
            return Err(ConfigError::NoInitialOldPools);
        }
        Ok(())
    }

    /// Pools a fresh heap acquires before its first allocation: two young
    /// semispace pools, the nursery sized off them, and the old generation.
    pub fn initial_pools(&self) -> usize {
        2 + 2 * self.nursery_ratio + self.initial_old_pools
    }
}

impl Default for HeapConfig {
    fn default() -> Self {
        Self {
            verbose: false,
            nursery_ratio: DEFAULT_NURSERY_RATIO,
            young_headroom: DEFAULT_YOUNG_HEADROOM,
            old_headroom: DEFAULT_OLD_HEADROOM,
            freelist_hop_limit: DEFAULT_FREELIST_HOP_LIMIT,
            initial_old_pools: 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = HeapConfig::default();
        assert_eq!(config.validate(), Ok(()));
        assert_eq!(config.initial_pools(), 7);
    }

    #[test]
    fn zero_multipliers_are_rejected() {
        let config = HeapConfig {
            old_headroom: 0,
            ..Default::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::ZeroHeadroom { generation: "old" })
        );
        let config = HeapConfig {
            nursery_ratio: 0,
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::ZeroNurseryRatio));
        assert_eq!(
            config.validate().unwrap_err().to_string(),
            "nursery ratio must be at least 1"
        );
    }
}
