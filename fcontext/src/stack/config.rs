use std::env;
use std::str::FromStr;

use parking_lot::{const_rwlock, RwLock};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Stack sizing knobs.
///
/// The tc_* depths are only read by per thread stack caches living outside of this crate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StackConfig {
    /// Size of small stacks.
    pub stack_size_small: usize,
    /// Size of normal stacks.
    pub stack_size_normal: usize,
    /// Size of large stacks.
    pub stack_size_large: usize,
    /// Size of the guard region, stacks are allocated by malloc without a guard if it's <= 0.
    pub guard_page_size: isize,
    /// Maximum small stacks cached by each thread.
    pub tc_stack_small: usize,
    /// Maximum normal stacks cached by each thread.
    pub tc_stack_normal: usize,
}

impl StackConfig {
    pub const DEFAULT: StackConfig = StackConfig {
        stack_size_small: 32 * 1024,
        stack_size_normal: 1024 * 1024,
        stack_size_large: 8 * 1024 * 1024,
        guard_page_size: 4096,
        tc_stack_small: 32,
        tc_stack_normal: 8,
    };

    /// Defaults overridden by any `BFIBER_*` environment variable that is set.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        override_from_env("BFIBER_STACK_SIZE_SMALL", &mut config.stack_size_small)?;
        override_from_env("BFIBER_STACK_SIZE_NORMAL", &mut config.stack_size_normal)?;
        override_from_env("BFIBER_STACK_SIZE_LARGE", &mut config.stack_size_large)?;
        override_from_env("BFIBER_GUARD_PAGE_SIZE", &mut config.guard_page_size)?;
        override_from_env("BFIBER_TC_STACK_SMALL", &mut config.tc_stack_small)?;
        override_from_env("BFIBER_TC_STACK_NORMAL", &mut config.tc_stack_normal)?;
        Ok(config)
    }
}

impl Default for StackConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

fn override_from_env<T: FromStr>(var: &'static str, field: &mut T) -> Result<(), ConfigError> {
    if let Ok(value) = env::var(var) {
        *field = value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue { var, value })?;
    }
    Ok(())
}

static CONFIG: RwLock<StackConfig> = const_rwlock(StackConfig::DEFAULT);

/// Snapshot of the process wide stack configuration.
pub fn config() -> StackConfig {
    CONFIG.read().clone()
}

/// Replaces the process wide stack configuration. Stacks that are already allocated keep their size.
pub fn set_config(config: StackConfig) {
    *CONFIG.write() = config;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_overrides_and_rejects_garbage() {
        // Variable names unique to this test, nothing else reads them concurrently.
        env::set_var("BFIBER_TC_STACK_NORMAL", "3");
        env::set_var("BFIBER_GUARD_PAGE_SIZE", "-1");
        let config = StackConfig::from_env().unwrap();
        assert_eq!(config.tc_stack_normal, 3);
        assert_eq!(config.guard_page_size, -1);
        assert_eq!(config.stack_size_small, 32768);

        env::set_var("BFIBER_TC_STACK_NORMAL", "eight");
        assert_eq!(
            StackConfig::from_env(),
            Err(ConfigError::InvalidValue {
                var: "BFIBER_TC_STACK_NORMAL",
                value: "eight".to_string()
            })
        );
        env::remove_var("BFIBER_TC_STACK_NORMAL");
        env::remove_var("BFIBER_GUARD_PAGE_SIZE");
    }
}
