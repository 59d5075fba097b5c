//! Coroutine configuration
//!
//! ## Configuration (Environment Variables)
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `COSTACK_STACK_SIZE` | `2097152` (2 MiB) | Usable stack bytes per coroutine |
//! | `COSTACK_GUARD_PAGE` | `1` | `0`, `false` or `off` drops the guard page |
//!
//! Invalid values are reported with `warn!` and replaced by the default.
//! The environment is read once per process ([`CoroutineConfig::global`]);
//! [`crate::CoroutineBuilder`] overrides it per coroutine.

use std::sync::OnceLock;
use tracing::warn;

/// Default usable stack size (2 MiB)
///
/// Deep recursive bodies (parsers, layout code) need far more than a typical
/// thread's first few pages. Memory is mapped lazily by the OS, so untouched
/// pages cost only address space.
pub const DEFAULT_STACK_SIZE: usize = 2 * 1024 * 1024;

/// Smallest stack size accepted from the environment
pub const MIN_STACK_SIZE: usize = 64 * 1024;

static GLOBAL: OnceLock<CoroutineConfig> = OnceLock::new();

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoroutineConfig {
    /// Requested usable bytes, rounded up to pages on allocation
    pub stack_size: usize,
    /// Protect the page below the stack
    pub guard_page: bool,
}

impl Default for CoroutineConfig {
    fn default() -> Self {
        Self {
            stack_size: DEFAULT_STACK_SIZE,
            guard_page: true,
        }
    }
}

impl CoroutineConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        Self::from_values(
            std::env::var("COSTACK_STACK_SIZE").ok().as_deref(),
            std::env::var("COSTACK_GUARD_PAGE").ok().as_deref(),
        )
    }

    /// Build a configuration from raw variable values
    pub fn from_values(stack_size: Option<&str>, guard_page: Option<&str>) -> Self {
        Self {
            stack_size: parse_stack_size(stack_size),
            guard_page: parse_flag("COSTACK_GUARD_PAGE", guard_page, true),
        }
    }

    /// Process-wide configuration, read from the environment on first use
    pub fn global() -> &'static CoroutineConfig {
        GLOBAL.get_or_init(Self::from_env)
    }
}

fn parse_stack_size(env_value: Option<&str>) -> usize {
    let Some(val) = env_value else {
        return DEFAULT_STACK_SIZE;
    };
    match val.trim().parse::<usize>() {
        Ok(size) if size >= MIN_STACK_SIZE => size,
        Ok(size) => {
            warn!(
                value = size,
                min = MIN_STACK_SIZE,
                "COSTACK_STACK_SIZE below minimum, using default {}",
                DEFAULT_STACK_SIZE
            );
            DEFAULT_STACK_SIZE
        }
        Err(_) => {
            warn!(
                value = val,
                "COSTACK_STACK_SIZE is not a valid number, using default {}", DEFAULT_STACK_SIZE
            );
            DEFAULT_STACK_SIZE
        }
    }
}

fn parse_flag(name: &str, env_value: Option<&str>, default: bool) -> bool {
    let Some(val) = env_value else {
        return default;
    };
    match val.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => true,
        "0" | "false" | "off" | "no" => false,
        _ => {
            warn!(variable = name, value = val, "unrecognized flag value, using default {}", default);
            default
        }
    }
}
