//! Client configuration parsed from environment variables.

use std::time::Duration;

pub const DEFAULT_RECONNECT_BASE: u32 = 2;
pub const DEFAULT_RECONNECT_CAP_SECS: u64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientConfig {
    /// Exponent base of the reconnect delay, in seconds.
    pub reconnect_base: u32,
    /// Upper bound on any single reconnect delay.
    pub reconnect_cap: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            reconnect_base: DEFAULT_RECONNECT_BASE,
            reconnect_cap: Duration::from_secs(DEFAULT_RECONNECT_CAP_SECS),
        }
    }
}

impl ClientConfig {
    /// Build config from environment variables, falling back to defaults.
    ///
    /// Optional:
    /// - `AUTOWS_RECONNECT_BASE`: default 2
    /// - `AUTOWS_RECONNECT_CAP_SECS`: default 30
    ///
    /// Both are clamped to at least 1.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        // Zero would make every delay zero and redial a dead server in a loop.
        let reconnect_base = env_parse(&lookup, "AUTOWS_RECONNECT_BASE", DEFAULT_RECONNECT_BASE).max(1);
        let cap_secs = env_parse(&lookup, "AUTOWS_RECONNECT_CAP_SECS", DEFAULT_RECONNECT_CAP_SECS).max(1);
        Self { reconnect_base, reconnect_cap: Duration::from_secs(cap_secs) }
    }
}

fn env_parse<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    lookup(key)
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
