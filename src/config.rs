use std::collections::HashMap;
use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use crate::factory::Vendor;
use crate::resilience::{PoolConfig, RetryPolicy};
use crate::types::{DEFAULT_MAX_TOOL_ROUNDS, DEFAULT_REQUEST_TIMEOUT};
use crate::Error;

/// Upper bound for `GATEWAY_REQUEST_TIMEOUT_SECS` (one day).
pub const MAX_REQUEST_TIMEOUT_SECS: u64 = 86_400;

/// Process-wide gateway settings.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub bind: SocketAddr,
    /// Whole-request deadline.
    pub request_timeout: Duration,
    /// Total backend attempts per round before output starts.
    pub max_retries: u32,
    pub max_tool_rounds: u32,
    pub pool: PoolConfig,
    pub api_keys: HashMap<Vendor, String>,
    pub base_urls: HashMap<Vendor, String>,
    /// Treat every caller as authenticated with a subscription.
    pub auth_disabled: bool,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 3001)),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            max_retries: 3,
            max_tool_rounds: DEFAULT_MAX_TOOL_ROUNDS,
            pool: PoolConfig::default(),
            api_keys: HashMap::new(),
            base_urls: HashMap::new(),
            auth_disabled: true,
        }
    }
}

fn parse_var<T>(name: &str, value: Option<String>, default: T) -> Result<T, Error>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match value {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| Error::config(format!("{name}={raw:?} is invalid: {e}"))),
    }
}

impl GatewayConfig {
    /// Create configuration from environment variables.
    pub fn from_env() -> Result<Self, Error> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Create configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let bind = parse_var("GATEWAY_BIND", var("GATEWAY_BIND"), defaults.bind)?;
        let timeout_secs = parse_var(
            "GATEWAY_REQUEST_TIMEOUT_SECS",
            var("GATEWAY_REQUEST_TIMEOUT_SECS"),
            defaults.request_timeout.as_secs(),
        )?;
        let max_retries = parse_var(
            "GATEWAY_MAX_RETRIES",
            var("GATEWAY_MAX_RETRIES"),
            defaults.max_retries,
        )?;
        let max_tool_rounds = parse_var(
            "GATEWAY_MAX_TOOL_ROUNDS",
            var("GATEWAY_MAX_TOOL_ROUNDS"),
            defaults.max_tool_rounds,
        )?;
        let max_sockets_per_host = parse_var(
            "GATEWAY_MAX_SOCKETS_PER_HOST",
            var("GATEWAY_MAX_SOCKETS_PER_HOST"),
            defaults.pool.max_sockets_per_host,
        )?;
        let max_idle_per_host = parse_var(
            "GATEWAY_MAX_IDLE_PER_HOST",
            var("GATEWAY_MAX_IDLE_PER_HOST"),
            defaults.pool.max_idle_per_host,
        )?;
        let keep_alive_secs = parse_var(
            "GATEWAY_KEEP_ALIVE_SECS",
            var("GATEWAY_KEEP_ALIVE_SECS"),
            defaults.pool.keep_alive.as_secs(),
        )?;
        let auth_disabled = parse_var(
            "GATEWAY_AUTH_DISABLED",
            var("GATEWAY_AUTH_DISABLED"),
            defaults.auth_disabled,
        )?;

        if timeout_secs == 0 || timeout_secs > MAX_REQUEST_TIMEOUT_SECS {
            return Err(Error::config(format!(
                "GATEWAY_REQUEST_TIMEOUT_SECS must be between 1 and {MAX_REQUEST_TIMEOUT_SECS}"
            )));
        }
        if max_retries == 0 {
            return Err(Error::config("GATEWAY_MAX_RETRIES must be at least 1"));
        }
        if max_sockets_per_host == 0 {
            return Err(Error::config("GATEWAY_MAX_SOCKETS_PER_HOST must be positive"));
        }

        let mut api_keys = HashMap::new();
        let mut base_urls = HashMap::new();
        for vendor in Vendor::ALL {
            if let Some(key) = var(vendor.api_key_env()) {
                api_keys.insert(vendor, key);
            }
            if let Some(url) = var(&vendor.base_url_env()) {
                base_urls.insert(vendor, url);
            }
        }

        Ok(Self {
            bind,
            request_timeout: Duration::from_secs(timeout_secs),
            max_retries,
            max_tool_rounds,
            pool: PoolConfig {
                max_sockets_per_host,
                max_idle_per_host,
                keep_alive: Duration::from_secs(keep_alive_secs),
                ..defaults.pool
            },
            api_keys,
            base_urls,
            auth_disabled,
        })
    }

    /// Retry policy applied to backend rounds and tool network calls.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::default().with_max_attempts(self.max_retries)
    }
}
