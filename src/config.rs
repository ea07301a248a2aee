use std::env;
use std::time::Duration;

use crate::error::DispatchError;
use crate::state::DispatchConfig;

#[derive(Debug, Clone)]
pub struct Config {
    pub http_port: u16,
    pub log_level: String,
    /// Candidate fan-out size `k`.
    pub fanout_size: usize,
    /// TTL of an unanswered request, in milliseconds.
    pub request_ttl_ms: u64,
}

impl Config {
    pub fn from_env() -> Result<Self, DispatchError> {
        let _ = dotenvy::dotenv();

        Ok(Self {
            http_port: parse_or_default("HTTP_PORT", 3000)?,
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            fanout_size: parse_or_default("FANOUT_SIZE", 3)?,
            request_ttl_ms: parse_or_default("REQUEST_TTL_MS", 30_000)?,
        })
    }

    pub fn dispatch(&self) -> DispatchConfig {
        DispatchConfig {
            fanout_size: self.fanout_size,
            request_ttl: Duration::from_millis(self.request_ttl_ms),
        }
    }
}

fn parse_or_default<T>(key: &str, default: T) -> Result<T, DispatchError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|err| DispatchError::Internal(format!("invalid {key}: {err}"))),
        Err(_) => Ok(default),
    }
}
