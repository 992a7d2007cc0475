//! Ledger configuration.

use chrono::TimeDelta;
use std::env;
use thiserror::Error;

const COOLDOWN_KEY: &str = "LEDGER_COOLDOWN_SECS";
const PENDING_TTL_KEY: &str = "LEDGER_PENDING_TTL_SECS";
const NEGATIVE_ADMIN_DEBIT_KEY: &str = "LEDGER_ALLOW_NEGATIVE_ADMIN_DEBIT";

/// Longest accepted cooldown or TTL: ten years.
pub const MAX_DURATION_SECS: i64 = 10 * 365 * 24 * 60 * 60;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{key}: invalid value '{value}': {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: &'static str,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerConfig {
    /// How long the original sender of a cancelled transfer may not send.
    pub cooldown: TimeDelta,
    /// Age after which a transfer still awaiting acceptance is expired.
    /// `None` keeps requests pending indefinitely.
    pub pending_ttl: Option<TimeDelta>,
    /// Whether admin debits may take a balance below zero.
    pub allow_negative_admin_debit: bool,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            cooldown: TimeDelta::hours(24),
            pending_ttl: None,
            allow_negative_admin_debit: true,
        }
    }
}

impl LedgerConfig {
    /// Read the configuration from the environment, loading `.env` first if present.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key lookup; unset keys keep their default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(value) = lookup(COOLDOWN_KEY) {
            config.cooldown = TimeDelta::seconds(parse_secs(COOLDOWN_KEY, &value)?);
        }

        if let Some(value) = lookup(PENDING_TTL_KEY) {
            config.pending_ttl = match value.trim() {
                "" => None,
                _ => match parse_secs(PENDING_TTL_KEY, &value)? {
                    0 => None,
                    secs => Some(TimeDelta::seconds(secs)),
                },
            };
        }

        if let Some(value) = lookup(NEGATIVE_ADMIN_DEBIT_KEY) {
            config.allow_negative_admin_debit = match value.trim() {
                "true" | "1" => true,
                "false" | "0" => false,
                _ => {
                    return Err(ConfigError::Invalid {
                        key: NEGATIVE_ADMIN_DEBIT_KEY,
                        value,
                        reason: "expected true or false",
                    });
                }
            };
        }

        Ok(config)
    }
}

fn parse_secs(key: &'static str, value: &str) -> Result<i64, ConfigError> {
    let invalid = |reason| ConfigError::Invalid {
        key,
        value: value.to_string(),
        reason,
    };
    let secs: i64 = value
        .trim()
        .parse()
        .map_err(|_| invalid("expected a number of seconds"))?;
    if secs < 0 {
        return Err(invalid("must not be negative"));
    }
    if secs > MAX_DURATION_SECS {
        return Err(invalid("longer than ten years"));
    }
    Ok(secs)
}
