//! Environment-backed configuration for the smoke run.

use std::env;

use hubchat_core::{Credential, SyncConfig};
use thiserror::Error;

const DEFAULT_TOKEN: &str = "smoke-token";
const DEFAULT_ROOM_ID: &str = "lobby";

#[derive(Debug, Clone, PartialEq)]
pub struct HubchatSmokeConfig {
    pub credential: Credential,
    pub room_id: String,
    pub sync: SyncConfig,
}

impl HubchatSmokeConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(mut lookup: F) -> Result<Self, ConfigError>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let token = optional_trimmed_env("HUBCHAT_TOKEN", &mut lookup)
            .unwrap_or_else(|| DEFAULT_TOKEN.to_owned());
        let room_id = optional_trimmed_env("HUBCHAT_ROOM_ID", &mut lookup)
            .unwrap_or_else(|| DEFAULT_ROOM_ID.to_owned());

        let defaults = SyncConfig::default();
        let sync = SyncConfig {
            channel_timeout_ms: parse_positive(
                "HUBCHAT_CHANNEL_TIMEOUT_MS",
                defaults.channel_timeout_ms,
                &mut lookup,
            )?,
            room_history_limit: parse_positive(
                "HUBCHAT_ROOM_HISTORY_LIMIT",
                defaults.room_history_limit,
                &mut lookup,
            )?,
            timeline_max_items: parse_positive(
                "HUBCHAT_TIMELINE_MAX_ITEMS",
                defaults.timeline_max_items,
                &mut lookup,
            )?,
            ..defaults
        };

        Ok(Self {
            credential: Credential::new(token),
            room_id,
            sync,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid {key}='{value}': {reason}")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
}

fn optional_trimmed_env<F>(key: &'static str, lookup: &mut F) -> Option<String>
where
    F: FnMut(&str) -> Option<String>,
{
    lookup(key)
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

/// Parse an optional numeric variable, rejecting zero.
fn parse_positive<T, F>(key: &'static str, default: T, lookup: &mut F) -> Result<T, ConfigError>
where
    T: std::str::FromStr + Default + PartialEq,
    T::Err: std::fmt::Display,
    F: FnMut(&str) -> Option<String>,
{
    let Some(value) = optional_trimmed_env(key, lookup) else {
        return Ok(default);
    };
    let parsed = value
        .parse::<T>()
        .map_err(|err| ConfigError::InvalidValue {
            key,
            value: value.clone(),
            reason: err.to_string(),
        })?;
    if parsed == T::default() {
        return Err(ConfigError::InvalidValue {
            key,
            value,
            reason: "must be at least 1".to_owned(),
        });
    }
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config_from_pairs(pairs: &[(&str, &str)]) -> Result<HubchatSmokeConfig, ConfigError> {
        let map = pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect::<HashMap<_, _>>();
        HubchatSmokeConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn falls_back_to_defaults() {
        let cfg = config_from_pairs(&[]).expect("config should parse");
        assert_eq!(cfg.credential.as_str(), DEFAULT_TOKEN);
        assert_eq!(cfg.room_id, DEFAULT_ROOM_ID);
        assert_eq!(cfg.sync, SyncConfig::default());
    }

    #[test]
    fn parses_sync_tuning() {
        let cfg = config_from_pairs(&[
            ("HUBCHAT_TOKEN", " abc "),
            ("HUBCHAT_ROOM_ID", "r42"),
            ("HUBCHAT_CHANNEL_TIMEOUT_MS", "2500"),
            ("HUBCHAT_ROOM_HISTORY_LIMIT", "10"),
            ("HUBCHAT_TIMELINE_MAX_ITEMS", "64"),
        ])
        .expect("config should parse");

        assert_eq!(cfg.credential.as_str(), "abc");
        assert_eq!(cfg.room_id, "r42");
        assert_eq!(cfg.sync.channel_timeout_ms, 2_500);
        assert_eq!(cfg.sync.room_history_limit, 10);
        assert_eq!(cfg.sync.timeline_max_items, 64);
        assert_eq!(cfg.sync.pagination_limit_cap, 100);
    }

    #[test]
    fn rejects_unparsable_numbers() {
        let err = config_from_pairs(&[("HUBCHAT_ROOM_HISTORY_LIMIT", "lots")])
            .expect_err("non-numeric limit must fail");
        match err {
            ConfigError::InvalidValue { key, value, .. } => {
                assert_eq!(key, "HUBCHAT_ROOM_HISTORY_LIMIT");
                assert_eq!(value, "lots");
            }
        }
    }

    #[test]
    fn rejects_zero() {
        let err = config_from_pairs(&[("HUBCHAT_TIMELINE_MAX_ITEMS", "0")])
            .expect_err("zero must fail");
        assert_eq!(
            err.to_string(),
            "invalid HUBCHAT_TIMELINE_MAX_ITEMS='0': must be at least 1"
        );
    }
}
