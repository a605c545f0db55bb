//! Tracing bootstrap for the smoke run.

use std::env;

use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info,hubchat_smoke=debug,hubchat_sync=debug";

/// Install the global subscriber.
///
/// Filter precedence:
/// 1) `RUST_LOG`
/// 2) `HUBCHAT_SMOKE_LOG`
/// 3) `HUBCHAT_LOG`
/// 4) built-in default
pub fn init() {
    let _ = tracing_subscriber::fmt()
        .with_target(true)
        .with_env_filter(filter_from_env())
        .try_init();
}

fn filter_from_env() -> EnvFilter {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }

    ["HUBCHAT_SMOKE_LOG", "HUBCHAT_LOG"]
        .into_iter()
        .find_map(|key| filter_from_var(key, |key| env::var(key).ok()))
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_FILTER))
}

fn filter_from_var<F>(key: &str, lookup: F) -> Option<EnvFilter>
where
    F: FnOnce(&str) -> Option<String>,
{
    let value = lookup(key).filter(|value| !value.trim().is_empty())?;
    EnvFilter::try_new(value).ok()
}
