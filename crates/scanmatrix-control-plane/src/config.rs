use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

pub const DEFAULT_TICK_INTERVAL_SECS: u64 = 5;
pub const DEFAULT_STATUS_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_IV_QUEUE_LIMIT: usize = 100;

/// Runtime settings read from `SCANMATRIX_*` environment variables.
#[derive(Debug, Clone, PartialEq)]
pub struct ControlPlaneConfig {
    pub tick_interval: Duration,
    pub status_interval: Duration,
    pub iv_queue_limit: usize,
    pub seed_file: Option<PathBuf>,
    /// Timezone name to UTC offset in seconds.
    pub timezones: HashMap<String, i32>,
}

impl Default for ControlPlaneConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(DEFAULT_TICK_INTERVAL_SECS),
            status_interval: Duration::from_secs(DEFAULT_STATUS_INTERVAL_SECS),
            iv_queue_limit: DEFAULT_IV_QUEUE_LIMIT,
            seed_file: None,
            timezones: HashMap::new(),
        }
    }
}

impl ControlPlaneConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; unset or invalid values keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let tick_secs = parse_or_default(
            &lookup,
            "SCANMATRIX_TICK_INTERVAL_SECS",
            DEFAULT_TICK_INTERVAL_SECS,
        );
        let status_secs = parse_or_default(
            &lookup,
            "SCANMATRIX_STATUS_INTERVAL_SECS",
            DEFAULT_STATUS_INTERVAL_SECS,
        );
        let iv_queue_limit =
            parse_or_default(&lookup, "SCANMATRIX_IV_QUEUE_LIMIT", DEFAULT_IV_QUEUE_LIMIT);

        Self {
            // A zero interval would panic in tokio::time::interval.
            tick_interval: Duration::from_secs(tick_secs.max(1)),
            status_interval: Duration::from_secs(status_secs.max(1)),
            iv_queue_limit,
            seed_file: lookup("SCANMATRIX_SEED_FILE")
                .map(|raw| raw.trim().to_string())
                .filter(|raw| !raw.is_empty())
                .map(PathBuf::from),
            timezones: lookup("SCANMATRIX_TIMEZONES")
                .map(|raw| parse_timezones(&raw))
                .unwrap_or(defaults.timezones),
        }
    }
}

fn parse_or_default<T: FromStr + Copy>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> T {
    match lookup(key) {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!(key, value = %raw, "Invalid configuration value, using default");
            default
        }),
        None => default,
    }
}

/// Parses `name=offset_secs,...`; malformed entries are skipped.
fn parse_timezones(raw: &str) -> HashMap<String, i32> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .filter_map(|entry| {
            let parsed = entry
                .split_once('=')
                .and_then(|(name, offset)| Some((name.trim(), offset.trim().parse::<i32>().ok()?)))
                .filter(|(name, _)| !name.is_empty());
            if parsed.is_none() {
                warn!(entry, "Skipping malformed timezone entry");
            }
            parsed.map(|(name, offset)| (name.to_string(), offset))
        })
        .collect()
}
