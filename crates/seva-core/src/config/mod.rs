//! Engine configuration from the environment.
//!
//! A missing remote URL is not an error: the engine starts in local-only mode
//! with attendance capture fully functional and sync operations reporting the
//! remote as unavailable.

use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::attendance::RecorderConfig;
use crate::error::{Error, Result};
use crate::geofence::GeofenceConfig;
use crate::util::{is_http_url, normalize_text_option};

/// Runtime configuration for [`crate::engine::SyncEngine`].
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Local database file
    pub db_path: PathBuf,
    /// Remote store base URL; `None` runs the engine local-only
    pub remote_url: Option<String>,
    /// Logical store (database) name on the remote side
    pub remote_store: String,
    /// Shift length and geofence radii for the recorder
    pub recorder: RecorderConfig,
    /// Reachability probe cadence for the network monitor
    pub probe_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("seva.db"),
            remote_url: None,
            remote_store: "temple".to_string(),
            recorder: RecorderConfig::default(),
            probe_interval: Duration::from_secs(30),
        }
    }
}

impl EngineConfig {
    /// Build a configuration from process environment variables.
    pub fn from_env() -> Result<Self> {
        let values: HashMap<String, String> = env::vars().collect();
        Self::from_lookup(|name| values.get(name).cloned())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let db_path = PathBuf::from(value_or_default(&lookup, "SEVA_DB_PATH", "seva.db"));

        let remote_url = normalize_text_option(lookup("SEVA_REMOTE_URL"));
        if let Some(url) = remote_url.as_deref() {
            if !is_http_url(url) {
                return Err(Error::InvalidInput(
                    "SEVA_REMOTE_URL must start with http:// or https://".to_string(),
                ));
            }
        }
        let remote_store = value_or_default(&lookup, "SEVA_REMOTE_STORE", "temple");

        let shift_hours = parse_f64(&lookup, "SEVA_SHIFT_HOURS", 8.0)?;
        if !(0.0..=24.0).contains(&shift_hours) || shift_hours == 0.0 {
            return Err(Error::InvalidInput(
                "SEVA_SHIFT_HOURS must be in (0, 24]".to_string(),
            ));
        }

        let check_in_radius_m = parse_f64(&lookup, "SEVA_CHECK_IN_RADIUS_M", 100.0)?;
        let outside_radius_m = parse_f64(&lookup, "SEVA_OUTSIDE_RADIUS_M", 500.0)?;
        if check_in_radius_m <= 0.0 || outside_radius_m < check_in_radius_m {
            return Err(Error::InvalidInput(
                "geofence radii must satisfy 0 < SEVA_CHECK_IN_RADIUS_M <= SEVA_OUTSIDE_RADIUS_M"
                    .to_string(),
            ));
        }

        let probe_secs = value_or_default(&lookup, "SEVA_PROBE_INTERVAL_SECS", "30")
            .parse::<u64>()
            .map_err(|_| {
                Error::InvalidInput(
                    "SEVA_PROBE_INTERVAL_SECS must be an integer in [1, 3600]".to_string(),
                )
            })?;
        if !(1..=3_600).contains(&probe_secs) {
            return Err(Error::InvalidInput(
                "SEVA_PROBE_INTERVAL_SECS must be in [1, 3600]".to_string(),
            ));
        }

        Ok(Self {
            db_path,
            remote_url,
            remote_store,
            recorder: RecorderConfig {
                shift_hours,
                geofence: GeofenceConfig {
                    check_in_radius_m,
                    outside_radius_m,
                },
            },
            probe_interval: Duration::from_secs(probe_secs),
        })
    }
}

fn value_or_default(lookup: impl Fn(&str) -> Option<String>, name: &str, default: &str) -> String {
    normalize_text_option(lookup(name)).unwrap_or_else(|| default.to_string())
}

fn parse_f64(lookup: impl Fn(&str) -> Option<String>, name: &str, default: f64) -> Result<f64> {
    match normalize_text_option(lookup(name)) {
        None => Ok(default),
        Some(raw) => raw
            .parse::<f64>()
            .map_err(|_| Error::InvalidInput(format!("{name} must be a number, got '{raw}'"))),
    }
}
