//! Client configuration loaded from environment variables.
//!
//! Every setting has a default so a host can start with no configuration.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use scratchboard_scratch::CardSettings;
use scratchboard_shared::constants::DEFAULT_SAMPLE_SIZE;

use crate::catalog::ConflictPolicy;

const ENV_PREFIX: &str = "SCRATCHBOARD_";

#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// Number of cards drawn per collection.
    /// Env: `SCRATCHBOARD_SAMPLE_SIZE`
    /// Default: `6`
    pub sample_size: usize,

    /// Mask geometry, brush size and scan throttling.
    /// Env: `SCRATCHBOARD_MASK_WIDTH`, `SCRATCHBOARD_MASK_HEIGHT`,
    /// `SCRATCHBOARD_BRUSH_RADIUS`, `SCRATCHBOARD_SCAN_EVERY`,
    /// `SCRATCHBOARD_SCAN_INTERVAL_MS`
    pub card: CardSettings,

    /// Whether tabs use the cross-context broadcast path. When off, sync
    /// relies on in-process delivery and the storage fallback.
    /// Env: `SCRATCHBOARD_BROADCAST` (true/false)
    /// Default: `true`
    pub broadcast: bool,

    /// Env: `SCRATCHBOARD_CONFLICT_POLICY` (`arrival` or `timestamp`)
    /// Default: `arrival`
    pub conflict_policy: ConflictPolicy,

    /// SQLite file backing the storage area. In-memory when unset.
    /// Env: `SCRATCHBOARD_DB_PATH`
    pub db_path: Option<PathBuf>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            sample_size: DEFAULT_SAMPLE_SIZE,
            card: CardSettings::default(),
            broadcast: true,
            conflict_policy: ConflictPolicy::ArrivalOrder,
            db_path: None,
        }
    }
}

impl ClientConfig {
    /// Load configuration from the process environment, falling back to
    /// defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through `lookup`, which maps a full variable name
    /// to its value.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let var = |name: &str| lookup(&format!("{ENV_PREFIX}{name}"));
        let mut config = Self::default();

        parse_into(&var, "SAMPLE_SIZE", &mut config.sample_size);
        parse_into(&var, "MASK_WIDTH", &mut config.card.mask_width);
        parse_into(&var, "MASK_HEIGHT", &mut config.card.mask_height);
        parse_into(&var, "SCAN_EVERY", &mut config.card.scan_every);
        parse_into(&var, "CONFLICT_POLICY", &mut config.conflict_policy);

        let mut radius = config.card.brush_radius;
        parse_into(&var, "BRUSH_RADIUS", &mut radius);
        if radius.is_finite() && radius > 0.0 {
            config.card.brush_radius = radius;
        } else {
            tracing::warn!(value = radius, "Invalid SCRATCHBOARD_BRUSH_RADIUS, using default");
        }

        let mut interval_ms = config.card.scan_interval.as_millis() as u64;
        parse_into(&var, "SCAN_INTERVAL_MS", &mut interval_ms);
        config.card.scan_interval = Duration::from_millis(interval_ms);

        if let Some(val) = var("BROADCAST") {
            config.broadcast = val != "false" && val != "0";
        }

        if let Some(path) = var("DB_PATH") {
            if !path.is_empty() {
                config.db_path = Some(PathBuf::from(path));
            }
        }

        config
    }
}

fn parse_into<T>(var: &impl Fn(&str) -> Option<String>, name: &str, slot: &mut T)
where
    T: FromStr,
{
    let Some(raw) = var(name) else {
        return;
    };
    match raw.trim().parse::<T>() {
        Ok(value) => *slot = value,
        Err(_) => {
            tracing::warn!(
                variable = %format!("{ENV_PREFIX}{name}"),
                value = %raw,
                "Invalid value, using default"
            );
        }
    }
}
