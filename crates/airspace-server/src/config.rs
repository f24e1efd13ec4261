//! Server configuration from environment.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use airspace_core::tile::MAX_ZOOM;

use crate::error::ConfigError;

#[derive(Debug, Clone)]
pub struct Config {
    pub server_port: u16,
    pub database_path: String,
    pub database_max_connections: u32,
    pub persist: bool,
    pub tile_zoom: u8,
    pub tile_max_age_s: u64,
    pub geometry_retention_s: u64,
    pub query_cache_ttl_s: u64,
    pub query_cache_max_entries: usize,
    pub overlay_cache_ttl_s: u64,
    pub overlay_cache_max_entries: usize,
    pub viewport_precision: u32,
    pub max_viewport_tiles: usize,
    pub parallel_clip_threshold: usize,
    pub refresh_batch_tiles: usize,
    pub fetch_timeout_s: u64,
    pub retention_sweep_s: u64,
    pub auto_refresh: bool,
    pub openaip_url: String,
    pub openaip_api_key: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_port: 3000,
            database_path: "data/airspace.db".to_string(),
            database_max_connections: 4,
            persist: true,
            tile_zoom: 7,
            tile_max_age_s: 86_400,
            geometry_retention_s: 7 * 86_400,
            query_cache_ttl_s: 30,
            query_cache_max_entries: 256,
            overlay_cache_ttl_s: 86_400,
            overlay_cache_max_entries: 128,
            viewport_precision: 3,
            max_viewport_tiles: 4096,
            parallel_clip_threshold: airspace_core::clipping::DEFAULT_PARALLEL_THRESHOLD,
            refresh_batch_tiles: 16,
            fetch_timeout_s: 20,
            retention_sweep_s: 3_600,
            auto_refresh: false,
            openaip_url: "https://api.core.openaip.net/api".to_string(),
            openaip_api_key: String::new(),
        }
    }
}

impl Config {
    /// Read every setting from the process environment. A variable that is
    /// set but does not parse is an error, not a fallback to the default.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = EnvVars { lookup };
        let defaults = Self::default();
        let config = Self {
            server_port: vars.parse("AIRSPACE_PORT", defaults.server_port)?,
            database_path: vars.string("AIRSPACE_DB_PATH").unwrap_or(defaults.database_path),
            database_max_connections: vars.parse(
                "AIRSPACE_DB_MAX_CONNECTIONS",
                defaults.database_max_connections,
            )?,
            persist: vars.flag("AIRSPACE_PERSIST", defaults.persist)?,
            tile_zoom: vars.parse("AIRSPACE_TILE_ZOOM", defaults.tile_zoom)?,
            tile_max_age_s: vars.parse("AIRSPACE_TILE_MAX_AGE_S", defaults.tile_max_age_s)?,
            geometry_retention_s: vars.parse(
                "AIRSPACE_GEOMETRY_RETENTION_S",
                defaults.geometry_retention_s,
            )?,
            query_cache_ttl_s: vars.parse("AIRSPACE_QUERY_CACHE_TTL_S", defaults.query_cache_ttl_s)?,
            query_cache_max_entries: vars.parse(
                "AIRSPACE_QUERY_CACHE_MAX_ENTRIES",
                defaults.query_cache_max_entries,
            )?,
            overlay_cache_ttl_s: vars.parse(
                "AIRSPACE_OVERLAY_CACHE_TTL_S",
                defaults.overlay_cache_ttl_s,
            )?,
            overlay_cache_max_entries: vars.parse(
                "AIRSPACE_OVERLAY_CACHE_MAX_ENTRIES",
                defaults.overlay_cache_max_entries,
            )?,
            viewport_precision: vars.parse(
                "AIRSPACE_VIEWPORT_PRECISION",
                defaults.viewport_precision,
            )?,
            max_viewport_tiles: vars.parse(
                "AIRSPACE_MAX_VIEWPORT_TILES",
                defaults.max_viewport_tiles,
            )?,
            parallel_clip_threshold: vars.parse(
                "AIRSPACE_PARALLEL_CLIP_THRESHOLD",
                defaults.parallel_clip_threshold,
            )?,
            refresh_batch_tiles: vars.parse(
                "AIRSPACE_REFRESH_BATCH_TILES",
                defaults.refresh_batch_tiles,
            )?,
            fetch_timeout_s: vars.parse("AIRSPACE_FETCH_TIMEOUT_S", defaults.fetch_timeout_s)?,
            retention_sweep_s: vars.parse("AIRSPACE_RETENTION_SWEEP_S", defaults.retention_sweep_s)?,
            auto_refresh: vars.flag("AIRSPACE_AUTO_REFRESH", defaults.auto_refresh)?,
            openaip_url: vars.string("OPENAIP_URL").unwrap_or(defaults.openaip_url),
            openaip_api_key: vars.string("OPENAIP_API_KEY").unwrap_or_default(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the engine cannot run with. `from_env` runs this.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tile_zoom > MAX_ZOOM {
            return Err(ConfigError::InvalidZoom(self.tile_zoom));
        }
        let durations = [
            ("tile_max_age_s", self.tile_max_age_s),
            ("geometry_retention_s", self.geometry_retention_s),
            ("query_cache_ttl_s", self.query_cache_ttl_s),
            ("overlay_cache_ttl_s", self.overlay_cache_ttl_s),
            ("fetch_timeout_s", self.fetch_timeout_s),
            ("retention_sweep_s", self.retention_sweep_s),
        ];
        for (name, value) in durations {
            if value == 0 {
                return Err(ConfigError::ZeroDuration(name));
            }
        }
        let capacities = [
            ("database_max_connections", self.database_max_connections as usize),
            ("query_cache_max_entries", self.query_cache_max_entries),
            ("overlay_cache_max_entries", self.overlay_cache_max_entries),
            ("max_viewport_tiles", self.max_viewport_tiles),
            ("refresh_batch_tiles", self.refresh_batch_tiles),
        ];
        for (name, value) in capacities {
            if value == 0 {
                return Err(ConfigError::ZeroCapacity(name));
            }
        }
        if self.viewport_precision > 9 {
            return Err(ConfigError::InvalidPrecision(self.viewport_precision));
        }
        Ok(())
    }

    pub fn tile_max_age(&self) -> Duration {
        Duration::from_secs(self.tile_max_age_s)
    }

    pub fn geometry_retention(&self) -> Duration {
        Duration::from_secs(self.geometry_retention_s)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_s)
    }

    pub fn has_openaip_key(&self) -> bool {
        !self.openaip_api_key.trim().is_empty()
    }
}

struct EnvVars<F> {
    lookup: F,
}

impl<F> EnvVars<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
    }

    fn parse<T: FromStr>(&self, key: &'static str, default: T) -> Result<T, ConfigError> {
        match self.string(key) {
            Some(value) => value
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidValue { key, value }),
            None => Ok(default),
        }
    }

    fn flag(&self, key: &'static str, default: bool) -> Result<bool, ConfigError> {
        let Some(value) = self.string(key) else {
            return Ok(default);
        };
        match value.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::InvalidValue { key, value }),
        }
    }
}
