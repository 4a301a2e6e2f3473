use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::PathBuf;

pub const MIN_SIMPLIFY_TOLERANCE: f64 = 0.00001;
pub const MAX_SIMPLIFY_TOLERANCE: f64 = 0.001;
const DEFAULT_SIMPLIFY_TOLERANCE: f64 = 0.0001;
const DEFAULT_MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;

fn overrides_path() -> Option<PathBuf> {
    env_optional_string("MAPANIMA_CONFIG_PATH").map(PathBuf::from)
}

#[derive(Debug, Clone, Deserialize)]
struct ConfigOverrides {
    #[serde(default)]
    catalog_url: Option<String>,
    #[serde(default)]
    catalog_path: Option<String>,
    #[serde(default)]
    enable_catalog_refresh: Option<bool>,
    #[serde(default)]
    catalog_refresh_interval_seconds: Option<u64>,
    #[serde(default)]
    default_simplify_tolerance: Option<f64>,
}

fn load_config_overrides() -> Option<ConfigOverrides> {
    let path = overrides_path()?;
    if !path.exists() {
        return None;
    }
    let contents = match std::fs::read_to_string(&path) {
        Ok(contents) => contents,
        Err(err) => {
            tracing::warn!(
                path = %path.display(),
                error = %err,
                "failed to read config overrides; using env defaults"
            );
            return None;
        }
    };
    match serde_json::from_str(&contents) {
        Ok(value) => Some(value),
        Err(err) => {
            tracing::warn!(
                path = %path.display(),
                error = %err,
                "failed to parse config overrides; using env defaults"
            );
            None
        }
    }
}

fn apply_overrides(config: &mut ServerConfig, overrides: &ConfigOverrides) {
    if let Some(url) = overrides
        .catalog_url
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
    {
        config.catalog_url = Some(url.to_string());
    }
    if let Some(path) = overrides
        .catalog_path
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
    {
        config.catalog_path = Some(PathBuf::from(path));
    }
    if let Some(enabled) = overrides.enable_catalog_refresh {
        config.enable_catalog_refresh = enabled;
    }
    if let Some(value) = overrides
        .catalog_refresh_interval_seconds
        .filter(|v| *v != 0)
    {
        config.catalog_refresh_interval_seconds = clamp_refresh_interval(value);
    }
    if let Some(value) = overrides.default_simplify_tolerance {
        config.default_simplify_tolerance = clamp_tolerance(value);
    }
}

pub fn clamp_refresh_interval(seconds: u64) -> u64 {
    seconds.clamp(300, 7 * 24 * 3600)
}

pub fn clamp_tolerance(tolerance: f64) -> f64 {
    if !tolerance.is_finite() {
        return DEFAULT_SIMPLIFY_TOLERANCE;
    }
    tolerance.clamp(MIN_SIMPLIFY_TOLERANCE, MAX_SIMPLIFY_TOLERANCE)
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub catalog_url: Option<String>,
    pub catalog_path: Option<PathBuf>,
    pub enable_catalog_refresh: bool,
    pub catalog_refresh_interval_seconds: u64,
    pub auth_username: String,
    pub auth_password_hash: String,
    pub session_ttl_hours: i64,
    pub static_root: Option<PathBuf>,
    pub max_upload_bytes: usize,
    pub default_simplify_tolerance: f64,
}

impl ServerConfig {
    pub fn from_env(cli_static_root: Option<PathBuf>) -> Result<Self> {
        let overrides = load_config_overrides();

        let catalog_url = env_optional_string("MAPANIMA_CATALOG_URL");
        let catalog_path = env_optional_string("MAPANIMA_CATALOG_PATH").map(PathBuf::from);

        let auth_username = env_optional_string("MAPANIMA_AUTH_USERNAME")
            .context("MAPANIMA_AUTH_USERNAME must be set")?;
        let auth_password_hash = match env_optional_string("MAPANIMA_AUTH_PASSWORD_HASH") {
            Some(hash) => hash,
            None => {
                let plain = env_optional_string("MAPANIMA_AUTH_PASSWORD").context(
                    "MAPANIMA_AUTH_PASSWORD_HASH or MAPANIMA_AUTH_PASSWORD must be set",
                )?;
                crate::auth::hash_password(&plain)?
            }
        };

        let enable_catalog_refresh = env_bool("MAPANIMA_ENABLE_CATALOG_REFRESH", true);
        let catalog_refresh_interval_seconds =
            clamp_refresh_interval(env_u64("MAPANIMA_CATALOG_REFRESH_INTERVAL_SECONDS", 3600));
        let session_ttl_hours = env_i64("MAPANIMA_SESSION_TTL_HOURS", 24).clamp(1, 24 * 30);
        let static_root = cli_static_root.or_else(|| env_optional_path("MAPANIMA_STATIC_ROOT"));
        let max_upload_bytes = env_u64(
            "MAPANIMA_MAX_UPLOAD_BYTES",
            DEFAULT_MAX_UPLOAD_BYTES as u64,
        )
        .max(1024) as usize;
        let default_simplify_tolerance = clamp_tolerance(env_f64(
            "MAPANIMA_DEFAULT_SIMPLIFY_TOLERANCE",
            DEFAULT_SIMPLIFY_TOLERANCE,
        ));

        let mut config = Self {
            catalog_url,
            catalog_path,
            enable_catalog_refresh,
            catalog_refresh_interval_seconds,
            auth_username,
            auth_password_hash,
            session_ttl_hours,
            static_root,
            max_upload_bytes,
            default_simplify_tolerance,
        };

        if let Some(overrides) = overrides.as_ref() {
            apply_overrides(&mut config, overrides);
        }

        if config.catalog_url.is_none() && config.catalog_path.is_none() {
            anyhow::bail!(
                "MAPANIMA_CATALOG_URL or MAPANIMA_CATALOG_PATH must point at the territory archive"
            );
        }

        Ok(config)
    }
}

fn env_optional_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_bool(key: &str, default: bool) -> bool {
    match std::env::var(key)
        .ok()
        .map(|value| value.trim().to_lowercase())
    {
        Some(value) if value == "1" || value == "true" || value == "yes" => true,
        Some(value) if value == "0" || value == "false" || value == "no" => false,
        _ => default,
    }
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

fn env_i64(key: &str, default: i64) -> i64 {
    std::env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<i64>().ok())
        .unwrap_or(default)
}

fn env_f64(key: &str, default: f64) -> f64 {
    std::env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<f64>().ok())
        .unwrap_or(default)
}

fn env_optional_path(key: &str) -> Option<PathBuf> {
    env_optional_string(key).map(PathBuf::from)
}
