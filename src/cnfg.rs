use std::str::FromStr;
use std::sync::Arc;

use dotenv::dotenv;
use once_cell::sync::Lazy;
use serde::Deserialize;
use url::Url;

#[derive(Debug, Deserialize, PartialEq, Eq, Clone, Default)]
#[serde(rename_all = "lowercase")]
pub enum AppEnv {
    #[default]
    Development,
    Production,
}

/// How the service manages the headless browser process.
#[derive(Debug, Deserialize, PartialEq, Eq, Clone, Copy, Default)]
#[serde(rename_all = "kebab-case")]
pub enum BrowserLifecycle {
    /// One browser launched at startup and reused by every request.
    #[default]
    Shared,
    /// A fresh browser per request, closed after the response.
    PerRequest,
}

impl FromStr for BrowserLifecycle {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "shared" => Ok(BrowserLifecycle::Shared),
            "per-request" => Ok(BrowserLifecycle::PerRequest),
            other => Err(format!("unknown browser lifecycle: {other}")),
        }
    }
}

#[derive(Debug, Deserialize, PartialEq, Eq, Clone)]
pub struct AppConfig {
    pub env: AppEnv,

    pub port: u16,
    pub allowed_origin: String,
    pub navigation_timeout_ms: u64,
    pub settle_delay_ms: u64,
    pub header_height_px: u32,
    pub lifecycle: BrowserLifecycle,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            env: AppEnv::default(),
            port: 5052,
            allowed_origin: "http://localhost:5173".to_string(),
            navigation_timeout_ms: 60_000,
            settle_delay_ms: 2_000,
            header_height_px: 80,
            lifecycle: BrowserLifecycle::default(),
        }
    }
}

static CONFIG: Lazy<Arc<AppConfig>> = Lazy::new(|| Arc::new(load_config()));

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => raw
            .parse()
            .unwrap_or_else(|_| panic!("Invalid {key} value: {raw}")),
        Err(_) => default,
    }
}

fn load_config() -> AppConfig {
    dotenv().ok();

    let defaults = AppConfig::default();

    let mut config = AppConfig {
        env: match std::env::var("APP_ENV").as_deref() {
            Ok("production") => AppEnv::Production,
            _ => AppEnv::Development,
        },
        port: env_or("PORT", defaults.port),
        allowed_origin: defaults.allowed_origin,
        navigation_timeout_ms: env_or("NAVIGATION_TIMEOUT_MS", defaults.navigation_timeout_ms),
        settle_delay_ms: env_or("SETTLE_DELAY_MS", defaults.settle_delay_ms),
        header_height_px: env_or("HEADER_HEIGHT_PX", defaults.header_height_px),
        lifecycle: env_or("BROWSER_LIFECYCLE", defaults.lifecycle),
    };

    if let Ok(origin) = std::env::var("ALLOWED_ORIGIN") {
        Url::parse(&origin).expect("Invalid ALLOWED_ORIGIN value");
        config.allowed_origin = origin;
    }

    config
}

pub fn get() -> Arc<AppConfig> {
    Arc::clone(&CONFIG)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_cover_every_option() {
        let config = AppConfig::default();
        assert_eq!(config.port, 5052);
        assert_eq!(config.allowed_origin, "http://localhost:5173");
        assert_eq!(config.navigation_timeout_ms, 60_000);
        assert_eq!(config.settle_delay_ms, 2_000);
        assert_eq!(config.header_height_px, 80);
        assert_eq!(config.lifecycle, BrowserLifecycle::Shared);
    }

    #[test]
    fn lifecycle_parses_recognized_values() {
        assert_eq!(
            "shared".parse::<BrowserLifecycle>(),
            Ok(BrowserLifecycle::Shared)
        );
        assert_eq!(
            "per-request".parse::<BrowserLifecycle>(),
            Ok(BrowserLifecycle::PerRequest)
        );
        assert!("pooled".parse::<BrowserLifecycle>().is_err());
    }
}
