use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::env;
use std::path::PathBuf;

/// Settings that must resolve to a non-empty value before the app can talk
/// to the upstream API. Reported by their environment variable names.
pub const REQUIRED_SETTINGS: [&str; 2] = ["SPOTIFY_CLIENT_ID", "SPOTIFY_CLIENT_SECRET"];

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    #[serde(default = "default_redirect_uri")]
    pub redirect_uri: String,
    #[serde(default = "default_scopes")]
    pub scopes: Vec<String>,

    // path to database file
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,

    // Sync behavior
    #[serde(default = "default_true")]
    pub sync_on_login: bool,
    #[serde(default)]
    pub enable_audio_analysis: bool,
    #[serde(default = "default_audio_analysis_limit")]
    pub audio_analysis_limit: usize,
    #[serde(default = "default_audio_analysis_sleep_ms")]
    pub audio_analysis_sleep_ms: u64,
    #[serde(default = "default_request_pacing_ms")]
    pub request_pacing_ms: u64,

    // Upstream retry policy
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,

    /// Optional upload of a database snapshot after each sync.
    #[serde(default)]
    pub backup: Option<BackupConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BackupConfig {
    /// Destination for an HTTP PUT of the snapshot (pre-signed object URL or WebDAV path).
    pub url: String,
    #[serde(default)]
    pub bearer_token: Option<String>,
    #[serde(default)]
    pub keep_local_snapshot: bool,
}

fn default_bind_addr() -> String { "127.0.0.1:5000".into() }
fn default_redirect_uri() -> String { "http://127.0.0.1:5000/authorize".into() }
fn default_true() -> bool { true }
fn default_audio_analysis_limit() -> usize { 100 }
fn default_audio_analysis_sleep_ms() -> u64 { 200 }
fn default_request_pacing_ms() -> u64 { 100 }
fn default_max_retries() -> u32 { 5 }
fn default_retry_base_delay_ms() -> u64 { 500 }
fn default_retry_max_delay_ms() -> u64 { 10_000 }

fn data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("musivault")
}

fn default_db_path() -> PathBuf { data_dir().join("spotify_data.db") }
fn default_log_dir() -> PathBuf { data_dir().join("logs") }

fn default_scopes() -> Vec<String> {
    vec![
        "playlist-read-private",
        "playlist-read-collaborative",
        "user-top-read",
        "user-follow-read",
        "user-library-read",
        "user-read-email",
        "user-read-private",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn truthy(v: &str) -> bool {
    matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            bind_addr: default_bind_addr(),
            redirect_uri: default_redirect_uri(),
            scopes: default_scopes(),
            db_path: default_db_path(),
            log_dir: default_log_dir(),
            sync_on_login: true,
            enable_audio_analysis: false,
            audio_analysis_limit: default_audio_analysis_limit(),
            audio_analysis_sleep_ms: default_audio_analysis_sleep_ms(),
            request_pacing_ms: default_request_pacing_ms(),
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
            backup: None,
        }
    }
}

impl Config {
    pub fn from_path(path: &std::path::Path) -> anyhow::Result<Self> {
        let s = std::fs::read_to_string(path)?;
        let mut cfg: Config = toml::from_str(&s)?;
        cfg.apply_env_overrides();
        Ok(cfg)
    }

    /// Defaults plus environment, for running without a config file.
    pub fn from_env() -> Self {
        let mut cfg = Config::default();
        cfg.apply_env_overrides();
        cfg
    }

    /// Non-empty environment variables take precedence over file values.
    pub fn apply_env_overrides(&mut self) {
        if let Some(v) = non_empty_env("SPOTIFY_CLIENT_ID") {
            self.client_id = v;
        }
        if let Some(v) = non_empty_env("SPOTIFY_CLIENT_SECRET") {
            self.client_secret = v;
        }
        if let Some(v) = non_empty_env("SPOTIFY_REDIRECT_URI") {
            self.redirect_uri = v;
        }
        if let Some(v) = non_empty_env("DATABASE_PATH") {
            self.db_path = PathBuf::from(v);
        }
        if let Some(v) = non_empty_env("ENABLE_AUDIO_ANALYSIS") {
            self.enable_audio_analysis = truthy(&v);
        }
        if let Some(n) = non_empty_env("AUDIO_ANALYSIS_LIMIT").and_then(|v| v.trim().parse().ok()) {
            self.audio_analysis_limit = n;
        }
        // seconds, fractional allowed
        if let Some(secs) = non_empty_env("AUDIO_ANALYSIS_SLEEP").and_then(|v| v.trim().parse::<f64>().ok()) {
            if secs >= 0.0 {
                self.audio_analysis_sleep_ms = (secs * 1000.0).round() as u64;
            }
        }
    }

    /// Fails with every missing required setting listed, not just the first.
    pub fn validate_required(&self) -> Result<()> {
        let mut missing = Vec::new();
        for key in REQUIRED_SETTINGS {
            let value = match key {
                "SPOTIFY_CLIENT_ID" => &self.client_id,
                _ => &self.client_secret,
            };
            if value.trim().is_empty() {
                missing.push(key);
            }
        }
        if missing.is_empty() {
            return Ok(());
        }
        Err(anyhow!(
            "Missing required settings: {}. Set them in the config file or environment before starting.",
            missing.join(", ")
        ))
    }

    pub fn auth_base() -> String {
        env::var("SPOTIFY_AUTH_BASE").unwrap_or_else(|_| "https://accounts.spotify.com".into())
    }

    pub fn api_base() -> String {
        // include v1 path by default
        env::var("SPOTIFY_API_BASE").unwrap_or_else(|_| "https://api.spotify.com/v1".into())
    }

    pub fn retry_config(&self) -> crate::retry::RetryConfig {
        crate::retry::RetryConfig {
            retries: self.max_retries,
            base_delay: std::time::Duration::from_millis(self.retry_base_delay_ms),
            max_delay: std::time::Duration::from_millis(self.retry_max_delay_ms),
            ..Default::default()
        }
    }
}
