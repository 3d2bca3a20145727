use std::{collections::HashMap, fs, path::Path, time::Duration};

use tracing::warn;

use crate::{
    http_source::DEFAULT_POSTS_PAGE_SIZE,
    retry::{RetryPolicy, DEFAULT_RETRY_MAX_ATTEMPTS},
};

pub const DEFAULT_SETTINGS_FILE: &str = "sync.toml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSettings {
    pub server_url: String,
    pub auth_token: Option<String>,
    pub posts_page_size: u32,
    pub request_timeout_secs: u64,
    pub retry_max_attempts: usize,
    pub retry_initial_delay_ms: u64,
    pub retry_max_delay_ms: u64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:8065".into(),
            auth_token: None,
            posts_page_size: DEFAULT_POSTS_PAGE_SIZE,
            request_timeout_secs: 30,
            retry_max_attempts: DEFAULT_RETRY_MAX_ATTEMPTS,
            retry_initial_delay_ms: 500,
            retry_max_delay_ms: 8_000,
        }
    }
}

impl SyncSettings {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry_max_attempts.max(1),
            initial_delay: Duration::from_millis(self.retry_initial_delay_ms),
            max_delay: Duration::from_millis(self.retry_max_delay_ms.max(self.retry_initial_delay_ms)),
        }
    }
}

/// Defaults, then `sync.toml` in the working directory, then the environment.
pub fn load_settings() -> SyncSettings {
    load_settings_from(Path::new(DEFAULT_SETTINGS_FILE), |key| std::env::var(key).ok())
}

pub fn load_settings_from(path: &Path, env: impl Fn(&str) -> Option<String>) -> SyncSettings {
    let mut settings = SyncSettings::default();

    if let Ok(raw) = fs::read_to_string(path) {
        apply_file_overrides(&mut settings, &raw);
    }
    apply_env_overrides(&mut settings, env);

    settings
}

fn apply_file_overrides(settings: &mut SyncSettings, raw: &str) {
    let file_cfg = match toml::from_str::<HashMap<String, toml::Value>>(raw) {
        Ok(file_cfg) => file_cfg,
        Err(err) => {
            warn!(error = %err, "config: ignoring unparsable settings file");
            return;
        }
    };

    let text = |key: &str| match file_cfg.get(key) {
        Some(toml::Value::String(v)) => Some(v.clone()),
        Some(toml::Value::Integer(v)) => Some(v.to_string()),
        _ => None,
    };

    if let Some(v) = text("server_url") {
        settings.server_url = v;
    }
    if let Some(v) = text("auth_token") {
        settings.auth_token = Some(v);
    }
    set_parsed(&mut settings.posts_page_size, text("posts_page_size"));
    set_parsed(&mut settings.request_timeout_secs, text("request_timeout_secs"));
    set_parsed(&mut settings.retry_max_attempts, text("retry_max_attempts"));
    set_parsed(&mut settings.retry_initial_delay_ms, text("retry_initial_delay_ms"));
    set_parsed(&mut settings.retry_max_delay_ms, text("retry_max_delay_ms"));
}

fn apply_env_overrides(settings: &mut SyncSettings, env: impl Fn(&str) -> Option<String>) {
    if let Some(v) = env("SYNC_SERVER_URL") {
        settings.server_url = v;
    }
    if let Some(v) = env("APP__SERVER_URL") {
        settings.server_url = v;
    }

    if let Some(v) = env("APP__AUTH_TOKEN") {
        settings.auth_token = Some(v);
    }

    set_parsed(&mut settings.posts_page_size, env("APP__POSTS_PAGE_SIZE"));
    set_parsed(&mut settings.request_timeout_secs, env("APP__REQUEST_TIMEOUT_SECS"));
    set_parsed(&mut settings.retry_max_attempts, env("APP__RETRY_MAX_ATTEMPTS"));
    set_parsed(&mut settings.retry_initial_delay_ms, env("APP__RETRY_INITIAL_DELAY_MS"));
    set_parsed(&mut settings.retry_max_delay_ms, env("APP__RETRY_MAX_DELAY_MS"));
}

fn set_parsed<T: std::str::FromStr>(slot: &mut T, raw: Option<String>) {
    if let Some(parsed) = raw.and_then(|v| v.trim().parse::<T>().ok()) {
        *slot = parsed;
    }
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
