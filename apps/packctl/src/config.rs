use std::{collections::HashMap, fs, path::Path, time::Duration};

use client_core::ConversionPolicy;
use serde::Deserialize;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Settings {
    pub api_url: String,
    pub poll_interval_ms: u64,
    pub poll_timeout_secs: u64,
    pub login_user: Option<String>,
    pub login_pass: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        let policy = ConversionPolicy::default();
        Self {
            api_url: "http://localhost:8080".into(),
            poll_interval_ms: policy.poll_interval.as_millis() as u64,
            poll_timeout_secs: policy.max_wait.as_secs(),
            login_user: None,
            login_pass: None,
        }
    }
}

impl Settings {
    pub fn conversion_policy(&self) -> ConversionPolicy {
        ConversionPolicy {
            poll_interval: Duration::from_millis(self.poll_interval_ms.max(1)),
            max_wait: Duration::from_secs(self.poll_timeout_secs),
            ..ConversionPolicy::default()
        }
    }
}

/// Defaults, then `config_path` when it exists, then the process environment.
pub fn load_settings(config_path: &Path) -> Settings {
    let mut settings = Settings::default();

    if let Ok(raw) = fs::read_to_string(config_path) {
        apply_file(&mut settings, &raw);
    }
    apply_env(&mut settings, |key| std::env::var(key).ok());

    settings
}

fn apply_file(settings: &mut Settings, raw: &str) {
    let file_cfg = match toml::from_str::<HashMap<String, String>>(raw) {
        Ok(file_cfg) => file_cfg,
        Err(error) => {
            warn!(%error, "config: ignoring unreadable config file");
            return;
        }
    };

    if let Some(v) = file_cfg.get("api_url") {
        settings.api_url = v.clone();
    }
    if let Some(v) = file_cfg.get("poll_interval_ms") {
        set_number(&mut settings.poll_interval_ms, "poll_interval_ms", v);
    }
    if let Some(v) = file_cfg.get("poll_timeout_secs") {
        set_number(&mut settings.poll_timeout_secs, "poll_timeout_secs", v);
    }
    if let Some(v) = file_cfg.get("login_user") {
        settings.login_user = Some(v.clone());
    }
    if let Some(v) = file_cfg.get("login_pass") {
        settings.login_pass = Some(v.clone());
    }
}

fn apply_env(settings: &mut Settings, var: impl Fn(&str) -> Option<String>) {
    if let Some(v) = var("API_URL") {
        settings.api_url = v;
    }
    if let Some(v) = var("APP__API_URL") {
        settings.api_url = v;
    }

    if let Some(v) = var("APP__POLL_INTERVAL_MS") {
        set_number(&mut settings.poll_interval_ms, "APP__POLL_INTERVAL_MS", &v);
    }
    if let Some(v) = var("APP__POLL_TIMEOUT_SECS") {
        set_number(&mut settings.poll_timeout_secs, "APP__POLL_TIMEOUT_SECS", &v);
    }

    if let Some(v) = var("LOGIN_USER") {
        settings.login_user = Some(v);
    }
    if let Some(v) = var("APP__LOGIN_USER") {
        settings.login_user = Some(v);
    }

    if let Some(v) = var("LOGIN_PASS") {
        settings.login_pass = Some(v);
    }
    if let Some(v) = var("APP__LOGIN_PASS") {
        settings.login_pass = Some(v);
    }
}

fn set_number(target: &mut u64, key: &str, raw: &str) {
    match raw.trim().parse::<u64>() {
        Ok(parsed) => *target = parsed,
        Err(_) => warn!(key, value = raw, "config: ignoring non-numeric value"),
    }
}
