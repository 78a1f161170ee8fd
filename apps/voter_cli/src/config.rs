use std::{fs, time::Duration};

use anyhow::Context;
use ballot_core::{controller::ControllerConfig, http_gateway::derive_events_url};
use serde::Deserialize;
use shared::domain::Address;
use url::Url;

const SETTINGS_FILE: &str = "voter.toml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Empty means no ledger endpoint is configured.
    pub ledger_url: String,
    pub events_url: Option<String>,
    pub operator_address: Option<String>,
    pub poll_interval_secs: u64,
    pub request_timeout_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            ledger_url: "http://127.0.0.1:8545".into(),
            events_url: None,
            operator_address: None,
            poll_interval_secs: 10,
            request_timeout_secs: 15,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct FileSettings {
    ledger_url: Option<String>,
    events_url: Option<String>,
    operator_address: Option<String>,
    poll_interval_secs: Option<u64>,
    request_timeout_secs: Option<u64>,
}

pub fn load_settings() -> Settings {
    let file = fs::read_to_string(SETTINGS_FILE).ok();
    load_settings_from(file.as_deref(), |key| std::env::var(key).ok())
}

/// Defaults, then the settings file, then the environment.
pub fn load_settings_from(file: Option<&str>, env: impl Fn(&str) -> Option<String>) -> Settings {
    let mut settings = Settings::default();

    if let Some(raw) = file {
        match toml::from_str::<FileSettings>(raw) {
            Ok(file_cfg) => {
                if let Some(v) = file_cfg.ledger_url {
                    settings.ledger_url = v;
                }
                if file_cfg.events_url.is_some() {
                    settings.events_url = file_cfg.events_url;
                }
                if file_cfg.operator_address.is_some() {
                    settings.operator_address = file_cfg.operator_address;
                }
                if let Some(v) = file_cfg.poll_interval_secs {
                    settings.poll_interval_secs = v;
                }
                if let Some(v) = file_cfg.request_timeout_secs {
                    settings.request_timeout_secs = v;
                }
            }
            Err(err) => tracing::warn!("ignoring malformed {SETTINGS_FILE}: {err}"),
        }
    }

    if let Some(v) = env("LEDGER_URL") {
        settings.ledger_url = v;
    }
    if let Some(v) = env("APP__LEDGER_URL") {
        settings.ledger_url = v;
    }

    if let Some(v) = env("LEDGER_EVENTS_URL") {
        settings.events_url = Some(v);
    }
    if let Some(v) = env("APP__EVENTS_URL") {
        settings.events_url = Some(v);
    }

    if let Some(v) = env("OPERATOR_ADDRESS") {
        settings.operator_address = Some(v);
    }
    if let Some(v) = env("APP__OPERATOR_ADDRESS") {
        settings.operator_address = Some(v);
    }

    if let Some(v) = env("APP__POLL_INTERVAL_SECS") {
        if let Ok(parsed) = v.parse::<u64>() {
            settings.poll_interval_secs = parsed;
        }
    }
    if let Some(v) = env("APP__REQUEST_TIMEOUT_SECS") {
        if let Ok(parsed) = v.parse::<u64>() {
            settings.request_timeout_secs = parsed;
        }
    }

    settings
}

impl Settings {
    pub fn has_ledger(&self) -> bool {
        !self.ledger_url.trim().is_empty()
    }

    /// Ledger REST url and the event socket url, derived when not set.
    pub fn ledger_urls(&self) -> anyhow::Result<(Url, Url)> {
        let ledger_url = Url::parse(self.ledger_url.trim())
            .with_context(|| format!("invalid ledger url '{}'", self.ledger_url))?;
        let events_url = match &self.events_url {
            Some(raw) => {
                Url::parse(raw.trim()).with_context(|| format!("invalid events url '{raw}'"))?
            }
            None => derive_events_url(&ledger_url)
                .with_context(|| format!("cannot derive events url from '{ledger_url}'"))?,
        };
        Ok((ledger_url, events_url))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    pub fn controller_config(&self) -> anyhow::Result<ControllerConfig> {
        let operator = self
            .operator_address
            .as_deref()
            .map(Address::parse)
            .transpose()
            .context("invalid operator address")?;
        Ok(ControllerConfig {
            poll_interval: Duration::from_secs(self.poll_interval_secs.max(1)),
            operator,
            ..ControllerConfig::default()
        })
    }
}
