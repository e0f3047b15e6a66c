use http::Uri;
use std::env;
use thiserror::Error;

pub const DEFAULT_BASE_URL: &str = "http://localhost:8000";

const BASE_URL_VAR: &str = "EVENT_RELAY_BASE_URL";
const ENABLED_VAR: &str = "EVENT_RELAY_ENABLED";

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("base_url is required")]
    BaseUrlMissing,
    #[error("invalid base_url {url:?}: {source}")]
    BaseUrlInvalid {
        url: String,
        source: http::uri::InvalidUri,
    },
    #[error("base_url {0:?} must be an absolute http or https URL")]
    BaseUrlNotHttp(String),
    #[error("{var} must be true or false, got {value:?}")]
    InvalidFlag { var: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub base_url: String,
    pub enabled: bool,
    pub user_agent: String,
    #[doc(hidden)]
    pub __non_exhaustive: (),
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_owned(),
            enabled: true,
            user_agent: concat!("event-relay/", env!("CARGO_PKG_VERSION")).to_owned(),
            __non_exhaustive: (),
        }
    }
}

impl Config {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.to_owned(),
            ..Self::default()
        }
    }

    /// Reads `EVENT_RELAY_BASE_URL` and `EVENT_RELAY_ENABLED`, falling back
    /// to the defaults for unset variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Ok(base_url) = env::var(BASE_URL_VAR) {
            config.base_url = base_url;
        }
        if let Ok(value) = env::var(ENABLED_VAR) {
            config.enabled = parse_flag(ENABLED_VAR, &value)?;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn start(&self) -> Result<crate::EventRelay, ConfigError> {
        crate::EventRelay::from_config(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.base_url.is_empty() {
            return Err(ConfigError::BaseUrlMissing);
        }
        let uri = self
            .base_url
            .parse::<Uri>()
            .map_err(|source| ConfigError::BaseUrlInvalid {
                url: self.base_url.clone(),
                source,
            })?;
        let is_http = matches!(uri.scheme_str(), Some("http") | Some("https"));
        if !is_http || uri.authority().is_none() {
            return Err(ConfigError::BaseUrlNotHttp(self.base_url.clone()));
        }
        Ok(())
    }

    /// The full URL events are posted to.
    pub fn events_url(&self) -> String {
        format!("{}/events", self.base_url.trim_end_matches('/'))
    }

    pub fn with_base_url(self, base_url: &str) -> Self {
        Self {
            base_url: base_url.to_owned(),
            ..self
        }
    }

    pub fn with_enabled(self, enabled: bool) -> Self {
        Self { enabled, ..self }
    }

    pub fn with_user_agent(self, user_agent: &str) -> Self {
        Self {
            user_agent: user_agent.to_owned(),
            ..self
        }
    }
}

fn parse_flag(var: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidFlag {
            var,
            value: value.to_owned(),
        }),
    }
}
