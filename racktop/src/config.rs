//! Runtime settings: where the REST API lives, where the live channel lives,
//! and the timers that drive both.

use std::time::Duration;

use thiserror::Error;
use url::Url;

use crate::ws::{metrics_endpoint, ClientOptions, ReconnectPolicy, TransportError, DEFAULT_HEARTBEAT};

pub const DEFAULT_API_BASE: &str = "http://localhost:8000";
pub const API_BASE_ENV: &str = "RACKTOP_API_BASE_URL";
/// Poll period without a live channel; matches the backend's push period.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid URL `{value}`: {source}")]
    InvalidUrl {
        value: String,
        #[source]
        source: url::ParseError,
    },
    #[error("API base must be http or https, got `{0}`")]
    ApiScheme(String),
    #[error(transparent)]
    Endpoint(#[from] TransportError),
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub api_base: Url,
    pub ws_url: Url,
    pub live: bool,
    pub reconnect: ReconnectPolicy,
    pub heartbeat: Duration,
    pub poll_interval: Duration,
}

fn parse(value: &str) -> Result<Url, ConfigError> {
    Url::parse(value.trim()).map_err(|source| ConfigError::InvalidUrl {
        value: value.to_string(),
        source,
    })
}

impl Settings {
    /// `api_base` comes from the command line or a profile; when absent the
    /// environment and then the local default are used.
    pub fn resolve(api_base: Option<&str>, ws_url: Option<&str>) -> Result<Self, ConfigError> {
        let env = std::env::var(API_BASE_ENV).ok().filter(|v| !v.trim().is_empty());
        let base = api_base
            .map(str::to_owned)
            .or(env)
            .unwrap_or_else(|| DEFAULT_API_BASE.to_string());
        Self::from_parts(&base, ws_url)
    }

    /// Live endpoint defaults to `/ws/metrics` on the API origin.
    pub fn from_parts(api_base: &str, ws_url: Option<&str>) -> Result<Self, ConfigError> {
        let api_base = parse(api_base)?;
        if !matches!(api_base.scheme(), "http" | "https") {
            return Err(ConfigError::ApiScheme(api_base.scheme().to_string()));
        }
        let ws_url = match ws_url {
            Some(explicit) => {
                let url = parse(explicit)?;
                if !matches!(url.scheme(), "ws" | "wss") {
                    return Err(TransportError::UnsupportedScheme(url.scheme().to_string()).into());
                }
                url
            }
            None => metrics_endpoint(&api_base)?,
        };
        Ok(Self {
            api_base,
            ws_url,
            live: true,
            reconnect: ReconnectPolicy::default(),
            heartbeat: DEFAULT_HEARTBEAT,
            poll_interval: DEFAULT_POLL_INTERVAL,
        })
    }

    pub fn client_options(&self) -> ClientOptions {
        ClientOptions {
            url: self.ws_url.clone(),
            reconnect: self.reconnect,
            heartbeat: self.heartbeat,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn live_endpoint_is_derived_from_api_base() {
        let s = Settings::from_parts("https://metrics.example.com/", None).unwrap();
        assert_eq!(s.ws_url.as_str(), "wss://metrics.example.com/ws/metrics");
        assert!(s.live);
        assert_eq!(s.poll_interval, Duration::from_secs(5));
        assert_eq!(s.client_options().heartbeat, Duration::from_secs(30));
    }

    #[test]
    fn explicit_live_endpoint_is_kept() {
        let s = Settings::from_parts(DEFAULT_API_BASE, Some("ws://10.1.1.1:9000/custom")).unwrap();
        assert_eq!(s.ws_url.as_str(), "ws://10.1.1.1:9000/custom");
        assert_eq!(s.api_base.as_str(), "http://localhost:8000/");
    }

    #[test]
    fn bad_urls_are_rejected() {
        assert!(matches!(
            Settings::from_parts("not a url", None),
            Err(ConfigError::InvalidUrl { .. })
        ));
        assert!(matches!(
            Settings::from_parts("ws://host:8000", None),
            Err(ConfigError::ApiScheme(_))
        ));
        assert!(matches!(
            Settings::from_parts(DEFAULT_API_BASE, Some("http://host/ws/metrics")),
            Err(ConfigError::Endpoint(TransportError::UnsupportedScheme(_)))
        ));
    }

    #[test]
    fn command_line_beats_environment() {
        let s = Settings::resolve(Some("http://cli-host:1234"), None).unwrap();
        assert_eq!(s.api_base.host_str(), Some("cli-host"));
    }
}
