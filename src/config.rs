//! Provider configuration block.
//!
//! Every setting may be given in configuration. The refresh token and region
//! fall back to `SQUADCAST_REFRESH_TOKEN` and `SQUADCAST_REGION` when left unset.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::codec;
use crate::error::ProviderError;
use crate::schema::{Attribute, Schema, Validator};

/// Environment variable holding the refresh token.
pub const REFRESH_TOKEN_ENV: &str = "SQUADCAST_REFRESH_TOKEN";

/// Environment variable holding the region.
pub const REGION_ENV: &str = "SQUADCAST_REGION";

/// Default HTTP request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECONDS: i64 = 30;

const MAX_TIMEOUT_SECONDS: i64 = 300;

/// Squadcast deployment the provider talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Region {
    /// squadcast.com
    #[default]
    Us,
    /// eu.squadcast.com
    Eu,
    /// squadcast.xyz
    Internal,
    /// squadcast.tech
    Staging,
    /// A locally running stack.
    Dev,
}

impl Region {
    /// Accepted region names.
    pub const NAMES: [&'static str; 5] = ["us", "eu", "internal", "staging", "dev"];

    /// The platform host for this region.
    pub fn host(self) -> &'static str {
        match self {
            Self::Us => "squadcast.com",
            Self::Eu => "eu.squadcast.com",
            Self::Internal => "squadcast.xyz",
            Self::Staging => "squadcast.tech",
            Self::Dev => "localhost",
        }
    }

    /// Base URL of the authentication service.
    pub fn auth_base_url(self) -> String {
        match self {
            Self::Dev => "http://localhost:8081".to_string(),
            _ => format!("https://auth.{}", self.host()),
        }
    }

    /// Base URL of the platform API.
    pub fn api_base_url(self) -> String {
        match self {
            Self::Dev => "http://localhost:8081".to_string(),
            _ => format!("https://api.{}", self.host()),
        }
    }
}

impl FromStr for Region {
    type Err = ProviderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "us" => Ok(Self::Us),
            "eu" => Ok(Self::Eu),
            "internal" => Ok(Self::Internal),
            "staging" => Ok(Self::Staging),
            "dev" => Ok(Self::Dev),
            other => Err(ProviderError::Configuration(format!(
                "unknown region '{}', expected one of {}",
                other,
                Self::NAMES.join(", ")
            ))),
        }
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Us => "us",
            Self::Eu => "eu",
            Self::Internal => "internal",
            Self::Staging => "staging",
            Self::Dev => "dev",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Default, Deserialize)]
struct RawConfig {
    refresh_token: Option<String>,
    region: Option<String>,
    endpoint: Option<String>,
    timeout_seconds: Option<i64>,
}

/// Resolved provider settings.
#[derive(Clone, PartialEq)]
pub struct ProviderConfig {
    /// Token exchanged for a short-lived access token on configure.
    pub refresh_token: String,
    /// Deployment region.
    pub region: Region,
    /// Base URL used for both auth and API calls instead of the region hosts.
    pub endpoint: Option<String>,
    /// HTTP request timeout.
    pub timeout: Duration,
}

impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("refresh_token", &"<redacted>")
            .field("region", &self.region)
            .field("endpoint", &self.endpoint)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl ProviderConfig {
    /// Schema of the provider configuration block.
    pub fn schema() -> Schema {
        Schema::v0()
            .with_description("Squadcast provider settings.")
            .with_attribute(
                "refresh_token",
                Attribute::optional_string()
                    .sensitive()
                    .with_description(format!(
                        "Squadcast refresh token. Falls back to {}.",
                        REFRESH_TOKEN_ENV
                    )),
            )
            .with_attribute(
                "region",
                Attribute::optional_string()
                    .one_of(&Region::NAMES)
                    .with_description(format!(
                        "Squadcast region (us, eu, internal, staging, dev). \
                         Falls back to {}, then us.",
                        REGION_ENV
                    )),
            )
            .with_attribute(
                "endpoint",
                Attribute::optional_string()
                    .with_description("Base URL overriding both the auth and API hosts."),
            )
            .with_attribute(
                "timeout_seconds",
                Attribute::optional_int64()
                    .with_default(json!(DEFAULT_TIMEOUT_SECONDS))
                    .with_validator(Validator::IntBetween(1, MAX_TIMEOUT_SECONDS))
                    .with_description("HTTP request timeout in seconds."),
            )
    }

    /// Resolve settings from configuration and the process environment.
    pub fn from_value(value: &Value) -> Result<Self, ProviderError> {
        Self::resolve(value, |key| std::env::var(key).ok())
    }

    /// Resolve settings from configuration, looking up fallbacks with `env`.
    pub fn resolve<F>(value: &Value, env: F) -> Result<Self, ProviderError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let raw: RawConfig = codec::decode(&Self::schema().block, value)?;
        let non_empty = |v: Option<String>| v.filter(|s| !s.trim().is_empty());

        let refresh_token = non_empty(raw.refresh_token)
            .or_else(|| non_empty(env(REFRESH_TOKEN_ENV)))
            .ok_or_else(|| {
                ProviderError::Configuration(format!(
                    "refresh_token must be set in configuration or through {}",
                    REFRESH_TOKEN_ENV
                ))
            })?;

        let region = match non_empty(raw.region).or_else(|| non_empty(env(REGION_ENV))) {
            Some(name) => name.parse()?,
            None => Region::default(),
        };

        let seconds = raw.timeout_seconds.unwrap_or(DEFAULT_TIMEOUT_SECONDS);
        if !(1..=MAX_TIMEOUT_SECONDS).contains(&seconds) {
            return Err(ProviderError::Configuration(format!(
                "timeout_seconds must be between 1 and {}, got {}",
                MAX_TIMEOUT_SECONDS, seconds
            )));
        }

        Ok(Self {
            refresh_token,
            region,
            endpoint: non_empty(raw.endpoint).map(|e| e.trim_end_matches('/').to_string()),
            timeout: Duration::from_secs(seconds as u64),
        })
    }

    /// Base URL of the authentication service.
    pub fn auth_base_url(&self) -> String {
        self.endpoint
            .clone()
            .unwrap_or_else(|| self.region.auth_base_url())
    }

    /// Base URL of the platform API.
    pub fn api_base_url(&self) -> String {
        self.endpoint
            .clone()
            .unwrap_or_else(|| self.region.api_base_url())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_region_hosts() {
        assert_eq!(Region::Us.api_base_url(), "https://api.squadcast.com");
        assert_eq!(Region::Eu.auth_base_url(), "https://auth.eu.squadcast.com");
        assert_eq!(Region::Internal.host(), "squadcast.xyz");
        assert_eq!(Region::Staging.host(), "squadcast.tech");
        assert_eq!(Region::Dev.host(), "localhost");
        assert_eq!("EU".parse::<Region>().unwrap(), Region::Eu);
        assert!("mars".parse::<Region>().is_err());
        assert_eq!(Region::Staging.to_string(), "staging");
    }

    #[test]
    fn test_resolve_from_configuration() {
        let config = ProviderConfig::resolve(
            &json!({"refresh_token": "rt", "region": "eu", "timeout_seconds": "10"}),
            env_of(&[]),
        )
        .unwrap();

        assert_eq!(config.refresh_token, "rt");
        assert_eq!(config.region, Region::Eu);
        assert_eq!(config.timeout, Duration::from_secs(10));
        assert_eq!(config.api_base_url(), "https://api.eu.squadcast.com");
    }

    #[test]
    fn test_resolve_falls_back_to_environment() {
        let config = ProviderConfig::resolve(
            &json!({}),
            env_of(&[(REFRESH_TOKEN_ENV, "from-env"), (REGION_ENV, "staging")]),
        )
        .unwrap();

        assert_eq!(config.refresh_token, "from-env");
        assert_eq!(config.region, Region::Staging);
        assert_eq!(config.timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_configuration_wins_over_environment() {
        let config = ProviderConfig::resolve(
            &json!({"refresh_token": "explicit"}),
            env_of(&[(REFRESH_TOKEN_ENV, "from-env")]),
        )
        .unwrap();
        assert_eq!(config.refresh_token, "explicit");
        assert_eq!(config.region, Region::Us);
    }

    #[test]
    fn test_missing_refresh_token() {
        let err = ProviderConfig::resolve(&json!({"refresh_token": ""}), env_of(&[])).unwrap_err();
        assert!(matches!(err, ProviderError::Configuration(_)));
        assert!(err.to_string().contains(REFRESH_TOKEN_ENV));
    }

    #[test]
    fn test_invalid_timeout_and_region() {
        let err = ProviderConfig::resolve(
            &json!({"refresh_token": "rt", "timeout_seconds": 0}),
            env_of(&[]),
        )
        .unwrap_err();
        assert!(err.to_string().contains("timeout_seconds"));

        let err =
            ProviderConfig::resolve(&json!({"refresh_token": "rt", "region": "moon"}), env_of(&[]))
                .unwrap_err();
        assert!(err.to_string().contains("unknown region"));
    }

    #[test]
    fn test_endpoint_overrides_both_hosts() {
        let config = ProviderConfig::resolve(
            &json!({"refresh_token": "rt", "endpoint": "http://127.0.0.1:9000/"}),
            env_of(&[]),
        )
        .unwrap();
        assert_eq!(config.auth_base_url(), "http://127.0.0.1:9000");
        assert_eq!(config.api_base_url(), "http://127.0.0.1:9000");
    }

    #[test]
    fn test_debug_redacts_token() {
        let config =
            ProviderConfig::resolve(&json!({"refresh_token": "secret"}), env_of(&[])).unwrap();
        let debug = format!("{:?}", config);
        assert!(!debug.contains("secret"));
        assert!(debug.contains("redacted"));
    }
}
