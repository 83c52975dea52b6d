use crate::error::ConfigError;
use crate::models::AuthType;
use serde::Deserialize;
use std::env;

/// Server configuration.
///
/// A flat table of named options with declared types, defaults, and parsers,
/// validated at construction.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Base URL used when building links in outbound emails.
    pub client_url: String,

    /// Operator email address to notify on internal errors. `None` disables
    /// error reports.
    pub report_errors: Option<String>,

    /// Anti-replay window for signed requests, in milliseconds.
    pub max_request_age: i64,

    /// Whether account creation requires a verified email token.
    pub verify_email_on_signup: bool,

    /// Authenticator types usable without prior registration. When a
    /// verification request matches no registered authenticator but names
    /// one of these types, an ad-hoc authenticator is created on the fly.
    pub default_auth_types: Vec<AuthType>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            client_url: "http://localhost:8080".to_string(),
            report_errors: None,
            max_request_age: 3_600_000,
            verify_email_on_signup: true,
            default_auth_types: vec![AuthType::Email],
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        Ok(Self {
            client_url: get_env("BV_CLIENT_URL", Some(&defaults.client_url))?,
            report_errors: env::var("BV_REPORT_ERRORS").ok().filter(|v| !v.is_empty()),
            max_request_age: get_env("BV_MAX_REQUEST_AGE", Some("3600000"))?
                .parse()
                .map_err(|e: std::num::ParseIntError| ConfigError::Invalid {
                    name: "BV_MAX_REQUEST_AGE",
                    reason: e.to_string(),
                })?,
            verify_email_on_signup: get_env("BV_VERIFY_EMAIL_ON_SIGNUP", Some("true"))?
                .parse()
                .map_err(|e: std::str::ParseBoolError| ConfigError::Invalid {
                    name: "BV_VERIFY_EMAIL_ON_SIGNUP",
                    reason: e.to_string(),
                })?,
            default_auth_types: parse_auth_types(&get_env("BV_DEFAULT_AUTH_TYPES", Some("email"))?)?,
        })
    }
}

fn get_env(name: &'static str, default: Option<&str>) -> Result<String, ConfigError> {
    match env::var(name) {
        Ok(val) if !val.is_empty() => Ok(val),
        _ => match default {
            Some(d) => Ok(d.to_string()),
            None => Err(ConfigError::Missing(name)),
        },
    }
}

fn parse_auth_types(raw: &str) -> Result<Vec<AuthType>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse().map_err(|e: String| ConfigError::Invalid {
                name: "BV_DEFAULT_AUTH_TYPES",
                reason: e,
            })
        })
        .collect()
}
