//! Environment-driven configuration, parsed once at startup and passed into
//! each component at construction.

use std::str::FromStr;

use chrono::Duration;

use crate::error::EngineError;

pub const DEFAULT_ALERT_THRESHOLD: f64 = 5.0;
pub const DEFAULT_CALCULATION_WINDOW: i64 = 100;
pub const DEFAULT_COOLDOWN_MINUTES: i64 = 60;

pub const DEFAULT_SMTP_HOST: &str = "smtp.gmail.com";
pub const DEFAULT_SMTP_PORT: u16 = 587;

/// Tuning for defect-rate evaluation and alert deduplication.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Defect percentage above which an alert fires (strict greater-than).
    pub alert_threshold: f64,
    /// Number of most recent inspections in the trailing window.
    pub window_size: i64,
    /// Minimum time between two alerts of the same kind.
    pub cooldown: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            alert_threshold: DEFAULT_ALERT_THRESHOLD,
            window_size: DEFAULT_CALCULATION_WINDOW,
            cooldown: Duration::minutes(DEFAULT_COOLDOWN_MINUTES),
        }
    }
}

impl EngineConfig {
    /// Reads `ALERT_THRESHOLD`, `CALCULATION_WINDOW`, and
    /// `ALERT_COOLDOWN_MINUTES`. Unset variables fall back to defaults;
    /// unparsable values are configuration errors, not silent fallbacks.
    pub fn from_env() -> Result<Self, EngineError> {
        let alert_threshold = parse_setting(
            "ALERT_THRESHOLD",
            std::env::var("ALERT_THRESHOLD").ok(),
            DEFAULT_ALERT_THRESHOLD,
        )?;
        let window_size = parse_setting(
            "CALCULATION_WINDOW",
            std::env::var("CALCULATION_WINDOW").ok(),
            DEFAULT_CALCULATION_WINDOW,
        )?;
        let cooldown_minutes = parse_setting(
            "ALERT_COOLDOWN_MINUTES",
            std::env::var("ALERT_COOLDOWN_MINUTES").ok(),
            DEFAULT_COOLDOWN_MINUTES,
        )?;

        if window_size <= 0 {
            return Err(EngineError::Configuration(
                "CALCULATION_WINDOW must be positive".to_string(),
            ));
        }
        if cooldown_minutes <= 0 {
            return Err(EngineError::Configuration(
                "ALERT_COOLDOWN_MINUTES must be positive".to_string(),
            ));
        }

        Ok(Self {
            alert_threshold,
            window_size,
            cooldown: Duration::minutes(cooldown_minutes),
        })
    }
}

/// SMTP transport settings plus the default alert recipient.
#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub from_email: String,
    /// Used when the caller supplies no recipients.
    pub default_recipient: String,
}

impl SmtpConfig {
    /// Reads `SMTP_HOST`, `SMTP_PORT`, `SMTP_USER`, `SMTP_PASS`,
    /// `FROM_EMAIL`, and `ALERT_EMAIL`. Missing credentials fail here, before
    /// any send is attempted.
    pub fn from_env() -> Result<Self, EngineError> {
        let host =
            std::env::var("SMTP_HOST").unwrap_or_else(|_| DEFAULT_SMTP_HOST.to_string());
        let port = parse_setting(
            "SMTP_PORT",
            std::env::var("SMTP_PORT").ok(),
            DEFAULT_SMTP_PORT,
        )?;
        let username = require_var("SMTP_USER")?;
        let password = require_var("SMTP_PASS")?;
        let from_email = require_var("FROM_EMAIL")?;
        let default_recipient =
            std::env::var("ALERT_EMAIL").unwrap_or_else(|_| from_email.clone());

        Ok(Self {
            host,
            port,
            username,
            password,
            from_email,
            default_recipient,
        })
    }
}

fn require_var(name: &str) -> Result<String, EngineError> {
    std::env::var(name)
        .map_err(|_| EngineError::Configuration(format!("{name} must be set")))
}

fn parse_setting<T>(name: &str, raw: Option<String>, default: T) -> Result<T, EngineError>
where
    T: FromStr,
{
    match raw {
        None => Ok(default),
        Some(value) => value.trim().parse().map_err(|_| {
            EngineError::Configuration(format!("{name} has invalid value {value:?}"))
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_settings_fall_back_to_defaults() {
        let threshold: f64 = parse_setting("ALERT_THRESHOLD", None, 5.0).unwrap();
        assert_eq!(threshold, 5.0);
        let window: i64 = parse_setting("CALCULATION_WINDOW", None, 100).unwrap();
        assert_eq!(window, 100);
    }

    #[test]
    fn set_settings_are_parsed() {
        let threshold: f64 =
            parse_setting("ALERT_THRESHOLD", Some("7.5".to_string()), 5.0).unwrap();
        assert_eq!(threshold, 7.5);
        let port: u16 = parse_setting("SMTP_PORT", Some("2525".to_string()), 587).unwrap();
        assert_eq!(port, 2525);
    }

    #[test]
    fn invalid_settings_are_configuration_errors() {
        let result: Result<i64, _> =
            parse_setting("CALCULATION_WINDOW", Some("lots".to_string()), 100);
        assert!(matches!(result, Err(EngineError::Configuration(_))));
    }

    #[test]
    fn default_config_matches_documented_values() {
        let config = EngineConfig::default();
        assert_eq!(config.alert_threshold, 5.0);
        assert_eq!(config.window_size, 100);
        assert_eq!(config.cooldown, Duration::minutes(60));
    }
}
