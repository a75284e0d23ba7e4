// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::error::ConfigError;
use crate::packet::Tags;
use std::env;
use std::time::Duration;

/// Number of events buffered for the delivery worker before new ones are dropped.
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Configuration for a [`crate::Client`]
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Connection string; `None` or empty means events go nowhere
    pub dsn: Option<String>,
    /// Tags added to every event
    pub tags: Tags,
    pub release: Option<String>,
    pub environment: Option<String>,
    /// Fraction of events to keep, in `[0, 1]`
    pub sample_rate: f32,
    pub queue_capacity: usize,
    /// Timeout for a single delivery request
    pub http_timeout: Duration,
    /// HTTPS proxy URL
    pub https_proxy: Option<String>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            dsn: None,
            tags: Tags::new(),
            release: None,
            environment: None,
            sample_rate: 1.0,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            http_timeout: DEFAULT_HTTP_TIMEOUT,
            https_proxy: None,
        }
    }
}

impl ClientOptions {
    /// Create options from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let dsn = non_empty_var("SENTRY_DSN");
        let release = non_empty_var("SENTRY_RELEASE");
        let environment = non_empty_var("SENTRY_ENVIRONMENT");
        let sample_rate = match non_empty_var("REPORTER_SAMPLE_RATE") {
            Some(raw) => raw
                .parse::<f32>()
                .map_err(|_| ConfigError::UnparsableSampleRate(raw.clone()))?,
            None => 1.0,
        };
        let queue_capacity = non_empty_var("REPORTER_QUEUE_CAPACITY")
            .and_then(|val| val.parse::<usize>().ok())
            .unwrap_or(DEFAULT_QUEUE_CAPACITY);
        let http_timeout = non_empty_var("REPORTER_HTTP_TIMEOUT_SECS")
            .and_then(|val| val.parse::<u64>().ok())
            .map_or(DEFAULT_HTTP_TIMEOUT, Duration::from_secs);
        let https_proxy = non_empty_var("HTTPS_PROXY");

        let options = Self {
            dsn,
            tags: Tags::new(),
            release,
            environment,
            sample_rate,
            queue_capacity,
            http_timeout,
            https_proxy,
        };

        options.validate()?;
        Ok(options)
    }

    /// Validate the options
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_sample_rate(self.sample_rate)?;
        if self.queue_capacity == 0 {
            return Err(ConfigError::InvalidQueueCapacity);
        }
        Ok(())
    }
}

pub(crate) fn validate_sample_rate(rate: f32) -> Result<(), ConfigError> {
    if (0.0..=1.0).contains(&rate) {
        Ok(())
    } else {
        Err(ConfigError::InvalidSampleRate(rate))
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|val| !val.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const VARS: [&str; 7] = [
        "SENTRY_DSN",
        "SENTRY_RELEASE",
        "SENTRY_ENVIRONMENT",
        "REPORTER_SAMPLE_RATE",
        "REPORTER_QUEUE_CAPACITY",
        "REPORTER_HTTP_TIMEOUT_SECS",
        "HTTPS_PROXY",
    ];

    fn clear_env() {
        for var in VARS {
            env::remove_var(var);
        }
    }

    #[test]
    fn test_default_options_are_valid() {
        let options = ClientOptions::default();
        assert!(options.validate().is_ok());
        assert_eq!(options.sample_rate, 1.0);
        assert_eq!(options.queue_capacity, DEFAULT_QUEUE_CAPACITY);
    }

    #[test]
    fn test_validate_sample_rate() {
        for rate in [0.0, 0.5, 1.0] {
            assert!(validate_sample_rate(rate).is_ok());
        }
        for rate in [-0.1, 1.1, f32::NAN] {
            assert!(validate_sample_rate(rate).is_err());
        }
    }

    #[test]
    fn test_validate_queue_capacity() {
        let options = ClientOptions {
            queue_capacity: 0,
            ..Default::default()
        };
        assert!(matches!(
            options.validate(),
            Err(ConfigError::InvalidQueueCapacity)
        ));
    }

    #[test]
    #[serial]
    fn test_from_env() {
        clear_env();
        env::set_var("SENTRY_DSN", "https://public@sentry.example.com/1");
        env::set_var("SENTRY_RELEASE", "v1.2.3");
        env::set_var("SENTRY_ENVIRONMENT", "staging");
        env::set_var("REPORTER_SAMPLE_RATE", "0.25");
        env::set_var("REPORTER_QUEUE_CAPACITY", "10");
        env::set_var("REPORTER_HTTP_TIMEOUT_SECS", "3");

        let options = ClientOptions::from_env().expect("valid environment");
        assert_eq!(
            options.dsn.as_deref(),
            Some("https://public@sentry.example.com/1")
        );
        assert_eq!(options.release.as_deref(), Some("v1.2.3"));
        assert_eq!(options.environment.as_deref(), Some("staging"));
        assert_eq!(options.sample_rate, 0.25);
        assert_eq!(options.queue_capacity, 10);
        assert_eq!(options.http_timeout, Duration::from_secs(3));
        clear_env();
    }

    #[test]
    #[serial]
    fn test_from_env_rejects_bad_sample_rate() {
        clear_env();
        env::set_var("REPORTER_SAMPLE_RATE", "2");
        assert!(matches!(
            ClientOptions::from_env(),
            Err(ConfigError::InvalidSampleRate(rate)) if rate == 2.0
        ));
        env::set_var("REPORTER_SAMPLE_RATE", "half");
        assert!(matches!(
            ClientOptions::from_env(),
            Err(ConfigError::UnparsableSampleRate(ref raw)) if raw == "half"
        ));
        clear_env();
    }

    #[test]
    #[serial]
    fn test_from_env_ignores_empty_values() {
        clear_env();
        env::set_var("SENTRY_DSN", "  ");
        let options = ClientOptions::from_env().expect("valid environment");
        assert_eq!(options.dsn, None);
        clear_env();
    }
}
