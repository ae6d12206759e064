//! Configuration types.

use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;
use crate::retry::{Backoff, RetryPolicy};

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Deadline for each conversational step.
    pub step_timeout: Duration,
    /// Interval between inbox polls.
    pub poll_interval: Duration,
    /// Maximum number of inbox polls before giving up.
    pub poll_budget: u32,
    /// Navigation timeout handed to the browser.
    pub browser_timeout: Duration,
    /// Maximum organization candidates presented to the user.
    pub max_candidates: usize,
    /// Country passed to organization search.
    pub org_country: String,
    /// Organization categories searched, results merged in this order.
    pub org_types: Vec<String>,
    /// Link prefix used for full-link extraction from emails.
    pub service_url: String,
    /// Case-insensitive sender marker for verification emails.
    pub sender_marker: String,
    /// Case-insensitive subject marker for verification emails.
    pub subject_marker: String,
    /// Retry policy for notifications and mailbox polling.
    pub retry: RetryPolicy,
    /// Optional chat that receives admin log notices.
    pub admin_chat: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            step_timeout: Duration::from_secs(300), // 5 minutes
            poll_interval: Duration::from_secs(10),
            poll_budget: 30,
            browser_timeout: Duration::from_secs(30),
            max_candidates: 20,
            org_country: "US".to_string(),
            org_types: vec!["K12".to_string(), "HIGH_SCHOOL".to_string()],
            service_url: "https://services.sheerid.com/verify/".to_string(),
            sender_marker: "sheerid".to_string(),
            subject_marker: "verif".to_string(),
            retry: RetryPolicy::default(),
            admin_chat: None,
        }
    }
}

impl EngineConfig {
    /// Build config from environment variables. Unset keys take defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let step_timeout = parse_or(&lookup, "VERIFY_STEP_TIMEOUT_SECS", 300u64)?;
        let poll_interval = parse_or(&lookup, "VERIFY_POLL_INTERVAL_SECS", 10u64)?;
        let poll_budget = parse_or(&lookup, "VERIFY_POLL_BUDGET", defaults.poll_budget)?;
        let browser_timeout = parse_or(&lookup, "VERIFY_BROWSER_TIMEOUT_SECS", 30u64)?;
        let max_candidates = parse_or(&lookup, "VERIFY_MAX_CANDIDATES", defaults.max_candidates)?;
        let retry_attempts = parse_or(&lookup, "VERIFY_RETRY_ATTEMPTS", 3u32)?;
        let retry_delay_ms = parse_or(&lookup, "VERIFY_RETRY_DELAY_MS", 500u64)?;

        if poll_budget == 0 {
            return Err(ConfigError::InvalidValue {
                key: "VERIFY_POLL_BUDGET".into(),
                message: "must be at least 1".into(),
            });
        }
        if retry_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                key: "VERIFY_RETRY_ATTEMPTS".into(),
                message: "must be at least 1".into(),
            });
        }

        let org_types = lookup("VERIFY_ORG_TYPES")
            .map(|raw| {
                raw.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect::<Vec<_>>()
            })
            .filter(|types| !types.is_empty())
            .unwrap_or(defaults.org_types);

        Ok(Self {
            step_timeout: Duration::from_secs(step_timeout),
            poll_interval: Duration::from_secs(poll_interval),
            poll_budget,
            browser_timeout: Duration::from_secs(browser_timeout),
            max_candidates,
            org_country: lookup("VERIFY_ORG_COUNTRY").unwrap_or(defaults.org_country),
            org_types,
            service_url: lookup("VERIFY_SERVICE_URL").unwrap_or(defaults.service_url),
            sender_marker: lookup("VERIFY_SENDER_MARKER").unwrap_or(defaults.sender_marker),
            subject_marker: lookup("VERIFY_SUBJECT_MARKER").unwrap_or(defaults.subject_marker),
            retry: RetryPolicy {
                max_attempts: retry_attempts,
                base_delay: Duration::from_millis(retry_delay_ms),
                backoff: Backoff::Exponential,
                jitter: Duration::from_millis(retry_delay_ms / 4),
            },
            admin_chat: lookup("VERIFY_ADMIN_CHAT").filter(|s| !s.trim().is_empty()),
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        }),
    }
}
