//! Responder configuration from environment variables.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;
use crate::pipeline::composer::ReplyStyle;
use crate::pipeline::poller::PollerConfig;
use crate::pipeline::retry::RetryPolicy;
use crate::pipeline::rules::{RuleField, RulesEngine};

/// Poll loop, retry, storage and reply settings.
///
/// Mailbox and model settings live in `EmailConfig` and `LlmConfig`.
#[derive(Debug, Clone)]
pub struct ResponderConfig {
    pub poll_interval: Duration,
    pub max_concurrent: usize,
    pub retry: RetryPolicy,
    pub db_path: PathBuf,
    /// When set, ledger entries older than this are pruned at startup.
    pub ledger_keep_days: Option<u32>,
    pub reply_style: ReplyStyle,
    /// Extra sender regexes always treated as automated.
    pub automated_senders: Vec<String>,
    /// Sender regexes that bypass the rules and always reach the classifier.
    pub exempt_senders: Vec<String>,
    pub log_dir: Option<PathBuf>,
}

impl Default for ResponderConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(60),
            max_concurrent: 1,
            retry: RetryPolicy::default(),
            db_path: PathBuf::from("./data/inbox-responder.db"),
            ledger_keep_days: None,
            reply_style: ReplyStyle::default(),
            automated_senders: Vec::new(),
            exempt_senders: Vec::new(),
            log_dir: None,
        }
    }
}

impl ResponderConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Unset and blank values take defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let poll_secs: u64 = parse_or(&get, "INBOX_POLL_INTERVAL_SECS", 60)?;
        if poll_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "INBOX_POLL_INTERVAL_SECS".into(),
                message: "must be at least 1".into(),
            });
        }

        let max_concurrent: usize = parse_or(&get, "INBOX_MAX_CONCURRENT", 1)?;

        let retry = RetryPolicy {
            max_attempts: parse_or(&get, "INBOX_RETRY_MAX_ATTEMPTS", defaults.retry.max_attempts)?,
            base_delay: Duration::from_millis(parse_or(&get, "INBOX_RETRY_BASE_DELAY_MS", 500)?),
            max_delay: Duration::from_millis(parse_or(&get, "INBOX_RETRY_MAX_DELAY_MS", 10_000)?),
        };

        let db_path = get("INBOX_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.db_path);

        let ledger_keep_days = match get("INBOX_LEDGER_KEEP_DAYS") {
            Some(raw) => Some(parse_value("INBOX_LEDGER_KEEP_DAYS", &raw)?),
            None => None,
        };

        let reply_style = ReplyStyle {
            tone: get("INBOX_REPLY_TONE").unwrap_or(defaults.reply_style.tone),
            signature: get("INBOX_REPLY_SIGNATURE").map(|s| s.replace("\\n", "\n")),
        };

        let automated_senders = get("INBOX_AUTOMATED_SENDERS")
            .map(|raw| split_list(&raw))
            .unwrap_or_default();
        let exempt_senders = get("INBOX_EXEMPT_SENDERS")
            .map(|raw| split_list(&raw))
            .unwrap_or_default();

        Ok(Self {
            poll_interval: Duration::from_secs(poll_secs),
            max_concurrent: max_concurrent.max(1),
            retry,
            db_path,
            ledger_keep_days,
            reply_style,
            automated_senders,
            exempt_senders,
            log_dir: get("INBOX_LOG_DIR").map(PathBuf::from),
        })
    }

    pub fn poller_config(&self) -> PollerConfig {
        PollerConfig {
            interval: self.poll_interval,
            max_concurrent: self.max_concurrent,
            retry: self.retry,
        }
    }

    /// Default rules plus the self-address loop guard and configured extras.
    pub fn rules(&self, self_address: &str) -> Result<RulesEngine, ConfigError> {
        let mut rules = RulesEngine::default_rules().with_self_address(self_address);
        for pattern in &self.automated_senders {
            rules
                .add_rule(pattern, RuleField::Sender, "configured automated sender")
                .map_err(|e| ConfigError::InvalidValue {
                    key: "INBOX_AUTOMATED_SENDERS".into(),
                    message: format!("{pattern}: {e}"),
                })?;
        }
        for pattern in &self.exempt_senders {
            rules
                .add_exempt_sender(pattern)
                .map_err(|e| ConfigError::InvalidValue {
                    key: "INBOX_EXEMPT_SENDERS".into(),
                    message: format!("{pattern}: {e}"),
                })?;
        }
        Ok(rules)
    }
}

/// Comma-separated list, blanks dropped.
fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

fn parse_value<T>(key: &str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("{e}"),
    })
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => parse_value(key, &raw),
        None => Ok(default),
    }
}
