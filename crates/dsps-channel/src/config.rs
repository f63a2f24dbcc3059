//! Channel and outgoing-webhook configuration with defaults and validation.

use dsps_types::config::{count_must_be_positive, duration_must_be_positive};
use dsps_types::duration::duration_serde;
use dsps_types::{ConfigError, TemplateString};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// HTTP methods an outgoing webhook may use.
pub const VALID_WEBHOOK_METHODS: [&str; 2] = ["POST", "PUT"];

/// Ordered list of channel definitions. The first entries win on conflicts.
pub type ChannelsConfig = Vec<ChannelConfig>;

/// Regular expression matched against the whole channel id.
#[derive(Clone)]
pub struct ChannelRegex {
    source: String,
    anchored: regex::Regex,
}

impl ChannelRegex {
    pub fn new(source: impl Into<String>) -> Result<Self, ConfigError> {
        let source = source.into();
        let anchored = regex::Regex::new(&format!("^(?:{source})$"))
            .map_err(|e| ConfigError::Invalid(format!("invalid regex /{source}/: {e}")))?;
        Ok(Self { source, anchored })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn is_match(&self, value: &str) -> bool {
        self.anchored.is_match(value)
    }

    /// Named capture groups of a whole-string match, `None` when it does not match.
    pub fn named_matches(&self, value: &str) -> Option<BTreeMap<String, String>> {
        let captures = self.anchored.captures(value)?;
        Some(
            self.group_names()
                .filter_map(|name| captures.name(name).map(|m| (name.to_string(), m.as_str().to_string())))
                .collect(),
        )
    }

    pub fn group_names(&self) -> impl Iterator<Item = &str> {
        self.anchored.capture_names().flatten()
    }
}

impl fmt::Debug for ChannelRegex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}/", self.source)
    }
}

impl fmt::Display for ChannelRegex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl Serialize for ChannelRegex {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.source)
    }
}

impl<'de> Deserialize<'de> for ChannelRegex {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::new(raw).map_err(serde::de::Error::custom)
    }
}

/// One channel definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ChannelConfig {
    pub regex: Option<ChannelRegex>,
    /// Retention of messages and idle subscribers
    #[serde(with = "duration_serde")]
    pub expire: Duration,
    pub webhooks: Vec<OutgoingWebhookConfig>,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            regex: None,
            expire: Duration::from_secs(30 * 60),
            webhooks: Vec::new(),
        }
    }
}

impl ChannelConfig {
    /// The configuration used when no channel is configured: accept every id.
    pub fn accept_all() -> Result<Self, ConfigError> {
        Ok(Self {
            regex: Some(ChannelRegex::new(".+")?),
            ..Self::default()
        })
    }

    pub fn postprocess(&mut self) -> Result<(), ConfigError> {
        if self.regex.is_none() {
            return Err(ConfigError::Missing("regex".into()));
        }
        duration_must_be_positive("expire", self.expire)?;
        for (i, webhook) in self.webhooks.iter_mut().enumerate() {
            webhook.postprocess().map_err(|e| e.at(format!("webhooks[{i}]")))?;
        }
        Ok(())
    }
}

/// Apply defaults and validate a channel list.
pub fn postprocess_channels_config(list: &mut ChannelsConfig) -> Result<(), ConfigError> {
    if list.is_empty() {
        list.push(ChannelConfig::accept_all()?);
    }
    for (i, channel) in list.iter_mut().enumerate() {
        channel.postprocess().map_err(|e| e.at(format!("channels[{i}]")))?;
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct OutgoingWebhookConfig {
    pub method: String,
    pub url: Option<TemplateString>,
    #[serde(with = "duration_serde")]
    pub timeout: Duration,
    pub connection: OutgoingWebhookConnectionConfig,
    pub retry: OutgoingWebhookRetryConfig,
    pub headers: BTreeMap<String, TemplateString>,
    pub max_redirects: usize,
}

impl Default for OutgoingWebhookConfig {
    fn default() -> Self {
        Self {
            method: "POST".to_string(),
            url: None,
            timeout: Duration::from_secs(30),
            connection: OutgoingWebhookConnectionConfig::default(),
            retry: OutgoingWebhookRetryConfig::default(),
            headers: BTreeMap::new(),
            max_redirects: 10,
        }
    }
}

impl OutgoingWebhookConfig {
    pub fn postprocess(&mut self) -> Result<(), ConfigError> {
        self.method = self.method.trim().to_uppercase();
        if self.method.is_empty() {
            self.method = Self::default().method;
        }
        if !VALID_WEBHOOK_METHODS.contains(&self.method.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "\"{}\" is not valid outgoing-webhook HTTP method",
                self.method
            )));
        }
        if self.url.is_none() {
            return Err(ConfigError::Missing("url".into()));
        }
        duration_must_be_positive("timeout", self.timeout)?;
        self.retry.validate()?;
        self.connection.validate()?;
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct OutgoingWebhookConnectionConfig {
    pub max: usize,
    #[serde(with = "duration_serde")]
    pub max_idle_time: Duration,
}

impl Default for OutgoingWebhookConnectionConfig {
    fn default() -> Self {
        Self {
            max: 1024,
            max_idle_time: Duration::from_secs(3 * 60),
        }
    }
}

impl OutgoingWebhookConnectionConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        count_must_be_positive("connection.max", self.max)?;
        duration_must_be_positive("connection.maxIdleTime", self.max_idle_time)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct OutgoingWebhookRetryConfig {
    pub count: usize,
    #[serde(with = "duration_serde")]
    pub interval: Duration,
    pub interval_multiplier: f64,
    #[serde(with = "duration_serde")]
    pub interval_jitter: Duration,
}

impl Default for OutgoingWebhookRetryConfig {
    fn default() -> Self {
        Self {
            count: 3,
            interval: Duration::from_secs(3),
            interval_multiplier: 1.5,
            interval_jitter: Duration::from_millis(1500),
        }
    }
}

impl OutgoingWebhookRetryConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        count_must_be_positive("retry.count", self.count)?;
        duration_must_be_positive("retry.interval", self.interval)?;
        if !(self.interval_multiplier >= 1.0) {
            return Err(ConfigError::Invalid(
                "retry.intervalMultiplier must be equal to or larger than 1.0".into(),
            ));
        }
        duration_must_be_positive("retry.intervalJitter", self.interval_jitter)
    }
}
