//! One configured channel definition, prepared for matching.

use crate::config::{ChannelConfig, ChannelRegex};
use crate::provider::ProviderDeps;
use crate::webhook::ClientTemplate;
use crate::ChannelError;
use dsps_types::{ChannelId, ConfigError, TemplateEnv, TemplateString};
use serde_json::json;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

pub(crate) struct ChannelAtom {
    regex: ChannelRegex,
    expire: Duration,
    pub(crate) webhook_templates: Vec<ClientTemplate>,
}

impl ChannelAtom {
    pub fn new(config: &ChannelConfig, deps: &ProviderDeps, validate: bool) -> Result<Self, ChannelError> {
        let regex = config
            .regex
            .clone()
            .ok_or_else(|| ConfigError::Missing("regex".into()))?;
        if validate {
            validate_templates(config, &regex)?;
        }

        let mut webhook_templates = Vec::with_capacity(config.webhooks.len());
        for (i, webhook) in config.webhooks.iter().enumerate() {
            let tpl = ClientTemplate::new(webhook, deps.telemetry.clone(), Arc::clone(&deps.sentry))
                .map_err(|source| ChannelError::WebhookSetup {
                    target: format!("webhooks[{i}]"),
                    source,
                })?;
            webhook_templates.push(tpl);
        }

        Ok(Self {
            regex,
            expire: config.expire,
            webhook_templates,
        })
    }

    pub fn is_match(&self, id: &ChannelId) -> bool {
        self.regex.is_match(id.as_str())
    }

    pub fn expire(&self) -> Duration {
        self.expire
    }

    /// `{"channel": {group: capture, ...}}`, or `None` when the id does not match.
    pub fn template_env_of(&self, id: &ChannelId) -> Option<TemplateEnv> {
        self.regex
            .named_matches(id.as_str())
            .map(|groups| json!({ "channel": groups }))
    }

    pub fn no_file_pressure(&self) -> usize {
        self.webhook_templates.iter().map(ClientTemplate::no_file_pressure).sum()
    }

    pub fn shutdown(&self) {
        for tpl in &self.webhook_templates {
            tpl.close();
        }
    }
}

impl fmt::Display for ChannelAtom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.regex, f)
    }
}

/// Every template must expand against an environment where each capture group is present.
fn validate_templates(config: &ChannelConfig, regex: &ChannelRegex) -> Result<(), ConfigError> {
    let mut templates: Vec<(String, &TemplateString)> = Vec::new();
    for (i, webhook) in config.webhooks.iter().enumerate() {
        if let Some(url) = &webhook.url {
            templates.push((format!("webhooks[{i}].url"), url));
        }
        for (name, tpl) in &webhook.headers {
            templates.push((format!("webhooks[{i}].headers.{name}"), tpl));
        }
    }

    let dummy: BTreeMap<&str, &str> = regex.group_names().map(|name| (name, "dummy")).collect();
    let env = json!({ "channel": dummy });
    for (path, tpl) in templates {
        tpl.execute(&env)
            .map_err(|e| ConfigError::Invalid(format!("invalid template found on {path}: {e}")))?;
    }
    Ok(())
}
