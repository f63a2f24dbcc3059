//! Minimal string templates used in channel configuration.
//!
//! Placeholders take the form `{{ .path.to.value }}` and are resolved against a JSON
//! object environment. A missing key is an error, never an empty string.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use thiserror::Error;

/// Template environment: a JSON object, e.g. `{"channel": {"id": "chat-1"}}`.
pub type TemplateEnv = serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error("unable to parse template \"{template}\": {reason}")]
    Parse { template: String, reason: String },
    #[error("template \"{template}\": no value for \"{path}\"")]
    MissingKey { template: String, path: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Path(Vec<String>),
}

/// Parsed template string. Displays as its source text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateString {
    source: String,
    segments: Vec<Segment>,
}

impl TemplateString {
    pub fn new(source: impl Into<String>) -> Result<Self, TemplateError> {
        let source = source.into();
        let parse_err = |reason: &str| TemplateError::Parse {
            template: source.clone(),
            reason: reason.to_string(),
        };

        let mut segments = Vec::new();
        let mut rest = source.as_str();
        while let Some(open) = rest.find("{{") {
            if open > 0 {
                segments.push(Segment::Literal(rest[..open].to_string()));
            }
            let after = &rest[open + 2..];
            let close = after.find("}}").ok_or_else(|| parse_err("unclosed action"))?;
            let expr = after[..close].trim();
            let path = expr
                .strip_prefix('.')
                .ok_or_else(|| parse_err("action must be a field path such as .channel.id"))?;
            let keys: Vec<String> = if path.is_empty() {
                Vec::new()
            } else {
                path.split('.').map(str::to_string).collect()
            };
            if keys.iter().any(|k| k.is_empty() || k.contains(char::is_whitespace)) {
                return Err(parse_err("malformed field path"));
            }
            segments.push(Segment::Path(keys));
            rest = &after[close + 2..];
        }
        if rest.contains("}}") {
            return Err(parse_err("unexpected \"}}\""));
        }
        if !rest.is_empty() {
            segments.push(Segment::Literal(rest.to_string()));
        }
        Ok(Self { source, segments })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Evaluate the template against `env`.
    pub fn execute(&self, env: &TemplateEnv) -> Result<String, TemplateError> {
        let mut out = String::with_capacity(self.source.len());
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Path(keys) => {
                    let mut value = env;
                    for key in keys {
                        value = value.get(key).ok_or_else(|| TemplateError::MissingKey {
                            template: self.source.clone(),
                            path: format!(".{}", keys.join(".")),
                        })?;
                    }
                    match value {
                        serde_json::Value::String(s) => out.push_str(s),
                        other => out.push_str(&other.to_string()),
                    }
                }
            }
        }
        Ok(out)
    }
}

impl fmt::Display for TemplateString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl Serialize for TemplateString {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.source)
    }
}

impl<'de> Deserialize<'de> for TemplateString {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::new(raw).map_err(serde::de::Error::custom)
    }
}
