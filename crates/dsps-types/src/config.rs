//! Configuration validation errors shared by the channel and storage configs.

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    /// Error inside a nested configuration element, e.g. `channels[0]`.
    #[error("error on {path}: {source}")]
    At {
        path: String,
        #[source]
        source: Box<ConfigError>,
    },

    #[error("{0} must be specified")]
    Missing(String),

    #[error("{name} must be larger than zero")]
    NotPositive { name: String },

    #[error("{0}")]
    Invalid(String),

    /// A required dependency was not supplied.
    #[error("invalid {owner}: {field} should not be empty")]
    MissingDependency { owner: &'static str, field: &'static str },
}

impl ConfigError {
    /// Wrap this error with the location of the element that produced it.
    pub fn at(self, path: impl Into<String>) -> Self {
        Self::At {
            path: path.into(),
            source: Box::new(self),
        }
    }
}

pub fn duration_must_be_positive(name: &str, value: Duration) -> Result<(), ConfigError> {
    if value.is_zero() {
        return Err(ConfigError::NotPositive { name: name.to_string() });
    }
    Ok(())
}

pub fn count_must_be_positive(name: &str, value: usize) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::NotPositive { name: name.to_string() });
    }
    Ok(())
}
