//! JWT claim values the storages persist.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// `jti` claim: identifier of a JWT.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JwtJti(String);

impl JwtJti {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JwtJti {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// `exp` claim: seconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JwtExp(i64);

impl JwtExp {
    #[must_use]
    pub fn from_epoch_seconds(epoch: i64) -> Self {
        Self(epoch)
    }

    #[must_use]
    pub fn from_time(at: DateTime<Utc>) -> Self {
        Self(at.timestamp())
    }

    pub fn epoch_seconds(&self) -> i64 {
        self.0
    }

    pub fn to_time(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(self.0, 0)
            .single()
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Parse the decimal representation used on the wire.
    pub fn parse(raw: &str) -> Result<Self, std::num::ParseIntError> {
        raw.trim().parse::<i64>().map(Self)
    }
}

impl fmt::Display for JwtExp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
