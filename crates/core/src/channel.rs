//! Notification channel names.

use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};
use crate::value_object::ValueObject;

/// Postgres truncates identifiers beyond `NAMEDATALEN - 1` bytes.
pub const MAX_CHANNEL_LEN: usize = 63;

/// Name of a publish/subscribe channel (e.g. `orders`).
///
/// The same name is used for the database `LISTEN` channel and for the
/// `channel` field clients see on every domain message.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ChannelName(String);

impl ChannelName {
    pub fn new(name: impl Into<String>) -> DomainResult<Self> {
        let name = name.into();
        let trimmed = name.trim();
        if trimmed.is_empty() {
            return Err(DomainError::validation("channel name must not be empty"));
        }
        if trimmed.len() > MAX_CHANNEL_LEN {
            return Err(DomainError::validation(format!(
                "channel name exceeds {MAX_CHANNEL_LEN} bytes"
            )));
        }
        if trimmed.chars().any(char::is_whitespace) {
            return Err(DomainError::validation(
                "channel name must not contain whitespace",
            ));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl ValueObject for ChannelName {}

impl core::fmt::Display for ChannelName {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ChannelName {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for ChannelName {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ChannelName> for String {
    fn from(value: ChannelName) -> Self {
        value.0
    }
}

impl AsRef<str> for ChannelName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
