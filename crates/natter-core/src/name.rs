//! Validated display names.

use crate::error::{DomainError, DomainResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Placeholder name clients use when the user supplies none.
pub const DEFAULT_NAME: &str = "Guest";

/// Longest accepted display name, in characters.
pub const MAX_NAME_LEN: usize = 32;

/// A participant's display name.
///
/// Names are the only addressing scheme in the chat, so a valid name must be
/// something `tell <user> <text>` can address: non-empty, a single
/// whitespace-free token, free of control characters, and at most
/// [`MAX_NAME_LEN`] characters long.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionName(String);

impl SessionName {
    /// Validates and wraps a raw name. Surrounding whitespace is trimmed.
    pub fn parse(raw: &str) -> DomainResult<Self> {
        let name = raw.trim();

        if name.is_empty() {
            return Err(DomainError::invalid_name(raw, "name must not be empty"));
        }
        if name.chars().any(char::is_whitespace) {
            return Err(DomainError::invalid_name(
                raw,
                "name must not contain whitespace",
            ));
        }
        if name.chars().any(char::is_control) {
            return Err(DomainError::invalid_name(
                raw,
                "name must not contain control characters",
            ));
        }
        if name.chars().count() > MAX_NAME_LEN {
            return Err(DomainError::invalid_name(
                raw,
                format!("name must be at most {MAX_NAME_LEN} characters"),
            ));
        }

        Ok(Self(name.to_string()))
    }

    /// Returns the underlying string reference.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consumes the name, returning the inner string.
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for SessionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for SessionName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl PartialEq<str> for SessionName {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl TryFrom<String> for SessionName {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<SessionName> for String {
    fn from(name: SessionName) -> Self {
        name.0
    }
}
