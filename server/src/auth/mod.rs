pub mod jwt;

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable, externally issued user identifier.
///
/// The server never interprets the value; it only compares and forwards it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Parse a handshake `userId` value. Absent, empty, and the literal
    /// string `"undefined"` all mean "no identity". Anything else is taken
    /// verbatim.
    pub fn from_handshake(raw: Option<&str>) -> Option<Self> {
        match raw {
            None | Some("") | Some("undefined") => None,
            Some(id) => Some(Self(id.to_string())),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for UserId {
    fn from(id: String) -> Self {
        Self(id)
    }
}
