//! Cache keys: the identity under which validity history is tracked.

use std::fmt;
use std::str::FromStr;

use sha2::{Digest, Sha256};

use crate::error::EstimationError;

/// Identifies an independently cached resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    /// Derive the key for a call to `method` carrying `request`.
    pub fn derive(scope: KeyScope, method: &str, request: &[u8]) -> Self {
        match scope {
            KeyScope::Method => Self(method.to_string()),
            KeyScope::MethodAndRequest => {
                Self(format!("{}#{:x}", method, Sha256::digest(request)))
            }
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for CacheKey {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for CacheKey {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// How finely calls are split into cache keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyScope {
    /// One key per gRPC method.
    #[default]
    Method,
    /// One key per method and distinct request payload.
    MethodAndRequest,
}

impl FromStr for KeyScope {
    type Err = EstimationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "method" => Ok(Self::Method),
            "method-and-request" | "request" => Ok(Self::MethodAndRequest),
            other => Err(EstimationError::Configuration(format!(
                "unknown key scope '{other}' (expected 'method' or 'method-and-request')"
            ))),
        }
    }
}
