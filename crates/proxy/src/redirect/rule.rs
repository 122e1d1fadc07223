//! Redirect rule model and its stored form
//!
//! ```text
//! {
//!   "Hostname": "www.example.com",
//!   "Type": "REDIRECT",
//!   "Location": "example.com",
//!   "Status": "PERMANENT",
//!   "Rewrites": [{ "RegExp": "^/(.*)$", "Replace": "/$1", "Final": true }]
//! }
//! ```
//!
//! Unknown or mistyped `Type` and `Status` values fall back to their
//! defaults, and an unusable `RegExp` leaves the rewrite inert, so one bad
//! field never takes a whole site offline.

use std::fmt;

use http::StatusCode;
use mirage_common::MirageError;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use thiserror::Error;

use super::rewrite;
use crate::kv::Document;

/// Errors raised by a redirect rule
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RuleError {
    #[error("redirect for '{0}' has no location")]
    MissingLocation(String),

    #[error("malformed redirect rule: {0}")]
    Malformed(String),
}

impl From<RuleError> for MirageError {
    fn from(err: RuleError) -> Self {
        match err {
            RuleError::MissingLocation(_) => MirageError::InvalidArgument(err.to_string()),
            RuleError::Malformed(_) => MirageError::Decode(err.to_string()),
        }
    }
}

// ============================================================================
// Type and Status
// ============================================================================

/// How matching requests are handled
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum RedirectKind {
    /// Answer with a redirect response
    #[default]
    Redirect,
    /// Forward to the location
    Proxy,
}

impl RedirectKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Redirect => "REDIRECT",
            Self::Proxy => "PROXY",
        }
    }

    /// Decode a stored value; anything unrecognised is [`RedirectKind::Redirect`]
    pub fn from_value(value: &Value) -> Self {
        match value.as_str() {
            Some("PROXY") => Self::Proxy,
            _ => Self::Redirect,
        }
    }
}

/// Redirect permanence
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum RedirectStatus {
    #[default]
    Temporary,
    Permanent,
}

impl RedirectStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Temporary => "TEMPORARY",
            Self::Permanent => "PERMANENT",
        }
    }

    /// Decode a stored value; anything unrecognised is [`RedirectStatus::Temporary`]
    pub fn from_value(value: &Value) -> Self {
        match value.as_str() {
            Some("PERMANENT") => Self::Permanent,
            _ => Self::Temporary,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Temporary => StatusCode::FOUND,
            Self::Permanent => StatusCode::MOVED_PERMANENTLY,
        }
    }
}

macro_rules! lenient_string_enum {
    ($ty:ty) => {
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl Serialize for $ty {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(self.as_str())
            }
        }

        impl<'de> Deserialize<'de> for $ty {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let value = Value::deserialize(deserializer)?;
                Ok(Self::from_value(&value))
            }
        }
    };
}

lenient_string_enum!(RedirectKind);
lenient_string_enum!(RedirectStatus);

// ============================================================================
// Rewrites
// ============================================================================

/// Compiled rewrite pattern; `None` when absent or invalid
#[derive(Debug, Clone, Default)]
pub struct RewritePattern(Option<Regex>);

impl RewritePattern {
    /// Compile `pattern`, leaving the pattern inert if it does not compile
    pub fn new(pattern: &str) -> Self {
        Self(Regex::new(pattern).ok())
    }

    pub fn inert() -> Self {
        Self(None)
    }

    pub fn regex(&self) -> Option<&Regex> {
        self.0.as_ref()
    }

    pub fn is_inert(&self) -> bool {
        self.0.is_none()
    }
}

impl PartialEq for RewritePattern {
    fn eq(&self, other: &Self) -> bool {
        self.0.as_ref().map(Regex::as_str) == other.0.as_ref().map(Regex::as_str)
    }
}

impl Eq for RewritePattern {}

impl Serialize for RewritePattern {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match &self.0 {
            Some(regex) => serializer.serialize_str(regex.as_str()),
            None => serializer.serialize_none(),
        }
    }
}

impl<'de> Deserialize<'de> for RewritePattern {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Ok(value.as_str().map(Self::new).unwrap_or_default())
    }
}

/// One step of a rewrite chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rewrite {
    #[serde(rename = "RegExp", default, skip_serializing_if = "RewritePattern::is_inert")]
    pub pattern: RewritePattern,

    /// Replacement template with `$1`/`${name}` group references
    #[serde(rename = "Replace", default = "default_replacement")]
    pub replacement: String,

    /// Stop the chain after this rewrite matches
    #[serde(rename = "Final", default = "default_terminal")]
    pub terminal: bool,
}

impl Rewrite {
    pub fn new(pattern: &str, replacement: impl Into<String>, terminal: bool) -> Self {
        Self {
            pattern: RewritePattern::new(pattern),
            replacement: replacement.into(),
            terminal,
        }
    }
}

fn default_replacement() -> String {
    "$1".to_string()
}

fn default_terminal() -> bool {
    true
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<Rewrite>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<Rewrite>>::deserialize(deserializer)?.unwrap_or_default())
}

// ============================================================================
// Rule
// ============================================================================

/// What the dispatch layer should do with a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    Redirect { location: String, status: StatusCode },
    Proxy { location: String },
}

/// Redirect configuration for one hostname
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RedirectRule {
    #[serde(default)]
    pub hostname: String,

    #[serde(rename = "Type", default)]
    pub kind: RedirectKind,

    #[serde(default)]
    pub location: String,

    #[serde(default)]
    pub status: RedirectStatus,

    #[serde(default, deserialize_with = "null_as_empty")]
    pub rewrites: Vec<Rewrite>,
}

impl RedirectRule {
    pub fn new(hostname: impl Into<String>, location: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            location: location.into(),
            ..Default::default()
        }
    }

    pub fn with_kind(mut self, kind: RedirectKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_status(mut self, status: RedirectStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_rewrite(mut self, rewrite: Rewrite) -> Self {
        self.rewrites.push(rewrite);
        self
    }

    pub fn from_document(document: Document) -> Result<Self, RuleError> {
        serde_json::from_value(Value::Object(document)).map_err(|e| RuleError::Malformed(e.to_string()))
    }

    pub fn to_document(&self) -> Document {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Document::new(),
        }
    }

    /// Target for a request to `path`
    ///
    /// The rewritten path is appended to the location only if some rewrite
    /// matched; otherwise the target is the bare location.
    pub fn directive(&self, path: &str) -> Result<Directive, RuleError> {
        if self.location.is_empty() {
            return Err(RuleError::MissingLocation(self.hostname.clone()));
        }

        let location = match rewrite::evaluate(&self.rewrites, path) {
            Some(rewritten) => format!("https://{}{}", self.location, rewritten),
            None => format!("https://{}", self.location),
        };

        Ok(match self.kind {
            RedirectKind::Redirect => Directive::Redirect {
                location,
                status: self.status.status_code(),
            },
            RedirectKind::Proxy => Directive::Proxy { location },
        })
    }
}
