//! Type-safe identifier newtypes for lease ownership.
//!
//! A lock document records who owns it and which version of the lease is
//! current. Keeping the two as distinct types prevents passing one where the
//! other is expected when building conditional writes.

use std::fmt;
use uuid::Uuid;

/// Identity of one lock client (one per process).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OwnerId(String);

impl OwnerId {
    /// Create a new random owner ID
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string value
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for OwnerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Version stamp rewritten on every lease heartbeat.
///
/// Another client treats a lease as expired once it has observed the same
/// version for a full lease duration.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecordVersion(String);

impl RecordVersion {
    /// Generate a fresh version
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string value
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RecordVersion {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RecordVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_ids_are_unique() {
        assert_ne!(OwnerId::new(), OwnerId::new());
        assert_ne!(RecordVersion::new(), RecordVersion::new());
    }

    #[test]
    fn test_round_trip_through_string() {
        let version = RecordVersion::from_string("v-1");
        assert_eq!(version.as_str(), "v-1");
        assert_eq!(version.to_string(), "v-1");
        assert_eq!(OwnerId::from_string("node-a").as_str(), "node-a");
    }
}
