//! Stable identifiers threaded through the whole crate.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Identifies a connected transport-level session, stable for the lifetime
/// of that connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

impl SessionId {
    /// Mint a fresh session id, unique for the lifetime of the process.
    pub fn next() -> Self {
        SessionId(NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Stable identity within a Land for the duration of a session's join.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PlayerId(pub String);

impl PlayerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for PlayerId {
    fn from(value: &str) -> Self {
        PlayerId(value.to_string())
    }
}

/// `(landType, instanceId)`. Single-room lands canonicalize `instanceId` to
/// `landType`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LandId {
    pub land_type: String,
    pub instance_id: String,
}

impl LandId {
    pub fn new(land_type: impl Into<String>, instance_id: impl Into<String>) -> Self {
        Self {
            land_type: land_type.into(),
            instance_id: instance_id.into(),
        }
    }

    /// Canonical single-room id: `instanceId == landType`.
    pub fn single_room(land_type: impl Into<String>) -> Self {
        let land_type = land_type.into();
        Self {
            instance_id: land_type.clone(),
            land_type,
        }
    }

    pub fn canonical(&self) -> String {
        if self.instance_id == self.land_type {
            self.land_type.clone()
        } else {
            format!("{}:{}", self.land_type, self.instance_id)
        }
    }
}

impl fmt::Display for LandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.canonical())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_room_canonicalizes() {
        let id = LandId::single_room("lobby");
        assert_eq!(id.canonical(), "lobby");
    }

    #[test]
    fn multi_room_keeps_both_parts() {
        let id = LandId::new("raid", "abc123");
        assert_eq!(id.canonical(), "raid:abc123");
    }

    #[test]
    fn session_ids_are_unique() {
        let a = SessionId::next();
        let b = SessionId::next();
        assert_ne!(a, b);
    }
}
