//! Identifier types shared by the master, worker, and controller processes.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Worker identifier, assigned by the master starting at 1 and strictly
/// increasing over the master's lifetime. A revived worker keeps its id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorkerId(u32);

impl WorkerId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn get(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque per-process token whose string form doubles as a rendezvous
/// filename. Random hex, 32 characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProcessHash(String);

impl ProcessHash {
    /// Wraps an existing hash string, e.g. one read back from a
    /// rendezvous file.
    pub fn new(hash: impl Into<String>) -> Self {
        Self(hash.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ProcessHash {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ProcessHash {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for ProcessHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_id_ordering() {
        assert!(WorkerId::new(1) < WorkerId::new(2));
        assert_eq!(WorkerId::new(7).to_string(), "7");
    }

    #[test]
    fn test_process_hash_round_trip() {
        let hash = ProcessHash::from("a1b2c3");
        assert_eq!(hash.as_str(), "a1b2c3");
        let json = serde_json::to_string(&hash).unwrap();
        assert_eq!(json, "\"a1b2c3\"");
    }
}
