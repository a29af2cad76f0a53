use rand::RngCore;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::EntireError;

/// A checkpoint identifier: exactly 12 lowercase hex characters backed by 48
/// bits of OS randomness. The canonical string form is the identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CheckpointId(String);

impl CheckpointId {
    pub fn generate() -> CheckpointId {
        let mut bytes = [0u8; 6];
        OsRng.fill_bytes(&mut bytes);
        let mut hex = String::with_capacity(12);
        for b in bytes {
            hex.push_str(&format!("{:02x}", b));
        }
        CheckpointId(hex)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Shard prefix: the first two hex characters.
    pub fn shard(&self) -> &str {
        &self.0[0..2]
    }

    /// Remainder after the shard prefix.
    pub fn rest(&self) -> &str {
        &self.0[2..]
    }
}

impl FromStr for CheckpointId {
    type Err = EntireError;

    fn from_str(s: &str) -> Result<CheckpointId, EntireError> {
        if s.len() != 12 || !s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
            return Err(EntireError::Generic(format!(
                "Invalid checkpoint id: {:?}",
                s
            )));
        }
        Ok(CheckpointId(s.to_string()))
    }
}

impl TryFrom<String> for CheckpointId {
    type Error = EntireError;

    fn try_from(s: String) -> Result<CheckpointId, EntireError> {
        s.parse()
    }
}

impl From<CheckpointId> for String {
    fn from(id: CheckpointId) -> String {
        id.0
    }
}

impl fmt::Display for CheckpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
