//! Content identity tokens used for staleness checks

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::Metadata;
use std::time::{SystemTime, UNIX_EPOCH};

/// How the cache decides whether a stored entry is still current
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FingerprintPolicy {
    /// File size plus modification time. Needs only a `stat`.
    #[default]
    SizeMtime,
    /// SHA-256 of the file bytes. Survives copies and clock skew, but every
    /// check reads the whole file.
    ContentHash,
}

impl std::str::FromStr for FingerprintPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "size_mtime" | "mtime" => Ok(Self::SizeMtime),
            "content_hash" | "hash" | "sha256" => Ok(Self::ContentHash),
            _ => Err(format!(
                "Invalid fingerprint policy: '{s}'. Valid options: size_mtime, content_hash"
            )),
        }
    }
}

/// Identity of one version of a file's content
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Fingerprint {
    SizeMtime { size: u64, modified: SystemTime },
    ContentHash([u8; 32]),
}

impl Fingerprint {
    pub fn from_metadata(metadata: &Metadata) -> Self {
        Self::SizeMtime {
            size: metadata.len(),
            modified: metadata.modified().unwrap_or(UNIX_EPOCH),
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self::ContentHash(Sha256::digest(bytes).into())
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SizeMtime { size, modified } => {
                let nanos = modified
                    .duration_since(UNIX_EPOCH)
                    .map_or(0, |d| d.as_nanos());
                write!(f, "{size}:{nanos}")
            }
            Self::ContentHash(digest) => {
                for byte in digest {
                    write!(f, "{byte:02x}")?;
                }
                Ok(())
            }
        }
    }
}
