// src/model.rs
// Canonical message model shared by both conversation sources

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Who produced a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
    Tool,
}

impl Role {
    /// Parse a role from source data, tolerating common aliases
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "user" | "human" | "prompt" => Some(Self::User),
            "assistant" | "ai" | "model" | "response" => Some(Self::Assistant),
            "system" => Some(Self::System),
            "tool" | "tool_result" | "function" => Some(Self::Tool),
            _ => None,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
            Self::System => write!(f, "system"),
            Self::Tool => write!(f, "tool"),
        }
    }
}

/// Which store a message came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Cli,
    Ide,
}

impl SourceKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "cli" => Some(Self::Cli),
            "ide" => Some(Self::Ide),
            _ => None,
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cli => write!(f, "cli"),
            Self::Ide => write!(f, "ide"),
        }
    }
}

/// A message as read from a source store, before hashing and global ordering.
///
/// Readers resolve timestamps (falling back to the session's best-known
/// time) but leave uuid synthesis and content hashing to the unified loader.
#[derive(Debug, Clone)]
pub struct RawMessage {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub source: SourceKind,
    /// Absolute project path; empty when the source record carries none.
    pub workspace: String,
    pub session_id: String,
    /// Stable id within the session; synthesised by the loader when absent.
    pub uuid: Option<String>,
    /// Source-order index within the session (authoritative tie-break).
    pub ordinal: usize,
}

/// The atomic indexed unit.
#[derive(Debug, Clone)]
pub struct Message {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub source: SourceKind,
    pub workspace: String,
    pub session_id: String,
    pub uuid: String,
    /// Hex SHA-256 of the content bytes; primary key of the embedding cache.
    pub content_hash: String,
    /// Source-order index within the session.
    pub ordinal: usize,
}

impl Message {
    /// Key identifying this message's session across both sources.
    pub fn session_key(&self) -> String {
        session_key(self.source, &self.session_id)
    }
}

/// Cache/fingerprint key for a session: unique within (source, store).
pub fn session_key(source: SourceKind, session_id: &str) -> String {
    format!("{}:{}", source, session_id)
}

/// Hex SHA-256 digest of a message's content bytes.
pub fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex_digest(hasher)
}

/// Session fingerprint: detects change without re-reading every message.
///
/// Covers the message count, the last timestamp, and the last message's
/// content hash, so appends, edits, and truncations all flip it.
pub fn session_fingerprint(
    session_id: &str,
    message_count: usize,
    last_timestamp: DateTime<Utc>,
    last_content_hash: &str,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(session_id.as_bytes());
    hasher.update(b"\n");
    hasher.update(message_count.to_string().as_bytes());
    hasher.update(b"\n");
    hasher.update(last_timestamp.to_rfc3339().as_bytes());
    hasher.update(b"\n");
    hasher.update(last_content_hash.as_bytes());
    hex_digest(hasher)
}

fn hex_digest(hasher: Sha256) -> String {
    let digest = hasher.finalize();
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        use std::fmt::Write;
        let _ = write!(out, "{byte:02x}");
    }
    out
}
