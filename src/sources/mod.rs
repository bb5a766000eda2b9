// src/sources/mod.rs
// Unified loader: merges both conversation stores into one canonical,
// globally-ordered message list with per-session fingerprints.

pub mod cli;
pub mod ide;

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::SourcesConfig;
use crate::model::{content_hash, session_fingerprint, Message, RawMessage};

/// Everything the index needs to know about one session without
/// re-reading its message bodies.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionState {
    pub fingerprint: String,
    pub last_timestamp: DateTime<Utc>,
    pub message_count: usize,
}

/// The merged, sorted corpus of both sources.
#[derive(Debug, Default)]
pub struct Corpus {
    /// Sorted by `(timestamp, source, session_id, ordinal)`.
    pub messages: Vec<Message>,
    /// Keyed by `"{source}:{session_id}"`.
    pub sessions: BTreeMap<String, SessionState>,
}

impl Corpus {
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// Load and merge the current corpus from every enabled source.
///
/// A source that cannot be read at all contributes nothing (with a
/// warning); it never takes the other source down with it.
pub fn load_corpus(sources: &SourcesConfig, max_content_chars: usize) -> Corpus {
    let mut raw = Vec::new();

    if sources.cli.enabled {
        for path in sources.cli.resolved_paths() {
            if !path.exists() {
                debug!(path = %path.display(), "CLI store not present, skipping");
                continue;
            }
            match cli::read_store(&path) {
                Ok(mut messages) => raw.append(&mut messages),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "CLI store unreadable, continuing without it");
                }
            }
        }
    }

    if sources.ide.enabled {
        raw.append(&mut ide::read_documents(&sources.ide.resolved_patterns()));
    }

    finalize(raw, max_content_chars)
}

/// Hash, filter, sort, and fingerprint a batch of raw messages.
pub fn finalize(raw: Vec<RawMessage>, max_content_chars: usize) -> Corpus {
    let mut messages: Vec<Message> = raw
        .into_iter()
        .filter(|m| {
            if m.content.trim().is_empty() {
                return false;
            }
            if m.content.chars().count() > max_content_chars {
                debug!(
                    session = %m.session_id,
                    chars = m.content.chars().count(),
                    "Dropping oversized message"
                );
                return false;
            }
            true
        })
        .map(|m| {
            let uuid = m
                .uuid
                .unwrap_or_else(|| format!("{}-{}", m.session_id, m.ordinal));
            Message {
                content_hash: content_hash(&m.content),
                role: m.role,
                content: m.content,
                timestamp: m.timestamp,
                source: m.source,
                workspace: m.workspace,
                session_id: m.session_id,
                uuid,
                ordinal: m.ordinal,
            }
        })
        .collect();

    messages.sort_by(|a, b| {
        (a.timestamp, a.source, &a.session_id, a.ordinal)
            .cmp(&(b.timestamp, b.source, &b.session_id, b.ordinal))
    });

    // The last message a session contributes in sorted order is its most
    // recent one; track it for the fingerprint.
    let mut sessions: BTreeMap<String, (usize, DateTime<Utc>, String, String)> = BTreeMap::new();
    for message in &messages {
        let entry = sessions
            .entry(message.session_key())
            .or_insert_with(|| {
                (
                    0,
                    message.timestamp,
                    message.content_hash.clone(),
                    message.session_id.clone(),
                )
            });
        entry.0 += 1;
        entry.1 = message.timestamp;
        entry.2 = message.content_hash.clone();
    }

    let sessions = sessions
        .into_iter()
        .map(|(key, (count, last_timestamp, last_hash, session_id))| {
            let fingerprint =
                session_fingerprint(&session_id, count, last_timestamp, &last_hash);
            (
                key,
                SessionState {
                    fingerprint,
                    last_timestamp,
                    message_count: count,
                },
            )
        })
        .collect();

    Corpus { messages, sessions }
}

/// Parse a timestamp from loosely-typed source data.
///
/// Accepts RFC 3339 strings, naive `YYYY-MM-DDTHH:MM:SS`, and epoch
/// seconds or milliseconds.
pub(crate) fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => {
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Some(dt.with_timezone(&Utc));
            }
            if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S") {
                return Some(Utc.from_utc_datetime(&naive));
            }
            None
        }
        Value::Number(n) => {
            let millis = if n.as_f64()? > 1e12 {
                n.as_f64()? as i64
            } else {
                (n.as_f64()? * 1000.0) as i64
            };
            Utc.timestamp_millis_opt(millis).single()
        }
        _ => None,
    }
}

/// Modification time of a file as a UTC instant.
pub(crate) fn file_mtime(path: &Path) -> Option<DateTime<Utc>> {
    let modified = std::fs::metadata(path).ok()?.modified().ok()?;
    Some(DateTime::<Utc>::from(modified))
}

/// Flatten a content value: plain string, or an array of text blocks
/// (`[{"type": "text", "text": …}]`) joined with newlines.
pub(crate) fn flatten_content(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Array(blocks) => {
            let parts: Vec<&str> = blocks
                .iter()
                .filter_map(|b| {
                    b.as_str()
                        .or_else(|| b.get("text").and_then(Value::as_str))
                })
                .collect();
            if parts.is_empty() {
                None
            } else {
                Some(parts.join("\n"))
            }
        }
        _ => None,
    }
}
