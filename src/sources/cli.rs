// src/sources/cli.rs
// Reads conversations from the Kiro CLI SQLite store.
//
// Store layout: one table `conversations(key, value)`. `key` is the
// directory the session ran in; `value` is a JSON document with a
// `history` array of turns. Turn shapes vary across CLI versions, so
// decoding is tolerant: explicit {role, content} objects, Prompt/Response
// wrappers, [user, assistant] pair arrays, and bare strings all work.

use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OpenFlags};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::Result;
use crate::model::{RawMessage, Role, SourceKind};
use crate::sources::{file_mtime, flatten_content, parse_timestamp};

/// Read every session from one CLI store.
///
/// A malformed row is skipped with a warning; an unreadable database is an
/// error (the caller decides whether other sources still proceed).
pub fn read_store(path: &Path) -> Result<Vec<RawMessage>> {
    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )?;
    let fallback_time = file_mtime(path).unwrap_or_else(Utc::now);

    let mut stmt = conn.prepare("SELECT key, value FROM conversations")?;
    let rows: Vec<(String, String)> = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
        .filter_map(|r| r.ok())
        .collect();

    let mut messages = Vec::new();
    for (key, value) in rows {
        match serde_json::from_str::<Value>(&value) {
            Ok(doc) => messages.extend(parse_conversation(&key, &doc, fallback_time)),
            Err(e) => {
                warn!(key = %key, error = %e, "Skipping malformed CLI conversation row");
            }
        }
    }

    debug!(path = %path.display(), messages = messages.len(), "Read CLI store");
    Ok(messages)
}

/// Decode one conversation row into canonical messages.
fn parse_conversation(key: &str, doc: &Value, fallback_time: DateTime<Utc>) -> Vec<RawMessage> {
    let session_id = doc
        .get("conversation_id")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .unwrap_or(key)
        .to_string();

    let session_time = doc
        .get("updated_at")
        .and_then(parse_timestamp)
        .unwrap_or(fallback_time);

    let workspace = if Path::new(key).is_absolute() {
        key.to_string()
    } else {
        String::new()
    };

    let history = match doc.get("history").and_then(Value::as_array) {
        Some(h) => h,
        None => return Vec::new(),
    };

    let mut messages = Vec::new();
    for entry in history {
        // A history entry is either one turn or a [user, assistant] pair.
        match entry {
            Value::Array(pair) => {
                for turn in pair {
                    push_turn(&mut messages, turn, &session_id, &workspace, session_time);
                }
            }
            other => push_turn(&mut messages, other, &session_id, &workspace, session_time),
        }
    }
    messages
}

fn push_turn(
    out: &mut Vec<RawMessage>,
    turn: &Value,
    session_id: &str,
    workspace: &str,
    session_time: DateTime<Utc>,
) {
    let ordinal = out.len();
    let Some((role, content, timestamp)) = extract_turn(turn, ordinal) else {
        return;
    };
    out.push(RawMessage {
        role,
        content,
        timestamp: timestamp.unwrap_or(session_time),
        source: SourceKind::Cli,
        workspace: workspace.to_string(),
        session_id: session_id.to_string(),
        uuid: None,
        ordinal,
    });
}

/// Pull (role, content, timestamp) out of one loosely-typed turn value.
fn extract_turn(turn: &Value, ordinal: usize) -> Option<(Role, String, Option<DateTime<Utc>>)> {
    match turn {
        // Bare string: roles alternate user/assistant in source order.
        Value::String(s) => {
            let role = if ordinal % 2 == 0 {
                Role::User
            } else {
                Role::Assistant
            };
            Some((role, s.clone(), None))
        }
        Value::Object(obj) => {
            let timestamp = obj.get("timestamp").and_then(parse_timestamp);

            // Preferred shape: explicit role + content.
            if let Some(role) = obj.get("role").and_then(Value::as_str).and_then(Role::parse) {
                let content = obj.get("content").and_then(flatten_content)?;
                return Some((role, content, timestamp));
            }

            // Prompt/Response wrappers used by older CLI serializations.
            if let Some(content) = obj.get("content") {
                if let Some(prompt) = content
                    .get("Prompt")
                    .and_then(|p| p.get("prompt"))
                    .and_then(Value::as_str)
                {
                    return Some((Role::User, prompt.to_string(), timestamp));
                }
                if let Some(response) = content.get("Response") {
                    let text = response
                        .get("content")
                        .or_else(|| response.get("message"))
                        .and_then(flatten_content)?;
                    return Some((Role::Assistant, text, timestamp));
                }
                // Fall through: content without a recognizable wrapper.
                if let Some(text) = flatten_content(content) {
                    let role = if ordinal % 2 == 0 {
                        Role::User
                    } else {
                        Role::Assistant
                    };
                    return Some((role, text, timestamp));
                }
            }

            if let Some(response) = obj.get("response") {
                let text = response
                    .get("content")
                    .or_else(|| response.get("message"))
                    .and_then(flatten_content)?;
                return Some((Role::Assistant, text, timestamp));
            }

            None
        }
        _ => None,
    }
}
