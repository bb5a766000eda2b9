// src/sources/ide.rs
// Reads per-session chat documents written by the Kiro IDE.
//
// Documents are matched by glob; each file is one session. The parent
// directory name is the percent-encoded absolute workspace path.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::model::{RawMessage, Role, SourceKind};
use crate::sources::{file_mtime, flatten_content, parse_timestamp};

/// Chat documents are loosely typed; unknown fields are ignored and
/// only the message list is required.
#[derive(Deserialize)]
struct RawChatDocument {
    #[serde(rename = "sessionId")]
    session_id: Option<String>,
    #[serde(default)]
    messages: Vec<Value>,
    #[serde(rename = "chatHistory", default)]
    chat_history: Vec<Value>,
}

#[derive(Deserialize)]
struct RawChatMessage {
    role: Option<String>,
    #[serde(default)]
    content: Value,
    timestamp: Option<Value>,
    #[serde(alias = "uuid")]
    id: Option<String>,
}

/// Yield canonical messages from every document matching the glob patterns.
///
/// A document that fails to parse is skipped with a warning. Patterns that
/// match nothing (including missing directories) are not errors.
pub fn read_documents(patterns: &[String]) -> Vec<RawMessage> {
    let mut messages = Vec::new();

    for pattern in patterns {
        let paths = match glob::glob(pattern) {
            Ok(paths) => paths,
            Err(e) => {
                warn!(pattern = %pattern, error = %e, "Invalid IDE chat glob pattern");
                continue;
            }
        };

        for entry in paths {
            let path = match entry {
                Ok(p) => p,
                Err(e) => {
                    warn!(error = %e, "Skipping unreadable path from glob");
                    continue;
                }
            };
            if !path.is_file() {
                continue;
            }
            match read_document(&path) {
                Ok(mut doc_messages) => messages.append(&mut doc_messages),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping unparseable chat document");
                }
            }
        }
    }

    debug!(messages = messages.len(), "Read IDE chat documents");
    messages
}

/// Parse one chat document into canonical messages.
fn read_document(path: &Path) -> crate::Result<Vec<RawMessage>> {
    let contents = std::fs::read_to_string(path)?;
    let doc: RawChatDocument = serde_json::from_str(&contents)?;

    let session_id = doc
        .session_id
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| {
            path.file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "unknown".to_string())
        });

    let workspace = path
        .parent()
        .and_then(|p| p.file_name())
        .map(|name| decode_workspace(&name.to_string_lossy()))
        .unwrap_or_default();

    let fallback_time = file_mtime(path).unwrap_or_else(Utc::now);

    let raw_messages = if doc.messages.is_empty() {
        doc.chat_history
    } else {
        doc.messages
    };

    let mut messages = Vec::new();
    let mut last_time: Option<DateTime<Utc>> = None;
    for value in &raw_messages {
        let parsed: RawChatMessage = match serde_json::from_value(value.clone()) {
            Ok(m) => m,
            Err(e) => {
                debug!(session = %session_id, error = %e, "Skipping malformed chat message");
                continue;
            }
        };

        let Some(role) = parsed.role.as_deref().and_then(Role::parse) else {
            debug!(session = %session_id, "Skipping chat message without a role");
            continue;
        };
        let Some(content) = flatten_content(&parsed.content) else {
            continue;
        };

        // Missing timestamps inherit the previous message's, else the
        // file mtime.
        let timestamp = parsed
            .timestamp
            .as_ref()
            .and_then(parse_timestamp)
            .or(last_time)
            .unwrap_or(fallback_time);
        last_time = Some(timestamp);

        messages.push(RawMessage {
            role,
            content,
            timestamp,
            source: SourceKind::Ide,
            workspace: workspace.clone(),
            session_id: session_id.clone(),
            uuid: parsed.id.clone(),
            ordinal: messages.len(),
        });
    }

    Ok(messages)
}

/// Decode a percent-encoded workspace directory name back to a path.
///
/// Names that do not decode to an absolute path are kept verbatim.
fn decode_workspace(name: &str) -> String {
    match urlencoding::decode(name) {
        Ok(decoded) if Path::new(decoded.as_ref()).is_absolute() => decoded.into_owned(),
        _ => name.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write_doc(dir: &Path, workspace_dir: &str, file: &str, contents: &str) -> String {
        let ws = dir.join(workspace_dir);
        fs::create_dir_all(&ws).unwrap();
        fs::write(ws.join(file), contents).unwrap();
        dir.join("*").join("*.chat").to_string_lossy().into_owned()
    }

    #[test]
    fn test_reads_messages_and_decodes_workspace() {
        let dir = tempfile::tempdir().unwrap();
        let pattern = write_doc(
            dir.path(),
            "%2Fhome%2Fme%2Fproj",
            "sess1.chat",
            r#"{
                "sessionId": "sess1",
                "messages": [
                    {"role": "user", "content": "fix the flaky test", "timestamp": "2025-01-15T10:00:00Z"},
                    {"role": "assistant", "content": "Looking at it now."}
                ]
            }"#,
        );

        let messages = read_documents(&[pattern]);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].workspace, "/home/me/proj");
        assert_eq!(messages[0].session_id, "sess1");
        assert_eq!(messages[0].role, Role::User);
        // Second message inherits the first message's timestamp.
        assert_eq!(messages[1].timestamp, messages[0].timestamp);
        assert_eq!(messages[1].ordinal, 1);
    }

    #[test]
    fn test_undecodable_dir_name_kept_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let pattern = write_doc(
            dir.path(),
            "scratch",
            "s.chat",
            r#"{"messages": [{"role": "user", "content": "hello"}]}"#,
        );
        let messages = read_documents(&[pattern]);
        assert_eq!(messages[0].workspace, "scratch");
        // No sessionId: the file stem is the session id.
        assert_eq!(messages[0].session_id, "s");
    }

    #[test]
    fn test_unparseable_document_skipped() {
        let dir = tempfile::tempdir().unwrap();
        write_doc(dir.path(), "w1", "bad.chat", "{broken");
        let pattern = write_doc(
            dir.path(),
            "w2",
            "good.chat",
            r#"{"messages": [{"role": "user", "content": "ok"}]}"#,
        );
        let messages = read_documents(&[pattern]);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content, "ok");
    }

    #[test]
    fn test_missing_directory_not_an_error() {
        let messages = read_documents(&["/nonexistent/kiro/chats/*/*.chat".to_string()]);
        assert!(messages.is_empty());
    }

    #[test]
    fn test_chat_history_alias_and_blocks() {
        let dir = tempfile::tempdir().unwrap();
        let pattern = write_doc(
            dir.path(),
            "w",
            "s.chat",
            r#"{
                "chatHistory": [
                    {"role": "assistant", "content": [{"type": "text", "text": "part one"}, {"type": "text", "text": "part two"}]}
                ]
            }"#,
        );
        let messages = read_documents(&[pattern]);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content, "part one\npart two");
    }

    #[test]
    fn test_message_without_role_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let pattern = write_doc(
            dir.path(),
            "w",
            "s.chat",
            r#"{"messages": [{"content": "orphan"}, {"role": "user", "content": "kept"}]}"#,
        );
        let messages = read_documents(&[pattern]);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content, "kept");
    }
}
