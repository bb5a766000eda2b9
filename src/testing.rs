// src/testing.rs
// Shared fixtures for unit tests: a deterministic embedder and seeded
// source stores. Compiled only for tests.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use crate::config::RecallConfig;
use crate::embeddings::Embedder;
use crate::error::{RecallError, Result};

/// Deterministic embedder: identical text always yields the same vector,
/// and every pair of vectors has a positive dot product (a shared constant
/// component), so thresholds behave predictably. Distinct texts score
/// roughly 0.4 against each other; identical texts score 1.0.
pub(crate) struct HashEmbedder {
    dims: usize,
    pub embedded_texts: AtomicUsize,
}

impl HashEmbedder {
    pub(crate) fn new(dims: usize) -> Self {
        Self {
            dims,
            embedded_texts: AtomicUsize::new(0),
        }
    }

    fn vector_for(&self, text: &str) -> Vec<f32> {
        use sha2::{Digest, Sha256};
        let mut v = Vec::with_capacity(self.dims);
        v.push(2.0);
        let mut counter = 0u32;
        'outer: loop {
            let mut hasher = Sha256::new();
            hasher.update(text.as_bytes());
            hasher.update(counter.to_le_bytes());
            for byte in hasher.finalize() {
                if v.len() >= self.dims {
                    break 'outer;
                }
                v.push(byte as f32 / 255.0 - 0.5);
            }
            counter += 1;
        }
        v
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    fn model_id(&self) -> &str {
        "hash-test"
    }

    fn dimensions(&self) -> usize {
        self.dims
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.embedded_texts.fetch_add(texts.len(), Ordering::SeqCst);
        Ok(texts.iter().map(|t| self.vector_for(t)).collect())
    }
}

/// An embedder that always fails, for transient-error paths.
pub(crate) struct FailingEmbedder;

#[async_trait]
impl Embedder for FailingEmbedder {
    fn model_id(&self) -> &str {
        "hash-test"
    }
    fn dimensions(&self) -> usize {
        16
    }
    async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Err(RecallError::Embedding("connection refused".to_string()))
    }
}

/// Config pointing every path at a fixture directory.
pub(crate) fn fixture_config(dir: &std::path::Path) -> RecallConfig {
    let mut config = RecallConfig::default();
    config.sources.cli.paths = vec![dir.join("data.sqlite3").to_string_lossy().into_owned()];
    config.sources.ide.patterns = vec![dir
        .join("chats")
        .join("*")
        .join("*.chat")
        .to_string_lossy()
        .into_owned()];
    config.embedding.cache_dir = Some(dir.join("cache").to_string_lossy().into_owned());
    config
}

/// (Re)seed a CLI store with sessions of alternating user/assistant turns.
/// Session `i` gets timestamps in minute `i`, so later entries are newer.
pub(crate) fn seed_cli_store(dir: &std::path::Path, sessions: &[(&str, &[&str])]) {
    let conn = rusqlite::Connection::open(dir.join("data.sqlite3")).unwrap();
    conn.execute(
        "CREATE TABLE IF NOT EXISTS conversations (key TEXT PRIMARY KEY, value TEXT NOT NULL)",
        [],
    )
    .unwrap();
    conn.execute("DELETE FROM conversations", []).unwrap();
    for (i, (key, contents)) in sessions.iter().enumerate() {
        let history: Vec<serde_json::Value> = contents
            .iter()
            .enumerate()
            .map(|(j, content)| {
                serde_json::json!({
                    "role": if j % 2 == 0 { "user" } else { "assistant" },
                    "content": content,
                    "timestamp": format!("2025-01-15T10:{:02}:{:02}Z", i, j),
                })
            })
            .collect();
        let value = serde_json::json!({
            "conversation_id": format!("conv-{i}"),
            "history": history,
        });
        conn.execute(
            "INSERT INTO conversations (key, value) VALUES (?1, ?2)",
            rusqlite::params![key, value.to_string()],
        )
        .unwrap();
    }
}

/// Seed one IDE chat document under an encoded workspace directory.
pub(crate) fn seed_ide_doc(dir: &std::path::Path, workspace_dir: &str, file: &str, json: &str) {
    let ws = dir.join("chats").join(workspace_dir);
    std::fs::create_dir_all(&ws).unwrap();
    std::fs::write(ws.join(file), json).unwrap();
}
