// tests/recall_e2e.rs
// End-to-end scenarios over fixture stores: seeded CLI SQLite + IDE chat
// documents, a deterministic in-test embedder, and a real cache directory.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use kiro_recall::config::RecallConfig;
use kiro_recall::embeddings::Embedder;
use kiro_recall::index::budget::{estimate_bytes, MemoryBudget};
use kiro_recall::index::EmbeddingIndex;
use kiro_recall::search::{run_search, SearchFilters, SearchParams};
use kiro_recall::Result;

/// Deterministic embedder: identical text yields identical vectors, all
/// pairs score positively, distinct texts stay well below 0.99.
struct FixtureEmbedder {
    dims: usize,
    embedded_texts: AtomicUsize,
}

impl FixtureEmbedder {
    fn new() -> Self {
        Self {
            dims: 32,
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
impl Embedder for FixtureEmbedder {
    fn model_id(&self) -> &str {
        "fixture-test"
    }

    fn dimensions(&self) -> usize {
        self.dims
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.embedded_texts.fetch_add(texts.len(), Ordering::SeqCst);
        Ok(texts.iter().map(|t| self.vector_for(t)).collect())
    }
}

fn fixture_config(dir: &Path) -> RecallConfig {
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

fn seed_cli_store(dir: &Path, sessions: &[(&str, &[&str])]) {
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

fn seed_ide_doc(dir: &Path, workspace_dir: &str, file: &str, json: &str) {
    let ws = dir.join("chats").join(workspace_dir);
    std::fs::create_dir_all(&ws).unwrap();
    std::fs::write(ws.join(file), json).unwrap();
}

fn params(query: &str) -> SearchParams {
    SearchParams {
        query: query.to_string(),
        filters: SearchFilters::default(),
        context_size: 3,
        threshold: 0.2,
        max_results: 10,
        offset: 0,
    }
}

fn index_over(dir: &Path) -> (Arc<FixtureEmbedder>, EmbeddingIndex) {
    let embedder = Arc::new(FixtureEmbedder::new());
    let index = EmbeddingIndex::with_budget(
        &fixture_config(dir),
        embedder.clone(),
        MemoryBudget::fixed(None),
    );
    (embedder, index)
}

#[tokio::test]
async fn empty_corpus_returns_empty_result_set() {
    let dir = tempfile::tempdir().unwrap();
    let (_, index) = index_over(dir.path());

    let response = run_search(&index, &params("anything")).await.unwrap();
    assert!(response.results.is_empty());
    assert_eq!(response.total_matches, 0);
    assert!(!response.has_more);
}

#[tokio::test]
async fn exact_text_match_at_high_threshold() {
    let dir = tempfile::tempdir().unwrap();
    seed_cli_store(
        dir.path(),
        &[("/proj", &["refactor the database schema", "ship it"])],
    );
    let (_, index) = index_over(dir.path());

    let mut p = params("refactor the database schema");
    p.threshold = 0.99;
    let response = run_search(&index, &p).await.unwrap();

    assert_eq!(response.results.len(), 1);
    assert_eq!(
        response.results[0].matched_message.content,
        "refactor the database schema"
    );
    assert!(response.results[0].score >= 0.99);
}

#[tokio::test]
async fn both_sources_merge_into_one_corpus() {
    let dir = tempfile::tempdir().unwrap();
    seed_cli_store(dir.path(), &[("/proj", &["terminal conversation"])]);
    seed_ide_doc(
        dir.path(),
        "%2Fproj",
        "sess.chat",
        r#"{"sessionId": "sess", "messages": [
            {"role": "user", "content": "editor conversation", "timestamp": "2025-01-15T12:00:00Z"}
        ]}"#,
    );
    let (_, index) = index_over(dir.path());

    let mut p = params("conversation");
    p.threshold = 0.0;
    let response = run_search(&index, &p).await.unwrap();

    let sources: std::collections::BTreeSet<String> = response
        .results
        .iter()
        .map(|r| r.matched_message.source.to_string())
        .collect();
    assert!(sources.contains("cli"));
    assert!(sources.contains("ide"));
    // Both decode to the same workspace.
    assert!(response
        .results
        .iter()
        .all(|r| r.matched_message.workspace == "/proj"));
}

#[tokio::test]
async fn incremental_refresh_embeds_only_the_new_message() {
    let dir = tempfile::tempdir().unwrap();
    seed_cli_store(dir.path(), &[("/proj", &["first message", "second message"])]);
    let (embedder, index) = index_over(dir.path());

    index.refresh().await.unwrap();
    let baseline = embedder.embedded_texts.load(Ordering::SeqCst);
    assert_eq!(baseline, 2);

    seed_cli_store(
        dir.path(),
        &[("/proj", &["first message", "second message", "brand new message"])],
    );
    let report = index.refresh().await.unwrap();
    assert_eq!(report.newly_embedded, 1);
    assert_eq!(embedder.embedded_texts.load(Ordering::SeqCst), baseline + 1);

    // The new message is the best hit for its own text.
    let mut p = params("brand new message");
    p.threshold = 0.0;
    let response = run_search(&index, &p).await.unwrap();
    assert_eq!(
        response.results[0].matched_message.content,
        "brand new message"
    );
}

#[tokio::test]
async fn cache_restart_and_crash_leftovers() {
    let dir = tempfile::tempdir().unwrap();
    seed_cli_store(dir.path(), &[("/proj", &["persisted once"])]);

    {
        let (_, index) = index_over(dir.path());
        index.refresh().await.unwrap();
    }

    // Simulate a crash that left a temp file behind: the canonical file
    // must still be authoritative and the next persist must clean up.
    let cache_dir = dir.path().join("cache");
    std::fs::write(cache_dir.join("index.bin.tmp"), b"half-written garbage").unwrap();

    let (embedder, index) = index_over(dir.path());
    let report = index.refresh().await.unwrap();
    assert_eq!(report.newly_embedded, 0);
    assert_eq!(embedder.embedded_texts.load(Ordering::SeqCst), 0);

    // A corrupt canonical file triggers a full rebuild, not a failure.
    std::fs::write(cache_dir.join("index.bin"), b"corrupted").unwrap();
    let (embedder, index) = index_over(dir.path());
    let report = index.refresh().await.unwrap();
    assert_eq!(report.newly_embedded, 1);
    assert_eq!(embedder.embedded_texts.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn memory_budget_is_monotone_in_the_limit() {
    let dir = tempfile::tempdir().unwrap();
    seed_cli_store(
        dir.path(),
        &[
            ("/a", &["oldest session"] as &[&str]),
            ("/b", &["middle session"]),
            ("/c", &["newest session"]),
        ],
    );
    let config = fixture_config(dir.path());

    let mut previous_kept = usize::MAX;
    for messages_allowed in [3usize, 2, 1] {
        let limit = estimate_bytes(messages_allowed, 32);
        let index = EmbeddingIndex::with_budget(
            &config,
            Arc::new(FixtureEmbedder::new()),
            MemoryBudget::fixed(Some(limit)),
        );
        let report = index.refresh().await.unwrap();
        let kept = report.sessions - report.excluded_sessions;
        assert!(kept <= previous_kept);
        previous_kept = kept;
    }

    // A limit too small for even one session is a configuration error.
    let index = EmbeddingIndex::with_budget(
        &config,
        Arc::new(FixtureEmbedder::new()),
        MemoryBudget::fixed(Some(8)),
    );
    assert!(index.refresh().await.is_err());
}

#[tokio::test]
async fn pagination_across_a_large_result_set() {
    let dir = tempfile::tempdir().unwrap();
    let contents: Vec<String> = (0..25).map(|i| format!("note number {i}")).collect();
    let refs: Vec<&str> = contents.iter().map(String::as_str).collect();
    seed_cli_store(dir.path(), &[("/proj", &refs)]);
    let (_, index) = index_over(dir.path());

    let mut p = params("note number 7");
    p.threshold = 0.0;
    p.max_results = 10;
    p.offset = 10;
    let response = run_search(&index, &p).await.unwrap();

    assert_eq!(response.results.len(), 10);
    assert_eq!(response.total_matches, 25);
    assert!(response.has_more);
    assert!(response.hint.contains("offset=20"));
}

#[tokio::test]
async fn malformed_records_never_take_down_the_corpus() {
    let dir = tempfile::tempdir().unwrap();

    // One good CLI row, one broken row.
    let conn = rusqlite::Connection::open(dir.path().join("data.sqlite3")).unwrap();
    conn.execute(
        "CREATE TABLE conversations (key TEXT PRIMARY KEY, value TEXT NOT NULL)",
        [],
    )
    .unwrap();
    conn.execute(
        "INSERT INTO conversations VALUES ('/proj', '{\"history\":[{\"role\":\"user\",\"content\":\"good cli row\",\"timestamp\":\"2025-01-15T10:00:00Z\"}]}')",
        [],
    )
    .unwrap();
    conn.execute("INSERT INTO conversations VALUES ('/bad', '{oops')", [])
        .unwrap();
    drop(conn);

    // One good IDE doc, one broken doc.
    seed_ide_doc(
        dir.path(),
        "%2Fproj",
        "ok.chat",
        r#"{"messages": [{"role": "user", "content": "good ide doc", "timestamp": "2025-01-15T11:00:00Z"}]}"#,
    );
    seed_ide_doc(dir.path(), "%2Fproj", "broken.chat", "{nope");

    let (_, index) = index_over(dir.path());
    let mut p = params("good");
    p.threshold = 0.0;
    let response = run_search(&index, &p).await.unwrap();

    let contents: Vec<&str> = response
        .results
        .iter()
        .map(|r| r.matched_message.content.as_str())
        .collect();
    assert!(contents.contains(&"good cli row"));
    assert!(contents.contains(&"good ide doc"));
    assert_eq!(response.total_matches, 2);
}
