// src/index/mod.rs
// Incremental embedding index over the conversation corpus.
//
// Queries request a snapshot; the index lazily reloads persisted state,
// reconciles against the current corpus via session fingerprints, embeds
// only content whose hash is not already cached, and swaps in a new
// immutable snapshot. Concurrent readers share snapshots through Arc;
// a single writer at a time runs the refresh protocol.

pub mod budget;
pub mod cache;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::config::{MemoryOverrides, RecallConfig, SourcesConfig};
use crate::embeddings::Embedder;
use crate::error::{RecallError, Result};
use crate::index::budget::MemoryBudget;
use crate::index::cache::{CacheFile, CacheStore};
use crate::model::Message;
use crate::sources;

/// Immutable read-view served to queries.
///
/// Every message has a corresponding unit-norm row in the matrix; two
/// queries arriving after the same refresh see identical corpora.
pub struct Snapshot {
    messages: Vec<Message>,
    /// Row-major, `messages.len() * dimensions` floats.
    matrix: Vec<f32>,
    dimensions: usize,
    /// session key -> global indices in the session's original order
    session_positions: HashMap<String, Vec<usize>>,
    /// global index -> position within its session
    pos_in_session: Vec<usize>,
}

impl Snapshot {
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn message(&self, idx: usize) -> &Message {
        &self.messages[idx]
    }

    /// Cosine similarity of the query against one row (both unit-norm, so
    /// the dot product is the cosine).
    pub fn score(&self, idx: usize, query: &[f32]) -> f32 {
        let row = &self.matrix[idx * self.dimensions..(idx + 1) * self.dimensions];
        row.iter().zip(query).map(|(a, b)| a * b).sum()
    }

    /// Global indices of the context window around a hit: up to `size`
    /// messages before and after within the same session, in the
    /// session's original order. Truncated at session boundaries.
    pub fn context_window(&self, idx: usize, size: usize) -> Vec<usize> {
        let key = self.messages[idx].session_key();
        let Some(positions) = self.session_positions.get(&key) else {
            return vec![idx];
        };
        let pos = self.pos_in_session[idx];
        let start = pos.saturating_sub(size);
        let end = (pos + size).min(positions.len() - 1);
        positions[start..=end].to_vec()
    }

    fn build(messages: Vec<Message>, vectors: &BTreeMap<String, Vec<f32>>, dimensions: usize) -> Result<Self> {
        let mut matrix = Vec::with_capacity(messages.len() * dimensions);
        let mut session_positions: HashMap<String, Vec<usize>> = HashMap::new();
        let mut pos_in_session = Vec::with_capacity(messages.len());

        for (idx, message) in messages.iter().enumerate() {
            let vector = vectors.get(&message.content_hash).ok_or_else(|| {
                RecallError::Other(format!(
                    "no embedding for message {} (hash {})",
                    message.uuid, message.content_hash
                ))
            })?;
            matrix.extend_from_slice(vector);

            let positions = session_positions.entry(message.session_key()).or_default();
            pos_in_session.push(positions.len());
            positions.push(idx);
        }

        Ok(Self {
            messages,
            matrix,
            dimensions,
            session_positions,
            pos_in_session,
        })
    }
}

/// Outcome of one refresh pass, for diagnostics and the CLI.
#[derive(Debug, Clone, Default)]
pub struct RefreshReport {
    pub sessions: usize,
    pub messages: usize,
    pub newly_embedded: usize,
    pub excluded_sessions: usize,
    pub cache_entries: usize,
    /// True when fingerprints matched and the previous snapshot was reused.
    pub unchanged: bool,
}

/// In-memory mutable state guarded by the refresh lock.
struct IndexState {
    loaded: bool,
    /// content_hash -> unit-norm vector
    vectors: BTreeMap<String, Vec<f32>>,
    /// Fingerprints of every session seen on the last pass (including
    /// budget-excluded ones, for the unchanged short-circuit).
    fingerprints: BTreeMap<String, String>,
}

/// The embedding index. One handle owned by the service entry point and
/// shared by every query; no hidden singletons.
pub struct EmbeddingIndex {
    sources: SourcesConfig,
    max_content_chars: usize,
    budget: MemoryBudget,
    embedder: Arc<dyn Embedder>,
    store: CacheStore,
    state: Mutex<IndexState>,
    snapshot: RwLock<Option<Arc<Snapshot>>>,
}

impl EmbeddingIndex {
    pub fn new(config: &RecallConfig, embedder: Arc<dyn Embedder>) -> Self {
        let budget = MemoryBudget::resolve(&config.memory, &MemoryOverrides::from_env());
        Self::with_budget(config, embedder, budget)
    }

    /// Explicit-budget constructor so tests control eviction directly.
    pub fn with_budget(
        config: &RecallConfig,
        embedder: Arc<dyn Embedder>,
        budget: MemoryBudget,
    ) -> Self {
        let store = CacheStore::new(&config.embedding.resolved_cache_dir());
        Self {
            sources: config.sources.clone(),
            max_content_chars: config.search.max_content_chars,
            budget,
            embedder,
            store,
            state: Mutex::new(IndexState {
                loaded: false,
                vectors: BTreeMap::new(),
                fingerprints: BTreeMap::new(),
            }),
            snapshot: RwLock::new(None),
        }
    }

    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    /// Current snapshot, refreshing first if any source changed.
    pub async fn snapshot(&self) -> Result<Arc<Snapshot>> {
        let (snapshot, _) = self.refresh_inner().await?;
        Ok(snapshot)
    }

    /// Force a reconcile pass and report what it did.
    pub async fn refresh(&self) -> Result<RefreshReport> {
        let (_, report) = self.refresh_inner().await?;
        Ok(report)
    }

    async fn refresh_inner(&self) -> Result<(Arc<Snapshot>, RefreshReport)> {
        // One writer at a time; concurrent queries wait here and then see
        // the fingerprint short-circuit.
        let mut state = self.state.lock().await;

        if !state.loaded {
            let cache = self
                .store
                .load(self.embedder.model_id(), self.embedder.dimensions());
            state.vectors = cache.vectors;
            state.fingerprints = cache.fingerprints;
            state.loaded = true;
        }

        let corpus = sources::load_corpus(&self.sources, self.max_content_chars);
        let current_fingerprints: BTreeMap<String, String> = corpus
            .sessions
            .iter()
            .map(|(key, s)| (key.clone(), s.fingerprint.clone()))
            .collect();

        if current_fingerprints == state.fingerprints {
            if let Some(snapshot) = self.snapshot.read().await.as_ref() {
                debug!("Corpus unchanged, reusing snapshot");
                let report = RefreshReport {
                    sessions: corpus.sessions.len(),
                    messages: snapshot.len(),
                    newly_embedded: 0,
                    excluded_sessions: corpus.sessions.len()
                        - snapshot
                            .session_positions
                            .len(),
                    cache_entries: state.vectors.len(),
                    unchanged: true,
                };
                return Ok((snapshot.clone(), report));
            }
        }

        // Budget first: excluded sessions are never embedded.
        let live_keys =
            budget::select_live_sessions(&corpus.sessions, self.embedder.dimensions(), self.budget)?;
        let excluded_sessions = corpus.sessions.len() - live_keys.len();

        let live_messages: Vec<Message> = corpus
            .messages
            .into_iter()
            .filter(|m| live_keys.contains(&m.session_key()))
            .collect();

        // Embed only content whose hash is not already cached.
        let mut pending: Vec<(String, String)> = Vec::new();
        let mut seen: HashSet<&str> = HashSet::new();
        for message in &live_messages {
            if !state.vectors.contains_key(&message.content_hash)
                && seen.insert(message.content_hash.as_str())
            {
                pending.push((message.content_hash.clone(), message.content.clone()));
            }
        }

        let newly_embedded = pending.len();
        if newly_embedded > 0 {
            info!(count = newly_embedded, "Embedding new conversation content");
        }

        // Batches land in the cache as they complete, so a failure keeps
        // the progress already made.
        for chunk in pending.chunks(64) {
            let texts: Vec<String> = chunk.iter().map(|(_, text)| text.clone()).collect();
            let vectors = match self.embedder.embed_batch(&texts).await {
                Ok(v) => v,
                Err(e) => {
                    // Transient embedder failure: abort this refresh and
                    // keep serving the previous snapshot if there is one.
                    if let Some(snapshot) = self.snapshot.read().await.as_ref() {
                        warn!(error = %e, "Embedder failed during refresh, serving stale snapshot");
                        let report = RefreshReport {
                            sessions: corpus.sessions.len(),
                            messages: snapshot.len(),
                            newly_embedded: 0,
                            excluded_sessions,
                            cache_entries: state.vectors.len(),
                            unchanged: false,
                        };
                        return Ok((snapshot.clone(), report));
                    }
                    return Err(e);
                }
            };
            if vectors.len() != chunk.len() {
                return Err(RecallError::Embedding(format!(
                    "embedder returned {} vectors for {} texts",
                    vectors.len(),
                    chunk.len()
                )));
            }
            for ((hash, _), vector) in chunk.iter().zip(vectors) {
                state.vectors.insert(hash.clone(), normalize(vector));
            }
        }

        // Garbage-collect hashes no live message references.
        let live_hashes: HashSet<&str> = live_messages
            .iter()
            .map(|m| m.content_hash.as_str())
            .collect();
        state.vectors.retain(|hash, _| live_hashes.contains(hash.as_str()));

        // Persist live state atomically. A persistence failure is local:
        // warn and keep serving from memory.
        let live_fingerprints: BTreeMap<String, String> = current_fingerprints
            .iter()
            .filter(|(key, _)| live_keys.contains(*key))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let cache_file = CacheFile {
            model: self.embedder.model_id().to_string(),
            dimensions: self.embedder.dimensions() as u32,
            vectors: state.vectors.clone(),
            fingerprints: live_fingerprints,
        };
        if let Err(e) = self.store.persist(&cache_file) {
            warn!(error = %e, "Failed to persist embedding cache");
        }

        let message_count = live_messages.len();
        let snapshot = Arc::new(Snapshot::build(
            live_messages,
            &state.vectors,
            self.embedder.dimensions(),
        )?);

        state.fingerprints = current_fingerprints;
        *self.snapshot.write().await = Some(snapshot.clone());

        let report = RefreshReport {
            sessions: corpus.sessions.len(),
            messages: message_count,
            newly_embedded,
            excluded_sessions,
            cache_entries: state.vectors.len(),
            unchanged: false,
        };
        Ok((snapshot, report))
    }
}

/// Scale a vector to unit L2 norm. Zero vectors are left as-is.
pub fn normalize(mut v: Vec<f32>) -> Vec<f32> {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for x in &mut v {
            *x /= norm;
        }
    }
    v
}
