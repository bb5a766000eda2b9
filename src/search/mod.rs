// src/search/mod.rs
// Query engine: filter, score, dedup, context windows, pagination.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

use crate::error::{RecallError, Result};
use crate::index::{normalize, EmbeddingIndex, Snapshot};
use crate::model::{Message, Role, SourceKind};

/// Scoping filters; all optional, all conjunctive.
#[derive(Debug, Clone, Default)]
pub struct SearchFilters {
    /// Half-open time range `[after, before)`.
    pub after: Option<DateTime<Utc>>,
    pub before: Option<DateTime<Utc>>,
    /// Exact workspace path. Messages without a workspace never match.
    pub workspace: Option<String>,
    pub source: Option<SourceKind>,
}

impl SearchFilters {
    fn matches(&self, message: &Message) -> bool {
        if let Some(after) = self.after {
            if message.timestamp < after {
                return false;
            }
        }
        if let Some(before) = self.before {
            if message.timestamp >= before {
                return false;
            }
        }
        if let Some(workspace) = &self.workspace {
            if &message.workspace != workspace {
                return false;
            }
        }
        if let Some(source) = self.source {
            if message.source != source {
                return false;
            }
        }
        true
    }
}

/// One search invocation.
#[derive(Debug, Clone)]
pub struct SearchParams {
    pub query: String,
    pub filters: SearchFilters,
    pub context_size: usize,
    pub threshold: f32,
    pub max_results: usize,
    pub offset: usize,
}

/// Message payload returned to the caller.
#[derive(Debug, Clone, Serialize)]
pub struct ResultMessage {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub workspace: String,
    pub session_id: String,
    pub uuid: String,
    pub source: SourceKind,
}

impl From<&Message> for ResultMessage {
    fn from(m: &Message) -> Self {
        Self {
            role: m.role,
            content: m.content.clone(),
            timestamp: m.timestamp,
            workspace: m.workspace.clone(),
            session_id: m.session_id.clone(),
            uuid: m.uuid.clone(),
            source: m.source,
        }
    }
}

/// A context entry: the message plus whether it is the matched one.
#[derive(Debug, Clone, Serialize)]
pub struct ContextMessage {
    #[serde(flatten)]
    pub message: ResultMessage,
    pub is_match: bool,
}

/// One scored hit with its surrounding conversation.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub matched_message: ResultMessage,
    pub score: f32,
    pub context: Vec<ContextMessage>,
}

/// The full response of one search call.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    pub results: Vec<SearchHit>,
    pub query: String,
    pub total_matches: usize,
    pub offset: usize,
    pub has_more: bool,
    pub hint: String,
}

/// Reject invalid arguments before any embedding work.
pub fn validate(params: &SearchParams) -> Result<()> {
    if params.query.trim().is_empty() {
        return Err(RecallError::InvalidInput("query must not be empty".to_string()));
    }
    if !(0.0..=1.0).contains(&params.threshold) {
        return Err(RecallError::InvalidInput(format!(
            "threshold must be in [0, 1], got {}",
            params.threshold
        )));
    }
    if params.max_results < 1 {
        return Err(RecallError::InvalidInput(
            "max_results must be at least 1".to_string(),
        ));
    }
    Ok(())
}

/// Run one search against the current index snapshot.
pub async fn run_search(index: &EmbeddingIndex, params: &SearchParams) -> Result<SearchResponse> {
    validate(params)?;

    let snapshot = index.snapshot().await?;
    if snapshot.is_empty() {
        return Ok(SearchResponse {
            results: Vec::new(),
            query: params.query.clone(),
            total_matches: 0,
            offset: params.offset,
            has_more: false,
            hint: "No conversations found. Check that Kiro CLI/IDE history exists.".to_string(),
        });
    }

    let query_vector = normalize(index.embedder().embed(&params.query).await?);

    // Score every unmasked message; both sides are unit-norm, so the dot
    // product is the cosine.
    let mut scored: Vec<(usize, f32)> = Vec::new();
    for idx in 0..snapshot.len() {
        if !params.filters.matches(snapshot.message(idx)) {
            continue;
        }
        let score = snapshot.score(idx, &query_vector);
        if score >= params.threshold {
            scored.push((idx, score));
        }
    }

    sort_hits(&mut scored, &snapshot);
    let deduped = dedup_hits(scored, &snapshot);

    let total_matches = deduped.len();
    let page: Vec<(usize, f32)> = deduped
        .into_iter()
        .skip(params.offset)
        .take(params.max_results)
        .collect();
    let has_more = params.offset + page.len() < total_matches;

    let results: Vec<SearchHit> = page
        .into_iter()
        .map(|(idx, score)| {
            let context = snapshot
                .context_window(idx, params.context_size)
                .into_iter()
                .map(|ctx_idx| ContextMessage {
                    message: ResultMessage::from(snapshot.message(ctx_idx)),
                    is_match: ctx_idx == idx,
                })
                .collect();
            SearchHit {
                matched_message: ResultMessage::from(snapshot.message(idx)),
                score,
                context,
            }
        })
        .collect();

    let hint = build_hint(&results, total_matches, params);

    Ok(SearchResponse {
        results,
        query: params.query.clone(),
        total_matches,
        offset: params.offset,
        has_more,
        hint,
    })
}

/// Descending by score; ties broken by newer timestamp, then by
/// `(source, session_id, uuid)` for full determinism.
fn sort_hits(scored: &mut [(usize, f32)], snapshot: &Snapshot) {
    scored.sort_by(|&(a_idx, a_score), &(b_idx, b_score)| {
        b_score
            .partial_cmp(&a_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| {
                let a = snapshot.message(a_idx);
                let b = snapshot.message(b_idx);
                b.timestamp.cmp(&a.timestamp).then_with(|| {
                    (a.source, &a.session_id, &a.uuid).cmp(&(b.source, &b.session_id, &b.uuid))
                })
            })
    });
}

/// Suppress any later hit whose `(content_hash, role)` matches an earlier
/// kept one.
fn dedup_hits(scored: Vec<(usize, f32)>, snapshot: &Snapshot) -> Vec<(usize, f32)> {
    let mut seen: std::collections::HashSet<(&str, Role)> = std::collections::HashSet::new();
    scored
        .into_iter()
        .filter(|&(idx, _)| {
            let m = snapshot.message(idx);
            seen.insert((m.content_hash.as_str(), m.role))
        })
        .collect()
}

fn build_hint(results: &[SearchHit], total_matches: usize, params: &SearchParams) -> String {
    if total_matches == 0 {
        return format!(
            "No matches at threshold {:.2}. Try lowering threshold or broadening the date range.",
            params.threshold
        );
    }
    let shown_from = params.offset + 1;
    let shown_to = params.offset + results.len();
    if shown_to < total_matches {
        format!(
            "Showing {}-{} of {}. Repeat with offset={} for more.",
            shown_from, shown_to, total_matches, shown_to
        )
    } else {
        format!("{} match(es).", total_matches)
    }
}

/// Parse a time bound: full RFC 3339, or a bare `YYYY-MM-DD` meaning
/// UTC midnight. Used for the half-open `[after, before)` range.
pub fn parse_time_bound(raw: &str) -> Result<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    if let Ok(date) = raw.parse::<NaiveDate>() {
        if let Some(naive) = date.and_hms_opt(0, 0, 0) {
            return Ok(DateTime::from_naive_utc_and_offset(naive, Utc));
        }
    }
    Err(RecallError::InvalidInput(format!(
        "cannot parse time bound {raw:?}; use YYYY-MM-DD or RFC 3339"
    )))
}
