// src/index/budget.rs
// Memory-budget resolution and whole-session eviction.
//
// The limit is an explicit megabyte value or a fraction of physical RAM.
// When the estimated footprint exceeds it, sessions are dropped oldest
// first; eviction granularity is the session so context windows stay
// coherent.

use std::collections::{BTreeMap, BTreeSet};

use sysinfo::System;
use tracing::{debug, info};

use crate::config::{MemoryConfig, MemoryOverrides};
use crate::error::{RecallError, Result};
use crate::sources::SessionState;

/// Estimated per-message metadata overhead beyond the vector itself.
const PER_MESSAGE_OVERHEAD: u64 = 256;

/// Resolved memory budget; `None` means unlimited.
#[derive(Debug, Clone, Copy)]
pub struct MemoryBudget {
    pub limit_bytes: Option<u64>,
}

impl MemoryBudget {
    /// Resolve the budget from config and env overrides.
    ///
    /// Precedence: `KIRO_RECALL_NO_MEMORY_LIMIT` > `KIRO_RECALL_MEMORY_LIMIT_MB`
    /// > `memory.limit_mb` > `memory.fraction` of physical RAM.
    pub fn resolve(config: &MemoryConfig, overrides: &MemoryOverrides) -> Self {
        if overrides.disabled {
            info!("Memory limit disabled via KIRO_RECALL_NO_MEMORY_LIMIT");
            return Self { limit_bytes: None };
        }

        if let Some(mb) = overrides.limit_mb.or(config.limit_mb) {
            return Self {
                limit_bytes: Some(mb.saturating_mul(1024 * 1024)),
            };
        }

        let fraction = config.fraction.clamp(0.01, 1.0);
        let total = total_physical_memory();
        let limit = (total as f64 * fraction) as u64;
        debug!(
            total_bytes = total,
            fraction,
            limit_bytes = limit,
            "Memory limit from RAM fraction"
        );
        Self {
            limit_bytes: Some(limit),
        }
    }

    /// A fixed limit, for tests and diagnostics.
    pub fn fixed(limit_bytes: Option<u64>) -> Self {
        Self { limit_bytes }
    }
}

/// Estimated index footprint for a number of messages.
pub fn estimate_bytes(message_count: usize, dimensions: usize) -> u64 {
    message_count as u64 * (4 * dimensions as u64 + PER_MESSAGE_OVERHEAD)
}

/// Pick the sessions that fit the budget, dropping oldest first.
///
/// Returns the keys of the surviving (live) sessions. Errors when a
/// nonempty corpus cannot fit even its newest session; that is a
/// configuration problem, not something to degrade through silently.
pub fn select_live_sessions(
    sessions: &BTreeMap<String, SessionState>,
    dimensions: usize,
    budget: MemoryBudget,
) -> Result<BTreeSet<String>> {
    let Some(limit) = budget.limit_bytes else {
        return Ok(sessions.keys().cloned().collect());
    };

    // Oldest first; key is the deterministic tie-break.
    let mut ordered: Vec<(&String, &SessionState)> = sessions.iter().collect();
    ordered.sort_by(|a, b| {
        (a.1.last_timestamp, a.0).cmp(&(b.1.last_timestamp, b.0))
    });

    let mut total_messages: usize = sessions.values().map(|s| s.message_count).sum();
    let mut dropped = 0usize;
    while dropped < ordered.len() && estimate_bytes(total_messages, dimensions) > limit {
        total_messages -= ordered[dropped].1.message_count;
        dropped += 1;
    }

    if dropped == ordered.len() && !sessions.is_empty() {
        return Err(RecallError::Config(format!(
            "memory limit of {} bytes cannot fit even one session; raise memory.limit_mb or set KIRO_RECALL_NO_MEMORY_LIMIT",
            limit
        )));
    }

    if dropped > 0 {
        info!(
            dropped,
            kept = ordered.len() - dropped,
            "Excluding oldest sessions to fit memory budget"
        );
    }

    Ok(ordered[dropped..].iter().map(|(k, _)| (*k).clone()).collect())
}

fn total_physical_memory() -> u64 {
    let mut system = System::new();
    system.refresh_memory();
    system.total_memory()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn session(count: usize, minute: u32) -> SessionState {
        SessionState {
            fingerprint: format!("fp-{minute}"),
            last_timestamp: Utc.with_ymd_and_hms(2025, 1, 15, 10, minute, 0).unwrap(),
            message_count: count,
        }
    }

    fn sessions(entries: &[(&str, usize, u32)]) -> BTreeMap<String, SessionState> {
        entries
            .iter()
            .map(|(key, count, minute)| (key.to_string(), session(*count, *minute)))
            .collect()
    }

    #[test]
    fn test_unlimited_keeps_everything() {
        let all = sessions(&[("cli:a", 10, 0), ("ide:b", 10, 1)]);
        let live = select_live_sessions(&all, 384, MemoryBudget::fixed(None)).unwrap();
        assert_eq!(live.len(), 2);
    }

    #[test]
    fn test_oldest_sessions_dropped_first() {
        let all = sessions(&[("cli:old", 10, 0), ("cli:mid", 10, 1), ("cli:new", 10, 2)]);
        // Room for ~two sessions of ten messages each
        let limit = estimate_bytes(20, 384);
        let live = select_live_sessions(&all, 384, MemoryBudget::fixed(Some(limit))).unwrap();

        assert!(!live.contains("cli:old"));
        assert!(live.contains("cli:mid"));
        assert!(live.contains("cli:new"));
    }

    #[test]
    fn test_reducing_limit_never_adds_sessions() {
        let all = sessions(&[("cli:a", 5, 0), ("cli:b", 5, 1), ("cli:c", 5, 2)]);
        let mut previous = usize::MAX;
        for kept_messages in (5..=15).rev().step_by(5) {
            let limit = estimate_bytes(kept_messages, 384);
            let live =
                select_live_sessions(&all, 384, MemoryBudget::fixed(Some(limit))).unwrap();
            assert!(live.len() <= previous);
            previous = live.len();
        }
    }

    #[test]
    fn test_cannot_fit_one_session_is_config_error() {
        let all = sessions(&[("cli:a", 100, 0)]);
        let result = select_live_sessions(&all, 384, MemoryBudget::fixed(Some(16)));
        assert!(matches!(result, Err(RecallError::Config(_))));
    }

    #[test]
    fn test_empty_corpus_under_tiny_limit_is_fine() {
        let all = BTreeMap::new();
        let live = select_live_sessions(&all, 384, MemoryBudget::fixed(Some(16))).unwrap();
        assert!(live.is_empty());
    }

    #[test]
    fn test_resolve_explicit_limit_beats_fraction() {
        let config = MemoryConfig {
            fraction: 0.33,
            limit_mb: Some(64),
        };
        let budget = MemoryBudget::resolve(&config, &MemoryOverrides::default());
        assert_eq!(budget.limit_bytes, Some(64 * 1024 * 1024));
    }

    #[test]
    fn test_resolve_override_disables() {
        let config = MemoryConfig {
            fraction: 0.33,
            limit_mb: Some(64),
        };
        let overrides = MemoryOverrides {
            limit_mb: Some(128),
            disabled: false,
        };
        let budget = MemoryBudget::resolve(&config, &overrides);
        assert_eq!(budget.limit_bytes, Some(128 * 1024 * 1024));

        let disabled = MemoryOverrides {
            limit_mb: Some(128),
            disabled: true,
        };
        let budget = MemoryBudget::resolve(&config, &disabled);
        assert_eq!(budget.limit_bytes, None);
    }
}
