// src/config/env.rs
// Environment overrides - single source of truth for all env vars

use tracing::warn;

/// Memory-budget overrides from the environment.
///
/// `KIRO_RECALL_MEMORY_LIMIT_MB` replaces the configured limit;
/// `KIRO_RECALL_NO_MEMORY_LIMIT` disables enforcement entirely.
#[derive(Debug, Clone, Default)]
pub struct MemoryOverrides {
    pub limit_mb: Option<u64>,
    pub disabled: bool,
}

impl MemoryOverrides {
    pub fn from_env() -> Self {
        let disabled = parse_bool_env("KIRO_RECALL_NO_MEMORY_LIMIT").unwrap_or(false);

        let limit_mb = match std::env::var("KIRO_RECALL_MEMORY_LIMIT_MB") {
            Ok(raw) => match raw.trim().parse::<u64>() {
                Ok(mb) => Some(mb),
                Err(_) => {
                    warn!(value = %raw, "Ignoring unparseable KIRO_RECALL_MEMORY_LIMIT_MB");
                    None
                }
            },
            Err(_) => None,
        };

        Self { limit_mb, disabled }
    }
}

/// Parse a boolean environment variable; None when unset.
pub fn parse_bool_env(name: &str) -> Option<bool> {
    let value = std::env::var(name).ok()?;
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        other => {
            warn!(var = name, value = other, "Unrecognized boolean env value, treating as unset");
            None
        }
    }
}
