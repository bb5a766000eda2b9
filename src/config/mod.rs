// src/config/mod.rs
// Configuration and shared constants

pub mod env;
pub mod file;

pub use env::MemoryOverrides;
pub use file::{
    CliSourceConfig, EmbeddingConfig, IdeSourceConfig, MemoryConfig, RecallConfig, SearchConfig,
    SourcesConfig,
};
