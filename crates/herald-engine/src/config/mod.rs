//! Engine config loader (strict parsing).

pub mod schema;

use std::fs;

use herald_core::error::{HeraldError, Result};

pub use schema::{
    CompressionSection, EngineConfig, HistorySection, OverflowPolicy, QueueSection,
    RegistrySection, ResolverSection, RetrySection, StatsSection, SweepSection, TimeoutSection,
};

pub fn load_from_file(path: &str) -> Result<EngineConfig> {
    let s = fs::read_to_string(path)
        .map_err(|e| HeraldError::Internal(format!("read config failed: {e}")))?;
    load_from_str(&s)
}

pub fn load_from_str(s: &str) -> Result<EngineConfig> {
    let cfg: EngineConfig = serde_yaml::from_str(s)
        .map_err(|e| HeraldError::BadRequest(format!("invalid yaml: {e}")))?;
    cfg.validate()?;
    Ok(cfg)
}
