use std::fs;
use std::path::Path;

use ahash::AHashSet;

use crate::config::Config;
use crate::error::{Result, SluiceError};

pub fn load_from_path<P: AsRef<Path>>(p: P) -> Result<Config> {
    let txt = fs::read_to_string(p)
        .map_err(|e| SluiceError::Config(format!("Failed to read config file: {e}")))?;
    load_from_str(&txt)
}

pub fn load_from_str(txt: &str) -> Result<Config> {
    let cfg: Config = toml::from_str(txt)
        .map_err(|e| SluiceError::Config(format!("Failed to parse config: {e}")))?;

    validate_config(&cfg)?;

    Ok(cfg)
}

pub fn validate_config(cfg: &Config) -> Result<()> {
    if cfg.throttling.lru_cache_capacity == 0 {
        return Err(SluiceError::Config("lru_cache_capacity must be > 0".into()));
    }
    if cfg.throttling.expire_idle_secs == Some(0) {
        return Err(SluiceError::Config("expire_idle_secs must be > 0".into()));
    }

    let mut operations = AHashSet::new();
    for policy in &cfg.policies {
        if policy.operation.trim().is_empty() {
            return Err(SluiceError::Config("policy operation cannot be empty".into()));
        }
        if policy.limit == 0 {
            return Err(SluiceError::Config(format!(
                "limit must be > 0 for operation: {}",
                policy.operation
            )));
        }
        if let Some(name) = policy.source.name() {
            if name.trim().is_empty() {
                return Err(SluiceError::Config(format!(
                    "{} source requires a name for operation: {}",
                    policy.source.kind(),
                    policy.operation
                )));
            }
        }
        if !operations.insert(policy.operation.as_str()) {
            return Err(SluiceError::Config(format!(
                "Duplicate throttling policy for operation: {}",
                policy.operation
            )));
        }
    }

    Ok(())
}
