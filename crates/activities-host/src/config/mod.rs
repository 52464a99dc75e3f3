//! Activities config loader (strict parsing).

pub mod schema;

use std::fs;

use activities_core::error::{ActivityError, Result};

pub use schema::ActivitiesConfig;

pub fn load_from_file(path: &str) -> Result<ActivitiesConfig> {
    let s = fs::read_to_string(path)
        .map_err(|e| ActivityError::Config(format!("read config failed: {e}")))?;
    load_from_str(&s)
}

pub fn load_from_str(s: &str) -> Result<ActivitiesConfig> {
    let cfg: ActivitiesConfig = serde_yaml::from_str(s)
        .map_err(|e| ActivityError::Config(format!("invalid yaml: {e}")))?;
    cfg.validate()?;
    Ok(cfg)
}
