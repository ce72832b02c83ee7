use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

use crate::engine::{DEFAULT_BLOCK_SIZE_MB, DEFAULT_MAX_CONNECTS};
use crate::options::DEFAULT_AGENT;

/// Engine configuration loaded from `~/.config/htx/config.toml`.
///
/// The library never reads this implicitly; hosts (e.g. the CLI) load it
/// and feed the values into `HttpClient::start_up` and the submission
/// calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HtxConfig {
    /// Maximum total in-flight transfers.
    pub max_connects: usize,
    /// Download chunk size in megabytes.
    pub block_size_mb: usize,
    /// User-agent header sent with every transfer.
    pub user_agent: String,
}

impl Default for HtxConfig {
    fn default() -> Self {
        Self {
            max_connects: DEFAULT_MAX_CONNECTS,
            block_size_mb: DEFAULT_BLOCK_SIZE_MB,
            user_agent: DEFAULT_AGENT.to_string(),
        }
    }
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("htx")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<HtxConfig> {
    let path = config_path()?;
    if !path.exists() {
        let default_cfg = HtxConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }

    let data = fs::read_to_string(&path)?;
    let cfg: HtxConfig = toml::from_str(&data)?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_values() {
        let cfg = HtxConfig::default();
        assert_eq!(cfg.max_connects, 20);
        assert_eq!(cfg.block_size_mb, 20);
        assert!(cfg.user_agent.starts_with("htx/"));
    }

    #[test]
    fn config_toml_roundtrip() {
        let cfg = HtxConfig::default();
        let toml = toml::to_string_pretty(&cfg).unwrap();
        let parsed: HtxConfig = toml::from_str(&toml).unwrap();
        assert_eq!(parsed.max_connects, cfg.max_connects);
        assert_eq!(parsed.block_size_mb, cfg.block_size_mb);
        assert_eq!(parsed.user_agent, cfg.user_agent);
    }

    #[test]
    fn config_toml_custom_values() {
        let toml = r#"
            max_connects = 8
            block_size_mb = 4
            user_agent = "probe/1.0"
        "#;
        let cfg: HtxConfig = toml::from_str(toml).unwrap();
        assert_eq!(cfg.max_connects, 8);
        assert_eq!(cfg.block_size_mb, 4);
        assert_eq!(cfg.user_agent, "probe/1.0");
    }
}
