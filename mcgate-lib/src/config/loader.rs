use std::fs;
use std::path::Path;

use crate::config::validator::validate;
use crate::config::Config;
use crate::error::{ProxyError, Result};

/// Supported configuration document formats, picked by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Toml,
    Json,
    Yaml,
}

impl ConfigFormat {
    pub fn from_path(p: &Path) -> Self {
        match p.extension().and_then(|e| e.to_str()) {
            Some("json") => ConfigFormat::Json,
            Some("yaml") | Some("yml") => ConfigFormat::Yaml,
            _ => ConfigFormat::Toml,
        }
    }
}

/// Read, parse and validate a configuration file.
///
/// The whole document is consumed at once; any error leaves nothing applied.
pub fn load_from_path<P: AsRef<Path>>(p: P) -> Result<Config> {
    let p = p.as_ref();
    let txt = fs::read_to_string(p)
        .map_err(|e| ProxyError::Config(format!("Failed to read config file: {e}")))?;
    parse_config(&txt, ConfigFormat::from_path(p))
}

pub fn parse_config(txt: &str, format: ConfigFormat) -> Result<Config> {
    let cfg: Config = match format {
        ConfigFormat::Toml => toml::from_str(txt)
            .map_err(|e| ProxyError::Config(format!("Failed to parse config: {e}")))?,
        ConfigFormat::Json => serde_json::from_str(txt)
            .map_err(|e| ProxyError::Config(format!("Failed to parse config: {e}")))?,
        ConfigFormat::Yaml => serde_norway::from_str(txt)
            .map_err(|e| ProxyError::Config(format!("Failed to parse config: {e}")))?,
    };

    validate(&cfg).map_err(ProxyError::Config)?;

    Ok(cfg)
}
