use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::catalog::{Catalog, default_aliases, default_urls};
use crate::domain::AliasTable;
use crate::error::RoundTripError;
use crate::grid::Codec;

pub const DEFAULT_CONFIG_FILE: &str = "vdb-roundtrip.json";
pub const DEFAULT_WORKERS: usize = 8;
pub const DEFAULT_MAX_GRIDS: usize = 2;
pub const DEFAULT_RENAME_SUFFIX: &str = "_output";
pub const DEFAULT_OUTPUT_SUFFIX: &str = "_blosc_compressed";

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub urls: Option<Vec<String>>,
    #[serde(default)]
    pub aliases: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub workers: Option<usize>,
    #[serde(default)]
    pub max_grids: Option<usize>,
    #[serde(default)]
    pub rename_suffix: Option<String>,
    #[serde(default)]
    pub output_suffix: Option<String>,
    #[serde(default)]
    pub codec: Option<Codec>,
    #[serde(default)]
    pub diff: Option<bool>,
    #[serde(default)]
    pub tools: ToolsEntry,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct ToolsEntry {
    #[serde(default)]
    pub print: Option<String>,
    #[serde(default)]
    pub python: Option<String>,
    #[serde(default)]
    pub compare: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolNames {
    pub print: String,
    pub python: String,
    pub compare: String,
}

impl Default for ToolNames {
    fn default() -> Self {
        Self {
            print: "vdb_print".to_string(),
            python: "python3".to_string(),
            compare: "vdb_ax".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub catalog: Catalog,
    pub aliases: AliasTable,
    pub workers: usize,
    pub max_grids: usize,
    pub rename_suffix: String,
    pub output_suffix: String,
    pub codec: Codec,
    pub diff: bool,
    pub tools: ToolNames,
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads `path`, or `vdb-roundtrip.json` from the current directory when it
    /// exists. Without either, the embedded catalog is used.
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, RoundTripError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        if path.is_none() && !config_path.exists() {
            return Self::resolve_config(Config::default());
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| RoundTripError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| RoundTripError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, RoundTripError> {
        let aliases = config
            .aliases
            .map(AliasTable::new)
            .unwrap_or_else(default_aliases);
        let urls = config.urls.unwrap_or_else(default_urls);
        let catalog = Catalog::build(&urls, &aliases)?;

        let workers = config.workers.unwrap_or(DEFAULT_WORKERS);
        if workers == 0 {
            return Err(RoundTripError::InvalidConfig(
                "workers must be at least 1".to_string(),
            ));
        }
        let max_grids = config.max_grids.unwrap_or(DEFAULT_MAX_GRIDS);
        if max_grids == 0 {
            return Err(RoundTripError::InvalidConfig(
                "max_grids must be at least 1".to_string(),
            ));
        }
        let rename_suffix = config
            .rename_suffix
            .unwrap_or_else(|| DEFAULT_RENAME_SUFFIX.to_string());
        if rename_suffix.is_empty() {
            return Err(RoundTripError::InvalidConfig(
                "rename_suffix must not be empty".to_string(),
            ));
        }
        let output_suffix = config
            .output_suffix
            .unwrap_or_else(|| DEFAULT_OUTPUT_SUFFIX.to_string());
        if output_suffix.is_empty() {
            return Err(RoundTripError::InvalidConfig(
                "output_suffix must not be empty".to_string(),
            ));
        }

        let defaults = ToolNames::default();
        let tools = ToolNames {
            print: config.tools.print.unwrap_or(defaults.print),
            python: config.tools.python.unwrap_or(defaults.python),
            compare: config.tools.compare.unwrap_or(defaults.compare),
        };

        Ok(ResolvedConfig {
            catalog,
            aliases,
            workers,
            max_grids,
            rename_suffix,
            output_suffix,
            codec: config.codec.unwrap_or_default(),
            diff: config.diff.unwrap_or(true),
            tools,
        })
    }
}
