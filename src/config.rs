use std::fs;
use std::path::PathBuf;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use crate::domain::{SourceTag, WriteMode};
use crate::error::EpiError;

pub const DEFAULT_CONFIG_FILE: &str = "epiflow.json";
pub const GOVGR_TOKEN_ENV: &str = "GOVGR_TOKEN";
pub const DEFAULT_WINDOW_DAYS: u32 = 5;

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub output: Option<Utf8PathBuf>,
    #[serde(default)]
    pub tmp: Option<Utf8PathBuf>,
    #[serde(default)]
    pub data: Option<Utf8PathBuf>,
    #[serde(default)]
    pub store: Option<Utf8PathBuf>,
    #[serde(default)]
    pub rebuild: Option<bool>,
    #[serde(default)]
    pub window_days: Option<u32>,
    #[serde(default)]
    pub sources: Option<Vec<String>>,
    #[serde(default)]
    pub govgr_token: Option<String>,
}

/// Command-line values that take precedence over the file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub output: Option<Utf8PathBuf>,
    pub tmp: Option<Utf8PathBuf>,
    pub data: Option<Utf8PathBuf>,
    pub store: Option<Utf8PathBuf>,
    pub rebuild: bool,
    pub window_days: Option<u32>,
    pub sources: Option<Vec<String>>,
    pub govgr_token: Option<String>,
    pub fetch: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedConfig {
    pub output_dir: Utf8PathBuf,
    pub tmp_dir: Utf8PathBuf,
    pub data_dir: Utf8PathBuf,
    pub store_dir: Utf8PathBuf,
    pub mode: WriteMode,
    pub window_days: u32,
    pub sources: Vec<SourceTag>,
    pub govgr_token: Option<String>,
    pub fetch: bool,
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads `path`, or `epiflow.json` when present, applies the overrides
    /// and falls back to `GOVGR_TOKEN` for the API token.
    pub fn resolve(path: Option<&str>, overrides: Overrides) -> Result<ResolvedConfig, EpiError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        let config = if path.is_none() && !config_path.exists() {
            Config::default()
        } else {
            let content = fs::read_to_string(&config_path)
                .map_err(|_| EpiError::ConfigRead(config_path.clone()))?;
            serde_json::from_str(&content).map_err(|err| EpiError::ConfigParse(err.to_string()))?
        };

        let mut resolved = Self::resolve_config(config, overrides)?;
        if resolved.govgr_token.is_none() {
            resolved.govgr_token = std::env::var(GOVGR_TOKEN_ENV)
                .ok()
                .filter(|token| !token.trim().is_empty());
        }
        Ok(resolved)
    }

    pub fn resolve_config(
        config: Config,
        overrides: Overrides,
    ) -> Result<ResolvedConfig, EpiError> {
        let window_days = overrides
            .window_days
            .or(config.window_days)
            .unwrap_or(DEFAULT_WINDOW_DAYS);
        if window_days == 0 {
            return Err(EpiError::InvalidConfig(
                "window_days must be at least 1".to_string(),
            ));
        }

        let sources = parse_sources(overrides.sources.or(config.sources))?;
        let rebuild = overrides.rebuild || config.rebuild.unwrap_or(false);

        Ok(ResolvedConfig {
            output_dir: overrides
                .output
                .or(config.output)
                .unwrap_or_else(|| Utf8PathBuf::from("data")),
            tmp_dir: overrides
                .tmp
                .or(config.tmp)
                .unwrap_or_else(|| Utf8PathBuf::from("tmp")),
            data_dir: overrides
                .data
                .or(config.data)
                .unwrap_or_else(|| Utf8PathBuf::from("data")),
            store_dir: overrides
                .store
                .or(config.store)
                .unwrap_or_else(|| Utf8PathBuf::from("store")),
            mode: if rebuild {
                WriteMode::Rebuild
            } else {
                WriteMode::Incremental
            },
            window_days,
            sources,
            govgr_token: overrides.govgr_token.or(config.govgr_token),
            fetch: overrides.fetch,
        })
    }
}

/// `None`, an empty list or `all` select the default set.
fn parse_sources(values: Option<Vec<String>>) -> Result<Vec<SourceTag>, EpiError> {
    let values = values.unwrap_or_default();
    if values.is_empty() || values.iter().any(|value| value.trim().eq_ignore_ascii_case("all")) {
        return Ok(SourceTag::DEFAULT.to_vec());
    }
    let mut tags = Vec::new();
    for value in values {
        let tag: SourceTag = value.parse()?;
        if !tags.contains(&tag) {
            tags.push(tag);
        }
    }
    Ok(tags)
}
