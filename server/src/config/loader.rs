//! Configuration file loading and parsing.

use super::Config;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Standard config file names to search for.
const CONFIG_FILENAMES: &[&str] = &["git-proxy.ron", ".config/git-proxy.ron"];

/// Load configuration from a specific file path.
pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Config> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file: {}", path.display()))?;

    parse_ron(&content).with_context(|| format!("failed to parse config file: {}", path.display()))
}

/// Load configuration with automatic file discovery.
///
/// Searches, in order: the path in the `GIT_PROXY_CONFIG_PATH` environment
/// variable, then `git-proxy.ron` and `.config/git-proxy.ron` relative to the
/// working directory. Falls back to defaults when nothing is found.
pub fn load_with_discovery() -> Result<Config> {
    if let Ok(env_path) = std::env::var("GIT_PROXY_CONFIG_PATH") {
        let path = PathBuf::from(env_path);
        if path.exists() {
            tracing::info!("loading config from GIT_PROXY_CONFIG_PATH: {}", path.display());
            return load_from_file(&path);
        }
        tracing::warn!(
            "GIT_PROXY_CONFIG_PATH specified but file not found: {}",
            path.display()
        );
    }

    for filename in CONFIG_FILENAMES {
        let path = PathBuf::from(filename);
        if path.exists() {
            tracing::info!("loading config from: {}", path.display());
            return load_from_file(&path);
        }
    }

    tracing::info!("no config file found, using defaults");
    Ok(Config::default())
}

fn parse_ron(content: &str) -> Result<Config> {
    ron::from_str(content).context("failed to parse RON configuration")
}
