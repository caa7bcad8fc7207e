//! Configuration for the proxy.
//!
//! Loaded from a RON file by the [`loader`] module; every field has a default
//! so an absent config yields a runnable (if namespace-less) proxy.

pub mod loader;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct Config {
    /// Path to the git binary invoked for every upstream operation.
    #[serde(default = "default_git_path")]
    pub git_path: PathBuf,

    /// Root under which bare mirrors are kept, one per `<namespace>/<name>`.
    #[serde(default = "default_data_root")]
    pub data_root: PathBuf,

    /// Address the HTTP listener binds to.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Maps a URL namespace to the upstream URL prefix it mirrors; the full
    /// upstream URL of a repository is the prefix concatenated with its name.
    #[serde(default)]
    pub namespaces: HashMap<String, String>,

    /// Cap on a decoded request body.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,

    /// Bound on concurrently spawned git children.
    #[serde(default = "default_max_git_processes")]
    pub max_git_processes: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            git_path: default_git_path(),
            data_root: default_data_root(),
            listen_addr: default_listen_addr(),
            namespaces: HashMap::new(),
            max_body_bytes: default_max_body_bytes(),
            max_git_processes: default_max_git_processes(),
        }
    }
}

fn default_git_path() -> PathBuf {
    PathBuf::from("/usr/bin/git")
}

fn default_data_root() -> PathBuf {
    PathBuf::from("var/data")
}

fn default_listen_addr() -> String {
    "0.0.0.0:8000".to_string()
}

fn default_max_body_bytes() -> usize {
    32 * 1024 * 1024
}

fn default_max_git_processes() -> usize {
    32
}
