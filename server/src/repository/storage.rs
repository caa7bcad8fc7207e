//! On-disk mirror storage and the git subprocesses that maintain it.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::sync::Mutex;

use crate::git_http::errors::GitHttpError;

/// Owns the local bare mirrors under `data_root` and the mapping from URL
/// namespaces to upstream URL prefixes.
///
/// Presence of the mirror directory is the only state tracked; freshness is
/// re-established per request by `refresh`/`fetch_refs`. A partially cloned
/// directory reads as present and needs operator cleanup.
#[derive(Clone)]
pub struct MirrorStorage {
    git_path: PathBuf,
    data_root: PathBuf,
    namespaces: HashMap<String, String>,
    clone_gates: Arc<Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>>,
}

impl MirrorStorage {
    pub fn new(git_path: PathBuf, data_root: PathBuf, namespaces: HashMap<String, String>) -> Self {
        MirrorStorage {
            git_path,
            data_root,
            namespaces,
            clone_gates: Arc::default(),
        }
    }

    pub fn git_path(&self) -> &Path {
        &self.git_path
    }

    pub fn data_root(&self) -> &Path {
        &self.data_root
    }

    /// `<data-root>/<namespace>/<name>`, a bare mirror once initialised.
    pub fn local_path(&self, namespace: &str, repo: &str) -> PathBuf {
        self.data_root.join(namespace).join(repo)
    }

    pub fn upstream_url(&self, namespace: &str, repo: &str) -> Result<String, GitHttpError> {
        let prefix = self
            .namespaces
            .get(namespace)
            .ok_or_else(|| GitHttpError::UnknownNamespace(namespace.to_string()))?;
        Ok(format!("{prefix}{repo}"))
    }

    /// Lazily initialise the mirror for `(namespace, repo)` and return its
    /// path. Returns immediately when the directory already exists.
    pub async fn ensure_present(
        &self,
        namespace: &str,
        repo: &str,
    ) -> Result<PathBuf, GitHttpError> {
        let local = self.local_path(namespace, repo);
        if !local.is_dir() {
            let upstream = self.upstream_url(namespace, repo)?;
            self.clone_mirror(&upstream, &local).await?;
        }
        Ok(local)
    }

    /// `git clone --quiet --mirror --single-branch <upstream> <local>`.
    ///
    /// Single-flighted per target path so concurrent first requests share one
    /// clone instead of racing.
    pub async fn clone_mirror(&self, upstream: &str, local: &Path) -> Result<(), GitHttpError> {
        let gate = {
            let mut gates = self.clone_gates.lock().await;
            gates.entry(local.to_path_buf()).or_default().clone()
        };
        let _held = gate.lock().await;
        if local.is_dir() {
            return Ok(());
        }

        tracing::info!(upstream, local = %local.display(), "cloning mirror");
        let status = Command::new(&self.git_path)
            .arg("clone")
            .arg("--quiet")
            .arg("--mirror")
            .arg("--single-branch")
            .arg(upstream)
            .arg(local)
            .status()
            .await?;
        exit_ok("clone", status)
    }

    /// Fetch the given refspecs into the mirror over `--stdin`.
    ///
    /// `--no-write-fetch-head` keeps concurrent refreshes of one mirror from
    /// racing on `FETCH_HEAD`.
    pub async fn refresh(&self, local: &Path, refspecs: &[String]) -> Result<(), GitHttpError> {
        tracing::debug!(?refspecs, mirror = %local.display(), "fetching refspecs");
        let mut child = Command::new(&self.git_path)
            .arg(format!("--git-dir={}", local.display()))
            .arg("fetch")
            .arg("origin")
            .arg("--quiet")
            .arg("--no-write-fetch-head")
            .arg("--no-show-forced-updates")
            .arg("--stdin")
            .stdin(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(refspecs.join("\n").as_bytes()).await?;
        }
        let status = child.wait().await?;
        exit_ok("fetch", status)
    }

    /// Fetch specific refs by name (legacy frontend).
    pub async fn fetch_refs(&self, local: &Path, refs: &[String]) -> Result<(), GitHttpError> {
        tracing::debug!(?refs, mirror = %local.display(), "fetching refs");
        let status = Command::new(&self.git_path)
            .arg(format!("--git-dir={}", local.display()))
            .arg("fetch")
            .arg("origin")
            .arg("--no-show-forced-updates")
            .args(refs)
            .stderr(Stdio::null())
            .status()
            .await?;
        exit_ok("fetch", status)
    }

    /// Capture `git ls-remote --symref <upstream>` for advertisement
    /// synthesis.
    pub async fn ls_remote(&self, upstream: &str) -> Result<Vec<u8>, GitHttpError> {
        let output = Command::new(&self.git_path)
            .arg("ls-remote")
            .arg("--symref")
            .arg(upstream)
            .stderr(Stdio::null())
            .output()
            .await?;
        if !output.status.success() {
            return Err(GitHttpError::GitFailed {
                command: "ls-remote",
                status: output.status,
            });
        }
        Ok(output.stdout)
    }
}

fn exit_ok(command: &'static str, status: ExitStatus) -> Result<(), GitHttpError> {
    if status.success() {
        Ok(())
    } else {
        Err(GitHttpError::GitFailed { command, status })
    }
}
