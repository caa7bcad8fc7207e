//! Smart HTTP protocol v2 frontend.
//!
//! Requests are gated on `Git-Protocol: version=2`. The GET endpoint answers
//! the capability advertisement straight from `git upload-pack
//! --http-backend-info-refs`; the POST endpoint inspects the pkt-line stream
//! far enough to know whether the mirror needs refreshing, then hands the
//! untouched body to `git upload-pack --stateless-rpc`.

use std::time::Instant;

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::Response;
use metrics::{counter, histogram};
use tokio::process::Command;

use super::errors::GitHttpError;
use super::pkt::{Pkt, decode_pkt_lines};
use super::{
    ServiceQuery, UPLOAD_PACK_ADVERTISEMENT, UPLOAD_PACK_RESULT, no_cache_response, process,
    read_decoded_body,
};
use crate::api::server::AppState;
use crate::validation::validate_path_segment;

const REF_PREFIX: &[u8] = b"ref-prefix ";

/// Closed set of protocol-v2 commands the proxy forwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadPackCommand {
    LsRefs,
    Fetch,
}

impl UploadPackCommand {
    /// The first pkt-line of a v2 request must be `command=<name>`.
    pub fn parse(first: Option<&Pkt>) -> Result<Self, GitHttpError> {
        let Some(Pkt::Data(payload)) = first else {
            return Err(GitHttpError::protocol("request must open with a command pkt-line"));
        };
        let Some(name) = payload.strip_prefix(b"command=") else {
            return Err(GitHttpError::protocol("first pkt-line does not carry a command"));
        };
        match name.strip_suffix(b"\n").unwrap_or(name) {
            b"ls-refs" => Ok(UploadPackCommand::LsRefs),
            b"fetch" => Ok(UploadPackCommand::Fetch),
            other => Err(GitHttpError::protocol(format!(
                "unknown command '{}'",
                String::from_utf8_lossy(other)
            ))),
        }
    }
}

// GET /git/{namespace}/{repo}/info/refs?service=git-upload-pack
pub async fn info_refs(
    State(state): State<AppState>,
    Path((namespace, repo)): Path<(String, String)>,
    Query(q): Query<ServiceQuery>,
    headers: HeaderMap,
) -> Result<Response, GitHttpError> {
    let start = Instant::now();
    require_protocol_v2(&headers)?;
    require_upload_pack_service(&q)?;
    validate_repo_segments(&namespace, &repo)?;

    let local = state.storage.ensure_present(&namespace, &repo).await?;

    let mut cmd = Command::new(state.storage.git_path());
    cmd.arg("upload-pack")
        .arg("--http-backend-info-refs")
        .arg(&local);
    cmd.env_clear().env("GIT_PROTOCOL", "version=2");
    let body = process::spawn_streaming(cmd, None).await?;

    counter!("git_http.info_refs", "frontend" => "v2").increment(1);
    histogram!("git_http.info_refs_ms").record(start.elapsed().as_millis() as f64);
    Ok(no_cache_response(UPLOAD_PACK_ADVERTISEMENT, body))
}

// POST /git/{namespace}/{repo}/git-upload-pack
pub async fn upload_pack(
    State(state): State<AppState>,
    Path((namespace, repo)): Path<(String, String)>,
    headers: HeaderMap,
    body: Body,
) -> Result<Response, GitHttpError> {
    let start = Instant::now();
    require_protocol_v2(&headers)?;
    validate_repo_segments(&namespace, &repo)?;

    let _permit = state.git_semaphore.clone().acquire_owned().await.ok();

    let body = read_decoded_body(body, &headers, state.max_body_bytes).await?;
    let (pkts, remainder) = decode_pkt_lines(&body)?;
    if !remainder.is_empty() {
        return Err(GitHttpError::protocol(format!(
            "{} trailing bytes after the pkt-line stream",
            remainder.len()
        )));
    }

    let command = UploadPackCommand::parse(pkts.first())?;
    let local = state.storage.local_path(&namespace, &repo);

    // A v2 client asks for ls-refs before fetch, so refreshing here is what
    // makes the subsequent fetch observe up-to-date references. No prefixes
    // means the client wants the mirror's full current state as-is.
    if command == UploadPackCommand::LsRefs {
        let refspecs = ref_prefix_refspecs(&pkts);
        if !refspecs.is_empty() {
            state.storage.refresh(&local, &refspecs).await?;
        }
    }

    let mut cmd = Command::new(state.storage.git_path());
    cmd.arg("upload-pack").arg("--stateless-rpc").arg(&local);
    cmd.env_clear().env("GIT_PROTOCOL", "version=2");
    let stream = process::spawn_streaming(cmd, Some(body)).await?;

    counter!("git_http.upload_pack", "frontend" => "v2").increment(1);
    histogram!("git_http.upload_pack_ms").record(start.elapsed().as_millis() as f64);
    Ok(no_cache_response(UPLOAD_PACK_RESULT, stream))
}

fn require_protocol_v2(headers: &HeaderMap) -> Result<(), GitHttpError> {
    let value = headers
        .get("git-protocol")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if value == "version=2" {
        Ok(())
    } else {
        Err(GitHttpError::protocol(format!("git protocol '{value}' unsupported")))
    }
}

fn require_upload_pack_service(q: &ServiceQuery) -> Result<(), GitHttpError> {
    if q.service.as_deref() == Some("git-upload-pack") {
        Ok(())
    } else {
        Err(GitHttpError::protocol(format!(
            "unsupported service '{}'",
            q.service.as_deref().unwrap_or("")
        )))
    }
}

fn validate_repo_segments(namespace: &str, repo: &str) -> Result<(), GitHttpError> {
    for segment in [namespace, repo] {
        validate_path_segment(segment).map_err(GitHttpError::protocol)?;
    }
    Ok(())
}

/// Every `ref-prefix P` pkt becomes the glob refspec `P*:P*`, mirroring the
/// matching remote refs onto the same local names.
fn ref_prefix_refspecs(pkts: &[Pkt]) -> Vec<String> {
    let mut refspecs = Vec::new();
    for pkt in pkts {
        let Pkt::Data(payload) = pkt else { continue };
        let Some(prefix) = payload.strip_prefix(REF_PREFIX) else {
            continue;
        };
        let prefix = String::from_utf8_lossy(prefix);
        let prefix = prefix.trim_end();
        refspecs.push(format!("{prefix}*:{prefix}*"));
    }
    refspecs
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn parses_known_commands() {
        let pkt = Pkt::Data(b"command=ls-refs\n".to_vec());
        assert_eq!(
            UploadPackCommand::parse(Some(&pkt)).unwrap(),
            UploadPackCommand::LsRefs
        );
        let pkt = Pkt::Data(b"command=fetch\n".to_vec());
        assert_eq!(
            UploadPackCommand::parse(Some(&pkt)).unwrap(),
            UploadPackCommand::Fetch
        );
    }

    #[test]
    fn rejects_non_command_openings() {
        assert!(UploadPackCommand::parse(None).is_err());
        assert!(UploadPackCommand::parse(Some(&Pkt::Flush)).is_err());
        let pkt = Pkt::Data(b"want deadbeef\n".to_vec());
        assert!(UploadPackCommand::parse(Some(&pkt)).is_err());
        let pkt = Pkt::Data(b"command=push\n".to_vec());
        assert!(UploadPackCommand::parse(Some(&pkt)).is_err());
    }

    #[test]
    fn ref_prefixes_become_glob_refspecs() {
        let pkts = vec![
            Pkt::Data(b"command=ls-refs\n".to_vec()),
            Pkt::Delim,
            Pkt::Data(b"peel\n".to_vec()),
            Pkt::Data(b"ref-prefix refs/heads/\n".to_vec()),
            Pkt::Data(b"ref-prefix refs/tags/\n".to_vec()),
            Pkt::Flush,
        ];
        assert_eq!(
            ref_prefix_refspecs(&pkts),
            vec![
                "refs/heads/*:refs/heads/*".to_string(),
                "refs/tags/*:refs/tags/*".to_string(),
            ]
        );
    }

    #[test]
    fn no_prefixes_means_no_refspecs() {
        let pkts = vec![Pkt::Data(b"command=fetch\n".to_vec()), Pkt::Flush];
        assert!(ref_prefix_refspecs(&pkts).is_empty());
    }

    #[test]
    fn protocol_gate_wants_exactly_version_2() {
        let mut headers = HeaderMap::new();
        assert!(require_protocol_v2(&headers).is_err());

        headers.insert("git-protocol", HeaderValue::from_static("version=1"));
        assert!(require_protocol_v2(&headers).is_err());

        headers.insert("git-protocol", HeaderValue::from_static("version=2"));
        assert!(require_protocol_v2(&headers).is_ok());
    }
}
