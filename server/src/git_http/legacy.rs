//! Legacy (protocol v0/v1) frontend for upstreams on github.com.
//!
//! The advertisement is synthesised from a cached `git ls-remote --symref`
//! run rather than from the mirror, so a GET never touches the local clone.
//! The follow-up POST maps `want` object ids back to ref names through the
//! reference cache, fetches exactly those refs into the mirror, then proxies
//! the negotiation through `git http-backend`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, Response, header};
use bytes::Bytes;
use metrics::{counter, histogram};
use tokio::process::Command;

use super::errors::GitHttpError;
use super::pkt::{Pkt, decode_pkt_lines, encode_pkt_line};
use super::refs::{RemoteRefs, parse_ls_remote};
use super::{
    ServiceQuery, UPLOAD_PACK_ADVERTISEMENT, UPLOAD_PACK_RESULT, apply_no_cache_headers,
    no_cache_response, process, read_decoded_body,
};
use crate::api::server::AppState;
use crate::validation::validate_path_segment;

/// Fixed capability set advertised on the first ref line, matching what a
/// stock git 2.30 upload-pack announces.
const CAPABILITIES: &str = "multi_ack thin-pack side-band side-band-64k ofs-delta shallow \
     deepen-since deepen-not deepen-relative no-progress include-tag multi_ack_detailed \
     no-done object-format=sha1 agent=git/2.30.2";

const NAMESPACE: &str = "github.com";
const WANT: &[u8] = b"want ";

// GET /github.com/{org}/{repo}/info/refs?service=git-upload-pack
pub async fn info_refs(
    State(state): State<AppState>,
    Path((org, repo)): Path<(String, String)>,
    Query(q): Query<ServiceQuery>,
) -> Result<Response<Body>, GitHttpError> {
    let start = Instant::now();
    if q.service.as_deref() != Some("git-upload-pack") {
        return Err(GitHttpError::protocol(format!(
            "unsupported service '{}'",
            q.service.as_deref().unwrap_or("")
        )));
    }
    validate_repo_segments(&org, &repo)?;

    let key = (org.clone(), repo.clone());
    if let Some(cached) = state.caches.advertisements.get(&key).await {
        counter!("git_http.info_refs", "frontend" => "legacy", "cache" => "hit").increment(1);
        return Ok(no_cache_response(UPLOAD_PACK_ADVERTISEMENT, Body::from(cached)));
    }

    let stdout = state.storage.ls_remote(&upstream_url(&org, &repo)).await?;
    let refs = parse_ls_remote(&stdout)?;
    let advertisement = Bytes::from(build_advertisement(&refs));

    state
        .caches
        .advertisements
        .insert(key.clone(), advertisement.clone())
        .await;
    state.caches.refs.insert(key, Arc::new(objid_map(&refs))).await;

    counter!("git_http.info_refs", "frontend" => "legacy", "cache" => "miss").increment(1);
    histogram!("git_http.info_refs_ms").record(start.elapsed().as_millis() as f64);
    Ok(no_cache_response(UPLOAD_PACK_ADVERTISEMENT, Body::from(advertisement)))
}

// POST /github.com/{org}/{repo}/git-upload-pack
pub async fn upload_pack(
    State(state): State<AppState>,
    Path((org, repo)): Path<(String, String)>,
    headers: HeaderMap,
    body: Body,
) -> Result<Response<Body>, GitHttpError> {
    let start = Instant::now();
    validate_repo_segments(&org, &repo)?;

    let _permit = state.git_semaphore.clone().acquire_owned().await.ok();

    let body = read_decoded_body(body, &headers, state.max_body_bytes).await?;
    let (pkts, remainder) = decode_pkt_lines(&body)?;
    if !remainder.is_empty() {
        return Err(GitHttpError::protocol(format!(
            "{} trailing bytes after the pkt-line stream",
            remainder.len()
        )));
    }

    let key = (org.clone(), repo.clone());
    let ref_map = state
        .caches
        .refs
        .get(&key)
        .await
        .ok_or_else(|| GitHttpError::RefCacheMiss(org.clone(), repo.clone()))?;
    let wanted = wanted_refs(&pkts, &ref_map);

    let local = state.storage.local_path(NAMESPACE, &format!("{org}/{repo}"));
    if !local.is_dir() {
        state
            .storage
            .clone_mirror(&upstream_url(&org, &repo), &local)
            .await?;
    }
    if !wanted.is_empty() {
        state.storage.fetch_refs(&local, &wanted).await?;
    }

    let cmd = http_backend_command(&state, &org, &repo, &headers, body.len());
    let (head, cgi_body) = process::spawn_cgi(cmd, body).await?;

    let (mut parts, ()) = head.into_parts();
    if !parts.headers.contains_key(header::CONTENT_TYPE) {
        parts
            .headers
            .insert(header::CONTENT_TYPE, header::HeaderValue::from_static(UPLOAD_PACK_RESULT));
    }
    apply_no_cache_headers(&mut parts.headers);

    counter!("git_http.upload_pack", "frontend" => "legacy").increment(1);
    histogram!("git_http.upload_pack_ms").record(start.elapsed().as_millis() as f64);
    Ok(Response::from_parts(parts, cgi_body))
}

fn upstream_url(org: &str, repo: &str) -> String {
    format!("git@github.com:{org}/{repo}")
}

fn validate_repo_segments(org: &str, repo: &str) -> Result<(), GitHttpError> {
    for segment in [org, repo] {
        validate_path_segment(segment).map_err(GitHttpError::protocol)?;
    }
    Ok(())
}

/// Synthesise the protocol-v0 advertisement: service banner, flush, one pkt
/// per resolved ref (the first carrying the capability string and symref
/// hints behind a NUL), closing flush.
fn build_advertisement(refs: &RemoteRefs) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&encode_pkt_line(b"# service=git-upload-pack\n"));
    Pkt::Flush.encode_into(&mut out);
    for (idx, resolved) in refs.resolved.iter().enumerate() {
        let mut line = Vec::new();
        line.extend_from_slice(resolved.objid.as_bytes());
        line.push(b' ');
        line.extend_from_slice(resolved.refname.as_bytes());
        if idx == 0 {
            line.push(0);
            line.extend_from_slice(CAPABILITIES.as_bytes());
            for sym in &refs.sym_refs {
                line.extend_from_slice(format!(" symref={}:{}", sym.source, sym.target).as_bytes());
            }
        }
        line.push(b'\n');
        out.extend_from_slice(&encode_pkt_line(&line));
    }
    Pkt::Flush.encode_into(&mut out);
    out
}

/// The objid→refname map stored alongside the advertisement. Later records
/// overwrite earlier ones, so an object id shared by `HEAD` and its branch
/// maps to the concrete ref name.
fn objid_map(refs: &RemoteRefs) -> HashMap<String, String> {
    refs.resolved
        .iter()
        .map(|r| (r.objid.clone(), r.refname.clone()))
        .collect()
}

/// Resolve `want <objid>` pkts to unique ref names, preserving order. Object
/// ids the upstream no longer advertises are skipped.
fn wanted_refs(pkts: &[Pkt], ref_map: &HashMap<String, String>) -> Vec<String> {
    let mut wanted: Vec<String> = Vec::new();
    for pkt in pkts {
        let Pkt::Data(payload) = pkt else { continue };
        let Some(rest) = payload.strip_prefix(WANT) else {
            continue;
        };
        let rest = String::from_utf8_lossy(rest);
        let Some(objid) = rest.split_whitespace().next() else {
            continue;
        };
        if let Some(refname) = ref_map.get(objid) {
            if !wanted.iter().any(|r| r == refname) {
                wanted.push(refname.clone());
            }
        }
    }
    wanted
}

/// Build the `git http-backend` CGI invocation. Request headers become
/// `HTTP_<UPPER_SNAKE>` variables; `Content-Encoding` is blanked because the
/// body has already been decoded, and `CONTENT_LENGTH` reflects the decoded
/// size.
fn http_backend_command(
    state: &AppState,
    org: &str,
    repo: &str,
    headers: &HeaderMap,
    body_len: usize,
) -> Command {
    let project_root = state.storage.data_root().join(NAMESPACE);
    let mut cmd = Command::new(state.storage.git_path());
    cmd.arg("http-backend");
    for (name, value) in headers {
        let Ok(value) = value.to_str() else { continue };
        cmd.env(cgi_header_name(name.as_str()), value);
    }
    cmd.env("REQUEST_METHOD", "POST")
        .env("GIT_PROJECT_ROOT", &project_root)
        .env("PATH_INFO", format!("/{org}/{repo}/git-upload-pack"))
        .env("GIT_HTTP_EXPORT_ALL", "1")
        .env("HTTP_CONTENT_ENCODING", "")
        .env("CONTENT_LENGTH", body_len.to_string());
    if let Some(content_type) = headers.get(header::CONTENT_TYPE).and_then(|v| v.to_str().ok()) {
        cmd.env("CONTENT_TYPE", content_type);
    }
    cmd
}

fn cgi_header_name(header: &str) -> String {
    let mut name = String::with_capacity(5 + header.len());
    name.push_str("HTTP_");
    for c in header.chars() {
        name.push(match c {
            '-' => '_',
            c => c.to_ascii_uppercase(),
        });
    }
    name
}
