//! Git Smart HTTP frontends and the plumbing they share.
//!
//! `v2` serves the protocol-v2 surface under `/git/{namespace}/{repo}`;
//! `legacy` serves the v0 advertisement surface under `/github.com/{org}/{repo}`.
//! Both bridge HTTP requests to locally spawned git processes against a bare
//! mirror of the upstream repository.

pub mod errors;
pub mod legacy;
pub mod pkt;
pub mod process;
pub mod refs;
pub mod v2;

use std::io::Read;

use axum::body::Body;
use axum::http::{HeaderMap, Response, StatusCode, header};
use bytes::Bytes;
use flate2::read::GzDecoder;
use serde::Deserialize;

use self::errors::GitHttpError;

pub const UPLOAD_PACK_ADVERTISEMENT: &str = "application/x-git-upload-pack-advertisement";
pub const UPLOAD_PACK_RESULT: &str = "application/x-git-upload-pack-result";

#[derive(Debug, Deserialize)]
pub struct ServiceQuery {
    pub service: Option<String>,
}

/// Git clients must never cache proxy responses; every response carries the
/// same trio of headers git's own http-backend emits.
pub(crate) fn no_cache_response(content_type: &'static str, body: Body) -> Response<Body> {
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type)
        .header(header::EXPIRES, "Fri, 01 Jan 1980 00:00:00 GMT")
        .header(header::PRAGMA, "no-cache")
        .header(header::CACHE_CONTROL, "no-cache, max-age=0, must-revalidate")
        .body(body)
        .expect("response build")
}

pub(crate) fn apply_no_cache_headers(headers: &mut axum::http::HeaderMap) {
    headers.insert(
        header::EXPIRES,
        header::HeaderValue::from_static("Fri, 01 Jan 1980 00:00:00 GMT"),
    );
    headers.insert(header::PRAGMA, header::HeaderValue::from_static("no-cache"));
    headers.insert(
        header::CACHE_CONTROL,
        header::HeaderValue::from_static("no-cache, max-age=0, must-revalidate"),
    );
}

/// Collect the request body, inflating it when the client declared a gzip
/// content encoding. Everything downstream sees plain pkt-line bytes.
pub(crate) async fn read_decoded_body(
    body: Body,
    headers: &HeaderMap,
    limit: usize,
) -> Result<Bytes, GitHttpError> {
    let raw = axum::body::to_bytes(body, limit)
        .await
        .map_err(|_| GitHttpError::protocol("request body unreadable or over the size limit"))?;

    let Some(encoding) = headers.get(header::CONTENT_ENCODING) else {
        return Ok(raw);
    };
    let encoding = encoding
        .to_str()
        .map_err(|_| GitHttpError::protocol("unreadable Content-Encoding header"))?;
    if !encoding.to_ascii_lowercase().contains("gzip") {
        return Ok(raw);
    }

    let mut decoded = Vec::new();
    GzDecoder::new(raw.as_ref())
        .read_to_end(&mut decoded)
        .map_err(|e| GitHttpError::protocol(format!("invalid gzip body: {e}")))?;
    Ok(Bytes::from(decoded))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use std::io::Write;

    #[tokio::test]
    async fn plain_bodies_pass_through() {
        let headers = HeaderMap::new();
        let body = read_decoded_body(Body::from("0000"), &headers, 1024).await.unwrap();
        assert_eq!(body.as_ref(), b"0000");
    }

    #[tokio::test]
    async fn gzip_bodies_are_inflated() {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(b"0014command=ls-refs\n0000").unwrap();
        let compressed = encoder.finish().unwrap();

        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_ENCODING, HeaderValue::from_static("gzip"));
        let body = read_decoded_body(Body::from(compressed), &headers, 1024).await.unwrap();
        assert_eq!(body.as_ref(), b"0014command=ls-refs\n0000");
    }

    #[tokio::test]
    async fn garbage_gzip_is_a_protocol_error() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_ENCODING, HeaderValue::from_static("gzip"));
        let err = read_decoded_body(Body::from("not gzip"), &headers, 1024)
            .await
            .unwrap_err();
        assert!(matches!(err, GitHttpError::Protocol(_)));
    }

    #[test]
    fn no_cache_headers_are_attached() {
        let resp = no_cache_response(UPLOAD_PACK_RESULT, Body::empty());
        assert_eq!(resp.headers().get(header::PRAGMA).unwrap(), "no-cache");
        assert_eq!(
            resp.headers().get(header::CACHE_CONTROL).unwrap(),
            "no-cache, max-age=0, must-revalidate"
        );
        assert_eq!(
            resp.headers().get(header::EXPIRES).unwrap(),
            "Fri, 01 Jan 1980 00:00:00 GMT"
        );
    }
}
