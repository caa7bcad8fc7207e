//! Child-process plumbing: feeding request bodies to git and streaming stdout
//! back without buffering whole responses.

use std::io;
use std::process::Stdio;
use std::str::FromStr;

use axum::body::Body;
use axum::http::header::{HeaderName, HeaderValue};
use axum::http::{Response, StatusCode};
use bytes::{Buf, Bytes, BytesMut};
use httparse::Status;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdout, Command};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use super::errors::GitHttpError;

/// Spawn `command`, write `stdin_bytes` to its stdin (closing it afterwards),
/// and return a response body that streams the child's stdout chunk by chunk.
///
/// The exit status is observed after stdout EOF; by then the response is
/// committed, so a late failure only truncates the body and is logged. If the
/// client goes away the body is dropped, which kills the child.
pub async fn spawn_streaming(
    mut command: Command,
    stdin_bytes: Option<Bytes>,
) -> Result<Body, GitHttpError> {
    command
        .stdin(if stdin_bytes.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true);
    let mut child = command.spawn()?;

    if let Some(bytes) = stdin_bytes {
        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| io::Error::other("child stdin not captured"))?;
        stdin.write_all(&bytes).await?;
        // dropping the handle closes the pipe
    }

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| io::Error::other("child stdout not captured"))?;

    let (tx, rx) = mpsc::channel(8);
    tokio::spawn(forward_stdout(stdout, child, tx, BytesMut::with_capacity(8192)));
    Ok(Body::from_stream(ReceiverStream::new(rx)))
}

/// Spawn a CGI child (`git http-backend`), write the request body to stdin,
/// parse the CGI response headers off the front of stdout, and return them
/// together with a body streaming the rest.
pub async fn spawn_cgi(
    mut command: Command,
    stdin_bytes: Bytes,
) -> Result<(Response<()>, Body), GitHttpError> {
    command
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true);
    let mut child = command.spawn()?;

    let mut stdin = child
        .stdin
        .take()
        .ok_or_else(|| io::Error::other("child stdin not captured"))?;
    stdin.write_all(&stdin_bytes).await?;
    drop(stdin);

    let mut stdout = child
        .stdout
        .take()
        .ok_or_else(|| io::Error::other("child stdout not captured"))?;

    let mut buf = BytesMut::with_capacity(1024);
    let head = loop {
        let n = stdout.read_buf(&mut buf).await?;
        if n == 0 {
            return Err(GitHttpError::Cgi("stdout closed before the header terminator".into()));
        }
        if let Some((body_offset, head)) = parse_cgi_headers(&buf)? {
            buf.advance(body_offset);
            break head;
        }
    };

    let (tx, rx) = mpsc::channel(8);
    tokio::spawn(forward_stdout(stdout, child, tx, buf));
    Ok((head, Body::from_stream(ReceiverStream::new(rx))))
}

async fn forward_stdout(
    mut stdout: ChildStdout,
    mut child: Child,
    tx: mpsc::Sender<Result<Bytes, io::Error>>,
    mut buf: BytesMut,
) {
    if !buf.is_empty() && tx.send(Ok(buf.split().freeze())).await.is_err() {
        tracing::warn!("client went away before the response body started");
        return;
    }
    loop {
        match stdout.read_buf(&mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                if tx.send(Ok(buf.split().freeze())).await.is_err() {
                    tracing::warn!("client went away mid-stream");
                    return;
                }
            }
            Err(e) => {
                tracing::error!("reading git stdout failed: {e}");
                let _ = tx.send(Err(e)).await;
                return;
            }
        }
    }
    match child.wait().await {
        Ok(status) if status.success() => tracing::debug!("git child exited cleanly"),
        Ok(status) => {
            tracing::error!(%status, "git child failed after the response was committed")
        }
        Err(e) => tracing::error!("waiting on git child failed: {e}"),
    }
}

/// Parse the header block a CGI child prints before its body. Returns the
/// offset of the first body byte and a response skeleton carrying the parsed
/// headers, or `None` if the terminator has not arrived yet. A `Status`
/// pseudo-header overrides the response status.
pub fn parse_cgi_headers(buffer: &[u8]) -> Result<Option<(usize, Response<()>)>, GitHttpError> {
    let mut headers = [httparse::EMPTY_HEADER; 16];
    let (body_offset, headers) = match httparse::parse_headers(buffer, &mut headers) {
        Ok(Status::Complete(v)) => v,
        Ok(Status::Partial) => return Ok(None),
        Err(e) => return Err(GitHttpError::Cgi(e.to_string())),
    };

    let mut response = Response::new(());
    for header in headers {
        let name = HeaderName::from_str(header.name)
            .map_err(|_| GitHttpError::Cgi(format!("bad header name '{}'", header.name)))?;
        let value = HeaderValue::from_bytes(header.value)
            .map_err(|_| GitHttpError::Cgi(format!("bad value for header '{}'", header.name)))?;
        response.headers_mut().insert(name, value);
    }

    if let Some(status) = response.headers_mut().remove("Status").filter(|s| s.len() >= 3) {
        if let Ok(status) = StatusCode::from_bytes(&status.as_ref()[..3]) {
            *response.status_mut() = status;
        }
    }

    Ok(Some((body_offset, response)))
}
