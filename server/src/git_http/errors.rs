use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use super::pkt::BadLengthPrefix;
use super::refs::RefParseError;

/// Request failures surfaced to HTTP clients. Protocol violations are the
/// client's fault and map to 400; everything else is a 500.
#[derive(Debug, Error)]
pub enum GitHttpError {
    #[error("{0}")]
    Protocol(String),
    #[error("{0}")]
    PktLine(#[from] BadLengthPrefix),
    #[error("unknown namespace '{0}'")]
    UnknownNamespace(String),
    #[error("git {command} exited with {status}")]
    GitFailed {
        command: &'static str,
        status: std::process::ExitStatus,
    },
    #[error("no cached advertisement for {0}/{1}; fetch /info/refs first")]
    RefCacheMiss(String, String),
    #[error("malformed CGI response from git http-backend: {0}")]
    Cgi(String),
    #[error(transparent)]
    RefParse(#[from] RefParseError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl GitHttpError {
    pub fn protocol(detail: impl Into<String>) -> Self {
        Self::Protocol(detail.into())
    }

    fn status(&self) -> StatusCode {
        match self {
            GitHttpError::Protocol(_) | GitHttpError::PktLine(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for GitHttpError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("request failed: {self}");
        } else {
            tracing::debug!("rejected request: {self}");
        }
        (status, self.to_string()).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_errors_are_bad_requests() {
        let resp = GitHttpError::protocol("first pkt is not a command").into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn everything_else_is_internal() {
        let resp = GitHttpError::UnknownNamespace("ns".into()).into_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let resp = GitHttpError::RefCacheMiss("org".into(), "repo".into()).into_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
