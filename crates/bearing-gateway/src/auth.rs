use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{header::AUTHORIZATION, HeaderMap, HeaderValue},
    middleware::Next,
    response::Response,
};
use bearing_core::{Identity, InvalidCredential, TokenVerifier};

use crate::error::GatewayError;
use crate::server::AppState;

/// Carries the verified subject to upstream services.
pub const IDENTITY_HEADER: &str = "x-user-id";

/// Gateway-local endpoints that never require a credential. Matched exactly so
/// a service sharing one of these names is still gated.
const LOCAL_PUBLIC_PATHS: [&str; 3] = ["/health", "/metrics", "/api-docs/openapi.json"];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Rejection {
    #[error("missing authorization header")]
    Missing,

    #[error("authorization header is not a bearer credential")]
    MalformedScheme,

    #[error("{0}")]
    Invalid(InvalidCredential),
}

impl Rejection {
    pub fn reason(&self) -> &'static str {
        match self {
            Rejection::Missing => "missing",
            Rejection::MalformedScheme => "malformed_scheme",
            Rejection::Invalid(e) => e.reason(),
        }
    }
}

/// Gate in front of routing: turns a bearer credential into a trusted
/// `X-User-Id` header or rejects the request.
pub struct AuthFilter {
    verifier: Arc<TokenVerifier>,
    strip_credential: bool,
    public_paths: Vec<String>,
}

impl AuthFilter {
    pub fn new(verifier: Arc<TokenVerifier>) -> Self {
        Self {
            verifier,
            strip_credential: false,
            public_paths: Vec::new(),
        }
    }

    /// Drop the `Authorization` header after a successful check.
    pub fn strip_credential(mut self, strip: bool) -> Self {
        self.strip_credential = strip;
        self
    }

    pub fn public_paths(mut self, prefixes: Vec<String>) -> Self {
        self.public_paths = prefixes;
        self
    }

    pub fn is_public(&self, path: &str) -> bool {
        LOCAL_PUBLIC_PATHS.iter().any(|local| *local == path)
            || self.public_paths.iter().any(|prefix| path_has_prefix(path, prefix))
    }

    /// Authenticates a request in place.
    ///
    /// The caller's `X-User-Id` is always discarded. On success the verified
    /// subject takes its place; on failure the headers carry no identity.
    pub fn check(&self, headers: &mut HeaderMap) -> Result<Identity, Rejection> {
        headers.remove(IDENTITY_HEADER);

        let credential = bearer_credential(headers)?;
        let identity = self.verifier.verify(credential).map_err(Rejection::Invalid)?;

        // Subjects with control characters never verify, so this only fails on
        // values the header type refuses for other reasons.
        let value = HeaderValue::from_str(&identity.subject)
            .map_err(|_| Rejection::Invalid(InvalidCredential::Malformed))?;
        headers.insert(IDENTITY_HEADER, value);
        if self.strip_credential {
            headers.remove(AUTHORIZATION);
        }
        Ok(identity)
    }
}

fn bearer_credential(headers: &HeaderMap) -> Result<&str, Rejection> {
    let header = headers.get(AUTHORIZATION).ok_or(Rejection::Missing)?;
    let credential = header
        .to_str()
        .ok()
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::trim)
        .ok_or(Rejection::MalformedScheme)?;
    if credential.is_empty() {
        return Err(Rejection::MalformedScheme);
    }
    Ok(credential)
}

/// True when any segment is `.` or `..`, raw or percent-encoded. The upstream
/// URL parser resolves these, so the path checked here would not be the path
/// delivered.
pub fn has_dot_segment(path: &str) -> bool {
    path.split(['/', '\\']).any(|segment| {
        let decoded = segment.to_ascii_lowercase().replace("%2e", ".");
        decoded == "." || decoded == ".."
    })
}

fn path_has_prefix(path: &str, prefix: &str) -> bool {
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        return true;
    }
    path == prefix
        || path
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.starts_with('/'))
}

pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, GatewayError> {
    let path = req.uri().path().to_string();

    if has_dot_segment(&path) {
        tracing::warn!(path = %path, "Rejected path with dot segments");
        metrics::counter!("gateway_request_failures_total", "reason" => "dot_segment").increment(1);
        return Err(GatewayError::NoRoute);
    }

    if state.auth.is_public(&path) {
        req.headers_mut().remove(IDENTITY_HEADER);
        return Ok(next.run(req).await);
    }

    match state.auth.check(req.headers_mut()) {
        Ok(identity) => {
            tracing::debug!(subject = %identity.subject, path = %path, "Credential verified");
            req.extensions_mut().insert(identity);
            Ok(next.run(req).await)
        }
        Err(rejection) => {
            tracing::warn!(reason = rejection.reason(), path = %path, "Request rejected");
            metrics::counter!("gateway_auth_rejections_total", "reason" => rejection.reason()).increment(1);
            Err(GatewayError::Unauthorized(rejection))
        }
    }
}
