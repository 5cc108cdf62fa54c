use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use bearing_core::RouteError;

use crate::auth::Rejection;
use crate::proxy::{UpstreamError, UpstreamErrorKind};

/// Everything that can end a request at the gateway.
///
/// Callers get a status and a fixed message. Details stay in the logs.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("unauthorized: {0}")]
    Unauthorized(Rejection),

    #[error(transparent)]
    Route(#[from] RouteError),

    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    #[error("no service in request path")]
    NoRoute,

    #[error("request body rejected")]
    PayloadTooLarge,
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            GatewayError::Route(_) => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::Upstream(e) if e.kind == UpstreamErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
            GatewayError::Upstream(_) => StatusCode::BAD_GATEWAY,
            GatewayError::NoRoute => StatusCode::NOT_FOUND,
            GatewayError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match status {
            StatusCode::UNAUTHORIZED => "Unauthorized",
            StatusCode::SERVICE_UNAVAILABLE => "Service unavailable",
            StatusCode::GATEWAY_TIMEOUT => "Gateway timeout",
            StatusCode::NOT_FOUND => "Not found",
            StatusCode::PAYLOAD_TOO_LARGE => "Payload too large",
            _ => "Bad gateway",
        };
        (status, message).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bearing_core::InvalidCredential;

    #[test]
    fn statuses_follow_error_kind() {
        let cases = [
            (GatewayError::Unauthorized(Rejection::Missing), StatusCode::UNAUTHORIZED),
            (
                GatewayError::Unauthorized(Rejection::Invalid(InvalidCredential::Expired)),
                StatusCode::UNAUTHORIZED,
            ),
            (GatewayError::Route(RouteError::RegistryUnavailable), StatusCode::SERVICE_UNAVAILABLE),
            (
                GatewayError::Route(RouteError::NoAvailableInstance("orders".into())),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                GatewayError::Upstream(UpstreamError::new(UpstreamErrorKind::Timeout, "a", "deadline")),
                StatusCode::GATEWAY_TIMEOUT,
            ),
            (
                GatewayError::Upstream(UpstreamError::new(UpstreamErrorKind::ConnectionRefused, "a", "refused")),
                StatusCode::BAD_GATEWAY,
            ),
            (
                GatewayError::Upstream(UpstreamError::new(UpstreamErrorKind::Protocol, "a", "garbage")),
                StatusCode::BAD_GATEWAY,
            ),
            (GatewayError::NoRoute, StatusCode::NOT_FOUND),
        ];

        for (error, status) in cases {
            assert_eq!(error.into_response().status(), status);
        }
    }

    #[tokio::test]
    async fn rejection_reason_is_not_echoed() {
        let response = GatewayError::Unauthorized(Rejection::Invalid(InvalidCredential::BadSignature)).into_response();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"Unauthorized");
    }
}
