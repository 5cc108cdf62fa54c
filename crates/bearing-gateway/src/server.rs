use std::sync::Arc;

use axum::{
    body::to_bytes,
    extract::{Request, State},
    http::{HeaderMap, HeaderValue, StatusCode, Uri},
    middleware,
    response::{IntoResponse, Response},
    routing::get,
    Json,
};
use bearing_core::{Identity, RegistrySnapshot, RouteError};
use bearing_registry::RegistryClient;
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;

use crate::auth::{auth_middleware, AuthFilter};
use crate::error::GatewayError;
use crate::proxy::{OutboundRequest, ProxyForwarder, UpstreamError, UpstreamErrorKind};
use crate::routing::Router;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// How requests are mapped onto upstreams.
#[derive(Debug, Clone)]
pub struct ProxySettings {
    /// Drop the leading service segment before forwarding.
    pub strip_service_prefix: bool,
    /// Largest request body the gateway will buffer.
    pub max_body_bytes: usize,
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self {
            strip_service_prefix: true,
            max_body_bytes: 10 * 1024 * 1024,
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub auth: Arc<AuthFilter>,
    pub router: Arc<Router>,
    pub forwarder: Arc<ProxyForwarder>,
    pub registry: Arc<RegistryClient>,
    pub settings: ProxySettings,
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(
        auth: AuthFilter,
        registry: Arc<RegistryClient>,
        forwarder: ProxyForwarder,
        settings: ProxySettings,
    ) -> Self {
        Self {
            auth: Arc::new(auth),
            router: Arc::new(Router::new(registry.clone())),
            forwarder: Arc::new(forwarder),
            registry,
            settings,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, handle: Option<PrometheusHandle>) -> Self {
        self.metrics = handle;
        self
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(health_check, render_metrics, registry_snapshot),
    components(
        schemas(
            bearing_core::instance::ServiceInstance,
            bearing_core::health::HealthStatus,
            bearing_core::registry::RegistrySnapshot
        )
    ),
    modifiers(&SecurityAddon)
)]
pub struct ApiDoc;

struct SecurityAddon;

impl utoipa::Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "api_jwt",
                utoipa::openapi::security::SecurityScheme::Http(
                    utoipa::openapi::security::HttpBuilder::new()
                        .scheme(utoipa::openapi::security::HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            )
        }
    }
}

/// Local endpoints first; everything else is proxied.
pub fn build_app(state: AppState) -> axum::Router {
    axum::Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(render_metrics))
        .route("/api-docs/openapi.json", get(openapi_json))
        .route("/admin/registry", get(registry_snapshot))
        .fallback(proxy_request)
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[utoipa::path(
    get,
    path = "/health",
    responses((status = 200, description = "OK"))
)]
async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK").into_response()
}

#[utoipa::path(
    get,
    path = "/metrics",
    responses(
        (status = 200, description = "Prometheus exposition"),
        (status = 404, description = "No recorder installed")
    )
)]
async fn render_metrics(State(state): State<AppState>) -> impl IntoResponse {
    match &state.metrics {
        Some(handle) => (StatusCode::OK, handle.render()).into_response(),
        None => (StatusCode::NOT_FOUND, "Metrics disabled").into_response(),
    }
}

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

#[utoipa::path(
    get,
    path = "/admin/registry",
    responses(
        (status = 200, description = "Current registry snapshot", body = RegistrySnapshot),
        (status = 401, description = "Unauthorized"),
        (status = 503, description = "Registry not ready or stale")
    ),
    security(("api_jwt" = []))
)]
async fn registry_snapshot(State(state): State<AppState>) -> Result<Json<RegistrySnapshot>, GatewayError> {
    let snapshot = state
        .registry
        .current_snapshot()
        .ok_or(RouteError::RegistryUnavailable)?;
    Ok(Json(snapshot.as_ref().clone()))
}

async fn proxy_request(State(state): State<AppState>, req: Request) -> Result<Response, GatewayError> {
    let (parts, body) = req.into_parts();
    let Some((service, path_and_query)) = split_service(&parts.uri, state.settings.strip_service_prefix) else {
        tracing::warn!(path = %parts.uri.path(), "No service segment in path");
        metrics::counter!("gateway_request_failures_total", "reason" => "no_route").increment(1);
        return Err(GatewayError::NoRoute);
    };

    let body = match to_bytes(body, state.settings.max_body_bytes).await {
        Ok(body) => body,
        Err(e) => {
            tracing::warn!(service = %service, limit = state.settings.max_body_bytes, "Request body rejected: {}", e);
            metrics::counter!("gateway_request_failures_total", "reason" => "payload_too_large").increment(1);
            return Err(GatewayError::PayloadTooLarge);
        }
    };

    let subject = parts.extensions.get::<Identity>().map(|identity| identity.subject.clone());
    let mut headers = parts.headers;
    let request_id = ensure_request_id(&mut headers);

    let outbound = OutboundRequest {
        method: parts.method,
        path_and_query,
        headers,
        body,
    };

    let instance = state.router.select(&service).inspect_err(|e| {
        let reason = match e {
            RouteError::NoAvailableInstance(_) => "no_available_instance",
            RouteError::RegistryUnavailable => "registry_unavailable",
        };
        tracing::warn!(service = %service, request_id = %request_id, reason, "Cannot route request: {}", e);
        metrics::counter!("gateway_request_failures_total", "reason" => reason).increment(1);
    })?;
    tracing::debug!(
        service = %service,
        instance = %instance.instance_id,
        subject = subject.as_deref().unwrap_or("-"),
        request_id = %request_id,
        "Forwarding request"
    );

    match state.forwarder.forward(&outbound, &instance).await {
        Ok(response) => Ok(response),
        Err(e) if e.kind == UpstreamErrorKind::ConnectionRefused => {
            record_upstream_error(&service, &e);
            let Ok(alternate) = state.router.select_alternate(&service, &instance) else {
                return Err(e.into());
            };
            metrics::counter!("gateway_upstream_retries_total").increment(1);
            tracing::info!(
                service = %service,
                failed = %instance.instance_id,
                retry = %alternate.instance_id,
                "Retrying on another instance"
            );
            state
                .forwarder
                .forward(&outbound, &alternate)
                .await
                .map_err(|e| {
                    record_upstream_error(&service, &e);
                    GatewayError::from(e)
                })
        }
        Err(e) => {
            record_upstream_error(&service, &e);
            Err(e.into())
        }
    }
}

fn record_upstream_error(service: &str, error: &UpstreamError) {
    tracing::warn!(service = %service, kind = error.kind.label(), "{}", error);
    metrics::counter!("gateway_upstream_errors_total", "kind" => error.kind.label()).increment(1);
}

/// Splits `/{service}/rest?query` into the service name and the path to send
/// upstream. Returns `None` when the path names no service.
pub fn split_service(uri: &Uri, strip_prefix: bool) -> Option<(String, String)> {
    let path = uri.path();
    let trimmed = path.trim_start_matches('/');
    let (service, rest) = match trimmed.split_once('/') {
        Some((service, rest)) => (service, format!("/{}", rest)),
        None => (trimmed, "/".to_string()),
    };
    if service.is_empty() {
        return None;
    }

    let mut forwarded = if strip_prefix { rest } else { path.to_string() };
    if let Some(query) = uri.query() {
        forwarded.push('?');
        forwarded.push_str(query);
    }
    Some((service.to_ascii_lowercase(), forwarded))
}

/// Keeps a caller-supplied request id, otherwise generates one.
fn ensure_request_id(headers: &mut HeaderMap) -> String {
    if let Some(existing) = headers.get(REQUEST_ID_HEADER).and_then(|v| v.to_str().ok()) {
        return existing.to_string();
    }
    let id = uuid::Uuid::new_v4().to_string();
    if let Ok(value) = HeaderValue::from_str(&id) {
        headers.insert(REQUEST_ID_HEADER, value);
    }
    id
}

#[cfg(test)]
mod tests {
    use super::*;

    fn split(uri: &str, strip: bool) -> Option<(String, String)> {
        split_service(&uri.parse::<Uri>().unwrap(), strip)
    }

    #[test]
    fn service_prefix_is_stripped() {
        assert_eq!(split("/orders/42", true), Some(("orders".into(), "/42".into())));
        assert_eq!(split("/orders", true), Some(("orders".into(), "/".into())));
        assert_eq!(split("/Orders/a/b?x=1&y=2", true), Some(("orders".into(), "/a/b?x=1&y=2".into())));
    }

    #[test]
    fn service_prefix_can_be_kept() {
        assert_eq!(split("/orders/42?page=2", false), Some(("orders".into(), "/orders/42?page=2".into())));
    }

    #[test]
    fn root_path_has_no_service() {
        assert_eq!(split("/", true), None);
        assert_eq!(split("/?q=1", true), None);
    }

    #[test]
    fn request_id_is_generated_once() {
        let mut headers = HeaderMap::new();
        let id = ensure_request_id(&mut headers);
        assert_eq!(headers.get(REQUEST_ID_HEADER).unwrap(), id.as_str());
        assert_eq!(ensure_request_id(&mut headers), id);
    }

    #[test]
    fn caller_request_id_is_kept() {
        let mut headers = HeaderMap::new();
        headers.insert(REQUEST_ID_HEADER, HeaderValue::from_static("trace-7"));
        assert_eq!(ensure_request_id(&mut headers), "trace-7");
    }
}
