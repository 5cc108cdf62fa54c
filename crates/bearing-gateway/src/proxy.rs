use std::fmt;
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::http::{header, HeaderMap, HeaderName, Method, Response};
use bearing_core::ServiceInstance;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamErrorKind {
    Timeout,
    ConnectionRefused,
    Protocol,
}

impl UpstreamErrorKind {
    pub fn label(&self) -> &'static str {
        match self {
            UpstreamErrorKind::Timeout => "timeout",
            UpstreamErrorKind::ConnectionRefused => "connection_refused",
            UpstreamErrorKind::Protocol => "protocol",
        }
    }
}

impl fmt::Display for UpstreamErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("upstream {instance} failed ({kind}): {detail}")]
pub struct UpstreamError {
    pub kind: UpstreamErrorKind,
    pub instance: String,
    detail: String,
}

impl UpstreamError {
    pub fn new(kind: UpstreamErrorKind, instance: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            kind,
            instance: instance.into(),
            detail: detail.into(),
        }
    }
}

/// A request as it leaves the gateway. The body is held in memory so it can be
/// replayed against a second instance.
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub method: Method,
    /// Path relative to the instance base URL, including any query string.
    pub path_and_query: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

const HOP_BY_HOP: [&str; 9] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Relays requests to upstream instances over a pooled HTTP client.
pub struct ProxyForwarder {
    client: reqwest::Client,
    timeout: Duration,
}

impl ProxyForwarder {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .tcp_keepalive(Duration::from_secs(30))
            .pool_max_idle_per_host(32)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()?;
        Ok(Self { client, timeout })
    }

    /// Sends the request to `instance` and streams the answer back.
    ///
    /// The deadline covers connecting and receiving the response head; the
    /// body is relayed as it arrives.
    pub async fn forward(
        &self,
        request: &OutboundRequest,
        instance: &ServiceInstance,
    ) -> Result<Response<Body>, UpstreamError> {
        let url = format!("{}{}", instance.base_url(), request.path_and_query);

        let mut headers = request.headers.clone();
        strip_hop_by_hop(&mut headers);
        headers.remove(header::HOST);
        headers.remove(header::CONTENT_LENGTH);

        let send = self
            .client
            .request(request.method.clone(), &url)
            .headers(headers)
            .body(request.body.clone())
            .send();

        let upstream = match tokio::time::timeout(self.timeout, send).await {
            Ok(Ok(res)) => res,
            Ok(Err(e)) => return Err(classify(e, instance)),
            Err(_) => {
                return Err(UpstreamError::new(
                    UpstreamErrorKind::Timeout,
                    &instance.instance_id,
                    format!("no response within {}ms", self.timeout.as_millis()),
                ));
            }
        };

        let mut response = Response::builder().status(upstream.status());
        if let Some(headers) = response.headers_mut() {
            for (name, value) in upstream.headers() {
                headers.append(name.clone(), value.clone());
            }
            strip_hop_by_hop(headers);
        }

        response
            .body(Body::from_stream(upstream.bytes_stream()))
            .map_err(|e| UpstreamError::new(UpstreamErrorKind::Protocol, &instance.instance_id, e.to_string()))
    }
}

fn classify(err: reqwest::Error, instance: &ServiceInstance) -> UpstreamError {
    let kind = if err.is_timeout() {
        UpstreamErrorKind::Timeout
    } else if err.is_connect() {
        UpstreamErrorKind::ConnectionRefused
    } else {
        UpstreamErrorKind::Protocol
    };
    UpstreamError::new(kind, &instance.instance_id, err.to_string())
}

/// Removes hop-by-hop headers, including any the `Connection` header names.
fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();
    for name in listed {
        headers.remove(name);
    }
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
}
