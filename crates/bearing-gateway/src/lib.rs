//! Authenticating reverse proxy.
//!
//! Requests pass through [`auth::AuthFilter`], are mapped to a service by their
//! first path segment, balanced over the registry's healthy instances by
//! [`routing::Router`] and relayed by [`proxy::ProxyForwarder`].

pub mod auth;
pub mod config;
pub mod error;
pub mod proxy;
pub mod routing;
pub mod server;
pub mod telemetry;

pub use auth::{AuthFilter, Rejection, IDENTITY_HEADER};
pub use config::GatewayConfig;
pub use error::GatewayError;
pub use proxy::{OutboundRequest, ProxyForwarder, UpstreamError, UpstreamErrorKind};
pub use routing::Router;
pub use server::{build_app, AppState, ProxySettings};
