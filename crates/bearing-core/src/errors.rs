/// Why a presented credential was refused.
///
/// The variants are recorded for observability only; callers never see which
/// one applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum InvalidCredential {
    #[error("credential is malformed")]
    Malformed,

    #[error("credential signature does not match")]
    BadSignature,

    #[error("credential has expired")]
    Expired,
}

impl InvalidCredential {
    /// Stable label used in logs and metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            InvalidCredential::Malformed => "malformed",
            InvalidCredential::BadSignature => "bad_signature",
            InvalidCredential::Expired => "expired",
        }
    }
}

/// Failures of a single registry refresh.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("registry request failed: {0}")]
    Transport(String),

    #[error("registry answered with status {0}")]
    Status(u16),

    #[error("malformed registry response: {0}")]
    Malformed(String),
}

/// Failures of upstream instance selection.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RouteError {
    #[error("no available instance for service {0}")]
    NoAvailableInstance(String),

    #[error("registry snapshot unavailable")]
    RegistryUnavailable,
}
