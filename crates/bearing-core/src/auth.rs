use std::sync::Arc;
use std::time::Duration;

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::errors::InvalidCredential;
use crate::time::{Clock, SystemClock};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // Subject (user id)
    pub exp: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<u64>,
}

/// A verified caller. Only [`TokenVerifier::verify`] produces one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub subject: String,
    pub expires_at: u64,
}

/// Checks HMAC-signed bearer credentials against one fixed key.
///
/// Verification is a pure function of the credential, the key and the clock.
/// Rotating keys means building a new verifier.
pub struct TokenVerifier {
    key: DecodingKey,
    validation: Validation,
    clock: Arc<dyn Clock>,
}

impl TokenVerifier {
    pub fn from_secret(secret: &[u8]) -> Self {
        Self::with_key(DecodingKey::from_secret(secret))
    }

    /// The secret as it appears in configuration: standard base64.
    pub fn from_base64_secret(secret: &str) -> Result<Self, jsonwebtoken::errors::Error> {
        Ok(Self::with_key(DecodingKey::from_base64_secret(secret)?))
    }

    fn with_key(key: DecodingKey) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.algorithms = vec![Algorithm::HS256, Algorithm::HS384, Algorithm::HS512];
        validation.set_required_spec_claims(&["exp", "sub"]);
        // Expiry is checked against our own clock below.
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.leeway = 0;

        Self {
            key,
            validation,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn verify(&self, credential: &str) -> Result<Identity, InvalidCredential> {
        let data = decode::<Claims>(credential, &self.key, &self.validation).map_err(|err| match err.kind() {
            ErrorKind::InvalidSignature => InvalidCredential::BadSignature,
            ErrorKind::ExpiredSignature => InvalidCredential::Expired,
            _ => InvalidCredential::Malformed,
        })?;
        let claims = data.claims;

        if claims.sub.is_empty() || claims.sub.chars().any(char::is_control) {
            return Err(InvalidCredential::Malformed);
        }
        if self.clock.now_secs() > claims.exp {
            return Err(InvalidCredential::Expired);
        }

        Ok(Identity {
            subject: claims.sub,
            expires_at: claims.exp,
        })
    }
}

/// Signs credentials in the format [`TokenVerifier`] accepts.
pub struct TokenIssuer {
    key: EncodingKey,
    header: Header,
    clock: Arc<dyn Clock>,
}

impl TokenIssuer {
    pub fn from_secret(secret: &[u8]) -> Self {
        Self::with_key(EncodingKey::from_secret(secret))
    }

    pub fn from_base64_secret(secret: &str) -> Result<Self, jsonwebtoken::errors::Error> {
        Ok(Self::with_key(EncodingKey::from_base64_secret(secret)?))
    }

    fn with_key(key: EncodingKey) -> Self {
        Self {
            key,
            header: Header::new(Algorithm::HS256),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_algorithm(mut self, algorithm: Algorithm) -> Self {
        self.header = Header::new(algorithm);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn issue(&self, subject: impl Into<String>, ttl: Duration) -> Result<String, jsonwebtoken::errors::Error> {
        let now = self.clock.now_secs();
        self.sign(&Claims {
            sub: subject.into(),
            exp: now + ttl.as_secs(),
            iat: Some(now),
        })
    }

    pub fn sign(&self, claims: &Claims) -> Result<String, jsonwebtoken::errors::Error> {
        encode(&self.header, claims, &self.key)
    }
}
