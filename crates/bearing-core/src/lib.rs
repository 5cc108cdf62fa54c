pub mod instance;
pub mod health;
pub mod registry;
pub mod errors;
pub mod time;
pub mod auth;

pub use instance::ServiceInstance;
pub use health::HealthStatus;
pub use registry::{RegistrySnapshot, RegistrySource};
pub use errors::{InvalidCredential, RegistryError, RouteError};
pub use time::{Clock, ManualClock, SystemClock};
pub use auth::{Claims, Identity, TokenIssuer, TokenVerifier};
