//! Session core for the Skoda Connect vehicle service.
//!
//! This crate logs a user in against the brand identity provider, holds the
//! two resulting token sets, keeps them fresh and executes authenticated
//! calls against the vehicle-api backend:
//!
//! - **Interactive login**: OIDC discovery, two scraped HTML forms and a
//!   manually followed redirect chain ending in the app's custom scheme
//! - **Token exchange**: identity tokens traded for a vehicle-api token
//! - **Verification**: token signatures checked against published key sets
//! - **Refresh**: both token sets renewed without credentials
//! - **Request executor**: bearer calls with `$vin` substitution, rate-limit
//!   reporting and 401 handling
//!
//! # Architecture
//!
//! ```text
//! Connection
//! ├── Transport    (HTTP client + cookie jar, manual redirects)
//! ├── LoginFlow    (discover → forms → redirects → exchanges)
//! ├── KeyVerifier  (JWKS fetch, optional cache, RS256 checks)
//! └── TokenStore   (identity + vehicle-api token sets)
//! ```
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use skodaconnect_auth::{ClientConfig, Connection, Credentials};
//!
//! # async fn example() -> skodaconnect_auth::error::Result<()> {
//! let connection = Connection::new(
//!     Credentials::new("driver@example.com", "secret"),
//!     ClientConfig::default(),
//! )?;
//!
//! connection.ensure_session().await?;
//! let vehicles = connection
//!     .get("https://msg.volkswagen.de/fs-car/usermanagement/users/v1/skoda/CZ/vehicles", "")
//!     .await;
//! println!("{vehicles:?}");
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod connection;
pub mod cookies;
pub mod error;
pub mod forms;
pub mod jwks;
pub mod login;
pub mod request;
pub mod tokens;
pub mod transport;

#[cfg(test)]
mod test_support;

// Re-export key types at the crate root for convenience.
pub use config::{AppIdentity, ClientConfig, Credentials, Endpoints, VerificationMode};
pub use connection::{Connection, SessionState};
pub use error::{AuthError, HttpError, LoginStep};
pub use jwks::KeyVerifier;
pub use request::{BaseUrls, RATE_LIMIT_FIELD};
pub use tokens::{Authority, TokenSet, TokenStore};
