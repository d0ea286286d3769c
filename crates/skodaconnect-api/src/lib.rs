//! Vehicle data endpoints for Skoda Connect.
//!
//! [`VehicleClient`] wraps a shared [`skodaconnect_auth::Connection`] and
//! exposes one method per data service. Session handling stays in the
//! connection: every method calls `ensure_session` first and surfaces
//! failures as [`FetchError`].
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use skodaconnect_api::VehicleClient;
//! use skodaconnect_auth::{ClientConfig, Connection, Credentials};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let connection = Connection::new(
//!     Credentials::new("driver@example.com", "secret"),
//!     ClientConfig::default(),
//! )?;
//! let client = VehicleClient::new(Arc::new(connection));
//!
//! for vin in client.vehicles().await? {
//!     client.home_region(&vin).await?;
//!     let status = client.vehicle_status(&vin).await?;
//!     println!("{vin}: {} fields", status.fields.len());
//! }
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod error;
pub mod models;

pub use client::VehicleClient;
pub use error::{FetchError, Result};
pub use models::{Position, VehicleStatus};
