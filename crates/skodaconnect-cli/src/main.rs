//! CLI entry point for Skoda Connect.
//!
//! This binary provides the `skodaconnect` command with subcommands for
//! logging in, listing vehicles and reading vehicle data.

mod cli;
mod settings;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::{Value, json};
use skodaconnect_api::VehicleClient;
use skodaconnect_auth::{Authority, Connection};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands};
use crate::settings::Settings;

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // A missing .env is fine.
    dotenvy::dotenv().ok();
    init_tracing(cli.verbose);

    let settings = Settings::load(&cli.config)?;
    let credentials = settings.credentials(|var| std::env::var(var).ok())?;
    let connection = Connection::new(credentials, settings.client)
        .context("failed to set up the connection")?;
    let client = VehicleClient::new(Arc::new(connection));

    match cli.command {
        Commands::Login => cmd_login(&client).await,
        Commands::Vehicles => cmd_vehicles(&client).await,
        Commands::Status { vin } => cmd_status(&client, &vin).await,
        Commands::Position { vin } => cmd_position(&client, &vin).await,
        Commands::Get { path, vin, token } => cmd_get(&client, &path, &vin, token).await,
    }
}

// ---------------------------------------------------------------------------
// Subcommands
// ---------------------------------------------------------------------------

async fn cmd_login(client: &VehicleClient) -> Result<()> {
    let connection = client.connection();
    connection.ensure_session().await.context("login failed")?;
    info!(user = connection.username(), "session established");

    let tokens = connection.tokens().await;
    println!("state: {:?}", connection.state().await);
    for authority in [Authority::Identity, Authority::VehicleApi] {
        match tokens.expires_at(authority) {
            Ok(at) => println!("{authority} token expires {}", at.to_rfc3339()),
            Err(e) => println!("{authority} token: {e}"),
        }
    }
    Ok(())
}

async fn cmd_vehicles(client: &VehicleClient) -> Result<()> {
    let vins = client
        .vehicles()
        .await
        .context("failed to list vehicles")?;
    if vins.is_empty() {
        println!("no vehicles on this account");
    }
    for vin in vins {
        println!("{vin}");
    }
    Ok(())
}

async fn cmd_status(client: &VehicleClient, vin: &str) -> Result<()> {
    use_home_region(client, vin).await;
    let status = client
        .vehicle_status(vin)
        .await
        .with_context(|| format!("failed to fetch status of {vin}"))?;
    print_json(&json!(status.fields))
}

async fn cmd_position(client: &VehicleClient, vin: &str) -> Result<()> {
    use_home_region(client, vin).await;
    let position = client
        .position(vin)
        .await
        .with_context(|| format!("failed to fetch position of {vin}"))?;
    print_json(&serde_json::to_value(&position)?)
}

async fn cmd_get(client: &VehicleClient, path: &str, vin: &str, token: Authority) -> Result<()> {
    let connection = client.connection();
    connection.ensure_session().await.context("login failed")?;
    if !vin.is_empty() {
        use_home_region(client, vin).await;
    }
    let body = connection
        .get_as(token, path, vin)
        .await
        .with_context(|| format!("GET {path} failed"))?;
    print_json(&body)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Point data requests at the vehicle's home region, keeping the default
/// base if the lookup fails.
async fn use_home_region(client: &VehicleClient, vin: &str) {
    if let Err(e) = client.home_region(vin).await {
        warn!(vin, error = %e, "home region lookup failed, using the default base");
    }
}

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Initialize the tracing subscriber.
///
/// `-v` and `-vv` select `info` and `debug`. Without them `RUST_LOG` is
/// honoured, falling back to `warn`.
fn init_tracing(verbose: u8) {
    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        1 => EnvFilter::new("info"),
        _ => EnvFilter::new("debug"),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}
