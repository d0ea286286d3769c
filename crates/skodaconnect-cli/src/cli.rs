//! CLI argument definitions for the `skodaconnect` binary.
//!
//! All `clap` structures live here so that `main.rs` stays focused on
//! dispatching subcommands.

use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand};
use skodaconnect_auth::Authority;

/// Skoda Connect -- query your connected vehicles from the terminal.
#[derive(Parser)]
#[command(
    name = "skodaconnect",
    version,
    about = "Skoda Connect command-line client",
    long_about = "Logs in to Skoda Connect with the account in the config file and \
                  queries the vehicle data services."
)]
pub struct Cli {
    /// Increase log verbosity (-v info, -vv debug). RUST_LOG is used when absent.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Path to the TOML config file.
    #[arg(long, short, default_value = "skodaconnect.toml", global = true)]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Log in and show the session state and token expiries.
    Login,

    /// List the VINs attached to the account.
    Vehicles,

    /// Show the stored status report of a vehicle.
    Status {
        /// Vehicle identification number.
        #[arg(long)]
        vin: String,
    },

    /// Show where a vehicle is parked.
    Position {
        /// Vehicle identification number.
        #[arg(long)]
        vin: String,
    },

    /// Send an authenticated GET and print the JSON response.
    Get {
        /// Absolute URL, or a path relative to the home-region base.
        /// `$vin` is replaced by --vin.
        path: String,

        /// Vehicle identification number substituted for `$vin`.
        #[arg(long, default_value = "")]
        vin: String,

        /// Which token to present: identity or vehicle-api.
        #[arg(long, default_value = "vehicle-api")]
        token: Authority,
    },
}
