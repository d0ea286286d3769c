//! Loading the account and client settings.
//!
//! Settings come from a TOML file holding the account and an optional
//! `[client]` table. `SKODACONNECT_USERNAME` and `SKODACONNECT_PASSWORD`
//! (from the environment or a `.env` file) take precedence over the file.

use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use skodaconnect_auth::{ClientConfig, Credentials};
use tracing::debug;

pub const USERNAME_VAR: &str = "SKODACONNECT_USERNAME";
pub const PASSWORD_VAR: &str = "SKODACONNECT_PASSWORD";

/// Contents of the config file.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub username: Option<String>,
    pub password: Option<String>,
    pub guest_language: Option<String>,
    pub client: ClientConfig,
}

impl Settings {
    /// Read `path`. A missing file yields empty settings.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }

        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let settings: Settings = toml::from_str(&text)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        debug!(path = %path.display(), "config file loaded");
        Ok(settings)
    }

    /// Credentials from the file, overridden by `lookup` (normally the
    /// process environment).
    pub fn credentials(&self, lookup: impl Fn(&str) -> Option<String>) -> Result<Credentials> {
        let pick = |var: &str, file: &Option<String>| {
            lookup(var)
                .filter(|v| !v.is_empty())
                .or_else(|| file.clone())
        };

        let Some(username) = pick(USERNAME_VAR, &self.username) else {
            bail!("no username: set `username` in the config file or {USERNAME_VAR}");
        };
        let Some(password) = pick(PASSWORD_VAR, &self.password) else {
            bail!("no password: set `password` in the config file or {PASSWORD_VAR}");
        };

        let mut credentials = Credentials::new(username, password);
        if let Some(language) = &self.guest_language {
            credentials.guest_language = language.clone();
        }
        Ok(credentials)
    }
}
