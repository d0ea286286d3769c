//! Client configuration.
//!
//! [`ClientConfig`] carries everything about the remote service that is not
//! a user credential: endpoint URLs, the app identity presented to the
//! identity provider, timeouts and verification policy. Every field has a
//! production default, and the whole structure deserializes from TOML so
//! deployments (and tests) can point the client elsewhere.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AuthError, Result};

/// OAuth client identifier of the mobile app.
pub const DEFAULT_CLIENT_ID: &str = "7f045eee-7003-4379-9968-9355ed2adb06@apps_vw-dilab_com";

/// Custom-scheme redirect URI registered for the mobile app.
pub const DEFAULT_APP_REDIRECT_URI: &str = "skodaconnect://oidc.login/";

/// Scopes requested during the interactive login.
pub const DEFAULT_SCOPE: &str =
    "openid profile address cars email birthdate badge mbb phone driversLicense dealers";

/// Key-id prefix the vehicle-api authority uses in its published key set.
pub const VEHICLE_API_KID_PREFIX: &str = "VWGMBB01DELIV1.";

// ---------------------------------------------------------------------------
// Credentials
// ---------------------------------------------------------------------------

/// The end user's login credentials.
#[derive(Clone, Serialize, Deserialize)]
pub struct Credentials {
    /// Account e-mail address.
    pub username: String,
    /// Account password.
    pub password: String,
    /// Guest language tag, e.g. `"en"`.
    #[serde(default = "default_guest_language")]
    pub guest_language: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            guest_language: default_guest_language(),
        }
    }
}

// Never print the password.
impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("guest_language", &self.guest_language)
            .finish()
    }
}

fn default_guest_language() -> String {
    "en".to_string()
}

// ---------------------------------------------------------------------------
// Endpoints
// ---------------------------------------------------------------------------

/// URLs of every remote endpoint the client talks to.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Endpoints {
    /// OpenID configuration document of the identity provider.
    pub discovery: String,
    /// Exchanges the authorization code for the identity token set.
    pub identity_token: String,
    /// Refreshes the identity token set.
    pub identity_refresh: String,
    /// Issues vehicle-api token sets against an identity `id_token`.
    pub vehicle_api_token: String,
    /// Published keys of the identity authority.
    pub identity_jwks: String,
    /// Published keys of the vehicle-api authority.
    pub vehicle_api_jwks: String,
    /// Base URL used for data paths until the home region is known.
    pub default_base: String,
    /// Home-region base URI that maps back to [`Endpoints::default_base`].
    pub default_region: String,
    /// Home-region lookup, `$vin` is substituted.
    pub home_region: String,
    /// Lists the vehicles attached to the account.
    pub vehicles: String,
    /// Customer-profile service root.
    pub customer_profile: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            discovery: "https://identity.vwgroup.io/.well-known/openid-configuration".to_string(),
            identity_token: "https://tokenrefreshservice.apps.emea.vwapps.io/exchangeAuthCode"
                .to_string(),
            identity_refresh: "https://tokenrefreshservice.apps.emea.vwapps.io/refreshTokens"
                .to_string(),
            vehicle_api_token:
                "https://mbboauth-1d.prd.ece.vwg-connect.com/mbbcoauth/mobile/oauth2/v1/token"
                    .to_string(),
            identity_jwks: "https://identity.vwgroup.io/oidc/v1/keys".to_string(),
            vehicle_api_jwks: "https://mbboauth-1d.prd.ece.vwg-connect.com/mbbcoauth/public/jwk/v1"
                .to_string(),
            default_base: "https://msg.volkswagen.de".to_string(),
            default_region: "https://mal-1a.prd.ece.vwg-connect.com/api".to_string(),
            home_region:
                "https://mal-1a.prd.ece.vwg-connect.com/api/cs/vds/v1/vehicles/$vin/homeRegion"
                    .to_string(),
            vehicles: "https://msg.volkswagen.de/fs-car/usermanagement/users/v1/skoda/CZ/vehicles"
                .to_string(),
            customer_profile: "https://customer-profile.apps.emea.vwapps.io".to_string(),
        }
    }
}

impl Endpoints {
    /// Endpoints with every URL rooted at `base`, keeping production paths.
    ///
    /// Used to aim the whole client at a single local server.
    pub fn rooted_at(base: &str) -> Self {
        let base = base.trim_end_matches('/');
        Self {
            discovery: format!("{base}/.well-known/openid-configuration"),
            identity_token: format!("{base}/exchangeAuthCode"),
            identity_refresh: format!("{base}/refreshTokens"),
            vehicle_api_token: format!("{base}/mbbcoauth/mobile/oauth2/v1/token"),
            identity_jwks: format!("{base}/oidc/v1/keys"),
            vehicle_api_jwks: format!("{base}/mbbcoauth/public/jwk/v1"),
            default_base: base.to_string(),
            default_region: format!("{base}/api"),
            home_region: format!("{base}/api/cs/vds/v1/vehicles/$vin/homeRegion"),
            vehicles: format!("{base}/fs-car/usermanagement/users/v1/skoda/CZ/vehicles"),
            customer_profile: base.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// App identity
// ---------------------------------------------------------------------------

/// How the client presents itself to the identity provider and APIs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppIdentity {
    pub client_id: String,
    /// Redirect target whose scheme ends the post-login redirect chain.
    pub redirect_uri: String,
    pub scope: String,
    /// Brand sent with identity token exchanges.
    pub brand: String,
    /// `X-Client-Id` header value.
    pub x_client_id: String,
    /// `X-App-Name` header value.
    pub app_name: String,
    /// `X-App-Version` header value.
    pub app_version: String,
    pub user_agent: String,
}

impl Default for AppIdentity {
    fn default() -> Self {
        Self {
            client_id: DEFAULT_CLIENT_ID.to_string(),
            redirect_uri: DEFAULT_APP_REDIRECT_URI.to_string(),
            scope: DEFAULT_SCOPE.to_string(),
            brand: "skoda".to_string(),
            x_client_id: "28cd30c6-dee7-4529-a0e6-b1e07ff90b79".to_string(),
            app_name: "cz.skodaauto.connect".to_string(),
            app_version: "3.2.6".to_string(),
            user_agent: "okhttp/3.14.7".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Verification policy
// ---------------------------------------------------------------------------

/// What to do when a freshly issued token fails signature verification.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationMode {
    /// Log the failure and keep the token.
    #[default]
    Permissive,
    /// Treat the failure as fatal for the login or refresh.
    Strict,
}

// ---------------------------------------------------------------------------
// ClientConfig
// ---------------------------------------------------------------------------

/// Complete client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub endpoints: Endpoints,
    pub app: AppIdentity,
    /// Per-request timeout in seconds.
    pub request_timeout_secs: u64,
    /// Hops followed after the password step before giving up.
    pub max_redirects: usize,
    /// Tokens expiring within this many seconds count as expired.
    pub refresh_margin_secs: i64,
    pub verification: VerificationMode,
    /// Cache fetched key sets for this long. Unset means fetch on every
    /// verification.
    pub jwks_cache_ttl_secs: Option<u64>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoints: Endpoints::default(),
            app: AppIdentity::default(),
            request_timeout_secs: 30,
            max_redirects: 10,
            refresh_margin_secs: 60,
            verification: VerificationMode::Permissive,
            jwks_cache_ttl_secs: None,
        }
    }
}

impl ClientConfig {
    /// Parse a configuration from TOML text. Missing keys take defaults.
    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| AuthError::InvalidConfig {
            reason: e.to_string(),
        })
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn jwks_cache_ttl(&self) -> Option<Duration> {
        self.jwks_cache_ttl_secs.map(Duration::from_secs)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
