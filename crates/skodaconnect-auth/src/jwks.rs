//! Token signature verification against published key sets.
//!
//! Each authority publishes its RSA signing keys as a JWKS document. The
//! [`KeyVerifier`] fetches the document, selects the key named by the
//! token's `kid`, and checks the RS256 signature, expiry and audience.
//!
//! Only `RSA` keys are considered; keys of other types in the document are
//! skipped. The vehicle-api authority publishes its keys under a prefixed
//! key id ([`VEHICLE_API_KID_PREFIX`]) that its tokens omit, so the prefix is
//! added before lookup.
//!
//! By default the key set is re-fetched for every verification. With a
//! cache TTL configured, sets are kept per authority for that long and a
//! key-id miss forces one re-fetch so rotated keys are picked up.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use moka::future::Cache;
use serde::Deserialize;
use serde_json::Value;

use crate::config::{ClientConfig, VEHICLE_API_KID_PREFIX, VerificationMode};
use crate::error::{AuthError, Result};
use crate::tokens::Authority;

/// Additional audiences the identity provider may stamp on its tokens,
/// besides the app's own client id.
const IDENTITY_AUDIENCES: [&str; 3] = [
    "VWGMBB01DELIV1",
    "https://api.vas.eu.dp15.vwg-connect.com",
    "https://api.vas.eu.wcardp.io",
];

/// The only audience accepted on vehicle-api tokens.
const VEHICLE_API_AUDIENCE: &str = "mal.prd.ece.vwg-connect.com";

/// RSA public keys by key id.
pub type KeySet = HashMap<String, DecodingKey>;

#[derive(Debug, Deserialize)]
struct JwkDocument {
    #[serde(default)]
    keys: Vec<Jwk>,
}

#[derive(Debug, Deserialize)]
struct Jwk {
    kty: String,
    kid: Option<String>,
    n: Option<String>,
    e: Option<String>,
}

/// Build the key set from a JWKS document, keeping RSA keys only.
pub fn parse_key_set(document: Value) -> Result<KeySet> {
    let document: JwkDocument = serde_json::from_value(document)?;
    let mut keys = KeySet::new();

    for jwk in document.keys {
        if jwk.kty != "RSA" {
            tracing::trace!(kty = %jwk.kty, "skipping non-RSA key");
            continue;
        }
        let (Some(kid), Some(n), Some(e)) = (jwk.kid, jwk.n, jwk.e) else {
            continue;
        };
        match DecodingKey::from_rsa_components(&n, &e) {
            Ok(key) => {
                keys.insert(kid, key);
            }
            Err(err) => tracing::debug!(kid = %kid, error = %err, "unusable RSA key"),
        }
    }

    Ok(keys)
}

/// Check a token against an already fetched key set.
///
/// # Errors
///
/// [`AuthError::VerificationFailed`] on a malformed header, a non-RS256
/// algorithm, an unknown key id, a bad signature, an expired token, or an
/// audience outside `audiences`.
pub fn verify_with_keys(
    token: &str,
    authority: Authority,
    keys: &KeySet,
    audiences: &[String],
) -> Result<()> {
    let failed = |reason: String| AuthError::VerificationFailed { authority, reason };

    let kid = lookup_kid(token, authority)?;
    let key = keys
        .get(&kid)
        .ok_or_else(|| failed(format!("no published key with id `{kid}`")))?;

    let mut validation = Validation::new(Algorithm::RS256);
    validation.set_audience(audiences);

    jsonwebtoken::decode::<Value>(token, key, &validation)
        .map(|_| ())
        .map_err(|e| failed(e.to_string()))
}

/// The key id to look up for `token`, including the authority's prefix.
fn lookup_kid(token: &str, authority: Authority) -> Result<String> {
    let failed = |reason: String| AuthError::VerificationFailed { authority, reason };

    let header = jsonwebtoken::decode_header(token).map_err(|e| failed(e.to_string()))?;
    if header.alg != Algorithm::RS256 {
        return Err(failed(format!("unsupported algorithm {:?}", header.alg)));
    }
    let kid = header
        .kid
        .ok_or_else(|| failed("token header has no kid".to_string()))?;

    Ok(match authority {
        Authority::Identity => kid,
        Authority::VehicleApi => format!("{VEHICLE_API_KID_PREFIX}{kid}"),
    })
}

// ---------------------------------------------------------------------------
// KeyVerifier
// ---------------------------------------------------------------------------

/// Fetches key sets and verifies tokens for both authorities.
pub struct KeyVerifier {
    client: reqwest::Client,
    identity_jwks: String,
    vehicle_api_jwks: String,
    identity_audiences: Vec<String>,
    vehicle_api_audiences: Vec<String>,
    cache: Option<Cache<Authority, Arc<KeySet>>>,
}

impl KeyVerifier {
    /// Create a verifier for the endpoints and policy in `config`.
    ///
    /// `client` should be a plain client: key sets are public and fetched
    /// without the connection's cookies or bearer token.
    pub fn new(client: reqwest::Client, config: &ClientConfig) -> Self {
        let mut identity_audiences = vec![config.app.client_id.clone()];
        identity_audiences.extend(IDENTITY_AUDIENCES.iter().map(|a| a.to_string()));

        let cache = config.jwks_cache_ttl().map(|ttl| {
            Cache::builder()
                .max_capacity(2)
                .time_to_live(ttl.max(Duration::from_secs(1)))
                .build()
        });

        Self {
            client,
            identity_jwks: config.endpoints.identity_jwks.clone(),
            vehicle_api_jwks: config.endpoints.vehicle_api_jwks.clone(),
            identity_audiences,
            vehicle_api_audiences: vec![VEHICLE_API_AUDIENCE.to_string()],
            cache,
        }
    }

    /// Audiences accepted on tokens from `authority`.
    pub fn audiences(&self, authority: Authority) -> &[String] {
        match authority {
            Authority::Identity => &self.identity_audiences,
            Authority::VehicleApi => &self.vehicle_api_audiences,
        }
    }

    /// Whether `token` verifies against `authority`'s published keys.
    ///
    /// Never fails; the reason for a `false` is logged at debug level.
    pub async fn verify(&self, token: &str, authority: Authority) -> bool {
        match self.try_verify(token, authority).await {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!(%authority, error = %e, "token verification failed");
                false
            }
        }
    }

    /// Like [`KeyVerifier::verify`] but reports why verification failed.
    pub async fn try_verify(&self, token: &str, authority: Authority) -> Result<()> {
        let kid = lookup_kid(token, authority)?;
        let mut keys = self.key_set(authority, false).await?;

        // A cached set may predate a key rotation.
        if !keys.contains_key(&kid) && self.cache.is_some() {
            tracing::debug!(%authority, kid = %kid, "key id not in cached set, re-fetching");
            keys = self.key_set(authority, true).await?;
        }

        verify_with_keys(token, authority, &keys, self.audiences(authority))
    }

    /// Verify a freshly issued token under the given policy.
    ///
    /// In [`VerificationMode::Permissive`] a failure is logged and
    /// swallowed; in [`VerificationMode::Strict`] it is returned.
    pub async fn check(&self, token: &str, authority: Authority, mode: VerificationMode) -> Result<()> {
        match self.try_verify(token, authority).await {
            Ok(()) => {
                tracing::debug!(%authority, "token verified");
                Ok(())
            }
            Err(e) if mode == VerificationMode::Permissive => {
                tracing::warn!(%authority, error = %e, "token could not be verified, continuing");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn key_set(&self, authority: Authority, force: bool) -> Result<Arc<KeySet>> {
        if let Some(cache) = &self.cache {
            if !force {
                if let Some(keys) = cache.get(&authority).await {
                    return Ok(keys);
                }
            }
        }

        let keys = Arc::new(self.fetch(authority).await?);
        if let Some(cache) = &self.cache {
            cache.insert(authority, Arc::clone(&keys)).await;
        }
        Ok(keys)
    }

    async fn fetch(&self, authority: Authority) -> Result<KeySet> {
        let url = match authority {
            Authority::Identity => &self.identity_jwks,
            Authority::VehicleApi => &self.vehicle_api_jwks,
        };
        let failed = |reason: String| AuthError::VerificationFailed { authority, reason };

        tracing::debug!(%authority, url = %url, "fetching key set");
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| failed(format!("key set unreachable: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(failed(format!("key set endpoint returned HTTP {status}")));
        }

        let document: Value = response
            .json()
            .await
            .map_err(|e| failed(format!("key set is not JSON: {e}")))?;
        parse_key_set(document)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
