//! Token sets and the two-authority token store.
//!
//! The service issues two independent token sets: one by the identity
//! provider (representing the user) and one by the vehicle-api authority
//! (used for most data endpoints). They are held side by side in a
//! [`TokenStore`] as named fields. Expiry is never tracked separately; it is
//! always decoded from the `exp` claim of the relevant token.

use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{AuthError, Result};

// ---------------------------------------------------------------------------
// Authority
// ---------------------------------------------------------------------------

/// One of the two token-issuing backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Authority {
    /// The identity provider. Its token set represents the user.
    Identity,
    /// The vehicle-api authority. Its access token is the default bearer.
    VehicleApi,
}

impl Authority {
    /// The token whose `exp` claim decides this authority's expiry.
    ///
    /// The identity set expires with its ID token, the vehicle-api set with
    /// its access token.
    pub fn expiry_token(self, set: &TokenSet) -> Option<&str> {
        match self {
            Self::Identity => set.id_token.as_deref(),
            Self::VehicleApi => Some(set.access_token.as_str()),
        }
    }
}

impl fmt::Display for Authority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Identity => f.write_str("identity"),
            Self::VehicleApi => f.write_str("vehicle-api"),
        }
    }
}

impl std::str::FromStr for Authority {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "identity" => Ok(Self::Identity),
            "vehicle-api" | "vehicle_api" | "vwg" => Ok(Self::VehicleApi),
            other => Err(AuthError::InvalidConfig {
                reason: format!("unknown token authority `{other}`"),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// TokenSet
// ---------------------------------------------------------------------------

/// Access, ID and refresh tokens issued by one authority.
///
/// Fields the token endpoint returns beyond the three tokens (`expires_in`,
/// `token_type`, `scope`, ...) are kept in `extra` so that a refresh response
/// can be merged key by key.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenSet {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TokenSet {
    /// Parse a token endpoint response body.
    pub fn from_response(body: Value) -> Result<Self> {
        Ok(serde_json::from_value(body)?)
    }

    /// Whether this set can be renewed without an interactive login.
    pub fn can_self_renew(&self) -> bool {
        self.refresh_token.as_deref().is_some_and(|t| !t.is_empty())
    }

    /// Merge a refresh response: returned keys overwrite, others are kept.
    pub fn merge(&mut self, update: Map<String, Value>) -> Result<()> {
        let mut current = match serde_json::to_value(&*self)? {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        current.extend(update);
        *self = serde_json::from_value(Value::Object(current))?;
        Ok(())
    }

    /// Expiry of this set as decided by `authority`.
    ///
    /// # Errors
    ///
    /// [`AuthError::MissingToken`] if the deciding token is absent, or
    /// [`AuthError::InvalidToken`] if it carries no readable `exp` claim.
    pub fn expires_at(&self, authority: Authority) -> Result<DateTime<Utc>> {
        let token = authority
            .expiry_token(self)
            .ok_or(AuthError::MissingToken { authority })?;
        token_expiry(token)
    }
}

// Tokens are bearer credentials; keep them out of logs.
impl fmt::Debug for TokenSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenSet")
            .field("access_token", &"<redacted>")
            .field("id_token", &self.id_token.as_ref().map(|_| "<redacted>"))
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "<redacted>"),
            )
            .field("extra", &self.extra.keys().collect::<Vec<_>>())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Unverified claim decoding
// ---------------------------------------------------------------------------

/// Decode the payload of a JWT without checking its signature.
pub fn decode_claims_unverified(token: &str) -> Result<Map<String, Value>> {
    let mut segments = token.split('.');
    let payload = match (segments.next(), segments.next(), segments.next()) {
        (Some(_), Some(payload), Some(_)) => payload,
        _ => {
            return Err(AuthError::InvalidToken {
                reason: "not a three-part JWT".to_string(),
            });
        }
    };

    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|e| AuthError::InvalidToken {
            reason: format!("payload is not base64url: {e}"),
        })?;

    match serde_json::from_slice(&bytes)? {
        Value::Object(claims) => Ok(claims),
        _ => Err(AuthError::InvalidToken {
            reason: "payload is not a JSON object".to_string(),
        }),
    }
}

/// Read the `exp` claim of a JWT without checking its signature.
pub fn token_expiry(token: &str) -> Result<DateTime<Utc>> {
    let claims = decode_claims_unverified(token)?;
    let exp = match claims.get("exp") {
        Some(Value::Number(n)) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Some(Value::String(s)) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
    .ok_or_else(|| AuthError::InvalidToken {
        reason: "missing or malformed exp claim".to_string(),
    })?;

    Utc.timestamp_opt(exp, 0)
        .single()
        .ok_or_else(|| AuthError::InvalidToken {
            reason: format!("exp claim {exp} out of range"),
        })
}

// ---------------------------------------------------------------------------
// TokenStore
// ---------------------------------------------------------------------------

/// Both token sets held by a connection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenStore {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity: Option<TokenSet>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vehicle_api: Option<TokenSet>,
}

impl TokenStore {
    pub fn get(&self, authority: Authority) -> Option<&TokenSet> {
        match authority {
            Authority::Identity => self.identity.as_ref(),
            Authority::VehicleApi => self.vehicle_api.as_ref(),
        }
    }

    pub fn get_mut(&mut self, authority: Authority) -> Option<&mut TokenSet> {
        match authority {
            Authority::Identity => self.identity.as_mut(),
            Authority::VehicleApi => self.vehicle_api.as_mut(),
        }
    }

    /// Replace one authority's set wholesale.
    pub fn replace(&mut self, authority: Authority, set: TokenSet) {
        match authority {
            Authority::Identity => self.identity = Some(set),
            Authority::VehicleApi => self.vehicle_api = Some(set),
        }
    }

    pub fn clear(&mut self) {
        self.identity = None;
        self.vehicle_api = None;
    }

    pub fn is_empty(&self) -> bool {
        self.identity.is_none() && self.vehicle_api.is_none()
    }

    /// The access token to present as bearer for `authority`.
    pub fn bearer(&self, authority: Authority) -> Option<&str> {
        self.get(authority).map(|set| set.access_token.as_str())
    }

    /// Expiry of one authority's set.
    pub fn expires_at(&self, authority: Authority) -> Result<DateTime<Utc>> {
        self.get(authority)
            .ok_or(AuthError::MissingToken { authority })?
            .expires_at(authority)
    }

    /// Whether both sets are usable for more than `margin_secs` after `now`.
    ///
    /// A missing set or an undecodable expiry counts as invalid.
    pub fn is_valid_at(&self, now: DateTime<Utc>, margin_secs: i64) -> bool {
        [Authority::Identity, Authority::VehicleApi]
            .into_iter()
            .all(|authority| match self.expires_at(authority) {
                Ok(expiry) => expiry.timestamp() - now.timestamp() > margin_secs,
                Err(e) => {
                    tracing::debug!(%authority, error = %e, "token expiry unreadable");
                    false
                }
            })
    }

    pub fn is_valid(&self, margin_secs: i64) -> bool {
        self.is_valid_at(Utc::now(), margin_secs)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
