//! Request URL resolution and response classification for API calls.

use reqwest::StatusCode;
use reqwest::header::HeaderMap;
use serde_json::{Value, json};
use url::Url;

use crate::config::Endpoints;
use crate::error::HttpError;

/// Response header reporting the remaining request quota.
pub const RATE_LIMIT_HEADER: &str = "x-ratelimit-remaining";

/// Key under which the remaining quota is copied into a response body.
pub const RATE_LIMIT_FIELD: &str = "rate_limit_remaining";

/// Placeholder substituted with the vehicle identifier in request paths.
pub const VIN_PLACEHOLDER: &str = "$vin";

/// Base URLs that relative request paths resolve against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaseUrls {
    /// Home-region data base.
    pub data: String,
    /// Base for role and rights lookups.
    pub rights: String,
}

impl BaseUrls {
    /// Both bases at the pre-region default.
    pub fn new(endpoints: &Endpoints) -> Self {
        Self {
            data: endpoints.default_base.clone(),
            rights: endpoints.default_base.clone(),
        }
    }

    /// Bases derived from a home-region URI such as
    /// `https://mal-3a.prd.ece.vwg-connect.com/api`.
    ///
    /// The rights base is everything before `/api`. The data base is the same
    /// host with `mal-` swapped for `fal-`, except for the default region,
    /// whose data still lives on the legacy base.
    pub fn for_region(endpoints: &Endpoints, region_uri: &str) -> Self {
        let host = region_uri
            .split_once("/api")
            .map_or(region_uri, |(host, _)| host)
            .to_string();

        let data = if region_uri == endpoints.default_region {
            endpoints.default_base.clone()
        } else {
            host.replace("mal-", "fal-")
        };

        Self { data, rights: host }
    }

    /// Resolve a request path to a full URL.
    ///
    /// `$vin` is replaced by `vin`. Absolute URLs are used as they are; paths
    /// mentioning `rolesrights` resolve against the rights base, all others
    /// against the data base.
    pub fn resolve(&self, path: &str, vin: &str) -> Result<Url, url::ParseError> {
        let path = path.replace(VIN_PLACEHOLDER, vin);
        if path.contains("://") {
            return Url::parse(&path);
        }
        let base = if path.contains("rolesrights") {
            &self.rights
        } else {
            &self.data
        };
        Url::parse(base)?.join(&path)
    }
}

/// Value of the rate-limit header, if the response carried one.
pub fn rate_limit_remaining(headers: &HeaderMap) -> Option<String> {
    headers
        .get(RATE_LIMIT_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// Turn a completed response into the executor's result.
///
/// - 204: `{"status_code": 204}`
/// - other 2xx: the JSON body (an empty body reads as `{}`)
/// - 401: [`HttpError::Unauthorized`]
/// - anything else: [`HttpError::Status`]
///
/// The rate-limit header, when present, is copied into object bodies under
/// [`RATE_LIMIT_FIELD`] and into [`HttpError::Status`].
pub fn classify(status: StatusCode, headers: &HeaderMap, body: &[u8]) -> Result<Value, HttpError> {
    let remaining = rate_limit_remaining(headers);

    if status == StatusCode::UNAUTHORIZED {
        return Err(HttpError::Unauthorized);
    }
    if !status.is_success() {
        return Err(HttpError::Status {
            status: status.as_u16(),
            rate_limit_remaining: remaining,
        });
    }

    let mut value = if status == StatusCode::NO_CONTENT {
        json!({ "status_code": status.as_u16() })
    } else if body.iter().all(u8::is_ascii_whitespace) {
        json!({})
    } else {
        serde_json::from_slice(body).map_err(|e| HttpError::Decode {
            reason: e.to_string(),
        })?
    };

    if let (Some(remaining), Value::Object(map)) = (remaining, &mut value) {
        map.insert(RATE_LIMIT_FIELD.to_string(), Value::String(remaining));
    }
    Ok(value)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
