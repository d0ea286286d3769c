//! Connection-owned cookie jar.
//!
//! The identity provider relies on cookies set during the login pages, and
//! the API hosts hand out load-balancer cookies. The jar is an explicit
//! value owned by the connection: every outbound request reads from it and
//! every response is merged back into it, whatever its status. It is
//! cleared at the start of every login attempt.
//!
//! Matching and expiry follow RFC 6265 through [`cookie_store`], the same
//! store reqwest's built-in jar wraps: `Domain`, `Path`, `Secure`,
//! `Expires` and `Max-Age` are all honoured.

use std::sync::Mutex;

use cookie_store::{CookieStore, RawCookie};
use reqwest::header::{HeaderMap, HeaderValue, SET_COOKIE};
use url::Url;

/// Cookies accumulated across requests.
#[derive(Debug, Default)]
pub struct CookieJar {
    store: Mutex<CookieStore>,
}

impl CookieJar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every cookie.
    pub fn clear(&self) {
        if let Ok(mut store) = self.store.lock() {
            store.clear();
        }
    }

    /// Number of cookies that have not expired.
    pub fn len(&self) -> usize {
        self.store
            .lock()
            .map(|store| store.iter_unexpired().count())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Merge every `Set-Cookie` header of a response from `url`.
    ///
    /// A cookie with an empty value deletes any stored cookie of the same
    /// name, domain and path.
    pub fn store_response(&self, url: &Url, headers: &HeaderMap) {
        let cookies: Vec<RawCookie<'static>> = headers
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|raw| {
                let parsed = raw
                    .to_str()
                    .ok()
                    .and_then(|raw| RawCookie::parse(raw).ok());
                if parsed.is_none() {
                    tracing::debug!(host = url.host_str(), "ignoring malformed Set-Cookie header");
                }
                parsed
            })
            .map(|cookie| {
                let mut cookie = cookie.into_owned();
                if cookie.value().is_empty() {
                    cookie.make_removal();
                }
                cookie
            })
            .collect();

        if cookies.is_empty() {
            return;
        }
        if let Ok(mut store) = self.store.lock() {
            store.store_response_cookies(cookies.into_iter(), url);
        }
    }

    /// The `Cookie` header to send to `url`, if any cookie matches.
    pub fn header_for(&self, url: &Url) -> Option<HeaderValue> {
        let store = self.store.lock().ok()?;
        let pairs: Vec<String> = store
            .get_request_values(url)
            .map(|(name, value)| format!("{name}={value}"))
            .collect();

        if pairs.is_empty() {
            return None;
        }
        HeaderValue::from_str(&pairs.join("; ")).ok()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
