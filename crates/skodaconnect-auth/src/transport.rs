//! HTTP transport shared by the login flow and the request executor.
//!
//! The underlying client never follows redirects on its own: the login flow
//! has to see each `Location` header, and cookies set on intermediate hops
//! must land in the connection's [`CookieJar`]. Every request goes out with
//! the jar's cookies for its host, and every response is merged back into
//! the jar regardless of status.

use reqwest::header::{
    ACCEPT, CONTENT_LENGTH, CONTENT_TYPE, COOKIE, HeaderMap, HeaderName, HeaderValue, LOCATION,
};
use reqwest::{Method, Request, RequestBuilder, Response};
use url::Url;

use crate::config::{AppIdentity, ClientConfig};
use crate::cookies::CookieJar;

const X_CLIENT_ID: HeaderName = HeaderName::from_static("x-client-id");
const X_APP_NAME: HeaderName = HeaderName::from_static("x-app-name");
const X_APP_VERSION: HeaderName = HeaderName::from_static("x-app-version");

/// Cookie-aware client with manual redirect control.
pub struct Transport {
    client: reqwest::Client,
    cookies: CookieJar,
    max_redirects: usize,
}

impl Transport {
    /// Build the transport for `config`.
    ///
    /// # Errors
    ///
    /// Fails only if the TLS backend cannot be initialised.
    pub fn new(config: &ClientConfig) -> reqwest::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(config.app.user_agent.as_str())
            .timeout(config.request_timeout())
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        Ok(Self {
            client,
            cookies: CookieJar::new(),
            max_redirects: config.max_redirects,
        })
    }

    /// The bare client, for requests that must not carry cookies.
    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    pub fn cookies(&self) -> &CookieJar {
        &self.cookies
    }

    pub fn get(&self, url: &str) -> RequestBuilder {
        self.client.get(url)
    }

    pub fn post(&self, url: &str) -> RequestBuilder {
        self.client.post(url)
    }

    pub fn request(&self, method: Method, url: Url) -> RequestBuilder {
        self.client.request(method, url)
    }

    /// Send one request without following redirects.
    pub async fn send(&self, request: RequestBuilder) -> reqwest::Result<Response> {
        let request = request.build()?;
        self.execute(request).await
    }

    /// Send a request and follow HTTP redirects, collecting cookies on every
    /// hop.
    ///
    /// Redirected requests are re-issued as `GET` with the original headers
    /// minus the body-related ones. Redirects to non-HTTP schemes are not
    /// followed. After the configured number of hops the last redirect
    /// response is returned as is.
    pub async fn send_following(&self, request: RequestBuilder) -> reqwest::Result<Response> {
        let mut request = request.build()?;
        let mut hops = 0;

        loop {
            let mut headers = request.headers().clone();
            let response = self.execute(request).await?;

            if !response.status().is_redirection() || hops >= self.max_redirects {
                return Ok(response);
            }
            let Some(next) = location(&response) else {
                return Ok(response);
            };
            if !matches!(next.scheme(), "http" | "https") {
                return Ok(response);
            }

            tracing::debug!(from = %response.url(), to = %redact(&next), "following redirect");
            hops += 1;

            headers.remove(CONTENT_TYPE);
            headers.remove(CONTENT_LENGTH);
            headers.remove(COOKIE);
            request = Request::new(Method::GET, next);
            *request.headers_mut() = headers;
        }
    }

    async fn execute(&self, mut request: Request) -> reqwest::Result<Response> {
        if let Some(cookie) = self.cookies.header_for(request.url()) {
            request.headers_mut().insert(COOKIE, cookie);
        }

        let method = request.method().clone();
        let url = redact(request.url());
        let response = self.client.execute(request).await?;

        tracing::debug!(%method, %url, status = response.status().as_u16(), "http exchange");
        self.cookies.store_response(response.url(), response.headers());
        Ok(response)
    }
}

/// The `Location` of a redirect response, resolved against its URL.
pub fn location(response: &Response) -> Option<Url> {
    let raw = response.headers().get(LOCATION)?.to_str().ok()?;
    response.url().join(raw).ok()
}

/// The raw `Location` header value.
pub fn raw_location(response: &Response) -> Option<String> {
    response
        .headers()
        .get(LOCATION)?
        .to_str()
        .ok()
        .map(str::to_string)
}

/// A URL without query and fragment, safe to log.
pub fn redact(url: &Url) -> String {
    let mut clean = url.clone();
    clean.set_query(None);
    clean.set_fragment(None);
    clean.to_string()
}

fn app_headers(app: &AppIdentity) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (name, value) in [
        (X_CLIENT_ID, &app.x_client_id),
        (X_APP_NAME, &app.app_name),
        (X_APP_VERSION, &app.app_version),
    ] {
        if let Ok(value) = HeaderValue::from_str(value) {
            headers.insert(name, value);
        }
    }
    headers
}

/// Headers for the browser-like login pages and token exchanges.
pub fn auth_headers(app: &AppIdentity) -> HeaderMap {
    let mut headers = app_headers(app);
    headers.insert(
        ACCEPT,
        HeaderValue::from_static(
            "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
        ),
    );
    headers
}

/// Headers for token endpoints that answer JSON.
pub fn token_headers(app: &AppIdentity) -> HeaderMap {
    let mut headers = app_headers(app);
    headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
    headers
}

/// Headers for API calls.
pub fn api_headers(app: &AppIdentity) -> HeaderMap {
    let mut headers = app_headers(app);
    headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
    headers.insert(
        HeaderName::from_static("accept-charset"),
        HeaderValue::from_static("UTF-8"),
    );
    headers
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
