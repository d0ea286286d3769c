//! The interactive login state machine.
//!
//! The identity provider offers no headless grant, so the client walks the
//! same pages a browser would:
//!
//! 1. fetch the OpenID configuration,
//! 2. open the authorization endpoint and scrape the e-mail form,
//! 3. post the e-mail and scrape the password form,
//! 4. post the password without following the redirect,
//! 5. walk the redirect chain until it points at the app's own URI scheme,
//!    whose fragment carries the authorization code and tokens,
//! 6. exchange the code for the identity token set,
//! 7. verify the identity token,
//! 8. trade the identity `id_token` for the vehicle-api token set,
//! 9. verify the vehicle-api token.
//!
//! The steps run strictly in order. The first failure aborts the attempt and
//! is reported as [`AuthError::AuthenticationFailed`] naming the step.

use std::time::{SystemTime, UNIX_EPOCH};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::StatusCode;
use reqwest::header::{HeaderValue, ORIGIN, REFERER};
use ring::digest;
use serde::Deserialize;
use serde_json::Value;
use url::Url;

use crate::config::{ClientConfig, Credentials};
use crate::error::{AuthError, LoginStep, Result};
use crate::forms::{EMAIL_FORM_ID, HiddenForm, PASSWORD_FORM_ID, extract_hidden_form};
use crate::jwks::KeyVerifier;
use crate::tokens::{Authority, TokenSet, TokenStore};
use crate::transport::{Transport, auth_headers, raw_location, redact, token_headers};

/// Scope requested from the vehicle-api authority.
pub const VEHICLE_API_SCOPE: &str = "sc2:fal";

/// The parts of the discovery document the login needs.
#[derive(Debug, Clone, Deserialize)]
pub struct Discovery {
    pub authorization_endpoint: String,
    pub issuer: String,
}

/// Code and tokens carried in the fragment of the final redirect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationFragment {
    pub code: String,
    pub id_token: String,
    pub access_token: String,
}

/// Nonce for the authorization request.
///
/// SHA-256 of the current Unix time in seconds, standard base64, with the
/// final character (the padding `=`) dropped.
pub fn generate_nonce() -> String {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();
    nonce_for_timestamp(now)
}

fn nonce_for_timestamp(secs: u64) -> String {
    let hash = digest::digest(&digest::SHA256, secs.to_string().as_bytes());
    let mut encoded = STANDARD.encode(hash.as_ref());
    encoded.pop();
    encoded
}

/// Extract code and tokens from a redirect target's fragment.
///
/// # Errors
///
/// [`AuthError::UnexpectedResponse`] if the target has no fragment or any
/// of `code`, `id_token`, `access_token` is missing.
pub fn parse_fragment(target: &str) -> Result<AuthorizationFragment> {
    let fragment = target
        .split_once('#')
        .map(|(_, fragment)| fragment)
        .ok_or_else(|| AuthError::UnexpectedResponse {
            reason: "final redirect carries no fragment".to_string(),
        })?;

    let mut code = None;
    let mut id_token = None;
    let mut access_token = None;
    for (key, value) in url::form_urlencoded::parse(fragment.as_bytes()) {
        match key.as_ref() {
            "code" => code = Some(value.into_owned()),
            "id_token" => id_token = Some(value.into_owned()),
            "access_token" => access_token = Some(value.into_owned()),
            _ => {}
        }
    }

    let missing = |name: &str| AuthError::UnexpectedResponse {
        reason: format!("final redirect fragment has no `{name}`"),
    };
    Ok(AuthorizationFragment {
        code: code.ok_or_else(|| missing("code"))?,
        id_token: id_token.ok_or_else(|| missing("id_token"))?,
        access_token: access_token.ok_or_else(|| missing("access_token"))?,
    })
}

/// One interactive login attempt.
///
/// Borrows everything from the connection; the resulting token store is
/// handed back to the caller, which owns the commit.
pub struct LoginFlow<'a> {
    transport: &'a Transport,
    verifier: &'a KeyVerifier,
    config: &'a ClientConfig,
    credentials: &'a Credentials,
}

impl<'a> LoginFlow<'a> {
    pub fn new(
        transport: &'a Transport,
        verifier: &'a KeyVerifier,
        config: &'a ClientConfig,
        credentials: &'a Credentials,
    ) -> Self {
        Self {
            transport,
            verifier,
            config,
            credentials,
        }
    }

    /// Run every step and return both verified token sets.
    ///
    /// # Errors
    ///
    /// [`AuthError::AuthenticationFailed`] naming the step that failed.
    pub async fn run(&self) -> Result<TokenStore> {
        let step = |step: LoginStep| move |e: AuthError| e.at_step(step);

        tracing::debug!(step = %LoginStep::Discover, "login step");
        let discovery = self.discover().await.map_err(step(LoginStep::Discover))?;

        tracing::debug!(step = %LoginStep::Authorize, "login step");
        let email_form = self
            .authorize(&discovery)
            .await
            .map_err(step(LoginStep::Authorize))?;

        tracing::debug!(step = %LoginStep::SubmitEmail, "login step");
        let (password_form, email_url) = self
            .submit_email(&discovery, &email_form)
            .await
            .map_err(step(LoginStep::SubmitEmail))?;

        tracing::debug!(step = %LoginStep::SubmitPassword, "login step");
        let (location, password_url) = self
            .submit_password(&discovery, &password_form, &email_url)
            .await
            .map_err(step(LoginStep::SubmitPassword))?;

        tracing::debug!(step = %LoginStep::FollowRedirects, "login step");
        let fragment = self
            .follow_redirects(location, &password_url, &email_url)
            .await
            .and_then(|target| parse_fragment(&target))
            .map_err(step(LoginStep::FollowRedirects))?;

        tracing::debug!(step = %LoginStep::ExchangeAuthCode, "login step");
        let identity = self
            .exchange_auth_code(&fragment)
            .await
            .map_err(step(LoginStep::ExchangeAuthCode))?;

        tracing::debug!(step = %LoginStep::VerifyIdentity, "login step");
        let id_token = identity.id_token.clone().unwrap_or_default();
        self.verifier
            .check(&id_token, Authority::Identity, self.config.verification)
            .await
            .map_err(step(LoginStep::VerifyIdentity))?;

        tracing::debug!(step = %LoginStep::ExchangeSecondaryToken, "login step");
        let vehicle_api = exchange_id_token(self.transport, self.config, &id_token)
            .await
            .map_err(step(LoginStep::ExchangeSecondaryToken))?;

        tracing::debug!(step = %LoginStep::VerifySecondary, "login step");
        self.verifier
            .check(
                &vehicle_api.access_token,
                Authority::VehicleApi,
                self.config.verification,
            )
            .await
            .map_err(step(LoginStep::VerifySecondary))?;

        Ok(TokenStore {
            identity: Some(identity),
            vehicle_api: Some(vehicle_api),
        })
    }

    async fn discover(&self) -> Result<Discovery> {
        let url = &self.config.endpoints.discovery;
        let response = self
            .transport
            .send_following(self.transport.get(url))
            .await
            .map_err(|e| AuthError::Discovery {
                reason: format!("configuration document unreachable: {e}"),
            })?;

        if response.status() != StatusCode::OK {
            return Err(AuthError::Discovery {
                reason: format!("configuration document returned HTTP {}", response.status()),
            });
        }

        let document: Value = response.json().await.map_err(|e| AuthError::Discovery {
            reason: format!("configuration document is not JSON: {e}"),
        })?;
        let field = |name: &str| {
            document
                .get(name)
                .and_then(Value::as_str)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
                .ok_or_else(|| AuthError::Discovery {
                    reason: format!("configuration document has no `{name}`"),
                })
        };

        Ok(Discovery {
            authorization_endpoint: field("authorization_endpoint")?,
            issuer: field("issuer")?,
        })
    }

    async fn authorize(&self, discovery: &Discovery) -> Result<HiddenForm> {
        let app = &self.config.app;
        let nonce = generate_nonce();
        let request = self
            .transport
            .get(&discovery.authorization_endpoint)
            .headers(auth_headers(app))
            .query(&[
                ("nonce", nonce.as_str()),
                ("response_type", "code id_token token"),
                ("scope", app.scope.as_str()),
                ("redirect_uri", app.redirect_uri.as_str()),
                ("client_id", app.client_id.as_str()),
            ]);

        let response = self.transport.send_following(request).await?;
        let html = expect_page(response, "authorization page").await?;
        extract_hidden_form(&html, EMAIL_FORM_ID)
    }

    async fn submit_email(
        &self,
        discovery: &Discovery,
        form: &HiddenForm,
    ) -> Result<(HiddenForm, String)> {
        let url = form.submission_url(&discovery.issuer);
        let request = self
            .transport
            .post(&url)
            .headers(auth_headers(&self.config.app))
            .header(REFERER, header_value(&discovery.authorization_endpoint)?)
            .header(ORIGIN, header_value(&discovery.issuer)?)
            .form(&form.with_field("email", &self.credentials.username));

        let response = self.transport.send_following(request).await?;
        let html = expect_page(response, "password page").await?;
        Ok((extract_hidden_form(&html, PASSWORD_FORM_ID)?, url))
    }

    async fn submit_password(
        &self,
        discovery: &Discovery,
        form: &HiddenForm,
        email_url: &str,
    ) -> Result<(String, String)> {
        let url = form.submission_url(&discovery.issuer);
        let request = self
            .transport
            .post(&url)
            .headers(auth_headers(&self.config.app))
            .header(REFERER, header_value(email_url)?)
            .header(ORIGIN, header_value(&discovery.issuer)?)
            .form(&form.with_field("password", &self.credentials.password));

        let response = self.transport.send(request).await?;
        let location = raw_location(&response).ok_or_else(|| AuthError::UnexpectedResponse {
            reason: format!(
                "password submission answered HTTP {} without a redirect, credentials may be wrong",
                response.status()
            ),
        })?;
        Ok((location, url))
    }

    /// Walk `Location` headers until one points at the app redirect URI.
    ///
    /// At most `max_redirects` requests are made. Relative targets resolve
    /// against the URL that issued them, starting with `origin`.
    async fn follow_redirects(&self, first: String, origin: &str, referer: &str) -> Result<String> {
        let app_uri = self.config.app.redirect_uri.as_str();
        let limit = self.config.max_redirects;
        let mut target = first;
        let mut current = Url::parse(origin).ok();
        let mut hops = 0;

        while !target.starts_with(app_uri) {
            if hops >= limit {
                tracing::warn!(hops, "redirect chain never reached the app");
                return Err(AuthError::RedirectLoop { hops });
            }

            let url = match &current {
                Some(base) => base.join(&target)?,
                None => Url::parse(&target)?,
            };
            let request = self
                .transport
                .request(reqwest::Method::GET, url.clone())
                .headers(auth_headers(&self.config.app))
                .header(REFERER, header_value(referer)?);
            let response = self.transport.send(request).await?;
            hops += 1;

            target = raw_location(&response).ok_or_else(|| AuthError::UnexpectedResponse {
                reason: format!(
                    "redirect chain stopped at {} with HTTP {}",
                    redact(&url),
                    response.status()
                ),
            })?;
            current = Some(url);
        }

        tracing::debug!(hops, "redirect chain reached the app");
        Ok(target)
    }

    async fn exchange_auth_code(&self, fragment: &AuthorizationFragment) -> Result<TokenSet> {
        let authority = Authority::Identity;
        let request = self
            .transport
            .post(&self.config.endpoints.identity_token)
            .headers(token_headers(&self.config.app))
            .form(&[
                ("auth_code", fragment.code.as_str()),
                ("id_token", fragment.id_token.as_str()),
                ("brand", self.config.app.brand.as_str()),
            ]);

        let response = self.transport.send(request).await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::TokenExchange {
                authority,
                reason: format!("HTTP {status}: {body}"),
            });
        }

        let set = TokenSet::from_response(response.json().await?).map_err(|e| {
            AuthError::TokenExchange {
                authority,
                reason: e.to_string(),
            }
        })?;
        if set.id_token.is_none() {
            return Err(AuthError::TokenExchange {
                authority,
                reason: "response has no id_token".to_string(),
            });
        }
        Ok(set)
    }
}

/// Trade an identity `id_token` for a vehicle-api token response.
///
/// Shared by the login flow and the refresh controller. Returns the raw JSON
/// object so the refresh path can merge it key by key.
pub async fn exchange_id_token_raw(
    transport: &Transport,
    config: &ClientConfig,
    id_token: &str,
) -> Result<serde_json::Map<String, Value>> {
    let authority = Authority::VehicleApi;
    let request = transport
        .post(&config.endpoints.vehicle_api_token)
        .headers(token_headers(&config.app))
        .form(&[
            ("grant_type", "id_token"),
            ("token", id_token),
            ("scope", VEHICLE_API_SCOPE),
        ]);

    let response = transport.send_following(request).await?;
    let status = response.status();
    if status.is_client_error() || status.is_server_error() {
        let body = response.text().await.unwrap_or_default();
        return Err(AuthError::TokenExchange {
            authority,
            reason: format!("HTTP {status}: {body}"),
        });
    }

    match response.json::<Value>().await? {
        Value::Object(map) => Ok(map),
        _ => Err(AuthError::TokenExchange {
            authority,
            reason: "response is not a JSON object".to_string(),
        }),
    }
}

async fn exchange_id_token(
    transport: &Transport,
    config: &ClientConfig,
    id_token: &str,
) -> Result<TokenSet> {
    let raw = exchange_id_token_raw(transport, config, id_token).await?;
    TokenSet::from_response(Value::Object(raw)).map_err(|e| AuthError::TokenExchange {
        authority: Authority::VehicleApi,
        reason: e.to_string(),
    })
}

async fn expect_page(response: reqwest::Response, what: &str) -> Result<String> {
    let status = response.status();
    if status != StatusCode::OK {
        return Err(AuthError::UnexpectedResponse {
            reason: format!("{what} returned HTTP {status}"),
        });
    }
    Ok(response.text().await?)
}

fn header_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value).map_err(|e| AuthError::UnexpectedResponse {
        reason: format!("cannot use `{value}` as a header: {e}"),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
