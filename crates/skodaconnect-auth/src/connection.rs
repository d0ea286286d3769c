//! The connection: session lifecycle plus the authenticated request executor.
//!
//! A [`Connection`] exclusively owns the user's credentials, both token sets,
//! the cookie jar and the session state. Data-fetch code talks to it through
//! four calls: [`Connection::ensure_session`], [`Connection::select_token`],
//! [`Connection::get`] and [`Connection::post`].
//!
//! Login and refresh never run concurrently. They are serialised by a
//! single-flight gate: the first caller that finds the session unusable runs
//! the login or refresh while holding the gate, and callers that queued
//! behind it reuse its outcome instead of starting their own.

use std::sync::atomic::{AtomicU64, Ordering};

use reqwest::Method;
use reqwest::header::{AUTHORIZATION, HeaderValue};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::{Mutex, RwLock};

use crate::config::{ClientConfig, Credentials};
use crate::error::{AuthError, HttpError, Result};
use crate::jwks::KeyVerifier;
use crate::login::{LoginFlow, exchange_id_token_raw};
use crate::request::{BaseUrls, classify};
use crate::tokens::{Authority, TokenSet, TokenStore, decode_claims_unverified};
use crate::transport::{Transport, api_headers, redact, token_headers};

/// Lifecycle of the session held by a connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No session. The initial state, and the state after a failed login.
    #[default]
    LoggedOut,
    /// An interactive login is in progress.
    Authenticating,
    /// Both token sets are held and were valid when last checked.
    LoggedIn,
    /// Tokens are held but stale, or the service answered 401.
    Expired,
}

/// Outcome of the most recent login or refresh, shared with waiters.
struct Flight {
    completed: u64,
    outcome: Result<()>,
}

/// An authenticated connection to the vehicle service.
pub struct Connection {
    config: ClientConfig,
    credentials: Credentials,
    transport: Transport,
    verifier: KeyVerifier,
    tokens: RwLock<TokenStore>,
    state: RwLock<SessionState>,
    selected: RwLock<Authority>,
    bases: RwLock<BaseUrls>,
    flight: Mutex<Flight>,
    completed_flights: AtomicU64,
}

impl Connection {
    /// Create a logged-out connection.
    ///
    /// # Errors
    ///
    /// [`AuthError::Network`] if the HTTP client cannot be built.
    pub fn new(credentials: Credentials, config: ClientConfig) -> Result<Self> {
        let transport = Transport::new(&config)?;
        let verifier = KeyVerifier::new(transport.client().clone(), &config);
        let bases = BaseUrls::new(&config.endpoints);

        tracing::debug!(base = %bases.data, "connection created");

        Ok(Self {
            config,
            credentials,
            transport,
            verifier,
            tokens: RwLock::new(TokenStore::default()),
            state: RwLock::new(SessionState::LoggedOut),
            selected: RwLock::new(Authority::VehicleApi),
            bases: RwLock::new(bases),
            flight: Mutex::new(Flight {
                completed: 0,
                outcome: Ok(()),
            }),
            completed_flights: AtomicU64::new(0),
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn username(&self) -> &str {
        &self.credentials.username
    }

    pub async fn state(&self) -> SessionState {
        *self.state.read().await
    }

    /// Whether both token sets are held and outside the refresh margin.
    pub async fn is_valid(&self) -> bool {
        self.tokens
            .read()
            .await
            .is_valid(self.config.refresh_margin_secs)
    }

    /// A snapshot of both token sets, suitable for persisting.
    pub async fn tokens(&self) -> TokenStore {
        self.tokens.read().await.clone()
    }

    /// Install previously persisted token sets.
    ///
    /// The session becomes [`SessionState::LoggedIn`] if the tokens are still
    /// valid and [`SessionState::Expired`] otherwise, so the next
    /// [`Connection::ensure_session`] refreshes rather than logging in.
    pub async fn restore_tokens(&self, store: TokenStore) {
        let _flight = self.flight.lock().await;
        let valid = store.is_valid(self.config.refresh_margin_secs);
        *self.tokens.write().await = store;
        *self.selected.write().await = Authority::VehicleApi;
        self.set_state(if valid {
            SessionState::LoggedIn
        } else {
            SessionState::Expired
        })
        .await;
    }

    /// Drop tokens and cookies and return to [`SessionState::LoggedOut`].
    pub async fn logout(&self) {
        let _flight = self.flight.lock().await;
        self.tokens.write().await.clear();
        self.transport.cookies().clear();
        self.set_state(SessionState::LoggedOut).await;
        tracing::info!("logged out");
    }

    // -- Session lifecycle ---------------------------------------------------

    /// Make sure a usable session exists, logging in or refreshing as needed.
    ///
    /// A logged-in session with valid tokens returns immediately. Stale
    /// tokens (or a session marked expired by a 401) are refreshed; if that
    /// fails, or there is nothing to refresh, the interactive login runs.
    pub async fn ensure_session(&self) -> Result<()> {
        let observed = self.completed_flights.load(Ordering::Acquire);
        if self.is_usable().await {
            return Ok(());
        }

        let mut flight = self.flight.lock().await;

        if flight.completed != observed {
            // Another caller finished a login or refresh while we waited.
            match &flight.outcome {
                Err(e) => return Err(e.clone()),
                Ok(()) if self.is_usable().await => return Ok(()),
                Ok(()) => {}
            }
        }

        let outcome = self.establish().await;
        self.finish_flight(&mut flight, &outcome);
        outcome
    }

    /// Run the interactive login now, whatever the current state.
    pub async fn login(&self) -> Result<()> {
        let mut flight = self.flight.lock().await;
        let outcome = self.login_locked().await;
        self.finish_flight(&mut flight, &outcome);
        outcome
    }

    /// Refresh both token sets without an interactive login.
    ///
    /// # Errors
    ///
    /// [`AuthError::RefreshFailed`]; the session is left
    /// [`SessionState::Expired`] and the caller should fall back to
    /// [`Connection::login`].
    pub async fn refresh(&self) -> Result<()> {
        let mut flight = self.flight.lock().await;
        let outcome = self.refresh_locked().await;
        self.finish_flight(&mut flight, &outcome);
        outcome
    }

    async fn is_usable(&self) -> bool {
        self.state().await == SessionState::LoggedIn && self.is_valid().await
    }

    fn finish_flight(&self, flight: &mut Flight, outcome: &Result<()>) {
        flight.completed += 1;
        flight.outcome = outcome.clone();
        self.completed_flights
            .store(flight.completed, Ordering::Release);
    }

    /// Pick refresh or login for the current state. Caller holds the gate.
    async fn establish(&self) -> Result<()> {
        let state = self.state().await;
        let renewable = self.is_renewable().await;

        if matches!(state, SessionState::LoggedIn | SessionState::Expired) && renewable {
            tracing::info!("session expired, refreshing tokens");
            match self.refresh_locked().await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    tracing::warn!(error = %e, "refresh failed, falling back to full login");
                }
            }
        } else {
            tracing::info!(?state, "no renewable session, starting login");
        }

        self.login_locked().await
    }

    async fn login_locked(&self) -> Result<()> {
        self.set_state(SessionState::Authenticating).await;
        self.transport.cookies().clear();

        let flow = LoginFlow::new(
            &self.transport,
            &self.verifier,
            &self.config,
            &self.credentials,
        );

        match flow.run().await {
            Ok(store) => {
                *self.tokens.write().await = store;
                *self.selected.write().await = Authority::VehicleApi;
                self.set_state(SessionState::LoggedIn).await;
                tracing::info!(user = %self.credentials.username, "login succeeded");
                Ok(())
            }
            Err(e) => {
                self.set_state(SessionState::LoggedOut).await;
                tracing::error!(
                    step = ?e.failed_step(),
                    error = %e,
                    "login failed"
                );
                Err(e)
            }
        }
    }

    async fn is_renewable(&self) -> bool {
        self.tokens
            .read()
            .await
            .identity
            .as_ref()
            .is_some_and(TokenSet::can_self_renew)
    }

    async fn refresh_locked(&self) -> Result<()> {
        if !self.is_renewable().await {
            tracing::warn!("no identity refresh token held, nothing to refresh");
            return Err(AuthError::RefreshFailed {
                reason: "no identity refresh token held".to_string(),
            });
        }

        self.set_state(SessionState::Expired).await;
        tracing::debug!("refreshing token sets");

        match self.refresh_token_sets().await {
            Ok(()) => {
                self.set_state(SessionState::LoggedIn).await;
                tracing::info!("tokens refreshed");
                Ok(())
            }
            Err(e) => {
                tracing::warn!(error = %e, "token refresh failed");
                Err(match e {
                    refresh @ AuthError::RefreshFailed { .. } => refresh,
                    other => AuthError::RefreshFailed {
                        reason: other.to_string(),
                    },
                })
            }
        }
    }

    /// The two sequential refresh exchanges.
    ///
    /// The identity merge is applied before the vehicle-api exchange runs and
    /// is kept even if that exchange fails.
    async fn refresh_token_sets(&self) -> Result<()> {
        let refresh_token = self
            .tokens
            .read()
            .await
            .identity
            .as_ref()
            .and_then(|set| set.refresh_token.clone())
            .ok_or(AuthError::MissingToken {
                authority: Authority::Identity,
            })?;

        // Step 1: identity.
        let request = self
            .transport
            .post(&self.config.endpoints.identity_refresh)
            .headers(token_headers(&self.config.app))
            .form(&[
                ("grant_type", "refresh_token"),
                ("brand", self.config.app.brand.as_str()),
                ("refresh_token", refresh_token.as_str()),
            ]);
        let response = self.transport.send(request).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(AuthError::RefreshFailed {
                reason: format!("identity refresh returned HTTP {status}"),
            });
        }
        let update = json_object(response.json().await?, Authority::Identity)?;

        if let Some(id_token) = update.get("id_token").and_then(Value::as_str) {
            self.verifier
                .check(id_token, Authority::Identity, self.config.verification)
                .await?;
        }
        let id_token = {
            let mut tokens = self.tokens.write().await;
            let identity = tokens
                .get_mut(Authority::Identity)
                .ok_or(AuthError::MissingToken {
                    authority: Authority::Identity,
                })?;
            identity.merge(update)?;
            identity.id_token.clone().ok_or(AuthError::MissingToken {
                authority: Authority::Identity,
            })?
        };

        // Step 2: vehicle-api, against the refreshed id_token.
        let update = exchange_id_token_raw(&self.transport, &self.config, &id_token)
            .await
            .map_err(|e| AuthError::RefreshFailed {
                reason: format!("vehicle-api refresh failed: {e}"),
            })?;
        if let Some(access_token) = update.get("access_token").and_then(Value::as_str) {
            self.verifier
                .check(access_token, Authority::VehicleApi, self.config.verification)
                .await?;
        }

        let mut tokens = self.tokens.write().await;
        match tokens.get_mut(Authority::VehicleApi) {
            Some(set) => set.merge(update)?,
            None => tokens.replace(
                Authority::VehicleApi,
                TokenSet::from_response(Value::Object(update))?,
            ),
        }
        Ok(())
    }

    async fn set_state(&self, next: SessionState) {
        let mut state = self.state.write().await;
        if *state != next {
            tracing::debug!(from = ?*state, to = ?next, "session state change");
            *state = next;
        }
    }

    // -- Token selection and claims -----------------------------------------

    /// Choose which authority's access token [`Connection::get`] and
    /// [`Connection::post`] present.
    pub async fn select_token(&self, authority: Authority) {
        *self.selected.write().await = authority;
    }

    pub async fn selected_token(&self) -> Authority {
        *self.selected.read().await
    }

    /// The `sub` claim of the identity access token.
    pub async fn identity_subject(&self) -> Result<String> {
        let tokens = self.tokens.read().await;
        let token = tokens
            .bearer(Authority::Identity)
            .ok_or(AuthError::MissingToken {
                authority: Authority::Identity,
            })?;
        decode_claims_unverified(token)?
            .get("sub")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| AuthError::InvalidToken {
                reason: "identity access token has no sub claim".to_string(),
            })
    }

    // -- Base URLs -----------------------------------------------------------

    pub async fn base_urls(&self) -> BaseUrls {
        self.bases.read().await.clone()
    }

    /// Point relative request paths at a vehicle's home region.
    pub async fn set_home_region(&self, region_uri: &str) {
        let bases = BaseUrls::for_region(&self.config.endpoints, region_uri);
        tracing::debug!(data = %bases.data, rights = %bases.rights, "home region set");
        *self.bases.write().await = bases;
    }

    // -- Authenticated request executor -------------------------------------

    /// GET `path` with the selected token. See [`Connection::execute`].
    pub async fn get(&self, path: &str, vin: &str) -> std::result::Result<Value, HttpError> {
        let authority = self.selected_token().await;
        self.execute(Method::GET, authority, path, vin, None).await
    }

    /// POST `body` as JSON to `path` with the selected token.
    pub async fn post(
        &self,
        path: &str,
        vin: &str,
        body: Option<&Value>,
    ) -> std::result::Result<Value, HttpError> {
        let authority = self.selected_token().await;
        self.execute(Method::POST, authority, path, vin, body).await
    }

    /// GET with an explicit token, leaving the selection untouched.
    pub async fn get_as(
        &self,
        authority: Authority,
        path: &str,
        vin: &str,
    ) -> std::result::Result<Value, HttpError> {
        self.execute(Method::GET, authority, path, vin, None).await
    }

    /// Issue one authenticated call.
    ///
    /// `$vin` in `path` is replaced by `vin` and relative paths resolve
    /// against the home-region or rights base. A 401 marks the session
    /// [`SessionState::Expired`]. Cookies from the response are merged into
    /// the jar whatever the status. Nothing is retried.
    pub async fn execute(
        &self,
        method: Method,
        authority: Authority,
        path: &str,
        vin: &str,
        body: Option<&Value>,
    ) -> std::result::Result<Value, HttpError> {
        let url = self.bases.read().await.resolve(path, vin)?;
        let bearer = {
            let tokens = self.tokens.read().await;
            let token = tokens
                .bearer(authority)
                .ok_or(AuthError::MissingToken { authority })?;
            HeaderValue::from_str(&format!("Bearer {token}")).map_err(|_| {
                AuthError::InvalidToken {
                    reason: format!("{authority} access token is not a valid header value"),
                }
            })?
        };

        tracing::debug!(%method, url = %redact(&url), %authority, "api request");
        let mut request = self
            .transport
            .request(method, url)
            .headers(api_headers(&self.config.app))
            .header(AUTHORIZATION, bearer);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = self.transport.send_following(request).await?;
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = response.bytes().await?;

        let result = classify(status, &headers, &bytes);
        match &result {
            Err(HttpError::Unauthorized) => {
                tracing::warn!(path, "received 401, session marked expired");
                self.set_state(SessionState::Expired).await;
            }
            Err(e) => tracing::debug!(path, error = %e, "api request failed"),
            Ok(_) => tracing::debug!(path, status = status.as_u16(), "api response"),
        }
        result
    }
}

fn json_object(value: Value, authority: Authority) -> Result<Map<String, Value>> {
    match value {
        Value::Object(map) => Ok(map),
        _ => Err(AuthError::TokenExchange {
            authority,
            reason: "response is not a JSON object".to_string(),
        }),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
