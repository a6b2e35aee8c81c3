//! Session state machine: expiry checks, single-flight refresh, login and
//! logout, OAuth callback capture and cross-tab reconciliation.

use std::sync::Arc;

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use parking_lot::Mutex;
use reqwest::header::{AUTHORIZATION, HeaderValue};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::config::ClientConfig;
use crate::error::Error;
use crate::navigation::Navigation;
use crate::oauth;
use crate::storage::{Storage, StorageEvent};
use crate::store::{TOKEN_KEYS, TokenStore};
use crate::transport::{ApiRequest, Transport};
use crate::types::{SessionEvent, SessionState, TokenPair, UserProfile};

const EVENT_CAPACITY: usize = 32;

type PendingRefresh = Shared<BoxFuture<'static, bool>>;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

/// Owner of the authentication state for one tab.
///
/// The only component that decides whether the session is usable and the
/// only one that calls the refresh endpoint. Cloning yields another handle
/// to the same session.
pub struct SessionManager<T> {
    inner: Arc<Inner<T>>,
}

struct Inner<T> {
    config: ClientConfig,
    transport: T,
    store: TokenStore,
    navigation: Arc<dyn Navigation>,
    events: broadcast::Sender<SessionEvent>,
    // At most one refresh per tab; cleared when it settles.
    refreshing: Mutex<Option<PendingRefresh>>,
}

// Manual Clone: avoid derive adding a `T: Clone` bound.
impl<T> Clone for SessionManager<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Transport> SessionManager<T> {
    #[must_use]
    pub fn new(
        config: ClientConfig,
        transport: T,
        storage: Arc<dyn Storage>,
        navigation: Arc<dyn Navigation>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                config,
                transport,
                store: TokenStore::new(storage),
                navigation,
                events,
                refreshing: Mutex::new(None),
            }),
        }
    }

    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    #[must_use]
    pub fn store(&self) -> &TokenStore {
        &self.inner.store
    }

    pub(crate) fn transport(&self) -> &T {
        &self.inner.transport
    }

    /// Receive session notifications.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    /// Whether an access token is stored.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.inner.store.is_present()
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        let Some(token) = self.inner.store.access_token() else {
            return SessionState::Unauthenticated;
        };
        if self.inner.refreshing.lock().is_some() {
            SessionState::Refreshing
        } else if self.is_expired(&token) {
            SessionState::Expiring
        } else {
            SessionState::Valid
        }
    }

    /// `Authorization` header value for the stored token.
    ///
    /// Returns `None` when signed out, or when the token is expired; in the
    /// latter case a refresh is started in the background.
    #[must_use]
    pub fn auth_header(&self) -> Option<HeaderValue> {
        let token = self.inner.store.access_token()?;
        if self.is_expired(&token) {
            self.spawn_refresh();
            return None;
        }
        self.header_for(&token)
    }

    /// `Authorization` header value for a usable token, refreshing first if
    /// the stored one is expired.
    pub async fn authorization(&self) -> Option<HeaderValue> {
        let token = self.valid_access_token().await?;
        self.header_for(&token)
    }

    /// A usable access token, refreshing first if the stored one is expired.
    ///
    /// Joins a refresh that is already in flight. Returns `None` when there
    /// is no session or the refresh failed.
    pub async fn valid_access_token(&self) -> Option<String> {
        let token = self.inner.store.access_token()?;
        if !self.is_expired(&token) {
            return Some(token);
        }
        if !self.refresh().await {
            return None;
        }
        self.inner.store.access_token()
    }

    /// Exchange the refresh token for a new pair.
    ///
    /// Concurrent callers share one refresh call and its outcome. On success
    /// the new pair is stored and `StateChanged { is_authenticated: true }`
    /// is emitted; on failure the session is torn down and `AuthRequired`
    /// is emitted.
    ///
    /// The call runs to completion even if every caller stops waiting. A
    /// result that arrives after the session was ended or replaced (logout,
    /// another tab) is discarded.
    pub async fn refresh(&self) -> bool {
        self.pending_refresh().await
    }

    /// Store a freshly issued pair and load the profile.
    ///
    /// Profile failures are logged, not returned: the session is usable
    /// without one.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IncompleteTokenPair`] if either token is missing;
    /// nothing is stored in that case.
    pub async fn login(&self, tokens: TokenPair) -> Result<(), Error> {
        self.inner.store.save(&tokens)?;
        self.inner.store.clear_profile();
        tracing::info!("signed in");
        self.notify_state_changed(true);

        if let Err(e) = self.fetch_profile().await {
            tracing::warn!(error = %e, "could not load user profile");
        }
        Ok(())
    }

    /// Clear the session. `redirect` is resolved against the API origin.
    pub fn logout(&self, redirect: Option<&str>) {
        self.inner.store.clear();
        tracing::info!("signed out");
        self.notify_state_changed(false);

        if let Some(target) = redirect {
            match self.inner.config.base_url().join(target) {
                Ok(url) => self.inner.navigation.assign(url),
                Err(e) => tracing::warn!(error = %e, redirect = %target, "invalid logout redirect"),
            }
        }
    }

    /// Remember where the user is and ask the UI to authenticate.
    pub fn notify_auth_required(&self) {
        let return_url = self.inner.navigation.current_path();
        self.inner.store.save_redirect_path(&return_url);
        self.emit(SessionEvent::AuthRequired { return_url });
    }

    pub fn notify_state_changed(&self, is_authenticated: bool) {
        self.emit(SessionEvent::StateChanged { is_authenticated });
    }

    pub fn notify_profile_updated(&self, profile: &UserProfile) {
        self.emit(SessionEvent::ProfileUpdated(profile.clone()));
    }

    /// Cached profile, without a network call.
    #[must_use]
    pub fn cached_profile(&self) -> Option<UserProfile> {
        self.inner.store.profile()
    }

    /// The signed-in user's profile, fetched once and cached.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Request`] with status 401 when there is no usable
    /// session, or the who-am-i failure otherwise.
    pub async fn fetch_profile(&self) -> Result<UserProfile, Error> {
        if let Some(profile) = self.inner.store.profile() {
            return Ok(profile);
        }

        let token = self
            .valid_access_token()
            .await
            .ok_or_else(Error::unauthorized)?;
        let header = self.header_for(&token).ok_or_else(Error::unauthorized)?;
        let request =
            ApiRequest::get(self.inner.config.me_path()).with_header(AUTHORIZATION, header);

        let response = self.inner.transport.send(request).await?;
        if !response.is_success() {
            let status = response.status.as_u16();
            return Err(Error::Request {
                status: Some(status),
                message: response
                    .error_message()
                    .unwrap_or_else(|| format!("Profile request failed with status {status}")),
            });
        }

        // Plain text, though some deployments send a JSON string.
        let text = response.text();
        let email = serde_json::from_str::<String>(&text)
            .unwrap_or(text)
            .trim()
            .to_owned();
        if email.is_empty() {
            return Err(Error::Request {
                status: Some(response.status.as_u16()),
                message: "Profile response was empty".into(),
            });
        }

        let profile = UserProfile::from_email(email);
        self.inner.store.save_profile(&profile)?;
        self.notify_profile_updated(&profile);
        Ok(profile)
    }

    /// Start the provider login, remembering the current location.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the login URL cannot be built.
    pub fn begin_oauth_login(&self) -> Result<(), Error> {
        let url = oauth::authorization_url(&self.inner.config)?;
        self.inner
            .store
            .save_redirect_path(&self.inner.navigation.current_path());
        self.inner.navigation.assign(url);
        Ok(())
    }

    /// Adopt tokens delivered on the OAuth redirect.
    ///
    /// The token parameters are removed from the location in place before
    /// anything else happens, so a second call finds nothing. After login
    /// the saved redirect path, if any, is opened.
    ///
    /// Returns `Ok(false)` when the location carries no tokens.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IncompleteTokenPair`] if the redirect lacked a
    /// refresh token.
    pub async fn capture_oauth_callback(&self) -> Result<bool, Error> {
        let current = self.inner.navigation.current_url();
        let Some(callback) = oauth::parse_callback(&current) else {
            return Ok(false);
        };
        self.inner.navigation.replace_url(callback.clean_url);

        self.login(callback.tokens).await?;

        if let Some(path) = self.inner.store.take_redirect_path() {
            match self.inner.navigation.current_url().join(&path) {
                Ok(url) => self.inner.navigation.assign(url),
                Err(e) => tracing::warn!(error = %e, path = %path, "ignoring invalid post-login path"),
            }
        }
        Ok(true)
    }

    /// Read and remove the saved post-login path.
    #[must_use]
    pub fn take_redirect_path(&self) -> Option<String> {
        self.inner.store.take_redirect_path()
    }

    /// Reconcile after another tab changed storage.
    ///
    /// State is re-read from storage; the event payload is not trusted.
    pub async fn handle_storage_event(&self, event: &StorageEvent) {
        if !TOKEN_KEYS.contains(&event.key.as_str()) {
            return;
        }
        let authenticated = self.inner.store.is_present();
        self.notify_state_changed(authenticated);
        if authenticated {
            self.valid_access_token().await;
        }
    }

    /// Refresh if needed after the tab comes back to the foreground.
    pub async fn on_visibility_restored(&self) {
        if self.is_authenticated() {
            self.valid_access_token().await;
        }
    }

    /// Listen for storage changes from other tabs until aborted.
    pub fn spawn_storage_sync(&self) -> JoinHandle<()> {
        let mut events = self.inner.store.storage().subscribe();
        let session = self.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                session.handle_storage_event(&event).await;
            }
        })
    }

    /// Tear down after an unrecoverable auth failure.
    pub(crate) fn end_session(&self) {
        self.inner.store.clear();
        self.notify_auth_required();
        self.notify_state_changed(false);
    }

    fn is_expired(&self, token: &str) -> bool {
        self.inner
            .store
            .is_expired(token, self.inner.config.expiry_buffer_secs())
    }

    fn header_for(&self, token: &str) -> Option<HeaderValue> {
        let value = format!("{} {token}", self.inner.store.token_type());
        match HeaderValue::from_str(&value) {
            Ok(mut header) => {
                header.set_sensitive(true);
                Some(header)
            }
            Err(_) => {
                tracing::warn!("stored access token is not a valid header value");
                None
            }
        }
    }

    fn spawn_refresh(&self) {
        if tokio::runtime::Handle::try_current().is_ok() {
            drop(self.pending_refresh());
        } else {
            tracing::debug!("no runtime; refresh deferred to the next request");
        }
    }

    fn pending_refresh(&self) -> PendingRefresh {
        let mut slot = self.inner.refreshing.lock();
        if let Some(pending) = slot.as_ref() {
            tracing::debug!("joining in-flight token refresh");
            return pending.clone();
        }

        let session = self.clone();
        let task = async move {
            let _settled = RefreshSlot(&session);
            session.run_refresh().await
        };
        // Runs detached: the slot empties when the task settles, whether or
        // not anyone is still waiting.
        let pending = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime
                .spawn(task)
                .map(|joined| joined.unwrap_or(false))
                .boxed(),
            Err(_) => task.boxed(),
        }
        .shared();
        *slot = Some(pending.clone());
        pending
    }

    async fn run_refresh(&self) -> bool {
        let Some(refresh_token) = self.inner.store.refresh_token() else {
            tracing::warn!("token refresh impossible: no refresh token stored");
            self.end_session();
            return false;
        };

        let request = match ApiRequest::post(self.inner.config.refresh_path()).with_json(
            &RefreshRequest {
                refresh_token: &refresh_token,
            },
        ) {
            Ok(request) => request,
            Err(e) => {
                tracing::error!(error = %e, "could not encode refresh request");
                self.end_session();
                return false;
            }
        };

        let outcome = self.inner.transport.send(request).await;

        // Storage may have changed while the call was out.
        match self.inner.store.refresh_token() {
            Some(current) if current == refresh_token => {}
            Some(_) => {
                tracing::debug!("session replaced during token refresh; discarding result");
                return self
                    .inner
                    .store
                    .access_token()
                    .is_some_and(|token| !self.is_expired(&token));
            }
            None => {
                tracing::debug!("session ended during token refresh; discarding result");
                return false;
            }
        }

        let response = match outcome {
            Ok(response) => response,
            Err(e) if self.inner.config.keep_session_on_network_error() => {
                tracing::warn!(error = %e, "token refresh unreachable; keeping session");
                return false;
            }
            Err(e) => {
                tracing::warn!(error = %e, "token refresh failed");
                self.end_session();
                return false;
            }
        };

        if !response.is_success() {
            tracing::warn!(status = response.status.as_u16(), "token refresh rejected");
            self.end_session();
            return false;
        }

        let saved = response
            .json::<TokenPair>()
            .and_then(|pair| self.inner.store.save(&pair));
        match saved {
            Ok(()) => {
                tracing::info!("access token refreshed");
                self.notify_state_changed(true);
                true
            }
            Err(e) => {
                tracing::warn!(error = %e, "malformed token refresh response");
                self.end_session();
                false
            }
        }
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine.
        let _ = self.inner.events.send(event);
    }
}

/// Empties the refresh slot when the refresh settles, panics included.
struct RefreshSlot<'a, T>(&'a SessionManager<T>);

impl<T> Drop for RefreshSlot<'_, T> {
    fn drop(&mut self) {
        *self.0.inner.refreshing.lock() = None;
    }
}
