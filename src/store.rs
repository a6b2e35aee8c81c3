use std::sync::Arc;

use crate::error::Error;
use crate::storage::Storage;
use crate::token::{self, Claims};
use crate::types::{DEFAULT_TOKEN_TYPE, TokenPair, UserProfile};

pub const ACCESS_TOKEN_KEY: &str = "accessToken";
pub const REFRESH_TOKEN_KEY: &str = "refreshToken";
pub const TOKEN_TYPE_KEY: &str = "tokenType";
pub const PROFILE_KEY: &str = "userInfo";
pub const REDIRECT_PATH_KEY: &str = "redirectAfterLogin";

/// Keys whose foreign changes affect the session.
pub const TOKEN_KEYS: [&str; 3] = [ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY, TOKEN_TYPE_KEY];

/// Persistence for the token pair and cached profile.
///
/// Performs no network calls.
#[derive(Clone)]
pub struct TokenStore {
    storage: Arc<dyn Storage>,
}

impl TokenStore {
    #[must_use]
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// Persist a token pair.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IncompleteTokenPair`] and writes nothing if either
    /// token is empty.
    pub fn save(&self, pair: &TokenPair) -> Result<(), Error> {
        if pair.access_token.is_empty() {
            return Err(Error::IncompleteTokenPair("access token"));
        }
        if pair.refresh_token.is_empty() {
            return Err(Error::IncompleteTokenPair("refresh token"));
        }
        let token_type = if pair.token_type.is_empty() {
            DEFAULT_TOKEN_TYPE
        } else {
            pair.token_type.as_str()
        };

        self.storage.set_many(&[
            (ACCESS_TOKEN_KEY, pair.access_token.as_str()),
            (REFRESH_TOKEN_KEY, pair.refresh_token.as_str()),
            (TOKEN_TYPE_KEY, token_type),
        ]);
        Ok(())
    }

    /// Remove tokens and the cached profile. Idempotent.
    pub fn clear(&self) {
        self.storage.remove_many(&[
            ACCESS_TOKEN_KEY,
            REFRESH_TOKEN_KEY,
            TOKEN_TYPE_KEY,
            PROFILE_KEY,
        ]);
    }

    #[must_use]
    pub fn access_token(&self) -> Option<String> {
        self.non_empty(ACCESS_TOKEN_KEY)
    }

    #[must_use]
    pub fn refresh_token(&self) -> Option<String> {
        self.non_empty(REFRESH_TOKEN_KEY)
    }

    #[must_use]
    pub fn token_type(&self) -> String {
        self.non_empty(TOKEN_TYPE_KEY)
            .unwrap_or_else(|| DEFAULT_TOKEN_TYPE.to_owned())
    }

    /// Cheap "signed in" check. Says nothing about validity.
    #[must_use]
    pub fn is_present(&self) -> bool {
        self.access_token().is_some()
    }

    #[must_use]
    pub fn decode(&self, token: &str) -> Option<Claims> {
        token::decode_claims(token)
    }

    #[must_use]
    pub fn is_expired(&self, token: &str, buffer_secs: i64) -> bool {
        token::is_expired(token, buffer_secs)
    }

    /// Cached profile, if one was stored and still parses.
    #[must_use]
    pub fn profile(&self) -> Option<UserProfile> {
        let raw = self.storage.get(PROFILE_KEY)?;
        match serde_json::from_str(&raw) {
            Ok(profile) => Some(profile),
            Err(e) => {
                tracing::debug!(error = %e, "discarding unreadable cached profile");
                None
            }
        }
    }

    /// # Errors
    ///
    /// Returns [`Error::Decode`] if the profile cannot be serialized.
    pub fn save_profile(&self, profile: &UserProfile) -> Result<(), Error> {
        let json = serde_json::to_string(profile)?;
        self.storage.set(PROFILE_KEY, &json);
        Ok(())
    }

    pub fn clear_profile(&self) {
        self.storage.remove(PROFILE_KEY);
    }

    pub fn save_redirect_path(&self, path: &str) {
        self.storage.set(REDIRECT_PATH_KEY, path);
    }

    /// Read and remove the saved post-login path.
    #[must_use]
    pub fn take_redirect_path(&self) -> Option<String> {
        let path = self.non_empty(REDIRECT_PATH_KEY)?;
        self.storage.remove(REDIRECT_PATH_KEY);
        Some(path)
    }

    pub(crate) fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    fn non_empty(&self, key: &str) -> Option<String> {
        self.storage.get(key).filter(|v| !v.is_empty())
    }
}
