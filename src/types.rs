use derive_more::{Display, From, Into};
use serde::{Deserialize, Serialize};

/// Token type used when the server or the caller does not supply one.
pub const DEFAULT_TOKEN_TYPE: &str = "Bearer";

fn default_token_type() -> String {
    DEFAULT_TOKEN_TYPE.to_owned()
}

/// Access/refresh token pair, the unit of session state.
///
/// Deserializes from the refresh endpoint body
/// (`{accessToken, refreshToken, tokenType}`). Missing fields deserialize as
/// empty strings so that [`TokenStore::save`](crate::TokenStore::save) can
/// reject them instead of failing inside serde.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct TokenPair {
    #[serde(default)]
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
}

impl TokenPair {
    /// Create a pair with the default `Bearer` token type.
    #[must_use]
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
            token_type: default_token_type(),
        }
    }

    /// Override the token type.
    #[must_use]
    pub fn with_token_type(mut self, token_type: impl Into<String>) -> Self {
        self.token_type = token_type.into();
        self
    }
}

/// Token subject (`sub` claim), the account email for this service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display, From, Into)]
#[serde(transparent)]
pub struct Subject(pub String);

/// Cached "who am I" result. Display-only; not part of the auth boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct UserProfile {
    pub email: String,
    pub name: String,
    #[serde(default)]
    pub picture: Option<String>,
}

impl UserProfile {
    /// Build a profile from the subject returned by the who-am-i endpoint.
    ///
    /// The display name is the local part of the email.
    #[must_use]
    pub fn from_email(email: impl Into<String>) -> Self {
        let email = email.into();
        let name = email
            .split_once('@')
            .map_or(email.as_str(), |(local, _)| local)
            .to_owned();
        Self {
            email,
            name,
            picture: None,
        }
    }

    /// Set the avatar URL.
    #[must_use]
    pub fn with_picture(mut self, picture: impl Into<String>) -> Self {
        self.picture = Some(picture.into());
        self
    }
}

/// Session state derived from the stored token pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum SessionState {
    /// No access token stored.
    Unauthenticated,
    /// Access token stored and outside the expiry buffer.
    Valid,
    /// Access token stored but inside the expiry buffer (or undecodable).
    Expiring,
    /// A refresh call is in flight.
    Refreshing,
}

/// Notifications for UI collaborators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    StateChanged { is_authenticated: bool },
    ProfileUpdated(UserProfile),
    /// The session could not be recovered; `return_url` is where the user was.
    AuthRequired { return_url: String },
}
