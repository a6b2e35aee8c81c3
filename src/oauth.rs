use url::Url;

use crate::config::ClientConfig;
use crate::error::Error;
use crate::types::{DEFAULT_TOKEN_TYPE, TokenPair};

const ACCESS_TOKEN_PARAM: &str = "accessToken";
const REFRESH_TOKEN_PARAM: &str = "refreshToken";
const TOKEN_TYPE_PARAM: &str = "tokenType";

/// Tokens delivered on the OAuth redirect, plus the location with those
/// parameters removed.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub struct OAuthCallback {
    pub tokens: TokenPair,
    pub clean_url: Url,
}

/// URL that starts the provider login.
///
/// # Errors
///
/// Returns [`Error::Config`] if the login path cannot be joined onto the
/// base URL.
pub fn authorization_url(config: &ClientConfig) -> Result<Url, Error> {
    config
        .base_url()
        .join(&config.oauth_login_path())
        .map_err(|e| Error::Config(format!("oauth login path: {e}")))
}

/// Reads callback tokens from the query string of `url`.
///
/// Returns `None` when no `accessToken` parameter is present. Any other
/// query parameters survive in `clean_url`.
#[must_use]
pub fn parse_callback(url: &Url) -> Option<OAuthCallback> {
    let mut access_token = None;
    let mut refresh_token = None;
    let mut token_type = None;
    let mut kept = Vec::new();

    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            ACCESS_TOKEN_PARAM => access_token = Some(value.into_owned()),
            REFRESH_TOKEN_PARAM => refresh_token = Some(value.into_owned()),
            TOKEN_TYPE_PARAM => token_type = Some(value.into_owned()),
            _ => kept.push((key.into_owned(), value.into_owned())),
        }
    }

    let access_token = access_token?;
    let token_type = token_type
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| DEFAULT_TOKEN_TYPE.to_owned());
    let tokens = TokenPair::new(access_token, refresh_token.unwrap_or_default())
        .with_token_type(token_type);

    let mut clean_url = url.clone();
    if kept.is_empty() {
        clean_url.set_query(None);
    } else {
        clean_url.query_pairs_mut().clear().extend_pairs(kept);
    }

    Some(OAuthCallback { tokens, clean_url })
}
