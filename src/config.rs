use std::time::Duration;

use url::Url;

use crate::error::Error;
use crate::token::DEFAULT_EXPIRY_BUFFER_SECS;

const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Client configuration.
///
/// The API base URL is a constructor parameter; everything else has a
/// default that can be overridden with the `with_*` methods.
///
/// ```rust,ignore
/// let config = ClientConfig::new("https://vocab.example.com".parse()?)
///     .with_expiry_buffer_secs(120)
///     .with_oauth_provider("github");
/// ```
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct ClientConfig {
    pub(crate) base_url: Url,
    pub(crate) api_prefix: String,
    pub(crate) refresh_path: String,
    pub(crate) me_path: String,
    pub(crate) oauth_provider: String,
    pub(crate) expiry_buffer_secs: i64,
    pub(crate) request_timeout: Option<Duration>,
    pub(crate) keep_session_on_network_error: bool,
}

impl ClientConfig {
    #[must_use]
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            api_prefix: "/api/".into(),
            refresh_path: "/api/v1/auth/refresh".into(),
            me_path: "/api/v1/auth/me".into(),
            oauth_provider: "google".into(),
            expiry_buffer_secs: DEFAULT_EXPIRY_BUFFER_SECS,
            request_timeout: Some(Duration::from_secs(DEFAULT_TIMEOUT_SECS)),
            keep_session_on_network_error: false,
        }
    }

    /// Create config from environment variables.
    ///
    /// # Required env vars
    /// - `VOCAB_API_URL`: API origin (must be a valid URL)
    ///
    /// # Optional env vars
    /// - `VOCAB_API_PREFIX`: Path prefix of requests that get credentials
    /// - `VOCAB_EXPIRY_BUFFER_SECS`: Seconds before `exp` to refresh
    /// - `VOCAB_REQUEST_TIMEOUT_SECS`: Per-request timeout, `0` disables
    /// - `VOCAB_OAUTH_PROVIDER`: OAuth provider segment of the login path
    /// - `VOCAB_KEEP_SESSION_ON_NETWORK_ERROR`: `"1"` or `"true"` keeps tokens
    ///   when the refresh call never reaches the server
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `VOCAB_API_URL` is missing or any value
    /// fails to parse.
    pub fn from_env() -> Result<Self, Error> {
        let base_url: Url = std::env::var("VOCAB_API_URL")
            .map_err(|_| Error::Config("VOCAB_API_URL is required".into()))?
            .parse()
            .map_err(|e| Error::Config(format!("VOCAB_API_URL: {e}")))?;

        let mut config = Self::new(base_url);

        if let Ok(prefix) = std::env::var("VOCAB_API_PREFIX") {
            config = config.with_api_prefix(prefix);
        }
        if let Ok(buffer) = std::env::var("VOCAB_EXPIRY_BUFFER_SECS") {
            let secs = buffer
                .trim()
                .parse::<i64>()
                .map_err(|e| Error::Config(format!("VOCAB_EXPIRY_BUFFER_SECS: {e}")))?;
            config = config.with_expiry_buffer_secs(secs);
        }
        if let Ok(timeout) = std::env::var("VOCAB_REQUEST_TIMEOUT_SECS") {
            let secs = timeout
                .trim()
                .parse::<u64>()
                .map_err(|e| Error::Config(format!("VOCAB_REQUEST_TIMEOUT_SECS: {e}")))?;
            config = config.with_request_timeout((secs > 0).then(|| Duration::from_secs(secs)));
        }
        if let Ok(provider) = std::env::var("VOCAB_OAUTH_PROVIDER") {
            config = config.with_oauth_provider(provider.trim());
        }
        let keep_session = matches!(
            std::env::var("VOCAB_KEEP_SESSION_ON_NETWORK_ERROR").as_deref(),
            Ok("1") | Ok("true"),
        );

        Ok(config.with_keep_session_on_network_error(keep_session))
    }

    /// Requests whose path starts with this prefix get credentials.
    #[must_use]
    pub fn with_api_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.api_prefix = prefix.into();
        self
    }

    #[must_use]
    pub fn with_refresh_path(mut self, path: impl Into<String>) -> Self {
        self.refresh_path = path.into();
        self
    }

    #[must_use]
    pub fn with_me_path(mut self, path: impl Into<String>) -> Self {
        self.me_path = path.into();
        self
    }

    #[must_use]
    pub fn with_oauth_provider(mut self, provider: impl Into<String>) -> Self {
        self.oauth_provider = provider.into();
        self
    }

    #[must_use]
    pub fn with_expiry_buffer_secs(mut self, secs: i64) -> Self {
        self.expiry_buffer_secs = secs;
        self
    }

    /// `None` lets requests run until the server or network gives up.
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Keep the stored tokens when a refresh fails without any response.
    #[must_use]
    pub fn with_keep_session_on_network_error(mut self, keep: bool) -> Self {
        self.keep_session_on_network_error = keep;
        self
    }

    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    #[must_use]
    pub fn api_prefix(&self) -> &str {
        &self.api_prefix
    }

    #[must_use]
    pub fn refresh_path(&self) -> &str {
        &self.refresh_path
    }

    #[must_use]
    pub fn me_path(&self) -> &str {
        &self.me_path
    }

    /// Path that starts the provider login redirect.
    #[must_use]
    pub fn oauth_login_path(&self) -> String {
        format!("/oauth2/authorization/{}", self.oauth_provider)
    }

    #[must_use]
    pub fn expiry_buffer_secs(&self) -> i64 {
        self.expiry_buffer_secs
    }

    #[must_use]
    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout
    }

    #[must_use]
    pub fn keep_session_on_network_error(&self) -> bool {
        self.keep_session_on_network_error
    }

    /// Whether `target` (a path or absolute URL) belongs to the API namespace.
    ///
    /// Absolute URLs on another origin never match.
    #[must_use]
    pub fn is_api_request(&self, target: &str) -> bool {
        match Url::parse(target) {
            Ok(url) => {
                url.origin() == self.base_url.origin() && url.path().starts_with(&self.api_prefix)
            }
            Err(_) => target.starts_with(&self.api_prefix),
        }
    }
}
