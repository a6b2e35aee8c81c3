#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    /// Normalized failure surfaced by [`RequestGateway`](crate::RequestGateway).
    ///
    /// `status` is `None` when no response was received.
    #[error("{message}")]
    Request {
        status: Option<u16>,
        message: String,
    },
    #[error("Incomplete token pair: missing {0}")]
    IncompleteTokenPair(&'static str),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Invalid response body: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl Error {
    pub(crate) fn unauthorized() -> Self {
        Self::Request {
            status: Some(401),
            message: "Authentication required".into(),
        }
    }

    /// HTTP status carried by a [`Error::Request`], if any.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Request { status, .. } => *status,
            Self::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Whether the error means the caller has to sign in again.
    #[must_use]
    pub fn is_unauthorized(&self) -> bool {
        self.status() == Some(401)
    }
}
