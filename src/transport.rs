use std::future::Future;

use bytes::Bytes;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use url::Url;

use crate::config::ClientConfig;
use crate::error::Error;

/// An outgoing request. `target` is a path relative to the API origin or an
/// absolute URL.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct ApiRequest {
    pub method: Method,
    pub target: String,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
}

impl ApiRequest {
    #[must_use]
    pub fn new(method: Method, target: impl Into<String>) -> Self {
        Self {
            method,
            target: target.into(),
            headers: HeaderMap::new(),
            body: None,
        }
    }

    #[must_use]
    pub fn get(target: impl Into<String>) -> Self {
        Self::new(Method::GET, target)
    }

    #[must_use]
    pub fn post(target: impl Into<String>) -> Self {
        Self::new(Method::POST, target)
    }

    #[must_use]
    pub fn put(target: impl Into<String>) -> Self {
        Self::new(Method::PUT, target)
    }

    #[must_use]
    pub fn delete(target: impl Into<String>) -> Self {
        Self::new(Method::DELETE, target)
    }

    #[must_use]
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Serialize `body` as JSON and set the content type.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Decode`] if `body` cannot be serialized.
    pub fn with_json<B: Serialize + ?Sized>(mut self, body: &B) -> Result<Self, Error> {
        let bytes = serde_json::to_vec(body)?;
        self.headers
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        self.body = Some(Bytes::from(bytes));
        Ok(self)
    }
}

/// A received response, fully buffered.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct ApiResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl ApiResponse {
    #[must_use]
    pub fn new(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Body as UTF-8 text (lossy).
    #[must_use]
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Deserialize the body. An empty body reads as JSON `null`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Decode`] if the body does not match `T`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, Error> {
        if self.body.iter().all(u8::is_ascii_whitespace) {
            return serde_json::from_slice(b"null").map_err(Into::into);
        }
        serde_json::from_slice(&self.body).map_err(Into::into)
    }

    /// Server-provided error message (`message` or `error` field of a JSON
    /// body), if any.
    #[must_use]
    pub fn error_message(&self) -> Option<String> {
        let value: serde_json::Value = serde_json::from_slice(&self.body).ok()?;
        ["message", "error"]
            .iter()
            .find_map(|field| value.get(field).and_then(|v| v.as_str()))
            .filter(|msg| !msg.is_empty())
            .map(str::to_owned)
    }
}

/// The request primitive.
///
/// [`HttpTransport`] is the network implementation;
/// [`RequestGateway`](crate::RequestGateway) wraps any transport and is one
/// itself.
pub trait Transport: Send + Sync + 'static {
    fn send(&self, request: ApiRequest) -> impl Future<Output = Result<ApiResponse, Error>> + Send;
}

/// [`Transport`] over `reqwest`.
pub struct HttpTransport {
    base_url: Url,
    http: reqwest::Client,
}

impl HttpTransport {
    /// # Errors
    ///
    /// Returns [`Error::Http`] if the HTTP client cannot be built.
    pub fn new(config: &ClientConfig) -> Result<Self, Error> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = config.request_timeout() {
            builder = builder.timeout(timeout);
        }
        Ok(Self {
            base_url: config.base_url().clone(),
            http: builder.build()?,
        })
    }

    /// Use a custom HTTP client (for connection pool reuse or testing).
    #[must_use]
    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.http = client;
        self
    }

    /// Absolute URL for a request target.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRequest`] if `target` cannot be joined onto
    /// the base URL.
    pub fn resolve(&self, target: &str) -> Result<Url, Error> {
        if let Ok(url) = Url::parse(target) {
            return Ok(url);
        }
        self.base_url
            .join(target)
            .map_err(|e| Error::InvalidRequest(format!("{target}: {e}")))
    }
}

impl Transport for HttpTransport {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, Error> {
        let url = self.resolve(&request.target)?;
        let mut builder = self
            .http
            .request(request.method, url)
            .headers(request.headers);
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await?;

        Ok(ApiResponse {
            status,
            headers,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transport() -> HttpTransport {
        HttpTransport::new(&ClientConfig::new("https://vocab.test".parse().unwrap())).unwrap()
    }

    #[test]
    fn resolves_relative_targets_against_base() {
        let url = transport().resolve("/api/v1/words?page=2").unwrap();
        assert_eq!(url.as_str(), "https://vocab.test/api/v1/words?page=2");
    }

    #[test]
    fn keeps_absolute_targets() {
        let url = transport().resolve("https://cdn.test/img.png").unwrap();
        assert_eq!(url.as_str(), "https://cdn.test/img.png");
    }

    #[test]
    fn error_message_prefers_message_field() {
        let response = ApiResponse::new(
            StatusCode::BAD_REQUEST,
            r#"{"message":"word already exists","error":"Bad Request"}"#,
        );
        assert_eq!(response.error_message().as_deref(), Some("word already exists"));
    }

    #[test]
    fn error_message_falls_back_to_error_field() {
        let response = ApiResponse::new(StatusCode::NOT_FOUND, r#"{"error":"Not Found"}"#);
        assert_eq!(response.error_message().as_deref(), Some("Not Found"));
    }

    #[test]
    fn error_message_absent_for_plain_text() {
        let response = ApiResponse::new(StatusCode::BAD_GATEWAY, "upstream down");
        assert_eq!(response.error_message(), None);
    }

    #[test]
    fn empty_body_reads_as_null() {
        let response = ApiResponse::new(StatusCode::NO_CONTENT, "");
        response.json::<()>().unwrap();
        let missing: Option<u32> = response.json().unwrap();
        assert_eq!(missing, None);
    }

    #[test]
    fn json_request_sets_content_type() {
        let request = ApiRequest::post("/api/v1/words")
            .with_json(&serde_json::json!({"term": "apple"}))
            .unwrap();
        assert_eq!(request.headers[CONTENT_TYPE], "application/json");
        assert_eq!(request.body.as_deref(), Some(br#"{"term":"apple"}"#.as_slice()));
    }
}
