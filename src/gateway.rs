//! Uniform request pipeline for API calls.
//!
//! Every request inside the API namespace gets the bearer header, counts
//! toward the loading indicator, and gets one refresh-and-retry on `401`.
//! Anything else passes straight through to the wrapped transport.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use reqwest::StatusCode;
use reqwest::header::AUTHORIZATION;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::watch;

use crate::error::Error;
use crate::session::SessionManager;
use crate::transport::{ApiRequest, ApiResponse, Transport};

/// Decorator over the session's transport.
pub struct RequestGateway<T> {
    session: SessionManager<T>,
    loading: Arc<Loading>,
}

// Manual Clone: avoid derive adding a `T: Clone` bound.
impl<T> Clone for RequestGateway<T> {
    fn clone(&self) -> Self {
        Self {
            session: self.session.clone(),
            loading: self.loading.clone(),
        }
    }
}

impl<T: Transport> RequestGateway<T> {
    #[must_use]
    pub fn new(session: SessionManager<T>) -> Self {
        let (indicator, _) = watch::channel(false);
        Self {
            session,
            loading: Arc::new(Loading {
                in_flight: AtomicUsize::new(0),
                indicator,
            }),
        }
    }

    #[must_use]
    pub fn session(&self) -> &SessionManager<T> {
        &self.session
    }

    /// Loading indicator state. Changes are published one scheduler tick
    /// after the in-flight count moves between zero and non-zero.
    #[must_use]
    pub fn loading(&self) -> watch::Receiver<bool> {
        self.loading.indicator.subscribe()
    }

    /// API requests currently in flight.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.loading.in_flight.load(Ordering::SeqCst)
    }

    /// Send a request through the pipeline.
    ///
    /// # Errors
    ///
    /// For API requests every failure is an [`Error::Request`]: non-2xx
    /// responses carry their status and the server message, transport
    /// failures carry `status: None`. Requests outside the API namespace
    /// return whatever the wrapped transport returns.
    pub async fn execute(&self, request: ApiRequest) -> Result<ApiResponse, Error> {
        if !self.session.config().is_api_request(&request.target) {
            return self.session.transport().send(request).await;
        }

        let _in_flight = InFlight::enter(&self.loading);
        self.authorized(request).await.map_err(normalize)
    }

    /// `GET` and deserialize the JSON body.
    ///
    /// # Errors
    ///
    /// See [`execute`](Self::execute); a body that does not match `R` is an
    /// [`Error::Request`] too.
    pub async fn get<R: DeserializeOwned>(&self, path: &str) -> Result<R, Error> {
        let response = self.execute(ApiRequest::get(path)).await?;
        response.json().map_err(normalize)
    }

    /// `POST` a JSON body and deserialize the JSON response.
    ///
    /// # Errors
    ///
    /// See [`get`](Self::get).
    pub async fn post<B, R>(&self, path: &str, body: &B) -> Result<R, Error>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let request = ApiRequest::post(path).with_json(body).map_err(normalize)?;
        let response = self.execute(request).await?;
        response.json().map_err(normalize)
    }

    /// `PUT` a JSON body and deserialize the JSON response.
    ///
    /// # Errors
    ///
    /// See [`get`](Self::get).
    pub async fn put<B, R>(&self, path: &str, body: &B) -> Result<R, Error>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let request = ApiRequest::put(path).with_json(body).map_err(normalize)?;
        let response = self.execute(request).await?;
        response.json().map_err(normalize)
    }

    /// `DELETE`, ignoring any response body.
    ///
    /// # Errors
    ///
    /// See [`execute`](Self::execute).
    pub async fn delete(&self, path: &str) -> Result<(), Error> {
        self.execute(ApiRequest::delete(path)).await.map(drop)
    }

    async fn authorized(&self, mut request: ApiRequest) -> Result<ApiResponse, Error> {
        // An expired token is refreshed before the first send rather than
        // after a predictable 401.
        if !request.headers.contains_key(AUTHORIZATION) {
            if let Some(header) = self.session.authorization().await {
                request.headers.insert(AUTHORIZATION, header);
            }
        }

        let response = self.session.transport().send(request.clone()).await?;
        if response.status != StatusCode::UNAUTHORIZED {
            return ensure_success(response);
        }

        tracing::debug!(url = %request.target, "request unauthorized; refreshing");
        if !self.session.refresh().await {
            return Err(rejection(&response));
        }

        match self.session.auth_header() {
            Some(header) => {
                request.headers.insert(AUTHORIZATION, header);
            }
            None => {
                request.headers.remove(AUTHORIZATION);
            }
        }
        let retried = self.session.transport().send(request).await?;
        if retried.status == StatusCode::UNAUTHORIZED {
            tracing::warn!("request rejected with a freshly refreshed token");
            self.session.end_session();
            return Err(rejection(&retried));
        }
        ensure_success(retried)
    }
}

impl<T: Transport> Transport for RequestGateway<T> {
    fn send(&self, request: ApiRequest) -> impl Future<Output = Result<ApiResponse, Error>> + Send {
        self.execute(request)
    }
}

struct Loading {
    in_flight: AtomicUsize,
    indicator: watch::Sender<bool>,
}

impl Loading {
    /// Publish the indicator on the next tick, so requests that finish
    /// immediately never flash it.
    fn schedule(self: &Arc<Self>) {
        let loading = self.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    tokio::task::yield_now().await;
                    loading.publish();
                });
            }
            Err(_) => loading.publish(),
        }
    }

    fn publish(&self) {
        let active = self.in_flight.load(Ordering::SeqCst) > 0;
        self.indicator.send_if_modified(|shown| {
            if *shown == active {
                return false;
            }
            *shown = active;
            true
        });
    }
}

/// Holds one slot of the in-flight count; released on every exit path.
struct InFlight {
    loading: Arc<Loading>,
}

impl InFlight {
    fn enter(loading: &Arc<Loading>) -> Self {
        if loading.in_flight.fetch_add(1, Ordering::SeqCst) == 0 {
            loading.schedule();
        }
        Self {
            loading: loading.clone(),
        }
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        if self.loading.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.loading.schedule();
        }
    }
}

fn ensure_success(response: ApiResponse) -> Result<ApiResponse, Error> {
    if response.is_success() {
        return Ok(response);
    }
    let status = response.status.as_u16();
    Err(Error::Request {
        status: Some(status),
        message: response
            .error_message()
            .unwrap_or_else(|| format!("Request failed with status {status}")),
    })
}

fn rejection(response: &ApiResponse) -> Error {
    match response.error_message() {
        Some(message) => Error::Request {
            status: Some(StatusCode::UNAUTHORIZED.as_u16()),
            message,
        },
        None => Error::unauthorized(),
    }
}

/// Collapse every failure into [`Error::Request`].
fn normalize(error: Error) -> Error {
    match error {
        Error::Request { .. } => error,
        Error::Http(e) => Error::Request {
            status: e.status().map(|s| s.as_u16()),
            message: e.to_string(),
        },
        other => Error::Request {
            status: None,
            message: other.to_string(),
        },
    }
}
