#![doc = include_str!("../README.md")]

pub mod config;
pub mod error;
pub mod gateway;
pub mod navigation;
pub mod oauth;
pub mod session;
pub mod storage;
pub mod store;
pub mod token;
pub mod transport;
pub mod types;

#[cfg(test)]
mod testutil;

// Re-exports for convenient access
pub use config::ClientConfig;
pub use error::Error;
pub use gateway::RequestGateway;
pub use navigation::{InMemoryNavigation, Navigation};
pub use oauth::{OAuthCallback, authorization_url, parse_callback};
pub use session::SessionManager;
pub use storage::{MemoryStorage, Storage, StorageEvent, StorageEvents};
pub use store::TokenStore;
pub use token::{Claims, DEFAULT_EXPIRY_BUFFER_SECS, decode_claims, is_expired, is_expired_at};
pub use transport::{ApiRequest, ApiResponse, HttpTransport, Transport};
pub use types::{SessionEvent, SessionState, Subject, TokenPair, UserProfile};
