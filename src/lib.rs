//! `coopx` is a resilient JSON API client for the cooperative backend, built on hyper.
//!
//! Every call settles into an [`ApiResponse`] envelope. On the way it passes through
//! request deduplication, a GET cache with TTL, a timeout race, exponential-backoff
//! retries, single-flight token refresh on 401 and the registered interceptors.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::time::Duration;
//! use coopx::prelude::{ApiClient, ApiResponse};
//! use serde::Deserialize;
//!
//! #[derive(Debug, Deserialize)]
//! struct Loan {
//!     id: u64,
//!     amount: f64,
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = ApiClient::builder("https://api.example.com/api")
//!         .client_name("member-portal")
//!         .timeout(Duration::from_secs(10))
//!         .retries(3)
//!         .try_build()?;
//!     client.set_token("member-session-token");
//!
//!     let loan: ApiResponse<Loan> = client.get("/loans/42").send_json().await?;
//!     match loan.data() {
//!         Some(loan) => println!("loan {} for {}", loan.id, loan.amount),
//!         None => eprintln!("{}", loan.message().unwrap_or("request failed")),
//!     }
//!
//!     client.invalidate_cache("/loans");
//!     Ok(())
//! }
//! ```
//!
//! # Failure model
//!
//! - HTTP and network failures resolve to `ApiResponse { success: false, .. }`.
//! - `Err(coopx::Error)` is reserved for misuse (bad URL, bad header, unserializable
//!   body) and for interceptor failures.
//! - `retries` counts total attempts, so `retries(3)` sends at most three requests.

mod abort;
mod auth;
mod cache;
mod client;
mod config;
mod cookies;
mod dedup;
mod error;
mod extensions;
mod interceptor;
mod key;
mod request;
mod request_log;
mod response;
mod retry;
mod transport;
mod util;

pub use crate::auth::{AuthEvent, MemoryTokenStore, TokenRefresher, TokenStore};
pub use crate::client::{ApiClient, ApiClientBuilder};
pub use crate::config::{ClientConfig, RequestConfig};
pub use crate::error::{
    ApiError, BoxError, Error, ErrorCode, InterceptorStage, SharedError, TransportError,
    TransportErrorKind,
};
pub use crate::extensions::{Clock, SystemClock};
pub use crate::interceptor::{
    ErrorInterceptor, Interceptor, OutgoingRequest, RequestInterceptor, ResponseInterceptor,
};
pub use crate::key::RequestKey;
pub use crate::request::RequestBuilder;
pub use crate::request_log::RequestLogEntry;
pub use crate::response::{ApiResponse, FieldErrors, RawResponse, user_message};
pub use crate::retry::{RetryClassifier, RetryDecision, RetryPolicy};
pub use crate::transport::{HyperTransport, Transport};

pub type Result<T> = std::result::Result<T, Error>;

pub mod prelude {
    pub use crate::{
        ApiClient, ApiClientBuilder, ApiError, ApiResponse, AuthEvent, ClientConfig, Error,
        Interceptor, OutgoingRequest, RequestConfig, RetryPolicy, TokenRefresher, TokenStore,
    };
}
