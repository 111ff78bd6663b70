use std::future::Future;
use std::sync::{Arc, Mutex, RwLock};

use bytes::Bytes;
use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use http::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, COOKIE, HeaderValue};
use http::{Method, Request, Uri};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::cookies::CookieJar;
use crate::transport::Transport;
use crate::util::{bearer_header, lock_unpoisoned, read_unpoisoned, write_unpoisoned};

const AUTH_EVENT_CAPACITY: usize = 16;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthEvent {
    TokenRefreshed,
    Unauthenticated,
}

/// Source of the bearer token attached to outgoing requests.
pub trait TokenStore: Send + Sync {
    fn token(&self) -> Option<String>;
    fn set_token(&self, token: String);
    fn clear_token(&self);
}

#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    token: RwLock<Option<String>>,
}

impl MemoryTokenStore {
    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            token: RwLock::new(Some(token.into())),
        }
    }
}

impl TokenStore for MemoryTokenStore {
    fn token(&self) -> Option<String> {
        read_unpoisoned(&self.token).clone()
    }

    fn set_token(&self, token: String) {
        *write_unpoisoned(&self.token) = Some(token);
    }

    fn clear_token(&self) {
        *write_unpoisoned(&self.token) = None;
    }
}

/// Obtains a fresh token after a 401; resolves to `true` when the store now holds one.
pub trait TokenRefresher: Send + Sync {
    fn refresh(&self) -> BoxFuture<'static, bool>;
}

impl<F, Fut> TokenRefresher for F
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = bool> + Send + 'static,
{
    fn refresh(&self) -> BoxFuture<'static, bool> {
        self().boxed()
    }
}

/// Refreshes by POSTing to the API's refresh endpoint and storing `data.token`.
pub(crate) struct HttpTokenRefresher {
    transport: Arc<dyn Transport>,
    uri: Uri,
    tokens: Arc<dyn TokenStore>,
    cookies: Arc<CookieJar>,
}

impl HttpTokenRefresher {
    pub(crate) fn new(
        transport: Arc<dyn Transport>,
        uri: Uri,
        tokens: Arc<dyn TokenStore>,
        cookies: Arc<CookieJar>,
    ) -> Self {
        Self {
            transport,
            uri,
            tokens,
            cookies,
        }
    }

    fn build_request(&self) -> Option<Request<Bytes>> {
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri(self.uri.clone())
            .header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
            .header(ACCEPT, HeaderValue::from_static("application/json"));
        if let Some(token) = self.tokens.token()
            && let Ok(value) = bearer_header(&token)
        {
            builder = builder.header(AUTHORIZATION, value);
        }
        if let Some(cookie) = self.cookies.header_value() {
            builder = builder.header(COOKIE, cookie);
        }
        builder.body(Bytes::from_static(b"{}")).ok()
    }
}

impl std::fmt::Debug for HttpTokenRefresher {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("HttpTokenRefresher")
            .field("uri", &self.uri)
            .finish_non_exhaustive()
    }
}

impl TokenRefresher for HttpTokenRefresher {
    fn refresh(&self) -> BoxFuture<'static, bool> {
        let request = self.build_request();
        let transport = Arc::clone(&self.transport);
        let tokens = Arc::clone(&self.tokens);
        let cookies = Arc::clone(&self.cookies);
        async move {
            let Some(request) = request else {
                return false;
            };
            let response = match transport.send(request).await {
                Ok(response) => response,
                Err(error) => {
                    debug!(error = %error, "token refresh request failed");
                    return false;
                }
            };
            cookies.store_from(response.headers());
            if !response.status().is_success() {
                debug!(status = response.status().as_u16(), "token refresh rejected");
                return false;
            }
            let body: Value = serde_json::from_slice(response.body()).unwrap_or(Value::Null);
            let token = body
                .pointer("/data/token")
                .or_else(|| body.get("token"))
                .and_then(Value::as_str)
                .filter(|token| !token.is_empty());
            match token {
                Some(token) => {
                    tokens.set_token(token.to_owned());
                    true
                }
                None => false,
            }
        }
        .boxed()
    }
}

type RefreshFuture = Shared<BoxFuture<'static, bool>>;

/// Runs at most one refresh at a time; concurrent callers share its outcome.
pub(crate) struct RefreshCoordinator {
    in_flight: Arc<Mutex<Option<RefreshFuture>>>,
    refresher: Arc<dyn TokenRefresher>,
    tokens: Arc<dyn TokenStore>,
    events: broadcast::Sender<AuthEvent>,
}

impl RefreshCoordinator {
    pub(crate) fn new(refresher: Arc<dyn TokenRefresher>, tokens: Arc<dyn TokenStore>) -> Self {
        let (events, _) = broadcast::channel(AUTH_EVENT_CAPACITY);
        Self {
            in_flight: Arc::new(Mutex::new(None)),
            refresher,
            tokens,
            events,
        }
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }

    #[cfg(test)]
    pub(crate) fn is_refreshing(&self) -> bool {
        lock_unpoisoned(&self.in_flight).is_some()
    }

    pub(crate) fn refresh(&self) -> RefreshFuture {
        let mut in_flight = lock_unpoisoned(&self.in_flight);
        if let Some(pending) = in_flight.as_ref() {
            debug!("joining in-flight token refresh");
            return pending.clone();
        }

        let refresh = self.refresher.refresh();
        let slot = Arc::clone(&self.in_flight);
        let tokens = Arc::clone(&self.tokens);
        let events = self.events.clone();
        let shared = async move {
            let refreshed = refresh.await;
            if refreshed {
                debug!("token refreshed");
                let _ = events.send(AuthEvent::TokenRefreshed);
            } else {
                warn!("token refresh failed; clearing stored token");
                tokens.clear_token();
                let _ = events.send(AuthEvent::Unauthenticated);
            }
            *lock_unpoisoned(&slot) = None;
            refreshed
        }
        .boxed()
        .shared();
        *in_flight = Some(shared.clone());
        shared
    }
}
