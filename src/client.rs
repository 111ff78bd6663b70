use std::sync::{Arc, RwLock};
use std::time::Duration;

use bytes::Bytes;
use futures_util::FutureExt;
use http::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, COOKIE, HeaderName, HeaderValue};
use http::{HeaderMap, Method, Request, StatusCode};
use tokio::sync::broadcast;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info_span, warn};

use crate::Result;
use crate::abort::AbortRegistry;
use crate::auth::{
    AuthEvent, HttpTokenRefresher, MemoryTokenStore, RefreshCoordinator, TokenRefresher,
    TokenStore,
};
use crate::cache::ResponseCache;
use crate::config::{ClientConfig, RequestDefaults, ResolvedConfig};
use crate::cookies::CookieJar;
use crate::dedup::{DedupRegistry, DedupRelease};
use crate::error::{ApiError, Error, TransportError};
use crate::extensions::{Clock, SystemClock};
use crate::interceptor::{Interceptor, InterceptorChain, OutgoingRequest};
use crate::key::RequestKey;
use crate::request::RequestBuilder;
use crate::request_log::{RequestLog, RequestLogEntry};
use crate::response::{ApiResponse, RawResponse};
use crate::retry::{RetryDecision, RetryPolicy};
use crate::transport::{HyperTransport, Transport};
use crate::util::{
    bearer_header, merge_headers, parse_header_name, parse_header_value, read_unpoisoned,
    resolve_uri, validate_base_url, write_unpoisoned,
};

const JSON_CONTENT_TYPE: &str = "application/json";

pub struct ApiClientBuilder {
    config: ClientConfig,
    default_headers: HeaderMap,
    retry_policy: Option<RetryPolicy>,
    transport: Option<Arc<dyn Transport>>,
    token_store: Option<Arc<dyn TokenStore>>,
    token_refresher: Option<Arc<dyn TokenRefresher>>,
    clock: Option<Arc<dyn Clock>>,
    interceptors: Vec<Interceptor>,
}

impl ApiClientBuilder {
    pub(crate) fn new(base_url: impl Into<String>) -> Self {
        let config = ClientConfig {
            base_url: base_url.into(),
            ..ClientConfig::default()
        };
        Self::from_config(config)
    }

    pub fn from_config(config: ClientConfig) -> Self {
        Self {
            config,
            default_headers: HeaderMap::new(),
            retry_policy: None,
            transport: None,
            token_store: None,
            token_refresher: None,
            clock: None,
            interceptors: Vec::new(),
        }
    }

    pub fn client_name(mut self, client_name: impl Into<String>) -> Self {
        self.config.client_name = client_name.into();
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout_ms = timeout.as_millis().min(u64::MAX as u128) as u64;
        self
    }

    pub fn retries(mut self, retries: usize) -> Self {
        self.config.retries = retries;
        self
    }

    pub fn retry_delay(mut self, retry_delay: Duration) -> Self {
        self.config.retry_delay_ms = retry_delay.as_millis().min(u64::MAX as u128) as u64;
        self
    }

    pub fn cache_ttl(mut self, cache_ttl: Duration) -> Self {
        self.config.cache_ttl_ms = cache_ttl.as_millis().min(u64::MAX as u128) as u64;
        self
    }

    pub fn deduplication(mut self, enabled: bool) -> Self {
        self.config.enable_deduplication = enabled;
        self
    }

    pub fn logging(mut self, enabled: bool) -> Self {
        self.config.enable_logging = enabled;
        self
    }

    pub fn max_log_entries(mut self, max_log_entries: usize) -> Self {
        self.config.max_log_entries = max_log_entries;
        self
    }

    pub fn refresh_endpoint(mut self, refresh_endpoint: impl Into<String>) -> Self {
        self.config.refresh_endpoint = refresh_endpoint.into();
        self
    }

    /// Replaces the policy derived from `retries` and `retry_delay`.
    pub fn retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = Some(retry_policy);
        self
    }

    pub fn default_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.default_headers.insert(name, value);
        self
    }

    pub fn try_default_header(self, name: &str, value: &str) -> Result<Self> {
        let name = parse_header_name(name)?;
        let value = parse_header_value(name.as_str(), value)?;
        Ok(self.default_header(name, value))
    }

    pub fn transport(mut self, transport: impl Transport + 'static) -> Self {
        self.transport = Some(Arc::new(transport));
        self
    }

    pub fn transport_arc(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn token_store(mut self, token_store: Arc<dyn TokenStore>) -> Self {
        self.token_store = Some(token_store);
        self
    }

    pub fn token_refresher(mut self, token_refresher: impl TokenRefresher + 'static) -> Self {
        self.token_refresher = Some(Arc::new(token_refresher));
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn interceptor(mut self, interceptor: Interceptor) -> Self {
        self.interceptors.push(interceptor);
        self
    }

    pub fn try_build(self) -> Result<ApiClient> {
        validate_base_url(&self.config.base_url)?;

        let transport = match self.transport {
            Some(transport) => transport,
            None => Arc::new(HyperTransport::new()?),
        };
        let token_store: Arc<dyn TokenStore> = match self.token_store {
            Some(token_store) => token_store,
            None => Arc::new(MemoryTokenStore::default()),
        };
        let cookies = Arc::new(CookieJar::default());
        let token_refresher = match self.token_refresher {
            Some(token_refresher) => token_refresher,
            None => {
                let uri = resolve_uri(&self.config.base_url, &self.config.refresh_endpoint)?;
                Arc::new(HttpTokenRefresher::new(
                    Arc::clone(&transport),
                    uri,
                    Arc::clone(&token_store),
                    Arc::clone(&cookies),
                ))
            }
        };
        let clock: Arc<dyn Clock> = match self.clock {
            Some(clock) => clock,
            None => Arc::new(SystemClock),
        };

        let mut defaults = self.config.defaults();
        if let Some(retry_policy) = self.retry_policy {
            defaults.retry_policy = retry_policy;
        }
        let mut interceptors = InterceptorChain::default();
        for interceptor in self.interceptors {
            interceptors.register(interceptor);
        }

        let inner = ClientInner {
            base_url: self.config.base_url.trim_end_matches('/').to_owned(),
            client_name: self.config.client_name,
            default_headers: self.default_headers,
            defaults,
            transport,
            tokens: Arc::clone(&token_store),
            refresh: RefreshCoordinator::new(token_refresher, token_store),
            cache: ResponseCache::new(Arc::clone(&clock)),
            dedup: DedupRegistry::default(),
            aborts: AbortRegistry::default(),
            interceptors: RwLock::new(interceptors),
            request_log: RequestLog::new(self.config.max_log_entries),
            cookies,
            clock,
        };
        Ok(ApiClient {
            inner: Arc::new(inner),
        })
    }

    #[track_caller]
    pub fn build(self) -> ApiClient {
        self.try_build().unwrap_or_else(|error| {
            panic!("failed to build coopx api client: {error}; use try_build() to handle configuration errors")
        })
    }
}

/// Handle to one client instance; clones share caches, registries and tokens.
#[derive(Clone)]
pub struct ApiClient {
    inner: Arc<ClientInner>,
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("ApiClient")
            .field("base_url", &self.inner.base_url)
            .field("client_name", &self.inner.client_name)
            .finish_non_exhaustive()
    }
}

impl ApiClient {
    pub fn builder(base_url: impl Into<String>) -> ApiClientBuilder {
        ApiClientBuilder::new(base_url)
    }

    pub fn from_env() -> Result<Self> {
        ApiClientBuilder::from_config(ClientConfig::from_env()).try_build()
    }

    pub fn request(&self, method: Method, endpoint: impl Into<String>) -> RequestBuilder<'_> {
        RequestBuilder::new(self, method, endpoint.into())
    }

    pub fn get(&self, endpoint: impl Into<String>) -> RequestBuilder<'_> {
        self.request(Method::GET, endpoint)
    }

    pub fn post(&self, endpoint: impl Into<String>) -> RequestBuilder<'_> {
        self.request(Method::POST, endpoint)
    }

    pub fn put(&self, endpoint: impl Into<String>) -> RequestBuilder<'_> {
        self.request(Method::PUT, endpoint)
    }

    pub fn patch(&self, endpoint: impl Into<String>) -> RequestBuilder<'_> {
        self.request(Method::PATCH, endpoint)
    }

    pub fn delete(&self, endpoint: impl Into<String>) -> RequestBuilder<'_> {
        self.request(Method::DELETE, endpoint)
    }

    /// Cancels the outstanding call for `endpoint` and `method`, returning whether one existed.
    pub fn cancel_request(&self, endpoint: &str, method: Method) -> bool {
        self.inner.aborts.cancel(&RequestKey::new(method, endpoint))
    }

    pub fn cancel_all_requests(&self) -> usize {
        self.inner.aborts.cancel_all()
    }

    pub fn invalidate_cache(&self, endpoint: &str) {
        self.inner.cache.invalidate(endpoint);
    }

    pub fn clear_cache(&self) {
        self.inner.cache.clear();
    }

    pub fn request_logs(&self) -> Vec<RequestLogEntry> {
        self.inner.request_log.entries()
    }

    pub fn clear_request_logs(&self) {
        self.inner.request_log.clear();
    }

    pub fn add_interceptor(&self, interceptor: Interceptor) {
        write_unpoisoned(&self.inner.interceptors).register(interceptor);
    }

    pub fn set_token(&self, token: impl Into<String>) {
        self.inner.tokens.set_token(token.into());
    }

    pub fn token(&self) -> Option<String> {
        self.inner.tokens.token()
    }

    pub fn clear_token(&self) {
        self.inner.tokens.clear_token();
    }

    /// Forgets the token, session cookies and cached payloads.
    pub fn logout_locally(&self) {
        self.inner.tokens.clear_token();
        self.inner.cookies.clear();
        self.inner.cache.clear();
    }

    pub fn auth_events(&self) -> broadcast::Receiver<AuthEvent> {
        self.inner.refresh.subscribe()
    }

    /// Runs the token refresher, joining a refresh that is already in flight.
    pub async fn refresh_token(&self) -> bool {
        self.inner.refresh.refresh().await
    }

    pub(crate) fn defaults(&self) -> &RequestDefaults {
        &self.inner.defaults
    }

    #[cfg(test)]
    pub(crate) fn in_flight_requests(&self) -> usize {
        self.inner.dedup.in_flight()
    }

    #[cfg(test)]
    pub(crate) fn outstanding_abort_handles(&self) -> usize {
        self.inner.aborts.outstanding()
    }

    #[cfg(test)]
    pub(crate) fn cached_entries(&self) -> usize {
        self.inner.cache.len()
    }

    pub(crate) async fn execute(&self, call: PreparedCall) -> Result<ApiResponse> {
        let key = RequestKey::new(call.method.clone(), call.endpoint.clone());

        if call.config.enable_cache
            && call.method == Method::GET
            && let Some(payload) = self.inner.cache.get(&key, call.config.cache_ttl)
        {
            debug!(
                client = %self.inner.client_name,
                endpoint = %call.endpoint,
                "serving cached response"
            );
            let response = ApiResponse::cached(payload);
            if call.config.enable_logging {
                self.inner.record(&call, &response, Duration::ZERO);
            }
            return Ok(response);
        }

        if !call.config.enable_deduplication {
            return self.inner.run(key, call).await;
        }

        let inner = Arc::clone(&self.inner);
        let (pending, joined) = self.inner.dedup.join_or_register(&key, |id| {
            let key = key.clone();
            async move {
                let _release = DedupRelease::new(&inner.dedup, key.clone(), id);
                inner.run(key, call).await
            }
            .boxed()
        });
        if joined {
            debug!(
                client = %self.inner.client_name,
                key = %key,
                "joining in-flight request"
            );
        }
        pending.await
    }
}

/// A fully configured call, detached from the builder that produced it.
pub(crate) struct PreparedCall {
    pub(crate) method: Method,
    pub(crate) endpoint: String,
    pub(crate) headers: HeaderMap,
    pub(crate) body: Option<Bytes>,
    pub(crate) config: ResolvedConfig,
}

enum SendFailure {
    Aborted,
    Timeout,
    Transport(TransportError),
}

enum Step {
    Settled(ApiResponse),
    Retry(Duration),
}

struct ClientInner {
    base_url: String,
    client_name: String,
    default_headers: HeaderMap,
    defaults: RequestDefaults,
    transport: Arc<dyn Transport>,
    tokens: Arc<dyn TokenStore>,
    refresh: RefreshCoordinator,
    cache: ResponseCache,
    dedup: DedupRegistry,
    aborts: AbortRegistry,
    interceptors: RwLock<InterceptorChain>,
    request_log: RequestLog,
    cookies: Arc<CookieJar>,
    clock: Arc<dyn Clock>,
}

impl ClientInner {
    async fn run(&self, key: RequestKey, call: PreparedCall) -> Result<ApiResponse> {
        let abort = self.aborts.acquire(&key);
        let started = Instant::now();
        let outcome = self.perform(&key, &call, abort.token()).await;
        drop(abort);

        if call.config.enable_logging {
            let elapsed = started.elapsed();
            match &outcome {
                Ok(response) => self.record(&call, response, elapsed),
                Err(error) => self.append_log(&call, 0, elapsed, Some(error.to_string())),
            }
        }
        outcome
    }

    async fn perform(
        &self,
        key: &RequestKey,
        call: &PreparedCall,
        cancel: &CancellationToken,
    ) -> Result<ApiResponse> {
        let max_attempts = call.config.retry_policy.configured_max_attempts();
        let mut attempt = 1_usize;
        let mut refreshed = false;

        loop {
            let span = info_span!(
                "coopx.request",
                client = %self.client_name,
                method = %call.method,
                endpoint = %call.endpoint,
                attempt = attempt,
                max_attempts = max_attempts
            );
            let step = self
                .attempt(key, call, attempt, &mut refreshed, cancel)
                .instrument(span)
                .await?;
            match step {
                Step::Settled(response) => return Ok(response),
                Step::Retry(delay) => {
                    if !backoff(delay, cancel).await {
                        let chain = self.interceptor_snapshot();
                        return self.settle_error(&chain, ApiError::aborted()).await;
                    }
                    attempt += 1;
                }
            }
        }
    }

    async fn attempt(
        &self,
        key: &RequestKey,
        call: &PreparedCall,
        attempt: usize,
        refreshed: &mut bool,
        cancel: &CancellationToken,
    ) -> Result<Step> {
        let policy = &call.config.retry_policy;
        let max_attempts = policy.configured_max_attempts();
        let chain = self.interceptor_snapshot();

        let outgoing = OutgoingRequest {
            endpoint: call.endpoint.clone(),
            method: call.method.clone(),
            headers: self.attempt_headers(&call.headers)?,
            body: call.body.clone(),
            attempt,
        };
        let outgoing = chain.apply_request(outgoing).await?;
        let request = self.build_request(outgoing)?;

        debug!("sending request");
        let raw = match self.send_with_timeout(request, call.config.timeout, cancel).await {
            Ok(raw) => raw,
            Err(SendFailure::Aborted) => {
                debug!("request cancelled");
                return self.settle_error(&chain, ApiError::aborted()).await.map(Step::Settled);
            }
            Err(SendFailure::Timeout) => {
                warn!(
                    timeout_ms = call.config.timeout.as_millis() as u64,
                    "request timed out"
                );
                return self.settle_error(&chain, ApiError::timeout()).await.map(Step::Settled);
            }
            Err(SendFailure::Transport(error)) => {
                let decision = RetryDecision {
                    attempt,
                    max_attempts,
                    method: call.method.clone(),
                    endpoint: call.endpoint.clone(),
                    status: None,
                    transport_error_kind: Some(error.kind()),
                };
                if policy.should_retry_decision(&decision) {
                    let delay = policy.backoff_for_retry(attempt);
                    warn!(
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "retrying request after transport error"
                    );
                    return Ok(Step::Retry(delay));
                }
                return self
                    .settle_error(&chain, ApiError::transport(&error))
                    .await
                    .map(Step::Settled);
            }
        };

        self.cookies.store_from(raw.headers());
        let status = raw.status();
        let body = raw.json_or_status_text();

        if status.is_success() {
            let response = ApiResponse::from_success(status, &body);
            if call.config.enable_cache
                && call.method == Method::GET
                && let Some(data) = &response.data
            {
                self.cache.set(key.clone(), data.clone());
            }
            debug!(status = status.as_u16(), "request completed");
            return chain.apply_response(response).await.map(Step::Settled);
        }

        if status == StatusCode::UNAUTHORIZED && !call.config.skip_refresh_token && !*refreshed {
            *refreshed = true;
            let refresh = self.refresh.refresh();
            let refreshed_ok = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    return self.settle_error(&chain, ApiError::aborted()).await.map(Step::Settled);
                }
                refreshed_ok = refresh => refreshed_ok,
            };
            if !refreshed_ok {
                debug!("token refresh failed, surfacing 401");
                let response = ApiResponse::from_failure(status, &body);
                return chain.apply_response(response).await.map(Step::Settled);
            }
            if policy.has_attempts_left(attempt) {
                let delay = policy.backoff_for_retry(attempt);
                debug!(
                    delay_ms = delay.as_millis() as u64,
                    "retrying request after token refresh"
                );
                return Ok(Step::Retry(delay));
            }
        }

        let decision = RetryDecision {
            attempt,
            max_attempts,
            method: call.method.clone(),
            endpoint: call.endpoint.clone(),
            status: Some(status),
            transport_error_kind: None,
        };
        if policy.should_retry_decision(&decision) {
            let delay = policy.backoff_for_retry(attempt);
            warn!(
                delay_ms = delay.as_millis() as u64,
                status = status.as_u16(),
                "retrying request after retryable status"
            );
            return Ok(Step::Retry(delay));
        }

        debug!(status = status.as_u16(), "request failed");
        let response = ApiResponse::from_failure(status, &body);
        chain.apply_response(response).await.map(Step::Settled)
    }

    async fn send_with_timeout(
        &self,
        request: Request<Bytes>,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> std::result::Result<RawResponse, SendFailure> {
        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(SendFailure::Aborted),
            result = tokio::time::timeout(timeout, self.transport.send(request)) => match result {
                Ok(Ok(raw)) => Ok(raw),
                Ok(Err(error)) => Err(SendFailure::Transport(error)),
                Err(_) => Err(SendFailure::Timeout),
            },
        }
    }

    async fn settle_error(&self, chain: &InterceptorChain, error: ApiError) -> Result<ApiResponse> {
        let error = chain.apply_error(error).await?;
        Ok(ApiResponse::from_api_error(error))
    }

    fn interceptor_snapshot(&self) -> InterceptorChain {
        read_unpoisoned(&self.interceptors).clone()
    }

    fn attempt_headers(&self, call_headers: &HeaderMap) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(JSON_CONTENT_TYPE));
        headers.insert(ACCEPT, HeaderValue::from_static(JSON_CONTENT_TYPE));
        let mut headers = merge_headers(&headers, &self.default_headers);
        headers = merge_headers(&headers, call_headers);
        if let Some(token) = self.tokens.token() {
            headers.insert(AUTHORIZATION, bearer_header(&token)?);
        }
        if let Some(cookie) = self.cookies.header_value() {
            headers.insert(COOKIE, cookie);
        }
        Ok(headers)
    }

    fn build_request(&self, outgoing: OutgoingRequest) -> Result<Request<Bytes>> {
        let uri = resolve_uri(&self.base_url, &outgoing.endpoint)?;
        let mut request = Request::builder()
            .method(outgoing.method)
            .uri(uri)
            .body(outgoing.body.unwrap_or_default())
            .map_err(|source| Error::RequestBuild {
                source: Arc::new(source),
            })?;
        *request.headers_mut() = outgoing.headers;
        Ok(request)
    }

    fn record(&self, call: &PreparedCall, response: &ApiResponse, duration: Duration) {
        let error = if response.success {
            None
        } else {
            response.message.clone()
        };
        self.append_log(call, response.status, duration, error);
    }

    fn append_log(&self, call: &PreparedCall, status: u16, duration: Duration, error: Option<String>) {
        self.request_log.append(RequestLogEntry {
            endpoint: call.endpoint.clone(),
            method: call.method.to_string(),
            status,
            duration,
            timestamp: self.clock.now_system(),
            error,
        });
    }
}

async fn backoff(delay: Duration, cancel: &CancellationToken) -> bool {
    if delay.is_zero() {
        return !cancel.is_cancelled();
    }
    tokio::select! {
        biased;
        () = cancel.cancelled() => false,
        () = tokio::time::sleep(delay) => true,
    }
}
