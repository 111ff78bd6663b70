use std::time::Duration;

use bytes::Bytes;
use http::header::{HeaderName, HeaderValue};
use http::{HeaderMap, Method};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::Result;
use crate::client::{ApiClient, PreparedCall};
use crate::config::RequestConfig;
use crate::error::Error;
use crate::response::ApiResponse;
use crate::util::{parse_header_name, parse_header_value};

#[must_use = "requests do nothing until `send` is awaited"]
pub struct RequestBuilder<'a> {
    client: &'a ApiClient,
    method: Method,
    endpoint: String,
    query_pairs: Vec<(String, String)>,
    headers: HeaderMap,
    body: Option<Bytes>,
    config: RequestConfig,
}

impl<'a> RequestBuilder<'a> {
    pub(crate) fn new(client: &'a ApiClient, method: Method, endpoint: String) -> Self {
        Self {
            client,
            method,
            endpoint,
            query_pairs: Vec::new(),
            headers: HeaderMap::new(),
            body: None,
            config: RequestConfig::default(),
        }
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn try_header(self, name: &str, value: &str) -> Result<Self> {
        let name = parse_header_name(name)?;
        let value = parse_header_value(name.as_str(), value)?;
        Ok(self.header(name, value))
    }

    pub fn query_pair(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query_pairs.push((name.into(), value.into()));
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn json<T>(self, payload: &T) -> Result<Self>
    where
        T: Serialize + ?Sized,
    {
        let body = serde_json::to_vec(payload).map_err(|source| Error::Serialize {
            source: source.into(),
        })?;
        Ok(self.body(body))
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = Some(timeout);
        self
    }

    /// Total attempts including the first one.
    pub fn retries(mut self, retries: usize) -> Self {
        self.config.retries = Some(retries);
        self
    }

    pub fn retry_delay(mut self, retry_delay: Duration) -> Self {
        self.config.retry_delay = Some(retry_delay);
        self
    }

    pub fn cache(mut self, enabled: bool) -> Self {
        self.config.enable_cache = Some(enabled);
        self
    }

    pub fn cache_ttl(mut self, cache_ttl: Duration) -> Self {
        self.config.cache_ttl = Some(cache_ttl);
        self
    }

    pub fn deduplicate(mut self, enabled: bool) -> Self {
        self.config.enable_deduplication = Some(enabled);
        self
    }

    pub fn logging(mut self, enabled: bool) -> Self {
        self.config.enable_logging = Some(enabled);
        self
    }

    pub fn skip_refresh_token(mut self, skip: bool) -> Self {
        self.config.skip_refresh_token = Some(skip);
        self
    }

    /// Applies every override set in `config`, keeping earlier ones it leaves unset.
    pub fn config(mut self, config: RequestConfig) -> Self {
        let current = &mut self.config;
        current.timeout = config.timeout.or(current.timeout);
        current.retries = config.retries.or(current.retries);
        current.retry_delay = config.retry_delay.or(current.retry_delay);
        current.enable_cache = config.enable_cache.or(current.enable_cache);
        current.cache_ttl = config.cache_ttl.or(current.cache_ttl);
        current.enable_deduplication = config
            .enable_deduplication
            .or(current.enable_deduplication);
        current.enable_logging = config.enable_logging.or(current.enable_logging);
        current.skip_refresh_token = config.skip_refresh_token.or(current.skip_refresh_token);
        self
    }

    pub async fn send(self) -> Result<ApiResponse> {
        let client = self.client;
        let call = self.prepare();
        client.execute(call).await
    }

    pub async fn send_json<T>(self) -> Result<ApiResponse<T>>
    where
        T: DeserializeOwned,
    {
        self.send().await?.decode()
    }

    fn prepare(self) -> PreparedCall {
        let is_get = self.method == Method::GET;
        let config = self.config.resolve(self.client.defaults(), is_get);
        let endpoint = append_query_pairs(self.endpoint, &self.query_pairs);
        PreparedCall {
            method: self.method,
            endpoint,
            headers: self.headers,
            body: self.body,
            config,
        }
    }
}

fn append_query_pairs(endpoint: String, query_pairs: &[(String, String)]) -> String {
    if query_pairs.is_empty() {
        return endpoint;
    }
    let mut serializer = url::form_urlencoded::Serializer::new(String::new());
    for (name, value) in query_pairs {
        serializer.append_pair(name, value);
    }
    let encoded = serializer.finish();
    let separator = if endpoint.contains('?') { '&' } else { '?' };
    format!("{endpoint}{separator}{encoded}")
}
