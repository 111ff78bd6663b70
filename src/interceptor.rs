use std::future::Future;
use std::sync::Arc;

use bytes::Bytes;
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use http::{HeaderMap, Method};

use crate::Result;
use crate::error::{ApiError, BoxError, Error, InterceptorStage};
use crate::response::ApiResponse;

/// Request as seen by request interceptors, once per attempt.
#[derive(Clone, Debug)]
pub struct OutgoingRequest {
    pub endpoint: String,
    pub method: Method,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
    pub attempt: usize,
}

pub trait RequestInterceptor: Send + Sync {
    fn intercept(
        &self,
        request: OutgoingRequest,
    ) -> BoxFuture<'static, std::result::Result<OutgoingRequest, BoxError>>;
}

pub trait ResponseInterceptor: Send + Sync {
    fn intercept(
        &self,
        response: ApiResponse,
    ) -> BoxFuture<'static, std::result::Result<ApiResponse, BoxError>>;
}

pub trait ErrorInterceptor: Send + Sync {
    fn intercept(&self, error: ApiError) -> BoxFuture<'static, std::result::Result<ApiError, BoxError>>;
}

impl<F, Fut> RequestInterceptor for F
where
    F: Fn(OutgoingRequest) -> Fut + Send + Sync,
    Fut: Future<Output = std::result::Result<OutgoingRequest, BoxError>> + Send + 'static,
{
    fn intercept(
        &self,
        request: OutgoingRequest,
    ) -> BoxFuture<'static, std::result::Result<OutgoingRequest, BoxError>> {
        self(request).boxed()
    }
}

impl<F, Fut> ResponseInterceptor for F
where
    F: Fn(ApiResponse) -> Fut + Send + Sync,
    Fut: Future<Output = std::result::Result<ApiResponse, BoxError>> + Send + 'static,
{
    fn intercept(
        &self,
        response: ApiResponse,
    ) -> BoxFuture<'static, std::result::Result<ApiResponse, BoxError>> {
        self(response).boxed()
    }
}

impl<F, Fut> ErrorInterceptor for F
where
    F: Fn(ApiError) -> Fut + Send + Sync,
    Fut: Future<Output = std::result::Result<ApiError, BoxError>> + Send + 'static,
{
    fn intercept(&self, error: ApiError) -> BoxFuture<'static, std::result::Result<ApiError, BoxError>> {
        self(error).boxed()
    }
}

#[derive(Clone)]
pub enum Interceptor {
    Request(Arc<dyn RequestInterceptor>),
    Response(Arc<dyn ResponseInterceptor>),
    Error(Arc<dyn ErrorInterceptor>),
}

impl Interceptor {
    pub fn request(interceptor: impl RequestInterceptor + 'static) -> Self {
        Self::Request(Arc::new(interceptor))
    }

    pub fn response(interceptor: impl ResponseInterceptor + 'static) -> Self {
        Self::Response(Arc::new(interceptor))
    }

    pub fn error(interceptor: impl ErrorInterceptor + 'static) -> Self {
        Self::Error(Arc::new(interceptor))
    }

    pub fn stage(&self) -> InterceptorStage {
        match self {
            Self::Request(_) => InterceptorStage::Request,
            Self::Response(_) => InterceptorStage::Response,
            Self::Error(_) => InterceptorStage::Error,
        }
    }
}

impl std::fmt::Debug for Interceptor {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_tuple("Interceptor")
            .field(&self.stage())
            .finish()
    }
}

/// Registered interceptors, applied sequentially in registration order.
#[derive(Clone, Default)]
pub(crate) struct InterceptorChain {
    request: Vec<Arc<dyn RequestInterceptor>>,
    response: Vec<Arc<dyn ResponseInterceptor>>,
    error: Vec<Arc<dyn ErrorInterceptor>>,
}

impl InterceptorChain {
    pub(crate) fn register(&mut self, interceptor: Interceptor) {
        match interceptor {
            Interceptor::Request(interceptor) => self.request.push(interceptor),
            Interceptor::Response(interceptor) => self.response.push(interceptor),
            Interceptor::Error(interceptor) => self.error.push(interceptor),
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.request.len() + self.response.len() + self.error.len()
    }

    pub(crate) async fn apply_request(&self, mut request: OutgoingRequest) -> Result<OutgoingRequest> {
        for interceptor in &self.request {
            request = interceptor
                .intercept(request)
                .await
                .map_err(|source| Error::interceptor(InterceptorStage::Request, source))?;
        }
        Ok(request)
    }

    pub(crate) async fn apply_response(&self, mut response: ApiResponse) -> Result<ApiResponse> {
        for interceptor in &self.response {
            response = interceptor
                .intercept(response)
                .await
                .map_err(|source| Error::interceptor(InterceptorStage::Response, source))?;
        }
        Ok(response)
    }

    pub(crate) async fn apply_error(&self, mut error: ApiError) -> Result<ApiError> {
        for interceptor in &self.error {
            error = interceptor
                .intercept(error)
                .await
                .map_err(|source| Error::interceptor(InterceptorStage::Error, source))?;
        }
        Ok(error)
    }
}
