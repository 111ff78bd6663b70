use std::collections::BTreeMap;
use std::sync::Arc;

use thiserror::Error as ThisError;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;
pub type SharedError = Arc<dyn std::error::Error + Send + Sync>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TransportErrorKind {
    Dns,
    Connect,
    Tls,
    Read,
    Other,
}

impl TransportErrorKind {
    pub const fn is_network(self) -> bool {
        matches!(self, Self::Dns | Self::Connect | Self::Read)
    }
}

impl std::fmt::Display for TransportErrorKind {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::Dns => "dns",
            Self::Connect => "connect",
            Self::Tls => "tls",
            Self::Read => "read",
            Self::Other => "other",
        };
        formatter.write_str(text)
    }
}

#[derive(Debug, ThisError)]
#[error("transport error ({kind}): {source}")]
pub struct TransportError {
    kind: TransportErrorKind,
    #[source]
    source: BoxError,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, source: impl Into<BoxError>) -> Self {
        Self {
            kind,
            source: source.into(),
        }
    }

    pub fn kind(&self) -> TransportErrorKind {
        self.kind
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InterceptorStage {
    Request,
    Response,
    Error,
}

impl std::fmt::Display for InterceptorStage {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::Request => "request",
            Self::Response => "response",
            Self::Error => "error",
        };
        formatter.write_str(text)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorCode {
    InvalidUri,
    InvalidHeaderName,
    InvalidHeaderValue,
    SerializeJson,
    RequestBuild,
    Deserialize,
    Interceptor,
    TransportInit,
}

impl ErrorCode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InvalidUri => "invalid_uri",
            Self::InvalidHeaderName => "invalid_header_name",
            Self::InvalidHeaderValue => "invalid_header_value",
            Self::SerializeJson => "serialize_json",
            Self::RequestBuild => "request_build",
            Self::Deserialize => "deserialize",
            Self::Interceptor => "interceptor",
            Self::TransportInit => "transport_init",
        }
    }
}

/// Failures that escape the envelope: programmer misuse and interceptor errors.
///
/// Ordinary HTTP and network failures never surface here; they resolve to a
/// failed [`ApiResponse`](crate::ApiResponse) instead.
#[derive(Clone, Debug, ThisError)]
#[non_exhaustive]
pub enum Error {
    #[error("invalid request uri: {uri}")]
    InvalidUri { uri: String },
    #[error("invalid header name {name}: {source}")]
    InvalidHeaderName {
        name: String,
        #[source]
        source: Arc<http::header::InvalidHeaderName>,
    },
    #[error("invalid header value for {name}: {source}")]
    InvalidHeaderValue {
        name: String,
        #[source]
        source: Arc<http::header::InvalidHeaderValue>,
    },
    #[error("failed to serialize request json: {source}")]
    Serialize {
        #[source]
        source: Arc<serde_json::Error>,
    },
    #[error("failed to build http request: {source}")]
    RequestBuild {
        #[source]
        source: Arc<http::Error>,
    },
    #[error("failed to decode response data: {source}")]
    Deserialize {
        #[source]
        source: Arc<serde_json::Error>,
    },
    #[error("{stage} interceptor failed: {source}")]
    Interceptor {
        stage: InterceptorStage,
        #[source]
        source: SharedError,
    },
    #[error("failed to initialize transport: {message}")]
    TransportInit { message: String },
}

impl Error {
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidUri { .. } => ErrorCode::InvalidUri,
            Self::InvalidHeaderName { .. } => ErrorCode::InvalidHeaderName,
            Self::InvalidHeaderValue { .. } => ErrorCode::InvalidHeaderValue,
            Self::Serialize { .. } => ErrorCode::SerializeJson,
            Self::RequestBuild { .. } => ErrorCode::RequestBuild,
            Self::Deserialize { .. } => ErrorCode::Deserialize,
            Self::Interceptor { .. } => ErrorCode::Interceptor,
            Self::TransportInit { .. } => ErrorCode::TransportInit,
        }
    }

    pub(crate) fn interceptor(stage: InterceptorStage, source: BoxError) -> Self {
        Self::Interceptor {
            stage,
            source: Arc::from(source),
        }
    }
}

/// Classified failure handed to error interceptors before it becomes an envelope.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ApiError {
    pub status: u16,
    pub message: String,
    pub errors: Option<BTreeMap<String, Vec<String>>>,
    pub transport_error_kind: Option<TransportErrorKind>,
    pub is_network_error: bool,
    pub is_timeout_error: bool,
    pub is_auth_error: bool,
    pub is_aborted: bool,
}

impl ApiError {
    pub(crate) fn aborted() -> Self {
        Self {
            status: 0,
            message: crate::response::CANCELLED_MESSAGE.to_owned(),
            errors: None,
            transport_error_kind: None,
            is_network_error: false,
            is_timeout_error: false,
            is_auth_error: false,
            is_aborted: true,
        }
    }

    pub(crate) fn timeout() -> Self {
        Self {
            status: 0,
            message: crate::response::TIMEOUT_MESSAGE.to_owned(),
            errors: None,
            transport_error_kind: None,
            is_network_error: false,
            is_timeout_error: true,
            is_auth_error: false,
            is_aborted: false,
        }
    }

    pub(crate) fn transport(error: &TransportError) -> Self {
        let kind = error.kind();
        let is_network_error = kind.is_network();
        let message = if is_network_error {
            crate::response::NETWORK_ERROR_MESSAGE.to_owned()
        } else {
            error.to_string()
        };
        Self {
            status: 0,
            message,
            errors: None,
            transport_error_kind: Some(kind),
            is_network_error,
            is_timeout_error: false,
            is_auth_error: false,
            is_aborted: false,
        }
    }
}
