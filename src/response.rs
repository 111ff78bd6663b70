use std::collections::BTreeMap;

use bytes::Bytes;
use http::{HeaderMap, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::Result;
use crate::error::{ApiError, Error};

pub(crate) const CACHED_MESSAGE: &str = "Cached response";
pub(crate) const CANCELLED_MESSAGE: &str = "Request was cancelled";
pub(crate) const TIMEOUT_MESSAGE: &str =
    "Request took too long. Please check your connection and try again.";
pub(crate) const NETWORK_ERROR_MESSAGE: &str = "Network error. Please check your connection.";
const DEFAULT_FAILURE_MESSAGE: &str = "Request failed";
const GENERAL_ERRORS_FIELD: &str = "general";

pub type FieldErrors = BTreeMap<String, Vec<String>>;

/// Uniform result of every pipeline call, successful or not.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse<T = Value> {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors: Option<FieldErrors>,
    #[serde(default)]
    pub status: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default)]
    pub is_retrying: bool,
}

impl<T> ApiResponse<T> {
    pub fn is_success(&self) -> bool {
        self.success
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn data(&self) -> Option<&T> {
        self.data.as_ref()
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn field_errors(&self, field: &str) -> &[String] {
        self.errors
            .as_ref()
            .and_then(|errors| errors.get(field))
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn map_data<U>(self, map: impl FnOnce(T) -> U) -> ApiResponse<U> {
        ApiResponse {
            success: self.success,
            data: self.data.map(map),
            message: self.message,
            errors: self.errors,
            status: self.status,
            code: self.code,
            is_retrying: self.is_retrying,
        }
    }
}

impl ApiResponse<Value> {
    pub(crate) fn cached(payload: Value) -> Self {
        Self {
            success: true,
            data: Some(payload),
            message: Some(CACHED_MESSAGE.to_owned()),
            errors: None,
            status: StatusCode::OK.as_u16(),
            code: None,
            is_retrying: false,
        }
    }

    pub(crate) fn from_success(status: StatusCode, body: &Value) -> Self {
        let data = match body.get("data") {
            Some(data) if !data.is_null() => data.clone(),
            _ => body.clone(),
        };
        Self {
            success: true,
            data: Some(data),
            message: string_field(body, "message"),
            errors: None,
            status: status.as_u16(),
            code: string_field(body, "code"),
            is_retrying: false,
        }
    }

    pub(crate) fn from_failure(status: StatusCode, body: &Value) -> Self {
        let backend_message = string_field(body, "message");
        let message = user_message(
            status.as_u16(),
            backend_message.as_deref().unwrap_or(DEFAULT_FAILURE_MESSAGE),
        );
        let errors = body
            .get("errors")
            .and_then(|errors| serde_json::from_value::<FieldErrors>(errors.clone()).ok())
            .unwrap_or_else(|| general_errors(&message));
        Self {
            success: false,
            data: None,
            message: Some(message),
            errors: Some(errors),
            status: status.as_u16(),
            code: string_field(body, "code"),
            is_retrying: false,
        }
    }

    pub(crate) fn from_api_error(error: ApiError) -> Self {
        let errors = error
            .errors
            .unwrap_or_else(|| general_errors(&error.message));
        Self {
            success: false,
            data: None,
            message: Some(error.message),
            errors: Some(errors),
            status: error.status,
            code: None,
            is_retrying: false,
        }
    }

    pub fn decode<T>(self) -> Result<ApiResponse<T>>
    where
        T: DeserializeOwned,
    {
        let data = match self.data {
            Some(value) => Some(
                serde_json::from_value(value)
                    .map_err(|source| Error::Deserialize {
                        source: source.into(),
                    })?,
            ),
            None => None,
        };
        Ok(ApiResponse {
            success: self.success,
            data,
            message: self.message,
            errors: self.errors,
            status: self.status,
            code: self.code,
            is_retrying: self.is_retrying,
        })
    }
}

#[derive(Clone, Debug)]
pub struct RawResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
}

impl RawResponse {
    pub fn new(status: StatusCode, headers: HeaderMap, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers,
            body: body.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn status_text(&self) -> &'static str {
        self.status.canonical_reason().unwrap_or_default()
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub(crate) fn json_or_status_text(&self) -> Value {
        match serde_json::from_slice::<Value>(&self.body) {
            Ok(Value::Object(map)) => Value::Object(map),
            Ok(other) if !self.body.is_empty() => other,
            _ => {
                let mut map = Map::new();
                map.insert(
                    "message".to_owned(),
                    Value::String(self.status_text().to_owned()),
                );
                Value::Object(map)
            }
        }
    }
}

pub fn user_message(status: u16, default_message: &str) -> String {
    let message = match status {
        400 => "Invalid request. Please check your input.",
        401 => "Your session has expired. Please log in again.",
        403 => "You don't have permission to access this resource.",
        404 => "The requested resource was not found.",
        408 => "Request timed out. Please try again.",
        429 => "Too many requests. Please wait a moment before retrying.",
        500 => "Server error. Please try again later.",
        502 => "Bad gateway. The server is temporarily unavailable.",
        503 => "Service unavailable. Please try again later.",
        504 => "Gateway timeout. Please try again later.",
        _ => default_message,
    };
    message.to_owned()
}

fn general_errors(message: &str) -> FieldErrors {
    let mut errors = FieldErrors::new();
    errors.insert(GENERAL_ERRORS_FIELD.to_owned(), vec![message.to_owned()]);
    errors
}

fn string_field(body: &Value, name: &str) -> Option<String> {
    body.get(name)
        .and_then(Value::as_str)
        .filter(|text| !text.is_empty())
        .map(ToOwned::to_owned)
}
