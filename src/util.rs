use std::error::Error as StdError;
use std::sync::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use http::header::{HeaderName, HeaderValue};
use http::{HeaderMap, Uri};

use crate::error::{Error, TransportErrorKind};

pub(crate) fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

pub(crate) fn read_unpoisoned<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    match lock.read() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

pub(crate) fn write_unpoisoned<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    match lock.write() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

pub(crate) fn merge_headers(base_headers: &HeaderMap, request_headers: &HeaderMap) -> HeaderMap {
    let mut merged = base_headers.clone();
    for (name, value) in request_headers {
        merged.insert(name.clone(), value.clone());
    }
    merged
}

pub(crate) fn validate_base_url(base_url: &str) -> Result<(), Error> {
    let invalid = || Error::InvalidUri {
        uri: base_url.to_owned(),
    };
    let normalized = base_url.trim();
    if normalized.len() != base_url.len() || normalized.is_empty() {
        return Err(invalid());
    }

    let parsed = url::Url::parse(normalized).map_err(|_| invalid())?;
    if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
        return Err(invalid());
    }
    if parsed.query().is_some() || parsed.fragment().is_some() {
        return Err(invalid());
    }
    Ok(())
}

pub(crate) fn join_base_path(base_url: &str, path: &str) -> String {
    let base = base_url.trim_end_matches('/');
    let relative = path.trim_start_matches('/');
    match (base.is_empty(), relative.is_empty()) {
        (true, true) => String::new(),
        (true, false) => relative.to_owned(),
        (false, true) => base.to_owned(),
        (false, false) => format!("{base}/{relative}"),
    }
}

pub(crate) fn resolve_uri(base_url: &str, endpoint: &str) -> Result<Uri, Error> {
    let uri_text = join_base_path(base_url, endpoint);
    uri_text
        .parse()
        .map_err(|_| Error::InvalidUri { uri: uri_text })
}

pub(crate) fn parse_header_name(name: &str) -> Result<HeaderName, Error> {
    name.parse().map_err(|source: http::header::InvalidHeaderName| {
        Error::InvalidHeaderName {
            name: name.to_owned(),
            source: source.into(),
        }
    })
}

pub(crate) fn parse_header_value(name: &str, value: &str) -> Result<HeaderValue, Error> {
    value
        .parse()
        .map_err(|source: http::header::InvalidHeaderValue| Error::InvalidHeaderValue {
            name: name.to_owned(),
            source: source.into(),
        })
}

pub(crate) fn bearer_header(token: &str) -> Result<HeaderValue, Error> {
    let mut value = parse_header_value("authorization", &format!("Bearer {token}"))?;
    value.set_sensitive(true);
    Ok(value)
}

pub(crate) fn classify_transport_error(
    error: &hyper_util::client::legacy::Error,
) -> TransportErrorKind {
    if let Some(kind) = io_error_kind(error) {
        return kind;
    }

    let text = error_chain_text(error);
    if error.is_connect() {
        if text.contains("dns")
            || text.contains("name or service not known")
            || text.contains("failed to lookup address")
        {
            return TransportErrorKind::Dns;
        }
        if text.contains("tls") || text.contains("certificate") || text.contains("handshake") {
            return TransportErrorKind::Tls;
        }
        return TransportErrorKind::Connect;
    }

    if text.contains("connection reset")
        || text.contains("connection closed")
        || text.contains("broken pipe")
        || text.contains("unexpected eof")
    {
        return TransportErrorKind::Read;
    }

    TransportErrorKind::Other
}

fn io_error_kind(error: &(dyn StdError + 'static)) -> Option<TransportErrorKind> {
    use std::io::ErrorKind;

    let mut current: Option<&(dyn StdError + 'static)> = Some(error);
    while let Some(item) = current {
        if let Some(io_error) = item.downcast_ref::<std::io::Error>() {
            let kind = match io_error.kind() {
                ErrorKind::ConnectionRefused
                | ErrorKind::HostUnreachable
                | ErrorKind::NetworkUnreachable
                | ErrorKind::NetworkDown
                | ErrorKind::AddrNotAvailable
                | ErrorKind::NotConnected
                | ErrorKind::TimedOut => TransportErrorKind::Connect,
                ErrorKind::ConnectionReset
                | ErrorKind::ConnectionAborted
                | ErrorKind::BrokenPipe
                | ErrorKind::UnexpectedEof => TransportErrorKind::Read,
                _ => return None,
            };
            return Some(kind);
        }
        current = item.source();
    }
    None
}

fn error_chain_text(error: &(dyn StdError + 'static)) -> String {
    let mut text = error.to_string();
    let mut current = error.source();
    while let Some(item) = current {
        text.push_str(": ");
        text.push_str(&item.to_string());
        current = item.source();
    }
    text.to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::{join_base_path, resolve_uri, validate_base_url};

    #[test]
    fn join_base_path_handles_slashes() {
        assert_eq!(
            join_base_path("http://localhost:8000/api/", "/loans/42"),
            "http://localhost:8000/api/loans/42"
        );
        assert_eq!(
            join_base_path("http://localhost:8000/api", "loans"),
            "http://localhost:8000/api/loans"
        );
    }

    #[test]
    fn resolve_uri_keeps_query_string() {
        let uri = resolve_uri("https://api.example.com/v1", "/loans?page=2")
            .expect("uri should parse");
        assert_eq!(uri.path(), "/v1/loans");
        assert_eq!(uri.query(), Some("page=2"));
    }

    #[test]
    fn validate_base_url_rejects_non_http_and_query() {
        assert!(validate_base_url("http://localhost:8000/api").is_ok());
        assert!(validate_base_url("ftp://localhost/api").is_err());
        assert!(validate_base_url("https://api.example.com/v1?debug=1").is_err());
        assert!(validate_base_url(" https://api.example.com").is_err());
        assert!(validate_base_url("").is_err());
    }
}
