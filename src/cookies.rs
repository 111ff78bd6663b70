use std::collections::BTreeMap;
use std::sync::Mutex;

use http::HeaderMap;
use http::header::{HeaderValue, SET_COOKIE};

use crate::util::lock_unpoisoned;

/// In-memory `name=value` cookie store for session cookies issued by the API.
#[derive(Debug, Default)]
pub(crate) struct CookieJar {
    cookies: Mutex<BTreeMap<String, String>>,
}

impl CookieJar {
    pub(crate) fn store_from(&self, headers: &HeaderMap) {
        let mut cookies = lock_unpoisoned(&self.cookies);
        for value in headers.get_all(SET_COOKIE) {
            let Ok(text) = value.to_str() else {
                continue;
            };
            let mut attributes = text.split(';').map(str::trim);
            let Some((name, value)) = attributes.next().and_then(|pair| pair.split_once('=')) else {
                continue;
            };
            let name = name.trim();
            if name.is_empty() {
                continue;
            }
            let expired = attributes.any(|attribute| {
                attribute
                    .split_once('=')
                    .is_some_and(|(key, value)| {
                        key.trim().eq_ignore_ascii_case("max-age") && value.trim() == "0"
                    })
            });
            let value = value.trim().trim_matches('"');
            if expired || value.is_empty() {
                cookies.remove(name);
            } else {
                cookies.insert(name.to_owned(), value.to_owned());
            }
        }
    }

    pub(crate) fn header_value(&self) -> Option<HeaderValue> {
        let cookies = lock_unpoisoned(&self.cookies);
        if cookies.is_empty() {
            return None;
        }
        let joined = cookies
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect::<Vec<_>>()
            .join("; ");
        let mut value = HeaderValue::from_str(&joined).ok()?;
        value.set_sensitive(true);
        Some(value)
    }

    pub(crate) fn clear(&self) {
        lock_unpoisoned(&self.cookies).clear();
    }
}
