//! Session cookie jar for environments without a native cookie store.
//!
//! Only the `name=value` pair of each `Set-Cookie` header is kept.
//! Attributes (path, expiry, flags) are ignored: the jar lives exactly as
//! long as the transport and every cookie goes to the one configured peer.

use std::collections::BTreeMap;

use parking_lot::Mutex;
use reqwest::header::{HeaderMap, HeaderValue, SET_COOKIE};

/// Mapping from cookie name to value. Thread-safe.
#[derive(Debug, Default)]
pub struct SessionCookieJar {
    cookies: Mutex<BTreeMap<String, String>>,
}

impl SessionCookieJar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store every cookie set by a response. Returns how many were stored.
    pub fn store_from_headers(&self, headers: &HeaderMap) -> usize {
        let parsed: Vec<(String, String)> = headers
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .filter_map(parse_set_cookie)
            .collect();

        let count = parsed.len();
        if count > 0 {
            let mut cookies = self.cookies.lock();
            for (name, value) in parsed {
                tracing::debug!(cookie = %name, "storing session cookie");
                cookies.insert(name, value);
            }
        }
        count
    }

    pub fn insert(&self, name: impl Into<String>, value: impl Into<String>) {
        self.cookies.lock().insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<String> {
        self.cookies.lock().get(name).cloned()
    }

    /// The `Cookie` request header for the current contents, if any.
    pub fn header_value(&self) -> Option<HeaderValue> {
        let cookies = self.cookies.lock();
        if cookies.is_empty() {
            return None;
        }
        let joined = cookies
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect::<Vec<_>>()
            .join("; ");
        HeaderValue::from_str(&joined).ok()
    }

    pub fn len(&self) -> usize {
        self.cookies.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.cookies.lock().is_empty()
    }
}

/// Extract `(name, value)` from one `Set-Cookie` header value.
fn parse_set_cookie(raw: &str) -> Option<(String, String)> {
    let pair = raw.split(';').next()?;
    let (name, value) = pair.split_once('=')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    Some((name.to_string(), value.trim().to_string()))
}
