//! Request context holding the raw request resources.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use http::header::{HeaderMap, COOKIE};

use crate::cookies::{CookieStore, MemoryCookies};
use crate::draft::{DraftModeProvider, PreviewDraftMode};
use crate::headers::{HeaderStore, MemoryHeaders};

/// Unique request identifier for tracing.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestId(pub String);

impl RequestId {
    /// Generate a new request ID.
    pub fn generate() -> Self {
        static COUNTER: AtomicU32 = AtomicU32::new(0);

        let id = format!(
            "{:x}-{:x}-{:x}",
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_nanos(),
            std::process::id(),
            COUNTER.fetch_add(1, Ordering::Relaxed)
        );
        Self(id)
    }

    /// Create from an existing ID string.
    pub fn from_string(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// HTTP method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
    Patch,
    Head,
    Options,
}

/// Raw resources of an incoming request.
///
/// The orchestrator builds a `request` work unit from these. `cookies` is
/// the readonly view parsed from the `cookie` header; `response_cookies`
/// is the mutable overlay written by actions and draft mode.
pub struct RequestContext {
    /// Unique request identifier.
    pub request_id: RequestId,
    /// HTTP method.
    pub method: Method,
    /// Request path.
    pub path: String,
    /// Sealed request headers.
    pub headers: Arc<dyn HeaderStore>,
    /// Readonly request cookies.
    pub cookies: Arc<dyn CookieStore>,
    /// Mutable response cookies.
    pub response_cookies: Arc<dyn CookieStore>,
    /// Draft mode persistence, if configured.
    pub draft_mode: Option<Arc<dyn DraftModeProvider>>,
}

impl RequestContext {
    /// Create a request with no headers or cookies.
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self::from_header_map(method, path, HeaderMap::new())
    }

    /// Create a request from its headers, parsing the `cookie` header.
    pub fn from_header_map(method: Method, path: impl Into<String>, headers: HeaderMap) -> Self {
        let cookie_header = headers
            .get_all(COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .collect::<Vec<_>>()
            .join("; ");

        Self {
            request_id: RequestId::generate(),
            method,
            path: path.into(),
            headers: Arc::new(MemoryHeaders::from_map(headers)),
            cookies: Arc::new(MemoryCookies::from_header(&cookie_header)),
            response_cookies: Arc::new(MemoryCookies::new()),
            draft_mode: None,
        }
    }

    /// Enable draft mode persistence keyed by a preview id.
    pub fn with_preview_id(mut self, preview_id: impl Into<String>) -> Self {
        let provider = PreviewDraftMode::new(
            preview_id,
            self.cookies.as_ref(),
            self.response_cookies.clone(),
        );
        self.draft_mode = Some(Arc::new(provider));
        self
    }

    /// Get a header value by name (case-insensitive).
    pub fn header(&self, name: &str) -> Option<String> {
        self.headers.get(name)
    }
}

impl std::fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestContext")
            .field("request_id", &self.request_id)
            .field("method", &self.method)
            .field("path", &self.path)
            .field("draft_mode", &self.draft_mode.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::draft::PRERENDER_BYPASS_COOKIE;
    use http::HeaderValue;

    fn request_headers() -> HeaderMap {
        let mut map = HeaderMap::new();
        map.insert("accept", HeaderValue::from_static("text/html"));
        map.insert(
            COOKIE,
            HeaderValue::from_static("theme=dark; __prerender_bypass=p1"),
        );
        map
    }

    #[test]
    fn test_cookies_parsed_from_header() {
        let request = RequestContext::from_header_map(Method::Get, "/", request_headers());
        assert_eq!(request.cookies.get("theme").unwrap().value, "dark");
        assert_eq!(request.header("Accept").as_deref(), Some("text/html"));
    }

    #[test]
    fn test_preview_id_enables_draft_mode() {
        let request =
            RequestContext::from_header_map(Method::Get, "/", request_headers()).with_preview_id("p1");
        assert!(request.draft_mode.as_ref().unwrap().is_enabled());
        assert!(request.cookies.has(PRERENDER_BYPASS_COOKIE));
    }

    #[test]
    fn test_request_id_unique() {
        assert_ne!(RequestId::generate(), RequestId::generate());
    }
}
