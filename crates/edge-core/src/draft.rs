//! Draft mode persistence.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::cookies::{Cookie, CookieStore};

/// Name of the cookie that carries the draft mode bypass token.
pub const PRERENDER_BYPASS_COOKIE: &str = "__prerender_bypass";

/// Capability interface over draft mode persistence.
pub trait DraftModeProvider: Send + Sync {
    /// Whether draft mode is enabled for this request.
    fn is_enabled(&self) -> bool;

    /// Enable draft mode for subsequent requests.
    fn enable(&self);

    /// Disable draft mode for subsequent requests.
    fn disable(&self);
}

/// Provider used when no draft mode persistence is available.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullDraftMode;

impl DraftModeProvider for NullDraftMode {
    fn is_enabled(&self) -> bool {
        false
    }

    fn enable(&self) {}

    fn disable(&self) {}
}

/// Draft mode backed by the `__prerender_bypass` cookie.
///
/// Draft mode is enabled when the incoming request carries a bypass cookie
/// whose value matches the preview id. `enable` and `disable` write the
/// cookie into the response cookie store.
pub struct PreviewDraftMode {
    preview_id: String,
    enabled: AtomicBool,
    response_cookies: Arc<dyn CookieStore>,
}

impl PreviewDraftMode {
    /// Create a provider for a request.
    pub fn new(
        preview_id: impl Into<String>,
        request_cookies: &dyn CookieStore,
        response_cookies: Arc<dyn CookieStore>,
    ) -> Self {
        let preview_id = preview_id.into();
        let enabled = request_cookies
            .get(PRERENDER_BYPASS_COOKIE)
            .is_some_and(|c| c.value == preview_id);

        Self {
            preview_id,
            enabled: AtomicBool::new(enabled),
            response_cookies,
        }
    }

    fn bypass_cookie(&self, value: &str) -> Cookie {
        Cookie::new(PRERENDER_BYPASS_COOKIE, value)
            .with_path("/")
            .http_only()
            .secure()
    }
}

impl DraftModeProvider for PreviewDraftMode {
    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    fn enable(&self) {
        // Response cookies are mutable whenever the caller may enable draft mode.
        let _ = self
            .response_cookies
            .set(self.bypass_cookie(&self.preview_id));
        self.enabled.store(true, Ordering::Release);
    }

    fn disable(&self) {
        let _ = self
            .response_cookies
            .set(self.bypass_cookie("").with_max_age(0));
        self.enabled.store(false, Ordering::Release);
    }
}

impl std::fmt::Debug for PreviewDraftMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreviewDraftMode")
            .field("enabled", &self.is_enabled())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cookies::MemoryCookies;

    #[test]
    fn test_enabled_when_bypass_cookie_matches() {
        let request = MemoryCookies::new().with_cookie(Cookie::new(PRERENDER_BYPASS_COOKIE, "p1"));
        let draft = PreviewDraftMode::new("p1", &request, Arc::new(MemoryCookies::new()));
        assert!(draft.is_enabled());

        let draft = PreviewDraftMode::new("other", &request, Arc::new(MemoryCookies::new()));
        assert!(!draft.is_enabled());
    }

    #[test]
    fn test_enable_writes_response_cookie() {
        let response = Arc::new(MemoryCookies::new());
        let draft = PreviewDraftMode::new("p1", &MemoryCookies::new(), response.clone());

        draft.enable();
        assert!(draft.is_enabled());
        assert_eq!(response.get(PRERENDER_BYPASS_COOKIE).unwrap().value, "p1");

        draft.disable();
        assert!(!draft.is_enabled());
        assert!(response.get(PRERENDER_BYPASS_COOKIE).unwrap().is_expired());
    }

    #[test]
    fn test_null_draft_mode_is_inert() {
        let draft = NullDraftMode;
        draft.enable();
        assert!(!draft.is_enabled());
    }
}
