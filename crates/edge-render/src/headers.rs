//! `headers()`: access to the request's headers.

use std::sync::Arc;

use edge_core::{HeaderStore, MemoryHeaders, StoreError};

use crate::coordinator::{AccessCoordinator, AccessScope};
use crate::error::{AccessResult, CacheScope};
use crate::guard::SyncAccessGuard;
use crate::handle::DynamicHandle;
use crate::memo::MemoKey;
use crate::unit::WorkUnit;

const API: &str = "headers";

/// Headers of the current request.
#[derive(Clone)]
pub struct RequestHeaders {
    store: Arc<dyn HeaderStore>,
}

impl RequestHeaders {
    pub fn new(store: Arc<dyn HeaderStore>) -> Self {
        Self { store }
    }

    /// Empty sealed headers.
    pub fn empty() -> Self {
        Self::new(Arc::new(MemoryHeaders::sealed()))
    }

    pub fn get(&self, name: &str) -> Option<String> {
        self.store.get(name)
    }

    pub fn get_set_cookie(&self) -> Vec<String> {
        self.store.get_set_cookie()
    }

    pub fn has(&self, name: &str) -> bool {
        self.store.has(name)
    }

    pub fn entries(&self) -> Vec<(String, String)> {
        self.store.entries()
    }

    pub fn keys(&self) -> Vec<String> {
        self.store.keys()
    }

    pub fn values(&self) -> Vec<String> {
        self.store.values()
    }

    pub fn set(&self, name: &str, value: &str) -> AccessResult<()> {
        Ok(self.store.set(name, value)?)
    }

    pub fn append(&self, name: &str, value: &str) -> AccessResult<()> {
        Ok(self.store.append(name, value)?)
    }

    pub fn delete(&self, name: &str) -> AccessResult<()> {
        Ok(self.store.delete(name)?)
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<dyn HeaderStore> {
        &self.store
    }
}

impl std::fmt::Debug for RequestHeaders {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestHeaders")
            .field("keys", &self.store.keys())
            .finish()
    }
}

/// Header store that reports unawaited access before delegating.
pub struct GuardedHeaders {
    inner: Arc<dyn HeaderStore>,
    guard: SyncAccessGuard,
}

impl GuardedHeaders {
    pub fn new(inner: Arc<dyn HeaderStore>, guard: SyncAccessGuard) -> Self {
        Self { inner, guard }
    }
}

impl HeaderStore for GuardedHeaders {
    fn get(&self, name: &str) -> Option<String> {
        self.guard.observe(&format!("headers().get('{name}')"));
        self.inner.get(name)
    }

    fn get_set_cookie(&self) -> Vec<String> {
        self.guard.observe("headers().getSetCookie()");
        self.inner.get_set_cookie()
    }

    fn has(&self, name: &str) -> bool {
        self.guard.observe(&format!("headers().has('{name}')"));
        self.inner.has(name)
    }

    fn entries(&self) -> Vec<(String, String)> {
        self.guard.observe("headers().entries()");
        self.inner.entries()
    }

    fn set(&self, name: &str, value: &str) -> Result<(), StoreError> {
        self.guard.observe("headers().set(...)");
        self.inner.set(name, value)
    }

    fn append(&self, name: &str, value: &str) -> Result<(), StoreError> {
        self.guard.observe("headers().append(...)");
        self.inner.append(name, value)
    }

    fn delete(&self, name: &str) -> Result<(), StoreError> {
        self.guard.observe(&format!("headers().delete('{name}')"));
        self.inner.delete(name)
    }

    fn keys(&self) -> Vec<String> {
        self.guard.observe("headers().keys()");
        self.inner.keys()
    }

    fn values(&self) -> Vec<String> {
        self.guard.observe("headers().values()");
        self.inner.values()
    }
}

/// Handle returned by [`AccessCoordinator::fetch_headers`].
pub type HeadersHandle = DynamicHandle<RequestHeaders>;

impl HeadersHandle {
    pub fn get(&self, name: &str) -> AccessResult<Option<String>> {
        Ok(self.surface(|| format!("headers().get('{name}')"))?.get(name))
    }

    pub fn get_set_cookie(&self) -> AccessResult<Vec<String>> {
        Ok(self
            .surface(|| "headers().getSetCookie()".to_string())?
            .get_set_cookie())
    }

    pub fn has(&self, name: &str) -> AccessResult<bool> {
        Ok(self.surface(|| format!("headers().has('{name}')"))?.has(name))
    }

    pub fn entries(&self) -> AccessResult<Vec<(String, String)>> {
        Ok(self.surface(|| "headers().entries()".to_string())?.entries())
    }

    pub fn keys(&self) -> AccessResult<Vec<String>> {
        Ok(self.surface(|| "headers().keys()".to_string())?.keys())
    }

    pub fn values(&self) -> AccessResult<Vec<String>> {
        Ok(self.surface(|| "headers().values()".to_string())?.values())
    }

    pub fn set(&self, name: &str, value: &str) -> AccessResult<()> {
        self.surface(|| "headers().set(...)".to_string())?
            .set(name, value)
    }

    pub fn append(&self, name: &str, value: &str) -> AccessResult<()> {
        self.surface(|| "headers().append(...)".to_string())?
            .append(name, value)
    }

    pub fn delete(&self, name: &str) -> AccessResult<()> {
        self.surface(|| format!("headers().delete('{name}')"))?
            .delete(name)
    }
}

impl AccessCoordinator {
    /// Access the request's headers.
    pub fn fetch_headers(&self, scope: &AccessScope) -> AccessResult<HeadersHandle> {
        let (work, unit) = scope.require(API)?;

        if work.force_static() {
            return Ok(HeadersHandle::resolved(API, RequestHeaders::empty()));
        }

        match unit.unit() {
            WorkUnit::Cache(_) => Err(self.invalid_read(work, API, CacheScope::UseCache)),
            WorkUnit::UnstableCache => Err(self.invalid_read(work, API, CacheScope::UnstableCache)),
            _ if work.dynamic_should_error() => Err(self.static_bailout(work, API)),
            WorkUnit::Prerender(prerender) | WorkUnit::PrerenderRuntime(prerender) => Ok(unit
                .handles()
                .headers
                .get_or_create(MemoKey::Unit, || self.hanging(work, prerender, API))),
            WorkUnit::PrerenderClient(_) => Err(self.client_invariant(API)),
            WorkUnit::PrerenderPpr(ppr) => Err(self.postpone(work, ppr, API)),
            WorkUnit::PrerenderLegacy(legacy) => Err(self.legacy_bailout(work, legacy, API)),
            WorkUnit::Request(request) => {
                request.mark_dynamic();
                let source = request.headers();
                Ok(unit
                    .handles()
                    .headers
                    .get_or_create(MemoKey::source(source), || {
                        let value = RequestHeaders::new(source.clone());
                        if !self.guards_sync_access(work) {
                            return HeadersHandle::resolved(API, value);
                        }
                        let guard = self.sync_access_guard(work, request, API);
                        let surface =
                            RequestHeaders::new(Arc::new(GuardedHeaders::new(source.clone(), guard.clone())));
                        HeadersHandle::guarded(API, value, surface, guard)
                    }))
            }
            WorkUnit::PrivateCache(private) => {
                let source = private.headers();
                Ok(unit
                    .handles()
                    .headers
                    .get_or_create(MemoKey::source(source), || {
                        HeadersHandle::resolved(API, RequestHeaders::new(source.clone()))
                    }))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AccessError;
    use crate::guard::{CollectingSink, SyncAccessDiagnostics};
    use crate::signal::RenderSignal;
    use crate::unit::{CacheUnit, PrerenderUnit, RequestUnit, WorkUnitContext};
    use crate::work::WorkContext;
    use edge_core::{MemoryCookies, RenderConfig};
    use futures::executor::block_on;
    use futures::FutureExt;

    fn request_scope(route: &str) -> AccessScope {
        let headers = MemoryHeaders::from_pairs([("accept", "text/html"), ("x-trace", "t1")]).unwrap();
        let unit = RequestUnit::new(
            Arc::new(MemoryCookies::readonly()),
            Arc::new(MemoryCookies::new()),
            Arc::new(headers),
        );
        AccessScope::new(
            Arc::new(WorkContext::new(route)),
            Arc::new(WorkUnitContext::new(WorkUnit::Request(unit))),
        )
    }

    #[test]
    fn test_cache_scope_rethrows_same_error() {
        let coordinator = AccessCoordinator::default();
        let scope = AccessScope::new(
            Arc::new(WorkContext::new("/products")),
            Arc::new(WorkUnitContext::new(WorkUnit::Cache(CacheUnit::new()))),
        );

        let first = coordinator.fetch_headers(&scope).unwrap_err();
        let latched = scope.work().unwrap().invalid_dynamic_usage_error().unwrap();
        let second = coordinator.fetch_headers(&scope).unwrap_err();

        assert!(Arc::ptr_eq(first.invalid_dynamic_usage().unwrap(), &latched));
        assert!(Arc::ptr_eq(second.invalid_dynamic_usage().unwrap(), &latched));
        assert!(latched
            .to_string()
            .starts_with("Route /products used \"headers\" inside \"use cache\"."));
    }

    #[test]
    fn test_cache_scope_checked_before_static_error() {
        let coordinator = AccessCoordinator::default();
        let work = WorkContext::new("/products").with_dynamic_should_error(true);
        let cache = AccessScope::new(
            Arc::new(work),
            Arc::new(WorkUnitContext::new(WorkUnit::Cache(CacheUnit::new()))),
        );
        let err = coordinator.fetch_headers(&cache).unwrap_err();
        assert_eq!(err.kind(), "invalid-dynamic-usage");

        let request = AccessScope::new(
            Arc::new(WorkContext::new("/products").with_dynamic_should_error(true)),
            request_scope("/products").unit().unwrap().clone(),
        );
        let err = coordinator.fetch_headers(&request).unwrap_err();
        assert_eq!(err.kind(), "static-bailout");
    }

    #[test]
    fn test_latch_is_shared_across_resources() {
        let coordinator = AccessCoordinator::default();
        let scope = AccessScope::new(
            Arc::new(WorkContext::new("/")),
            Arc::new(WorkUnitContext::new(WorkUnit::Cache(CacheUnit::new()))),
        );

        let headers = coordinator.fetch_headers(&scope).unwrap_err();
        let cookies = coordinator.fetch_cookies(&scope).unwrap_err();
        let cookies = cookies.invalid_dynamic_usage().unwrap();
        assert!(Arc::ptr_eq(headers.invalid_dynamic_usage().unwrap(), cookies));
        assert_eq!(cookies.expression(), "headers");
    }

    #[test]
    fn test_request_headers_resolve() {
        let coordinator = AccessCoordinator::default();
        let scope = request_scope("/");
        let handle = coordinator.fetch_headers(&scope).unwrap();
        assert!(DynamicHandle::ptr_eq(&handle, &coordinator.fetch_headers(&scope).unwrap()));

        let headers = block_on(async { (&handle).await }).unwrap();
        assert_eq!(headers.get("Accept").as_deref(), Some("text/html"));
        assert!(matches!(
            headers.set("x-new", "1"),
            Err(AccessError::Store(StoreError::ReadonlyHeaders))
        ));
    }

    #[test]
    fn test_registries_are_isolated_per_kind() {
        let coordinator = AccessCoordinator::default();
        let scope = request_scope("/");
        coordinator.fetch_headers(&scope).unwrap();
        coordinator.fetch_cookies(&scope).unwrap();

        let handles = scope.unit().unwrap().handles();
        assert_eq!(handles.headers.len(), 1);
        assert_eq!(handles.cookies.len(), 1);
        assert_eq!(handles.len(), 2);
    }

    #[test]
    fn test_guarded_headers_report_each_callsite_once() {
        let sink = Arc::new(CollectingSink::new());
        let coordinator = AccessCoordinator::builder(RenderConfig::development())
            .with_diagnostic_sink(sink.clone())
            .build();
        let scope = request_scope("/docs");
        let handle = coordinator.fetch_headers(&scope).unwrap();

        assert_eq!(handle.keys().unwrap(), vec!["accept", "x-trace"]);
        handle.keys().unwrap();
        assert!(handle.has("x-trace").unwrap());

        let expressions: Vec<_> = sink
            .diagnostics()
            .into_iter()
            .map(|d| d.expression)
            .collect();
        assert_eq!(expressions, vec!["headers().keys()", "headers().has('x-trace')"]);
    }

    #[test]
    fn test_runtime_prerender_hangs() {
        let coordinator = AccessCoordinator::default();
        let scope = AccessScope::new(
            Arc::new(WorkContext::new("/")),
            Arc::new(WorkUnitContext::new(WorkUnit::PrerenderRuntime(PrerenderUnit::new(
                RenderSignal::new(),
            )))),
        );
        let handle = coordinator.fetch_headers(&scope).unwrap();
        assert!(handle.resolve().now_or_never().is_none());
        assert_eq!(handle.hanging_handle().unwrap().expression(), "`headers()`");
    }
}
