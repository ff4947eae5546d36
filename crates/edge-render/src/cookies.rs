//! `cookies()`: access to the request's cookies.

use std::sync::Arc;

use edge_core::{Cookie, CookieStore, MemoryCookies, StoreError};

use crate::coordinator::{AccessCoordinator, AccessScope};
use crate::error::{AccessResult, CacheScope};
use crate::guard::SyncAccessGuard;
use crate::handle::DynamicHandle;
use crate::memo::MemoKey;
use crate::unit::WorkUnit;

const API: &str = "cookies";

/// Cookies of the current request.
#[derive(Clone)]
pub struct RequestCookies {
    store: Arc<dyn CookieStore>,
}

impl RequestCookies {
    pub fn new(store: Arc<dyn CookieStore>) -> Self {
        Self { store }
    }

    /// Empty readonly cookies.
    pub fn empty() -> Self {
        Self::new(Arc::new(MemoryCookies::readonly()))
    }

    pub fn get(&self, name: &str) -> Option<Cookie> {
        self.store.get(name)
    }

    pub fn get_all(&self) -> Vec<Cookie> {
        self.store.get_all()
    }

    pub fn has(&self, name: &str) -> bool {
        self.store.has(name)
    }

    pub fn size(&self) -> usize {
        self.store.size()
    }

    pub fn set(&self, cookie: Cookie) -> AccessResult<()> {
        Ok(self.store.set(cookie)?)
    }

    pub fn delete(&self, name: &str) -> AccessResult<()> {
        Ok(self.store.delete(name)?)
    }

    pub fn clear(&self) -> AccessResult<()> {
        Ok(self.store.clear()?)
    }

    /// Serialize as a `Cookie` header value.
    pub fn serialize(&self) -> String {
        self.store.serialize()
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<dyn CookieStore> {
        &self.store
    }
}

impl std::fmt::Debug for RequestCookies {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestCookies")
            .field("size", &self.store.size())
            .finish()
    }
}

/// Cookie store that reports unawaited access before delegating.
pub struct GuardedCookies {
    inner: Arc<dyn CookieStore>,
    guard: SyncAccessGuard,
}

impl GuardedCookies {
    pub fn new(inner: Arc<dyn CookieStore>, guard: SyncAccessGuard) -> Self {
        Self { inner, guard }
    }
}

impl CookieStore for GuardedCookies {
    fn get(&self, name: &str) -> Option<Cookie> {
        self.guard.observe(&format!("cookies().get('{name}')"));
        self.inner.get(name)
    }

    fn get_all(&self) -> Vec<Cookie> {
        self.guard.observe("cookies().getAll()");
        self.inner.get_all()
    }

    fn has(&self, name: &str) -> bool {
        self.guard.observe(&format!("cookies().has('{name}')"));
        self.inner.has(name)
    }

    fn size(&self) -> usize {
        self.guard.observe("cookies().size");
        self.inner.size()
    }

    fn set(&self, cookie: Cookie) -> Result<(), StoreError> {
        self.guard.observe("cookies().set(...)");
        self.inner.set(cookie)
    }

    fn delete(&self, name: &str) -> Result<(), StoreError> {
        self.guard.observe(&format!("cookies().delete('{name}')"));
        self.inner.delete(name)
    }

    fn clear(&self) -> Result<(), StoreError> {
        self.guard.observe("cookies().clear()");
        self.inner.clear()
    }

    fn serialize(&self) -> String {
        self.guard.observe("cookies().toString()");
        self.inner.serialize()
    }
}

/// Handle returned by [`AccessCoordinator::fetch_cookies`].
pub type CookiesHandle = DynamicHandle<RequestCookies>;

/// Direct calls on an unawaited handle.
impl CookiesHandle {
    pub fn get(&self, name: &str) -> AccessResult<Option<Cookie>> {
        Ok(self.surface(|| format!("cookies().get('{name}')"))?.get(name))
    }

    pub fn get_all(&self) -> AccessResult<Vec<Cookie>> {
        Ok(self.surface(|| "cookies().getAll()".to_string())?.get_all())
    }

    pub fn has(&self, name: &str) -> AccessResult<bool> {
        Ok(self.surface(|| format!("cookies().has('{name}')"))?.has(name))
    }

    pub fn size(&self) -> AccessResult<usize> {
        Ok(self.surface(|| "cookies().size".to_string())?.size())
    }

    pub fn set(&self, cookie: Cookie) -> AccessResult<()> {
        self.surface(|| "cookies().set(...)".to_string())?.set(cookie)
    }

    pub fn delete(&self, name: &str) -> AccessResult<()> {
        self.surface(|| format!("cookies().delete('{name}')"))?
            .delete(name)
    }

    pub fn clear(&self) -> AccessResult<()> {
        self.surface(|| "cookies().clear()".to_string())?.clear()
    }

    pub fn serialize(&self) -> AccessResult<String> {
        Ok(self.surface(|| "cookies().toString()".to_string())?.serialize())
    }
}

impl AccessCoordinator {
    /// Access the request's cookies.
    pub fn fetch_cookies(&self, scope: &AccessScope) -> AccessResult<CookiesHandle> {
        let (work, unit) = scope.require(API)?;

        if work.force_static() {
            return Ok(CookiesHandle::resolved(API, RequestCookies::empty()));
        }

        match unit.unit() {
            WorkUnit::Cache(_) => Err(self.invalid_read(work, API, CacheScope::UseCache)),
            WorkUnit::UnstableCache => Err(self.invalid_read(work, API, CacheScope::UnstableCache)),
            _ if work.dynamic_should_error() => Err(self.static_bailout(work, API)),
            WorkUnit::Prerender(prerender) | WorkUnit::PrerenderRuntime(prerender) => Ok(unit
                .handles()
                .cookies
                .get_or_create(MemoKey::Unit, || self.hanging(work, prerender, API))),
            WorkUnit::PrerenderClient(_) => Err(self.client_invariant(API)),
            WorkUnit::PrerenderPpr(ppr) => Err(self.postpone(work, ppr, API)),
            WorkUnit::PrerenderLegacy(legacy) => Err(self.legacy_bailout(work, legacy, API)),
            WorkUnit::Request(request) => {
                request.mark_dynamic();
                let source = request.cookies();
                Ok(unit
                    .handles()
                    .cookies
                    .get_or_create(MemoKey::source(source), || {
                        let value = RequestCookies::new(source.clone());
                        if !self.guards_sync_access(work) {
                            return CookiesHandle::resolved(API, value);
                        }
                        let guard = self.sync_access_guard(work, request, API);
                        let surface =
                            RequestCookies::new(Arc::new(GuardedCookies::new(source.clone(), guard.clone())));
                        CookiesHandle::guarded(API, value, surface, guard)
                    }))
            }
            WorkUnit::PrivateCache(private) => {
                let source = private.cookies();
                Ok(unit
                    .handles()
                    .cookies
                    .get_or_create(MemoKey::source(source), || {
                        CookiesHandle::resolved(API, RequestCookies::new(source.clone()))
                    }))
            }
        }
    }
}
