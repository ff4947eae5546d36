//! Handles returned by the entry points.
//!
//! A handle is either resolved, holding the resource, or deferred, pending
//! on a dry-run render signal. Handles are shared: clones point at the same
//! allocation, which is what memoization identity is checked against.

use std::fmt;
use std::future::{Future, IntoFuture};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use crate::deferred::HangingHandle;
use crate::error::{AccessError, AccessResult};
use crate::guard::SyncAccessGuard;
use crate::signal::SignalListener;

enum HandleState<R> {
    Resolved {
        /// Handed to callers that await the handle.
        value: R,
        /// Used for calls made on the handle itself, possibly guarded.
        surface: R,
    },
    Hanging(HangingHandle),
}

struct HandleInner<R> {
    api: &'static str,
    state: HandleState<R>,
    guard: Option<SyncAccessGuard>,
}

/// A possibly-pending request resource.
///
/// Await it (by reference) to get the resource. Calling resource methods
/// on the handle directly is supported for migration, but is diagnosed in
/// development and fails while the handle is still deferred.
pub struct DynamicHandle<R> {
    inner: Arc<HandleInner<R>>,
}

impl<R: Clone> DynamicHandle<R> {
    /// A handle over a resource, unguarded.
    pub(crate) fn resolved(api: &'static str, value: R) -> Self {
        Self::from_state(
            api,
            HandleState::Resolved {
                surface: value.clone(),
                value,
            },
            None,
        )
    }
}

impl<R> DynamicHandle<R> {
    /// A handle whose direct calls go through `surface`, observed by `guard`.
    pub(crate) fn guarded(api: &'static str, value: R, surface: R, guard: SyncAccessGuard) -> Self {
        Self::from_state(api, HandleState::Resolved { value, surface }, Some(guard))
    }

    /// A handle pending on a dry-run render signal.
    pub(crate) fn hanging(api: &'static str, hanging: HangingHandle) -> Self {
        Self::from_state(api, HandleState::Hanging(hanging), None)
    }

    fn from_state(api: &'static str, state: HandleState<R>, guard: Option<SyncAccessGuard>) -> Self {
        Self {
            inner: Arc::new(HandleInner { api, state, guard }),
        }
    }

    /// Whether two handles are the same handle.
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Arc::ptr_eq(&a.inner, &b.inner)
    }

    /// API that produced the handle (`cookies`, `headers`, `draftMode`).
    pub fn api(&self) -> &'static str {
        self.inner.api
    }

    /// Whether the resource is available.
    pub fn is_resolved(&self) -> bool {
        matches!(self.inner.state, HandleState::Resolved { .. })
    }

    /// Whether direct calls are observed by a sync-access guard.
    pub fn is_guarded(&self) -> bool {
        self.inner.guard.is_some()
    }

    /// The deferred handle, when still pending on a render signal.
    pub fn hanging_handle(&self) -> Option<&HangingHandle> {
        match &self.inner.state {
            HandleState::Hanging(hanging) => Some(hanging),
            HandleState::Resolved { .. } => None,
        }
    }

    /// Resource used by direct calls on the handle.
    ///
    /// `expression` names the call and is only built when reporting a
    /// deferred handle.
    pub(crate) fn surface(&self, expression: impl FnOnce() -> String) -> AccessResult<&R> {
        match &self.inner.state {
            HandleState::Resolved { surface, .. } => Ok(surface),
            HandleState::Hanging(hanging) => Err(AccessError::SyncAccessUnavailable {
                route: hanging.route().to_string(),
                expression: expression(),
                api: self.inner.api,
            }),
        }
    }

    /// Wait for the resource.
    pub fn resolve(&self) -> Resolve<'_, R> {
        Resolve {
            handle: self,
            listener: None,
        }
    }
}

impl<R> Clone for DynamicHandle<R> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<R> fmt::Debug for DynamicHandle<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &self.inner.state {
            HandleState::Resolved { .. } => "resolved",
            HandleState::Hanging(_) => "hanging",
        };
        f.debug_struct("DynamicHandle")
            .field("api", &self.inner.api)
            .field("state", &state)
            .field("guarded", &self.is_guarded())
            .finish()
    }
}

/// Future returned by [`DynamicHandle::resolve`].
pub struct Resolve<'a, R> {
    handle: &'a DynamicHandle<R>,
    listener: Option<SignalListener>,
}

impl<R: Clone> Future for Resolve<'_, R> {
    type Output = AccessResult<R>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let inner = &this.handle.inner;
        if let Some(guard) = &inner.guard {
            guard.mark_awaited();
        }

        match &inner.state {
            HandleState::Resolved { value, .. } => Poll::Ready(Ok(value.clone())),
            HandleState::Hanging(hanging) => this
                .listener
                .get_or_insert_with(|| hanging.listen())
                .poll_fired(cx)
                .map(|()| Err(hanging.rejection())),
        }
    }
}

impl<'a, R: Clone> IntoFuture for &'a DynamicHandle<R> {
    type Output = AccessResult<R>;
    type IntoFuture = Resolve<'a, R>;

    fn into_future(self) -> Self::IntoFuture {
        self.resolve()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deferred::make_hanging;
    use crate::guard::{CollectingSink, SyncAccessDiagnostics};
    use crate::signal::RenderSignal;
    use futures::executor::block_on;
    use futures::FutureExt;

    #[test]
    fn test_resolved_handle_yields_value() {
        let handle = DynamicHandle::resolved("headers", 7u32);
        assert!(handle.is_resolved());
        assert_eq!(block_on(async { (&handle).await }).unwrap(), 7);
        assert_eq!(*handle.surface(|| unreachable!()).unwrap(), 7);
    }

    #[test]
    fn test_clones_share_identity() {
        let handle = DynamicHandle::resolved("cookies", ());
        let clone = handle.clone();
        assert!(DynamicHandle::ptr_eq(&handle, &clone));
        assert!(!DynamicHandle::ptr_eq(&handle, &DynamicHandle::resolved("cookies", ())));
    }

    #[test]
    fn test_hanging_handle_pending_then_rejects() {
        let signal = RenderSignal::new();
        let handle: DynamicHandle<u32> =
            DynamicHandle::hanging("cookies", make_hanging(&signal, "/p", "`cookies()`"));

        assert!(handle.resolve().now_or_never().is_none());
        assert_eq!(signal.waiters(), 0);
        let err = handle.surface(|| "cookies().size".to_string()).unwrap_err();
        assert_eq!(err.kind(), "sync-access-unavailable");

        signal.abort();
        let err = block_on(handle.resolve()).unwrap_err();
        assert_eq!(err.kind(), "hanging-promise-rejection");
    }

    #[test]
    fn test_awaiting_marks_guard() {
        let sink = Arc::new(CollectingSink::new());
        let guard = SyncAccessGuard::new(
            Some("/"),
            "cookies",
            Arc::new(SyncAccessDiagnostics::new(sink)),
            None,
        );
        let handle = DynamicHandle::guarded("cookies", 1u8, 1u8, guard.clone());
        assert!(handle.is_guarded());
        assert!(!guard.is_awaited());

        block_on(handle.resolve()).unwrap();
        assert!(guard.is_awaited());
    }
}
