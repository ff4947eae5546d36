//! Deferred handles for dry-run prerenders.
//!
//! A deferred handle models "this prerender has not proven it needs dynamic
//! data". It never settles while the owning work unit's render signal is
//! inactive, and rejects once the signal fires, naming the route and the
//! expression that produced it.

use std::future::Future;
use std::sync::Arc;

use crate::error::AccessError;
use crate::signal::{RenderSignal, SignalListener};

/// A pending value tied to a render signal.
///
/// Holds only the signal, never the work unit, so storing the handle in the
/// unit's arena does not keep the unit alive.
#[derive(Debug, Clone)]
pub struct HangingHandle {
    signal: RenderSignal,
    route: Arc<str>,
    expression: Arc<str>,
}

/// Build a deferred handle for `expression` on `route`.
pub fn make_hanging(signal: &RenderSignal, route: &str, expression: &str) -> HangingHandle {
    HangingHandle {
        signal: signal.clone(),
        route: Arc::from(route),
        expression: Arc::from(expression),
    }
}

impl HangingHandle {
    /// Route the handle was created for.
    pub fn route(&self) -> &str {
        &self.route
    }

    /// Expression that produced the handle.
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// Whether the owning render signal has fired.
    pub fn is_settled(&self) -> bool {
        self.signal.is_aborted()
    }

    /// The rejection delivered once the signal fires.
    pub fn rejection(&self) -> AccessError {
        AccessError::HangingPromiseRejection {
            route: self.route.to_string(),
            expression: self.expression.to_string(),
        }
    }

    /// Listen for the owning render signal.
    pub fn listen(&self) -> SignalListener {
        self.signal.listen()
    }

    /// Wait for the rejection.
    pub fn rejected(&self) -> impl Future<Output = AccessError> + '_ {
        let mut listener = self.listen();
        futures::future::poll_fn(move |cx| listener.poll_fired(cx).map(|()| self.rejection()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor::block_on;
    use futures::FutureExt;

    #[test]
    fn test_pending_while_signal_inactive() {
        let signal = RenderSignal::new();
        let handle = make_hanging(&signal, "/blog/[slug]", "`cookies()`");

        assert!(handle.rejected().now_or_never().is_none());
        assert!(handle.rejected().now_or_never().is_none());
        assert!(!handle.is_settled());
    }

    #[test]
    fn test_rejects_after_signal_fires() {
        let signal = RenderSignal::new();
        let handle = make_hanging(&signal, "/blog/[slug]", "`cookies()`");
        signal.abort();

        match block_on(handle.rejected()) {
            AccessError::HangingPromiseRejection { route, expression } => {
                assert_eq!(route, "/blog/[slug]");
                assert_eq!(expression, "`cookies()`");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_wakes_waiting_task_on_abort() {
        let signal = RenderSignal::new();
        let handle = make_hanging(&signal, "/", "`headers()`");

        let waiter = std::thread::spawn({
            let handle = handle.clone();
            move || block_on(handle.rejected())
        });

        while signal.waiters() == 0 {
            std::thread::yield_now();
        }
        signal.abort();

        let err = waiter.join().unwrap();
        assert!(err.to_string().contains("This occurred at route \"/\""));
    }

    #[test]
    fn test_dropped_wait_releases_listener() {
        let signal = RenderSignal::new();
        let handle = make_hanging(&signal, "/", "`cookies()`");

        for _ in 0..10 {
            assert!(handle.rejected().now_or_never().is_none());
        }
        assert_eq!(signal.waiters(), 0);
    }

    #[test]
    fn test_message_embeds_route_and_expression() {
        let handle = make_hanging(&RenderSignal::new(), "/shop", "`headers()`");
        let message = handle.rejection().to_string();
        assert!(message.starts_with("During prerendering, `headers()` rejects"));
        assert!(message.ends_with("This occurred at route \"/shop\"."));
    }
}
