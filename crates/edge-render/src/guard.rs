//! Sync-access guard.
//!
//! In development, handles returned for a live request are wrapped so that
//! using their value before awaiting them is reported. Reports are
//! deduplicated per `(route, expression)` for the life of the process. While
//! the request is inside a development dry run, the first unawaited access
//! also ends the dry run so the route is rendered dynamically.
//!
//! The guard only observes. Every call is delegated to the underlying
//! resource and returns what it returns.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use edge_observability::{CallsiteDedup, StructuredLogger};

use crate::unit::PrerenderPhase;

/// Message for a value used before its handle was awaited.
pub fn sync_access_message(route: Option<&str>, expression: &str, api: &str) -> String {
    let prefix = match route {
        Some(route) => format!("Route \"{route}\" "),
        None => "This route ".to_string(),
    };
    format!("{prefix}used `{expression}`. `{api}()` should be awaited before using its value.")
}

/// One reported sync access.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncAccessDiagnostic {
    pub route: Option<String>,
    pub expression: String,
    pub api: &'static str,
    /// Whether this access ended a development dry run.
    pub escalated: bool,
    pub message: String,
}

/// Destination for sync-access diagnostics.
pub trait DiagnosticSink: Send + Sync {
    fn report(&self, diagnostic: &SyncAccessDiagnostic);
}

/// Reports through `tracing` at warn level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn report(&self, diagnostic: &SyncAccessDiagnostic) {
        tracing::warn!(
            route = diagnostic.route.as_deref().unwrap_or(""),
            expression = %diagnostic.expression,
            api = diagnostic.api,
            escalated = diagnostic.escalated,
            "{}",
            diagnostic.message
        );
    }
}

/// Reports through a [`StructuredLogger`].
#[derive(Debug, Clone)]
pub struct LoggerSink {
    logger: StructuredLogger,
}

impl LoggerSink {
    pub fn new(logger: StructuredLogger) -> Self {
        Self { logger }
    }
}

impl DiagnosticSink for LoggerSink {
    fn report(&self, diagnostic: &SyncAccessDiagnostic) {
        self.logger
            .warn_builder(diagnostic.message.clone())
            .field("expression", diagnostic.expression.clone())
            .field("api", diagnostic.api)
            .field_bool("escalated", diagnostic.escalated)
            .emit();
    }
}

/// Keeps every reported diagnostic in memory.
#[derive(Debug, Default)]
pub struct CollectingSink {
    reported: Mutex<Vec<SyncAccessDiagnostic>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the reported diagnostics, in order.
    pub fn diagnostics(&self) -> Vec<SyncAccessDiagnostic> {
        self.reported
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl DiagnosticSink for CollectingSink {
    fn report(&self, diagnostic: &SyncAccessDiagnostic) {
        self.reported
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(diagnostic.clone());
    }
}

/// Process-wide dedup set plus the sink reports go to.
pub struct SyncAccessDiagnostics {
    dedup: CallsiteDedup,
    sink: Arc<dyn DiagnosticSink>,
}

impl SyncAccessDiagnostics {
    pub fn new(sink: Arc<dyn DiagnosticSink>) -> Self {
        Self {
            dedup: CallsiteDedup::new(),
            sink,
        }
    }

    /// Report a sync access. Returns `true` if the diagnostic was emitted.
    pub fn report(
        &self,
        route: Option<&str>,
        expression: &str,
        api: &'static str,
        escalated: bool,
    ) -> bool {
        if !self.dedup.first_seen(route, expression) {
            return false;
        }

        self.sink.report(&SyncAccessDiagnostic {
            route: route.map(String::from),
            expression: expression.to_string(),
            api,
            escalated,
            message: sync_access_message(route, expression, api),
        });
        true
    }

    /// Number of distinct callsites reported so far.
    pub fn reported(&self) -> usize {
        self.dedup.len()
    }
}

impl Default for SyncAccessDiagnostics {
    fn default() -> Self {
        Self::new(Arc::new(TracingSink))
    }
}

/// Observer attached to one guarded handle.
#[derive(Clone)]
pub struct SyncAccessGuard {
    route: Option<Arc<str>>,
    api: &'static str,
    diagnostics: Arc<SyncAccessDiagnostics>,
    escalation: Option<PrerenderPhase>,
    awaited: Arc<AtomicBool>,
}

impl SyncAccessGuard {
    pub(crate) fn new(
        route: Option<&str>,
        api: &'static str,
        diagnostics: Arc<SyncAccessDiagnostics>,
        escalation: Option<PrerenderPhase>,
    ) -> Self {
        Self {
            route: route.map(Arc::from),
            api,
            diagnostics,
            escalation,
            awaited: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Whether the handle has been awaited.
    pub fn is_awaited(&self) -> bool {
        self.awaited.load(Ordering::Acquire)
    }

    pub(crate) fn mark_awaited(&self) {
        self.awaited.store(true, Ordering::Release);
    }

    /// Check an access to `expression` before it is delegated.
    pub(crate) fn observe(&self, expression: &str) {
        if self.is_awaited() {
            return;
        }

        // Escalation is per render attempt, independent of the dedup set.
        let escalated = self
            .escalation
            .as_ref()
            .is_some_and(PrerenderPhase::escalate);
        if escalated {
            tracing::info!(
                route = self.route.as_deref().unwrap_or(""),
                expression,
                "sync access ended development dry run, rendering dynamically"
            );
        }

        self.diagnostics
            .report(self.route.as_deref(), expression, self.api, escalated);
    }
}

impl std::fmt::Debug for SyncAccessGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncAccessGuard")
            .field("route", &self.route)
            .field("api", &self.api)
            .field("awaited", &self.is_awaited())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collecting() -> (Arc<CollectingSink>, Arc<SyncAccessDiagnostics>) {
        let sink = Arc::new(CollectingSink::new());
        let diagnostics = Arc::new(SyncAccessDiagnostics::new(sink.clone()));
        (sink, diagnostics)
    }

    #[test]
    fn test_message_shape() {
        assert_eq!(
            sync_access_message(Some("/blog/[slug]"), "cookies().get('x')", "cookies"),
            "Route \"/blog/[slug]\" used `cookies().get('x')`. `cookies()` should be awaited before using its value."
        );
        assert_eq!(
            sync_access_message(None, "headers().keys()", "headers"),
            "This route used `headers().keys()`. `headers()` should be awaited before using its value."
        );
    }

    #[test]
    fn test_dedup_by_route_and_expression() {
        let (sink, diagnostics) = collecting();
        assert!(diagnostics.report(Some("/a"), "cookies().size", "cookies", false));
        assert!(!diagnostics.report(Some("/a"), "cookies().size", "cookies", false));
        assert!(diagnostics.report(Some("/b"), "cookies().size", "cookies", false));
        assert_eq!(sink.diagnostics().len(), 2);
        assert_eq!(diagnostics.reported(), 2);
    }

    #[test]
    fn test_guard_silent_after_await() {
        let (sink, diagnostics) = collecting();
        let guard = SyncAccessGuard::new(Some("/"), "headers", diagnostics, None);
        guard.mark_awaited();
        guard.observe("headers().get('a')");
        assert!(sink.diagnostics().is_empty());
    }

    #[test]
    fn test_guard_escalates_once_even_when_deduped() {
        let (sink, diagnostics) = collecting();
        diagnostics.report(Some("/"), "cookies().has('x')", "cookies", false);

        let phase = PrerenderPhase::new(true);
        let guard = SyncAccessGuard::new(Some("/"), "cookies", diagnostics, Some(phase.clone()));
        guard.observe("cookies().has('x')");
        assert!(phase.escalated());
        assert_eq!(sink.diagnostics().len(), 1);

        guard.observe("cookies().size");
        let reported = sink.diagnostics();
        assert_eq!(reported.len(), 2);
        assert!(!reported[1].escalated);
    }
}
