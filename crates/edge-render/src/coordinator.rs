//! The access coordinator.
//!
//! Every access to cookies, headers, or draft mode runs the same decision
//! protocol against the active [`WorkContext`] and [`WorkUnitContext`]:
//!
//! 1. No context established: [`AccessError::MissingStore`].
//! 2. `force_static`: a fresh handle over an empty resource, untracked.
//! 3. `cache` / `unstable-cache`: latch and return the cache-scope error.
//! 4. `dynamic_should_error`: [`AccessError::StaticBailout`].
//! 5. Dispatch on the phase (deferred handle, invariant, postponement,
//!    legacy bailout, or a tracked, memoized handle for a live request).
//!
//! The resource-specific entry points live in `cookies`, `headers`, and
//! `draft_mode`; this module holds the parts they share.

use std::sync::Arc;

use edge_core::RenderConfig;

use crate::deferred::make_hanging;
use crate::draft_mode::{DraftModeLookup, ForwardedDraftMode};
use crate::error::{AccessError, AccessResult, CacheScope, InvalidDynamicUsageError};
use crate::guard::{DiagnosticSink, SyncAccessDiagnostics, SyncAccessGuard};
use crate::handle::DynamicHandle;
use crate::postpone::{DynamicAccess, Postpone, TrackingPostponer};
use crate::unit::{LegacyUnit, PprUnit, PrerenderUnit, RequestUnit, WorkUnitContext};
use crate::work::{capture_stack, WorkContext};

/// The contexts a call into the coordinator runs under.
///
/// Established by the orchestrator around a render or cache invocation and
/// passed explicitly to every entry point.
#[derive(Debug, Clone, Default)]
pub struct AccessScope {
    work: Option<Arc<WorkContext>>,
    unit: Option<Arc<WorkUnitContext>>,
}

impl AccessScope {
    /// Scope a call to a work context and work unit.
    pub fn new(work: Arc<WorkContext>, unit: Arc<WorkUnitContext>) -> Self {
        Self {
            work: Some(work),
            unit: Some(unit),
        }
    }

    /// A scope with no contexts, as seen outside any render.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn work(&self) -> Option<&Arc<WorkContext>> {
        self.work.as_ref()
    }

    pub fn unit(&self) -> Option<&Arc<WorkUnitContext>> {
        self.unit.as_ref()
    }

    pub(crate) fn require(
        &self,
        expression: &str,
    ) -> AccessResult<(&Arc<WorkContext>, &Arc<WorkUnitContext>)> {
        match (&self.work, &self.unit) {
            (Some(work), Some(unit)) => Ok((work, unit)),
            _ => Err(AccessError::MissingStore {
                expression: expression.to_string(),
            }),
        }
    }
}

struct CoordinatorInner {
    config: RenderConfig,
    diagnostics: Arc<SyncAccessDiagnostics>,
    postponer: Arc<dyn Postpone>,
    draft_lookup: Arc<dyn DraftModeLookup>,
}

/// Entry points for request data, shared by every render in the process.
///
/// Cheap to clone. The only state it owns across renders is the sync-access
/// dedup set.
#[derive(Clone)]
pub struct AccessCoordinator {
    inner: Arc<CoordinatorInner>,
}

impl AccessCoordinator {
    /// Create a coordinator with default collaborators.
    pub fn new(config: RenderConfig) -> Self {
        Self::builder(config).build()
    }

    /// Create a coordinator using the builder.
    pub fn builder(config: RenderConfig) -> AccessCoordinatorBuilder {
        AccessCoordinatorBuilder::new(config)
    }

    pub fn config(&self) -> &RenderConfig {
        &self.inner.config
    }

    /// Process-wide sync-access diagnostics.
    pub fn diagnostics(&self) -> &Arc<SyncAccessDiagnostics> {
        &self.inner.diagnostics
    }

    pub(crate) fn draft_lookup(&self) -> &dyn DraftModeLookup {
        self.inner.draft_lookup.as_ref()
    }

    /// Whether handles for a live request should be guarded.
    pub(crate) fn guards_sync_access(&self, work: &WorkContext) -> bool {
        self.inner.config.dev_diagnostics() && !work.is_prefetch_request()
    }

    pub(crate) fn sync_access_guard(
        &self,
        work: &WorkContext,
        request: &RequestUnit,
        api: &'static str,
    ) -> SyncAccessGuard {
        SyncAccessGuard::new(
            Some(work.route()),
            api,
            self.inner.diagnostics.clone(),
            Some(request.prerender_phase().clone()),
        )
    }

    /// Latch a read error for a cache scope and return the latched one.
    pub(crate) fn invalid_read(
        &self,
        work: &WorkContext,
        expression: &str,
        scope: CacheScope,
    ) -> AccessError {
        let latched = work.latch_invalid_dynamic_usage(|| {
            InvalidDynamicUsageError::read(work.route(), expression, scope)
        });
        tracing::debug!(route = work.route(), expression, ?scope, "dynamic access inside cache scope");
        AccessError::InvalidDynamicUsage(latched)
    }

    /// Latch a draft-mode mutation error for a cache scope.
    pub(crate) fn invalid_mutation(
        &self,
        work: &WorkContext,
        expression: &str,
        scope: CacheScope,
    ) -> AccessError {
        let latched = work.latch_invalid_dynamic_usage(|| {
            InvalidDynamicUsageError::mutation(work.route(), expression, scope)
        });
        tracing::debug!(route = work.route(), expression, ?scope, "draft mode mutated inside cache scope");
        AccessError::InvalidDynamicUsage(latched)
    }

    pub(crate) fn static_bailout(&self, work: &WorkContext, expression: &str) -> AccessError {
        tracing::debug!(route = work.route(), expression, "dynamic access with dynamic = \"error\"");
        AccessError::StaticBailout {
            route: work.route().to_string(),
            expression: expression.to_string(),
        }
    }

    pub(crate) fn client_invariant(&self, api: &str) -> AccessError {
        AccessError::Invariant(format!(
            "`{api}` must not be used within a client component. The bundler should keep \
             `{api}` out of client components statically, but did not in this case."
        ))
    }

    pub(crate) fn postpone(&self, work: &WorkContext, ppr: &PprUnit, expression: &str) -> AccessError {
        let signal = self
            .inner
            .postponer
            .suspend_and_mark(work.route(), expression, ppr.dynamic_tracking());
        AccessError::Postponed(signal)
    }

    /// Bail out of legacy static generation so the route is retried dynamically.
    pub(crate) fn legacy_bailout(
        &self,
        work: &WorkContext,
        legacy: &LegacyUnit,
        expression: &str,
    ) -> AccessError {
        legacy.force_dynamic();
        work.record_dynamic_usage(expression);
        tracing::debug!(route = work.route(), expression, "legacy prerender bailing out to dynamic");
        AccessError::DynamicServer {
            route: work.route().to_string(),
            expression: expression.to_string(),
        }
    }

    /// Abort a dry-run prerender after a synchronous mutation.
    pub(crate) fn interrupt(
        &self,
        work: &WorkContext,
        prerender: &PrerenderUnit,
        expression: &str,
    ) -> AccessError {
        if let Some(tracking) = prerender.dynamic_tracking() {
            tracking.record(DynamicAccess {
                expression: expression.to_string(),
                stack: capture_stack(),
            });
        }
        if prerender.render_signal().abort() {
            tracing::debug!(route = work.route(), expression, "aborted dry-run prerender");
        }
        AccessError::PrerenderInterrupted {
            route: work.route().to_string(),
            expression: expression.to_string(),
        }
    }

    /// A deferred handle tied to the unit's render signal.
    pub(crate) fn hanging<R>(
        &self,
        work: &WorkContext,
        prerender: &PrerenderUnit,
        api: &'static str,
    ) -> DynamicHandle<R> {
        let expression = format!("`{api}()`");
        DynamicHandle::hanging(
            api,
            make_hanging(prerender.render_signal(), work.route(), &expression),
        )
    }
}

impl Default for AccessCoordinator {
    fn default() -> Self {
        Self::new(RenderConfig::default())
    }
}

impl std::fmt::Debug for AccessCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessCoordinator")
            .field("config", &self.inner.config)
            .field("reported", &self.inner.diagnostics.reported())
            .finish_non_exhaustive()
    }
}

/// Builder for [`AccessCoordinator`].
pub struct AccessCoordinatorBuilder {
    config: RenderConfig,
    diagnostics: Option<Arc<SyncAccessDiagnostics>>,
    postponer: Arc<dyn Postpone>,
    draft_lookup: Arc<dyn DraftModeLookup>,
}

impl AccessCoordinatorBuilder {
    pub fn new(config: RenderConfig) -> Self {
        Self {
            config,
            diagnostics: None,
            postponer: Arc::new(TrackingPostponer::default()),
            draft_lookup: Arc::new(ForwardedDraftMode),
        }
    }

    /// Report sync-access diagnostics to `sink`.
    pub fn with_diagnostic_sink(mut self, sink: Arc<dyn DiagnosticSink>) -> Self {
        self.diagnostics = Some(Arc::new(SyncAccessDiagnostics::new(sink)));
        self
    }

    /// Share an existing diagnostics dedup set.
    pub fn with_diagnostics(mut self, diagnostics: Arc<SyncAccessDiagnostics>) -> Self {
        self.diagnostics = Some(diagnostics);
        self
    }

    /// Set the host postponement primitive.
    pub fn with_postponer(mut self, postponer: Arc<dyn Postpone>) -> Self {
        self.postponer = postponer;
        self
    }

    /// Set the draft-mode policy for cache scopes.
    pub fn with_draft_lookup(mut self, lookup: Arc<dyn DraftModeLookup>) -> Self {
        self.draft_lookup = lookup;
        self
    }

    pub fn build(self) -> AccessCoordinator {
        AccessCoordinator {
            inner: Arc::new(CoordinatorInner {
                config: self.config,
                diagnostics: self.diagnostics.unwrap_or_default(),
                postponer: self.postponer,
                draft_lookup: self.draft_lookup,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_scope_is_missing_store() {
        let err = AccessScope::empty().require("cookies").unwrap_err();
        assert_eq!(err.to_string(), "`cookies` was called outside a request scope.");
    }

    #[test]
    fn test_scope_without_unit_is_missing_store() {
        let scope = AccessScope {
            work: Some(Arc::new(WorkContext::new("/"))),
            unit: None,
        };
        assert!(scope.require("headers").is_err());
    }

    #[test]
    fn test_guard_policy() {
        let dev = AccessCoordinator::new(RenderConfig::development());
        let prod = AccessCoordinator::new(RenderConfig::production());
        let work = WorkContext::new("/");
        let prefetch = WorkContext::new("/").with_prefetch_request(true);

        assert!(dev.guards_sync_access(&work));
        assert!(!dev.guards_sync_access(&prefetch));
        assert!(!prod.guards_sync_access(&work));
    }

    #[test]
    fn test_interrupt_aborts_signal_and_records() {
        let coordinator = AccessCoordinator::default();
        let tracking = Arc::new(crate::postpone::DynamicTracking::new());
        let prerender =
            PrerenderUnit::new(Default::default()).with_dynamic_tracking(tracking.clone());
        let work = WorkContext::new("/p");

        let err = coordinator.interrupt(&work, &prerender, "`draftMode().enable()`");
        assert_eq!(err.kind(), "prerender-interrupted");
        assert!(prerender.render_signal().is_aborted());
        assert_eq!(tracking.len(), 1);
    }

    #[test]
    fn test_builder_shares_diagnostics() {
        let diagnostics = Arc::new(SyncAccessDiagnostics::default());
        let coordinator = AccessCoordinator::builder(RenderConfig::development())
            .with_diagnostics(diagnostics.clone())
            .build();
        assert!(Arc::ptr_eq(coordinator.diagnostics(), &diagnostics));
    }
}
