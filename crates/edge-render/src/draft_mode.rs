//! `draftMode()`: reading and toggling draft mode.
//!
//! Reading draft mode in a prerender yields an empty, disabled draft mode.
//! Enabling or disabling it is the dynamic access: the mutation runs the
//! phase decision protocol, is rejected inside `after`, and is latched as
//! an error inside any cache scope, including private caches.

use std::sync::{Arc, Weak};

use edge_core::{DraftModeProvider, NullDraftMode};

use crate::coordinator::{AccessCoordinator, AccessScope};
use crate::error::{AccessError, AccessResult, CacheScope};
use crate::guard::SyncAccessGuard;
use crate::handle::DynamicHandle;
use crate::memo::MemoKey;
use crate::unit::{RequestPhase, WorkUnit, WorkUnitContext};
use crate::work::WorkContext;

const API: &str = "draftMode";
const ENABLE: &str = "draftMode().enable()";
const DISABLE: &str = "draftMode().disable()";

fn null_provider() -> Arc<dyn DraftModeProvider> {
    Arc::new(NullDraftMode)
}

/// Policy for which draft-mode provider a cache scope may read.
pub trait DraftModeLookup: Send + Sync {
    fn provider_for_cache_scope(
        &self,
        work: &WorkContext,
        unit: &WorkUnitContext,
    ) -> Option<Arc<dyn DraftModeProvider>>;
}

/// Uses the provider recorded on the cache unit when it was created.
#[derive(Debug, Default, Clone, Copy)]
pub struct ForwardedDraftMode;

impl DraftModeLookup for ForwardedDraftMode {
    fn provider_for_cache_scope(
        &self,
        _work: &WorkContext,
        unit: &WorkUnitContext,
    ) -> Option<Arc<dyn DraftModeProvider>> {
        match unit.unit() {
            WorkUnit::Cache(cache) => cache.forwarded_draft_mode().cloned(),
            WorkUnit::PrivateCache(private) => private.forwarded_draft_mode().cloned(),
            WorkUnit::Request(_)
            | WorkUnit::Prerender(_)
            | WorkUnit::PrerenderClient(_)
            | WorkUnit::PrerenderRuntime(_)
            | WorkUnit::PrerenderPpr(_)
            | WorkUnit::PrerenderLegacy(_)
            | WorkUnit::UnstableCache => None,
        }
    }
}

/// Contexts a draft-mode value re-enters when it is mutated.
///
/// Held weakly so a memoized value never keeps its unit alive.
#[derive(Clone)]
struct MutationBinding {
    coordinator: AccessCoordinator,
    work: Weak<WorkContext>,
    unit: Weak<WorkUnitContext>,
}

impl MutationBinding {
    fn new(coordinator: &AccessCoordinator, work: &Arc<WorkContext>, unit: &Arc<WorkUnitContext>) -> Self {
        Self {
            coordinator: coordinator.clone(),
            work: Arc::downgrade(work),
            unit: Arc::downgrade(unit),
        }
    }

    fn track(&self, expression: &str) -> AccessResult<()> {
        let (Some(work), Some(unit)) = (self.work.upgrade(), self.unit.upgrade()) else {
            return Err(AccessError::MissingStore {
                expression: expression.to_string(),
            });
        };
        self.coordinator.track_draft_mutation(&work, &unit, expression)
    }
}

/// Draft mode of the current request.
#[derive(Clone)]
pub struct DraftMode {
    provider: Arc<dyn DraftModeProvider>,
    binding: MutationBinding,
}

impl DraftMode {
    fn new(provider: Arc<dyn DraftModeProvider>, binding: MutationBinding) -> Self {
        Self { provider, binding }
    }

    pub fn is_enabled(&self) -> bool {
        self.provider.is_enabled()
    }

    /// Enable draft mode for the rest of the session.
    pub fn enable(&self) -> AccessResult<()> {
        self.binding.track(ENABLE)?;
        self.provider.enable();
        Ok(())
    }

    /// Disable draft mode.
    pub fn disable(&self) -> AccessResult<()> {
        self.binding.track(DISABLE)?;
        self.provider.disable();
        Ok(())
    }
}

impl std::fmt::Debug for DraftMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DraftMode")
            .field("enabled", &self.is_enabled())
            .finish_non_exhaustive()
    }
}

/// Draft-mode provider that reports unawaited access before delegating.
pub struct GuardedDraftMode {
    inner: Arc<dyn DraftModeProvider>,
    guard: SyncAccessGuard,
}

impl GuardedDraftMode {
    pub fn new(inner: Arc<dyn DraftModeProvider>, guard: SyncAccessGuard) -> Self {
        Self { inner, guard }
    }
}

impl DraftModeProvider for GuardedDraftMode {
    fn is_enabled(&self) -> bool {
        self.guard.observe("draftMode().isEnabled");
        self.inner.is_enabled()
    }

    fn enable(&self) {
        self.guard.observe(ENABLE);
        self.inner.enable();
    }

    fn disable(&self) {
        self.guard.observe(DISABLE);
        self.inner.disable();
    }
}

/// Handle returned by [`AccessCoordinator::fetch_draft_mode`].
pub type DraftModeHandle = DynamicHandle<DraftMode>;

impl DraftModeHandle {
    pub fn is_enabled(&self) -> AccessResult<bool> {
        Ok(self
            .surface(|| "draftMode().isEnabled".to_string())?
            .is_enabled())
    }

    pub fn enable(&self) -> AccessResult<()> {
        self.surface(|| ENABLE.to_string())?.enable()
    }

    pub fn disable(&self) -> AccessResult<()> {
        self.surface(|| DISABLE.to_string())?.disable()
    }
}

impl AccessCoordinator {
    /// Access draft mode.
    ///
    /// Reading is not a dynamic access in prerender phases: they all see the
    /// memoized empty draft mode. The phase decision runs when it is mutated.
    pub fn fetch_draft_mode(&self, scope: &AccessScope) -> AccessResult<DraftModeHandle> {
        let (work, unit) = scope.require(API)?;
        let binding = MutationBinding::new(self, work, unit);

        if work.force_static() {
            return Ok(DraftModeHandle::resolved(
                API,
                DraftMode::new(null_provider(), binding),
            ));
        }

        match unit.unit() {
            WorkUnit::Cache(_) => match self.draft_lookup().provider_for_cache_scope(work, unit) {
                Some(provider) => Ok(self.untracked_draft_mode(unit, Some(provider), binding)),
                None => Err(self.invalid_read(work, API, CacheScope::UseCache)),
            },
            WorkUnit::UnstableCache => Err(self.invalid_read(work, API, CacheScope::UnstableCache)),
            _ if work.dynamic_should_error() => Err(self.static_bailout(work, API)),
            WorkUnit::Prerender(_)
            | WorkUnit::PrerenderRuntime(_)
            | WorkUnit::PrerenderClient(_)
            | WorkUnit::PrerenderPpr(_)
            | WorkUnit::PrerenderLegacy(_) => Ok(self.untracked_draft_mode(unit, None, binding)),
            WorkUnit::Request(request) => {
                request.mark_dynamic();
                let source = request.draft_mode();
                Ok(unit
                    .handles()
                    .draft_mode
                    .get_or_create(MemoKey::optional(source), || {
                        let provider = source.cloned().unwrap_or_else(null_provider);
                        let value = DraftMode::new(provider.clone(), binding.clone());
                        if !self.guards_sync_access(work) {
                            return DraftModeHandle::resolved(API, value);
                        }
                        let guard = self.sync_access_guard(work, request, API);
                        let surface = DraftMode::new(
                            Arc::new(GuardedDraftMode::new(provider, guard.clone())),
                            binding,
                        );
                        DraftModeHandle::guarded(API, value, surface, guard)
                    }))
            }
            WorkUnit::PrivateCache(_) => {
                let provider = self.draft_lookup().provider_for_cache_scope(work, unit);
                Ok(self.untracked_draft_mode(unit, provider, binding))
            }
        }
    }

    fn untracked_draft_mode(
        &self,
        unit: &WorkUnitContext,
        provider: Option<Arc<dyn DraftModeProvider>>,
        binding: MutationBinding,
    ) -> DraftModeHandle {
        unit.handles()
            .draft_mode
            .get_or_create(MemoKey::optional(provider.as_ref()), || {
                let provider = provider.clone().unwrap_or_else(null_provider);
                DraftModeHandle::resolved(API, DraftMode::new(provider, binding))
            })
    }

    /// Run the decision protocol for a draft-mode mutation.
    fn track_draft_mutation(
        &self,
        work: &WorkContext,
        unit: &WorkUnitContext,
        expression: &str,
    ) -> AccessResult<()> {
        if let Some(request) = unit.as_request() {
            if request.phase() == RequestPhase::After {
                return Err(AccessError::AfterNotSupported {
                    route: work.route().to_string(),
                    expression: expression.to_string(),
                });
            }
        }

        if work.force_static() {
            return Ok(());
        }

        match unit.unit() {
            WorkUnit::Cache(_) => Err(self.invalid_mutation(work, expression, CacheScope::UseCache)),
            WorkUnit::PrivateCache(_) => {
                Err(self.invalid_mutation(work, expression, CacheScope::PrivateCache))
            }
            WorkUnit::UnstableCache => {
                Err(self.invalid_mutation(work, expression, CacheScope::UnstableCache))
            }
            _ if work.dynamic_should_error() => Err(self.static_bailout(work, expression)),
            WorkUnit::Prerender(prerender) | WorkUnit::PrerenderRuntime(prerender) => {
                Err(self.interrupt(work, prerender, &format!("`{expression}`")))
            }
            WorkUnit::PrerenderClient(_) => Err(self.client_invariant(API)),
            WorkUnit::PrerenderPpr(ppr) => Err(self.postpone(work, ppr, expression)),
            WorkUnit::PrerenderLegacy(legacy) => Err(self.legacy_bailout(work, legacy, expression)),
            WorkUnit::Request(request) => {
                request.mark_dynamic();
                Ok(())
            }
        }
    }
}
