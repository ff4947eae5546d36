//! Work unit context: state for one rendering phase.
//!
//! Exactly one [`WorkUnit`] variant is active per phase. Every dispatch site
//! matches the enum exhaustively, so a new phase must be handled everywhere
//! request data is accessed.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use edge_core::{CookieStore, DraftModeProvider, HeaderStore, RequestContext};

use crate::memo::HandleArena;
use crate::postpone::DynamicTracking;
use crate::signal::RenderSignal;

/// Sub-phase of a live request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestPhase {
    /// Rendering the response.
    #[default]
    Render,
    /// Running a server action or route handler; cookies are writable.
    Action,
    /// Running `after` callbacks once the response is sent.
    After,
}

const PHASE_INACTIVE: u8 = 0;
const PHASE_ACTIVE: u8 = 1;
const PHASE_ESCALATED: u8 = 2;

/// Development dry-run flag of a request unit.
///
/// While active, unawaited access to request data ends the dry run and asks
/// the orchestrator to render the route dynamically. The transition happens
/// at most once.
#[derive(Clone)]
pub struct PrerenderPhase(Arc<AtomicU8>);

impl PrerenderPhase {
    /// Create the flag.
    pub fn new(active: bool) -> Self {
        let state = if active { PHASE_ACTIVE } else { PHASE_INACTIVE };
        Self(Arc::new(AtomicU8::new(state)))
    }

    /// Whether a dry run is in progress.
    pub fn is_active(&self) -> bool {
        self.0.load(Ordering::Acquire) == PHASE_ACTIVE
    }

    /// Whether a sync access ended the dry run.
    pub fn escalated(&self) -> bool {
        self.0.load(Ordering::Acquire) == PHASE_ESCALATED
    }

    /// End the dry run. Returns `true` only for the call that ended it.
    pub fn escalate(&self) -> bool {
        self.0
            .compare_exchange(
                PHASE_ACTIVE,
                PHASE_ESCALATED,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }
}

impl fmt::Debug for PrerenderPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrerenderPhase")
            .field("active", &self.is_active())
            .field("escalated", &self.escalated())
            .finish()
    }
}

/// A live request.
pub struct RequestUnit {
    cookies: Arc<dyn CookieStore>,
    mutable_cookies: Arc<dyn CookieStore>,
    headers: Arc<dyn HeaderStore>,
    draft_mode: Option<Arc<dyn DraftModeProvider>>,
    phase: RequestPhase,
    prerender_phase: PrerenderPhase,
    used_dynamic: AtomicBool,
}

impl RequestUnit {
    /// Create a request unit over raw resources.
    pub fn new(
        cookies: Arc<dyn CookieStore>,
        mutable_cookies: Arc<dyn CookieStore>,
        headers: Arc<dyn HeaderStore>,
    ) -> Self {
        Self {
            cookies,
            mutable_cookies,
            headers,
            draft_mode: None,
            phase: RequestPhase::Render,
            prerender_phase: PrerenderPhase::new(false),
            used_dynamic: AtomicBool::new(false),
        }
    }

    /// Create a request unit from an incoming request.
    pub fn from_request(request: &RequestContext) -> Self {
        let unit = Self::new(
            request.cookies.clone(),
            request.response_cookies.clone(),
            request.headers.clone(),
        );
        match &request.draft_mode {
            Some(provider) => unit.with_draft_mode(provider.clone()),
            None => unit,
        }
    }

    /// Attach a draft-mode provider.
    pub fn with_draft_mode(mut self, provider: Arc<dyn DraftModeProvider>) -> Self {
        self.draft_mode = Some(provider);
        self
    }

    /// Set the request sub-phase.
    pub fn with_phase(mut self, phase: RequestPhase) -> Self {
        self.phase = phase;
        self
    }

    /// Start the unit inside a development dry run.
    pub fn with_prerender_phase(mut self, active: bool) -> Self {
        self.prerender_phase = PrerenderPhase::new(active);
        self
    }

    /// Cookies visible in the current sub-phase.
    pub fn cookies(&self) -> &Arc<dyn CookieStore> {
        match self.phase {
            RequestPhase::Action => &self.mutable_cookies,
            RequestPhase::Render | RequestPhase::After => &self.cookies,
        }
    }

    pub fn headers(&self) -> &Arc<dyn HeaderStore> {
        &self.headers
    }

    pub fn draft_mode(&self) -> Option<&Arc<dyn DraftModeProvider>> {
        self.draft_mode.as_ref()
    }

    pub fn phase(&self) -> RequestPhase {
        self.phase
    }

    pub fn prerender_phase(&self) -> &PrerenderPhase {
        &self.prerender_phase
    }

    /// Whether any tracked access touched dynamic data.
    pub fn used_dynamic(&self) -> bool {
        self.used_dynamic.load(Ordering::Acquire)
    }

    pub(crate) fn mark_dynamic(&self) {
        self.used_dynamic.store(true, Ordering::Release);
    }
}

/// A dry-run prerender (`prerender`, `prerender-client`, `prerender-runtime`).
#[derive(Debug, Clone, Default)]
pub struct PrerenderUnit {
    render_signal: RenderSignal,
    dynamic_tracking: Option<Arc<DynamicTracking>>,
}

impl PrerenderUnit {
    /// Create a unit that owns `render_signal`.
    pub fn new(render_signal: RenderSignal) -> Self {
        Self {
            render_signal,
            dynamic_tracking: None,
        }
    }

    /// Record dynamic accesses into `tracking`.
    pub fn with_dynamic_tracking(mut self, tracking: Arc<DynamicTracking>) -> Self {
        self.dynamic_tracking = Some(tracking);
        self
    }

    pub fn render_signal(&self) -> &RenderSignal {
        &self.render_signal
    }

    pub fn dynamic_tracking(&self) -> Option<&Arc<DynamicTracking>> {
        self.dynamic_tracking.as_ref()
    }
}

/// A partial prerender using cooperative postponement.
#[derive(Debug, Clone, Default)]
pub struct PprUnit {
    dynamic_tracking: Arc<DynamicTracking>,
}

impl PprUnit {
    pub fn new(dynamic_tracking: Arc<DynamicTracking>) -> Self {
        Self { dynamic_tracking }
    }

    pub fn dynamic_tracking(&self) -> &Arc<DynamicTracking> {
        &self.dynamic_tracking
    }
}

const REVALIDATE_NEVER: u64 = u64::MAX;

/// Legacy static generation.
#[derive(Debug)]
pub struct LegacyUnit {
    revalidate: AtomicU64,
}

impl LegacyUnit {
    /// Create a unit with the route's revalidate period; `None` means never.
    pub fn new(revalidate: Option<u64>) -> Self {
        Self {
            revalidate: AtomicU64::new(revalidate.unwrap_or(REVALIDATE_NEVER)),
        }
    }

    /// Current revalidate period in seconds, `None` when never revalidated.
    pub fn revalidate(&self) -> Option<u64> {
        match self.revalidate.load(Ordering::Acquire) {
            REVALIDATE_NEVER => None,
            seconds => Some(seconds),
        }
    }

    pub(crate) fn force_dynamic(&self) {
        self.revalidate.store(0, Ordering::Release);
    }
}

impl Default for LegacyUnit {
    fn default() -> Self {
        Self::new(None)
    }
}

/// A `"use cache"` scope.
#[derive(Default)]
pub struct CacheUnit {
    forwarded_draft_mode: Option<Arc<dyn DraftModeProvider>>,
}

impl CacheUnit {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forward the enclosing request's draft mode into the scope.
    pub fn with_forwarded_draft_mode(mut self, provider: Arc<dyn DraftModeProvider>) -> Self {
        self.forwarded_draft_mode = Some(provider);
        self
    }

    pub fn forwarded_draft_mode(&self) -> Option<&Arc<dyn DraftModeProvider>> {
        self.forwarded_draft_mode.as_ref()
    }
}

/// A private cache scope, which may read the request's cookies and headers.
pub struct PrivateCacheUnit {
    cookies: Arc<dyn CookieStore>,
    headers: Arc<dyn HeaderStore>,
    forwarded_draft_mode: Option<Arc<dyn DraftModeProvider>>,
}

impl PrivateCacheUnit {
    pub fn new(cookies: Arc<dyn CookieStore>, headers: Arc<dyn HeaderStore>) -> Self {
        Self {
            cookies,
            headers,
            forwarded_draft_mode: None,
        }
    }

    /// Forward the enclosing request's draft mode into the scope.
    pub fn with_forwarded_draft_mode(mut self, provider: Arc<dyn DraftModeProvider>) -> Self {
        self.forwarded_draft_mode = Some(provider);
        self
    }

    pub fn cookies(&self) -> &Arc<dyn CookieStore> {
        &self.cookies
    }

    pub fn headers(&self) -> &Arc<dyn HeaderStore> {
        &self.headers
    }

    pub fn forwarded_draft_mode(&self) -> Option<&Arc<dyn DraftModeProvider>> {
        self.forwarded_draft_mode.as_ref()
    }
}

/// The phase a work unit is executing.
pub enum WorkUnit {
    Request(RequestUnit),
    Prerender(PrerenderUnit),
    PrerenderClient(PrerenderUnit),
    PrerenderRuntime(PrerenderUnit),
    PrerenderPpr(PprUnit),
    PrerenderLegacy(LegacyUnit),
    Cache(CacheUnit),
    PrivateCache(PrivateCacheUnit),
    /// A function cached with `unstable_cache`; all dynamic access is forbidden.
    UnstableCache,
}

impl WorkUnit {
    /// Phase name as used in logs and tooling.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Request(_) => "request",
            Self::Prerender(_) => "prerender",
            Self::PrerenderClient(_) => "prerender-client",
            Self::PrerenderRuntime(_) => "prerender-runtime",
            Self::PrerenderPpr(_) => "prerender-ppr",
            Self::PrerenderLegacy(_) => "prerender-legacy",
            Self::Cache(_) => "cache",
            Self::PrivateCache(_) => "private-cache",
            Self::UnstableCache => "unstable-cache",
        }
    }
}

/// Per-phase state plus the arena that memoizes handles for the phase.
pub struct WorkUnitContext {
    unit: WorkUnit,
    handles: HandleArena,
}

impl WorkUnitContext {
    pub fn new(unit: WorkUnit) -> Self {
        Self {
            unit,
            handles: HandleArena::default(),
        }
    }

    pub fn unit(&self) -> &WorkUnit {
        &self.unit
    }

    /// Phase name as used in logs and tooling.
    pub fn kind(&self) -> &'static str {
        self.unit.kind()
    }

    /// Handles memoized for this unit.
    pub fn handles(&self) -> &HandleArena {
        &self.handles
    }

    /// The request unit, when this is a live request.
    pub fn as_request(&self) -> Option<&RequestUnit> {
        match &self.unit {
            WorkUnit::Request(request) => Some(request),
            _ => None,
        }
    }

    /// The legacy unit, when this is legacy static generation.
    pub fn as_legacy(&self) -> Option<&LegacyUnit> {
        match &self.unit {
            WorkUnit::PrerenderLegacy(legacy) => Some(legacy),
            _ => None,
        }
    }
}

impl From<WorkUnit> for WorkUnitContext {
    fn from(unit: WorkUnit) -> Self {
        Self::new(unit)
    }
}

impl fmt::Debug for WorkUnitContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkUnitContext")
            .field("kind", &self.kind())
            .field("handles", &self.handles.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use edge_core::{Cookie, MemoryCookies, MemoryHeaders, Method};

    #[test]
    fn test_prerender_phase_escalates_once() {
        let phase = PrerenderPhase::new(true);
        assert!(phase.is_active());
        assert!(phase.escalate());
        assert!(!phase.escalate());
        assert!(!phase.is_active());
        assert!(phase.escalated());

        let inactive = PrerenderPhase::new(false);
        assert!(!inactive.escalate());
        assert!(!inactive.escalated());
    }

    #[test]
    fn test_action_phase_uses_mutable_cookies() {
        let readonly: Arc<dyn CookieStore> =
            Arc::new(MemoryCookies::readonly().with_cookie(Cookie::new("a", "1")));
        let mutable: Arc<dyn CookieStore> = Arc::new(MemoryCookies::new());
        let headers: Arc<dyn HeaderStore> = Arc::new(MemoryHeaders::sealed());

        let render = RequestUnit::new(readonly.clone(), mutable.clone(), headers.clone());
        assert!(Arc::ptr_eq(render.cookies(), &readonly));

        let action = RequestUnit::new(readonly, mutable.clone(), headers)
            .with_phase(RequestPhase::Action);
        assert!(Arc::ptr_eq(action.cookies(), &mutable));
    }

    #[test]
    fn test_from_request_carries_draft_mode() {
        let request = RequestContext::new(Method::Get, "/").with_preview_id("p1");
        let unit = RequestUnit::from_request(&request);
        assert!(unit.draft_mode().is_some());
        assert!(!unit.used_dynamic());
        unit.mark_dynamic();
        assert!(unit.used_dynamic());
    }

    #[test]
    fn test_legacy_revalidate() {
        let legacy = LegacyUnit::new(Some(60));
        assert_eq!(legacy.revalidate(), Some(60));
        legacy.force_dynamic();
        assert_eq!(legacy.revalidate(), Some(0));
        assert_eq!(LegacyUnit::default().revalidate(), None);
    }

    #[test]
    fn test_kind_names() {
        let ctx = WorkUnitContext::new(WorkUnit::PrerenderPpr(PprUnit::default()));
        assert_eq!(ctx.kind(), "prerender-ppr");
        assert_eq!(WorkUnit::UnstableCache.kind(), "unstable-cache");
        assert!(ctx.as_request().is_none());
        assert!(ctx.handles().is_empty());
    }
}
