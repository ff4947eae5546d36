//! Work context: state for one render or build attempt.

use std::backtrace::{Backtrace, BacktraceStatus};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use edge_core::RouteConfig;

use crate::error::InvalidDynamicUsageError;

/// Why the legacy prerender bailed out to dynamic rendering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DynamicUsage {
    /// Expression that forced dynamic rendering (e.g. `draftMode().enable()`).
    pub description: String,
    /// Captured stack, when backtraces are enabled.
    pub stack: Option<String>,
}

/// Per render/build attempt state.
///
/// Created by the orchestrator before user code runs and discarded after.
/// The coordinator only writes the two latch fields.
#[derive(Debug)]
pub struct WorkContext {
    route: String,
    force_static: bool,
    dynamic_should_error: bool,
    is_prefetch_request: bool,
    invalid_dynamic_usage_error: OnceLock<Arc<InvalidDynamicUsageError>>,
    dynamic_usage: Mutex<Option<DynamicUsage>>,
}

impl WorkContext {
    /// Create a work context for a route.
    pub fn new(route: impl Into<String>) -> Self {
        Self {
            route: route.into(),
            force_static: false,
            dynamic_should_error: false,
            is_prefetch_request: false,
            invalid_dynamic_usage_error: OnceLock::new(),
            dynamic_usage: Mutex::new(None),
        }
    }

    /// Create a work context whose flags follow a route's segment config.
    pub fn from_route_config(route: &RouteConfig) -> Self {
        Self::new(route.path.clone())
            .with_force_static(route.force_static())
            .with_dynamic_should_error(route.dynamic_should_error())
    }

    /// Answer dynamic reads with empty values.
    pub fn with_force_static(mut self, force_static: bool) -> Self {
        self.force_static = force_static;
        self
    }

    /// Fail static generation on dynamic reads.
    pub fn with_dynamic_should_error(mut self, dynamic_should_error: bool) -> Self {
        self.dynamic_should_error = dynamic_should_error;
        self
    }

    /// Mark the render as serving a prefetch.
    pub fn with_prefetch_request(mut self, is_prefetch_request: bool) -> Self {
        self.is_prefetch_request = is_prefetch_request;
        self
    }

    pub fn route(&self) -> &str {
        &self.route
    }

    pub fn force_static(&self) -> bool {
        self.force_static
    }

    pub fn dynamic_should_error(&self) -> bool {
        self.dynamic_should_error
    }

    pub fn is_prefetch_request(&self) -> bool {
        self.is_prefetch_request
    }

    /// The latched cache-scope error, if any access tripped it.
    pub fn invalid_dynamic_usage_error(&self) -> Option<Arc<InvalidDynamicUsageError>> {
        self.invalid_dynamic_usage_error.get().cloned()
    }

    /// Latch an error, constructing it only if the slot is empty.
    ///
    /// Always returns the instance held by the latch.
    pub(crate) fn latch_invalid_dynamic_usage(
        &self,
        make: impl FnOnce() -> InvalidDynamicUsageError,
    ) -> Arc<InvalidDynamicUsageError> {
        self.invalid_dynamic_usage_error
            .get_or_init(|| Arc::new(make()))
            .clone()
    }

    /// Diagnostic recorded by a legacy bailout.
    pub fn dynamic_usage(&self) -> Option<DynamicUsage> {
        self.dynamic_usage
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Shorthand for the recorded bailout description.
    pub fn dynamic_usage_description(&self) -> Option<String> {
        self.dynamic_usage().map(|usage| usage.description)
    }

    pub(crate) fn record_dynamic_usage(&self, description: &str) {
        *self
            .dynamic_usage
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(DynamicUsage {
            description: description.to_string(),
            stack: capture_stack(),
        });
    }
}

/// Capture a backtrace if the environment enables them.
pub(crate) fn capture_stack() -> Option<String> {
    let backtrace = Backtrace::capture();
    match backtrace.status() {
        BacktraceStatus::Captured => Some(backtrace.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CacheScope;
    use edge_core::DynamicBehavior;

    #[test]
    fn test_flags_from_route_config() {
        let work = WorkContext::from_route_config(
            &RouteConfig::new("/about").with_dynamic(DynamicBehavior::ForceStatic),
        );
        assert_eq!(work.route(), "/about");
        assert!(work.force_static());
        assert!(!work.dynamic_should_error());

        let work =
            WorkContext::from_route_config(&RouteConfig::new("/about").with_dynamic(DynamicBehavior::Error));
        assert!(work.dynamic_should_error());
    }

    #[test]
    fn test_latch_first_write_wins() {
        let work = WorkContext::new("/shop");
        assert!(work.invalid_dynamic_usage_error().is_none());

        let first = work.latch_invalid_dynamic_usage(|| {
            InvalidDynamicUsageError::read("/shop", "headers", CacheScope::UseCache)
        });
        let second = work.latch_invalid_dynamic_usage(|| {
            panic!("latched slot must not construct a second error")
        });

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.expression(), "headers");
        assert!(Arc::ptr_eq(&work.invalid_dynamic_usage_error().unwrap(), &first));
    }

    #[test]
    fn test_record_dynamic_usage() {
        let work = WorkContext::new("/");
        assert!(work.dynamic_usage_description().is_none());
        work.record_dynamic_usage("cookies");
        assert_eq!(work.dynamic_usage_description().as_deref(), Some("cookies"));
    }
}
