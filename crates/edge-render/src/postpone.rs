//! Cooperative postponement for partial prerendering.

use std::fmt;
use std::sync::{Mutex, PoisonError};

/// One recorded access to dynamic data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DynamicAccess {
    /// Expression that accessed dynamic data.
    pub expression: String,
    /// Captured stack, when diagnostics are enabled.
    pub stack: Option<String>,
}

/// Append-only log of dynamic accesses made during a prerender.
#[derive(Debug, Default)]
pub struct DynamicTracking {
    accesses: Mutex<Vec<DynamicAccess>>,
}

impl DynamicTracking {
    /// Create an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an access.
    pub fn record(&self, access: DynamicAccess) {
        self.accesses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(access);
    }

    /// Snapshot of every recorded access, in order.
    pub fn accesses(&self) -> Vec<DynamicAccess> {
        self.accesses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of recorded accesses.
    pub fn len(&self) -> usize {
        self.accesses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Marker returned by the host when a branch has been postponed.
///
/// Must propagate to the renderer untouched; it is not a failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostponeSignal {
    /// Route being prerendered.
    pub route: String,
    /// Expression that triggered postponement.
    pub expression: String,
    /// Human-readable reason handed to the renderer.
    pub reason: String,
}

impl PostponeSignal {
    /// Build the signal with the standard reason.
    pub fn new(route: &str, expression: &str) -> Self {
        Self {
            route: route.to_string(),
            expression: expression.to_string(),
            reason: format!(
                "Route {route} needs to bail out of prerendering at this point because it used {expression}."
            ),
        }
    }
}

impl fmt::Display for PostponeSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.reason)
    }
}

/// Host renderer postponement primitive.
pub trait Postpone: Send + Sync {
    /// Suspend the current branch and mark it dynamic in `tracking`.
    fn suspend_and_mark(
        &self,
        route: &str,
        expression: &str,
        tracking: &DynamicTracking,
    ) -> PostponeSignal;
}

/// Postponer that records the access and hands back the signal.
#[derive(Debug, Default, Clone, Copy)]
pub struct TrackingPostponer {
    capture_stack: bool,
}

impl TrackingPostponer {
    /// Create a postponer. With `capture_stack`, each record carries a backtrace.
    pub fn new(capture_stack: bool) -> Self {
        Self { capture_stack }
    }
}

impl Postpone for TrackingPostponer {
    fn suspend_and_mark(
        &self,
        route: &str,
        expression: &str,
        tracking: &DynamicTracking,
    ) -> PostponeSignal {
        let stack = if self.capture_stack {
            crate::work::capture_stack()
        } else {
            None
        };
        tracking.record(DynamicAccess {
            expression: expression.to_string(),
            stack,
        });
        tracing::debug!(route, expression, "postponing prerender branch");

        PostponeSignal::new(route, expression)
    }
}
