//! Errors raised by the access coordinator.

use std::sync::Arc;

use edge_core::StoreError;
use thiserror::Error;

use crate::postpone::PostponeSignal;

/// The cache scope that rejected a dynamic access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheScope {
    /// A `"use cache"` scope.
    UseCache,
    /// A private cache scope.
    PrivateCache,
    /// A function cached with `unstable_cache(...)`.
    UnstableCache,
}

/// Dynamic data was accessed inside a cache scope.
///
/// Latched on the work context: the first instance wins and every later
/// access in the same render re-throws it.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct InvalidDynamicUsageError {
    route: String,
    expression: String,
    scope: CacheScope,
    message: String,
}

impl InvalidDynamicUsageError {
    /// A read of request data inside a cache scope.
    pub(crate) fn read(route: &str, expression: &str, scope: CacheScope) -> Self {
        let message = match scope {
            CacheScope::UnstableCache => format!(
                "Route {route} used \"{expression}\" inside a function cached with \"unstable_cache(...)\". \
                 Accessing dynamic data sources inside a cache scope is not supported. \
                 If you need this data inside a cached function use \"{expression}\" outside of the cached function \
                 and pass the required dynamic data in as an argument."
            ),
            CacheScope::UseCache | CacheScope::PrivateCache => format!(
                "Route {route} used \"{expression}\" inside \"use cache\". \
                 Accessing dynamic data sources inside a cache scope is not supported. \
                 If you need this data inside a cached function use \"{expression}\" outside of the cached function \
                 and pass the required dynamic data in as an argument."
            ),
        };

        Self {
            route: route.to_string(),
            expression: expression.to_string(),
            scope,
            message,
        }
    }

    /// Enabling or disabling draft mode inside a cache scope.
    pub(crate) fn mutation(route: &str, expression: &str, scope: CacheScope) -> Self {
        let message = match scope {
            CacheScope::UnstableCache => format!(
                "Route {route} used \"{expression}\" inside a function cached with \"unstable_cache(...)\" \
                 but this is not supported."
            ),
            CacheScope::UseCache | CacheScope::PrivateCache => format!(
                "Route {route} used \"{expression}\" inside \"use cache\". \
                 The enabled status of draftMode can be read in caches but you must not enable or disable \
                 draftMode inside a cache."
            ),
        };

        Self {
            route: route.to_string(),
            expression: expression.to_string(),
            scope,
            message,
        }
    }

    /// Route that was being rendered.
    pub fn route(&self) -> &str {
        &self.route
    }

    /// Expression that accessed dynamic data.
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// Cache scope the access happened in.
    pub fn scope(&self) -> CacheScope {
        self.scope
    }
}

/// Result type for coordinator operations.
pub type AccessResult<T> = Result<T, AccessError>;

/// Errors and control-flow signals produced when request data is accessed.
#[derive(Debug, Clone, Error)]
pub enum AccessError {
    /// The API was used outside any render.
    #[error("`{expression}` was called outside a request scope.")]
    MissingStore {
        /// Expression that was called.
        expression: String,
    },

    /// Dynamic data used inside a cache scope. Latched per work context.
    #[error(transparent)]
    InvalidDynamicUsage(Arc<InvalidDynamicUsageError>),

    /// The route opted into `dynamic = "error"`.
    #[error(
        "Route {route} with `dynamic = \"error\"` couldn't be rendered statically because it used `{expression}`."
    )]
    StaticBailout {
        /// Route being rendered.
        route: String,
        /// Expression that accessed dynamic data.
        expression: String,
    },

    /// Legacy static generation must retry this route as dynamic.
    #[error("Route {route} couldn't be rendered statically because it used `{expression}`.")]
    DynamicServer {
        /// Route being rendered.
        route: String,
        /// Expression that accessed dynamic data.
        expression: String,
    },

    /// Partial prerendering postponed this branch.
    #[error("{0}")]
    Postponed(PostponeSignal),

    /// A synchronous mutation aborted a dry-run prerender.
    #[error("Route {route} used {expression} without first calling `await connection()`.")]
    PrerenderInterrupted {
        /// Route being rendered.
        route: String,
        /// Expression that mutated request state.
        expression: String,
    },

    /// Request data reached a phase that must never see it.
    #[error("Invariant: {0} This is a bug in the renderer.")]
    Invariant(String),

    /// Draft mode was mutated inside `after`.
    #[error(
        "Route {route} used \"{expression}\" inside `after`. The enabled status of draftMode can be read \
         inside `after` but you cannot enable or disable draftMode."
    )]
    AfterNotSupported {
        /// Route being rendered.
        route: String,
        /// Expression that mutated draft mode.
        expression: String,
    },

    /// A deferred handle was rejected because its prerender finished.
    #[error(
        "During prerendering, {expression} rejects when the prerender is complete. Typically these errors are \
         handled by the renderer but if you move {expression} to a different context you may observe this \
         error and you should handle it in that context. This occurred at route \"{route}\"."
    )]
    HangingPromiseRejection {
        /// Route being prerendered.
        route: String,
        /// Expression that produced the handle.
        expression: String,
    },

    /// A deferred handle was used synchronously before it settled.
    #[error("Route \"{route}\" used `{expression}` while `{api}()` is still pending. Await `{api}()` first.")]
    SyncAccessUnavailable {
        /// Route being prerendered.
        route: String,
        /// Expression that was used.
        expression: String,
        /// API that produced the handle.
        api: &'static str,
    },

    /// The underlying resource rejected the operation.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl AccessError {
    /// Signals the orchestrator handles by rendering dynamically instead.
    pub fn is_control_flow(&self) -> bool {
        matches!(
            self,
            Self::StaticBailout { .. }
                | Self::DynamicServer { .. }
                | Self::Postponed(_)
                | Self::PrerenderInterrupted { .. }
        )
    }

    /// Errors that must fail the build or cache compile.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::MissingStore { .. } | Self::InvalidDynamicUsage(_) | Self::Invariant(_)
        )
    }

    /// The latched cache-scope error, if this is one.
    pub fn invalid_dynamic_usage(&self) -> Option<&Arc<InvalidDynamicUsageError>> {
        match self {
            Self::InvalidDynamicUsage(err) => Some(err),
            _ => None,
        }
    }

    /// Short name of the error kind, for logs and tooling.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MissingStore { .. } => "missing-store",
            Self::InvalidDynamicUsage(_) => "invalid-dynamic-usage",
            Self::StaticBailout { .. } => "static-bailout",
            Self::DynamicServer { .. } => "dynamic-server",
            Self::Postponed(_) => "postponed",
            Self::PrerenderInterrupted { .. } => "prerender-interrupted",
            Self::Invariant(_) => "invariant",
            Self::AfterNotSupported { .. } => "after-not-supported",
            Self::HangingPromiseRejection { .. } => "hanging-promise-rejection",
            Self::SyncAccessUnavailable { .. } => "sync-access-unavailable",
            Self::Store(_) => "store",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_message_names_route_and_expression() {
        let err = InvalidDynamicUsageError::read("/shop", "headers", CacheScope::UseCache);
        let message = err.to_string();
        assert!(message.starts_with("Route /shop used \"headers\" inside \"use cache\"."));
        assert_eq!(err.route(), "/shop");
        assert_eq!(err.expression(), "headers");
        assert_eq!(err.scope(), CacheScope::UseCache);
    }

    #[test]
    fn test_unstable_cache_message() {
        let err = InvalidDynamicUsageError::read("/shop", "cookies", CacheScope::UnstableCache);
        assert!(err.to_string().contains("unstable_cache(...)"));
    }

    #[test]
    fn test_mutation_message() {
        let err =
            InvalidDynamicUsageError::mutation("/shop", "draftMode().enable()", CacheScope::PrivateCache);
        assert!(err
            .to_string()
            .contains("you must not enable or disable draftMode inside a cache"));
    }

    #[test]
    fn test_classification() {
        let bailout = AccessError::StaticBailout {
            route: "/".into(),
            expression: "cookies".into(),
        };
        assert!(bailout.is_control_flow());
        assert!(!bailout.is_fatal());

        let missing = AccessError::MissingStore {
            expression: "headers".into(),
        };
        assert!(missing.is_fatal());
        assert_eq!(missing.kind(), "missing-store");
        assert_eq!(missing.to_string(), "`headers` was called outside a request scope.");
    }

    #[test]
    fn test_transparent_invalid_usage() {
        let inner = Arc::new(InvalidDynamicUsageError::read("/", "cookies", CacheScope::UseCache));
        let err = AccessError::InvalidDynamicUsage(inner.clone());
        assert_eq!(err.to_string(), inner.to_string());
        assert!(Arc::ptr_eq(err.invalid_dynamic_usage().unwrap(), &inner));
    }
}
