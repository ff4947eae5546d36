//! Request data access for multi-phase rendering.
//!
//! The same component code runs in several phases: live requests, dry-run
//! prerenders, partial prerenders, legacy static generation and cache
//! scopes. This crate decides, at every access to cookies, headers, or
//! draft mode, what that access means in the current phase:
//!
//! - `AccessCoordinator` - The three entry points and their decision protocol
//! - `WorkContext` / `WorkUnitContext` - Per-attempt and per-phase state
//! - `DynamicHandle` - Resolved or deferred handles, memoized per unit
//! - `SyncAccessGuard` - Development diagnostics for unawaited access
//! - `RenderSignal` / `HangingHandle` - Dry-run cancellation
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use edge_core::{Method, RenderConfig, RequestContext};
//! use edge_render::{AccessCoordinator, AccessScope, RequestUnit, WorkContext, WorkUnit, WorkUnitContext};
//!
//! let request = RequestContext::new(Method::Get, "/");
//! let scope = AccessScope::new(
//!     Arc::new(WorkContext::new("/")),
//!     Arc::new(WorkUnitContext::new(WorkUnit::Request(RequestUnit::from_request(&request)))),
//! );
//!
//! let coordinator = AccessCoordinator::new(RenderConfig::production());
//! let handle = coordinator.fetch_headers(&scope).unwrap();
//! let headers = futures::executor::block_on(handle.resolve()).unwrap();
//! assert!(headers.keys().is_empty());
//! ```

mod coordinator;
mod cookies;
mod deferred;
mod draft_mode;
mod error;
mod guard;
mod handle;
mod headers;
mod memo;
mod postpone;
mod signal;
mod unit;
mod work;

pub use coordinator::*;
pub use cookies::*;
pub use deferred::*;
pub use draft_mode::*;
pub use error::*;
pub use guard::*;
pub use handle::*;
pub use headers::*;
pub use memo::*;
pub use postpone::*;
pub use signal::*;
pub use unit::*;
pub use work::*;
