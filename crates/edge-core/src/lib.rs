//! Core request, route and store types shared by the render pipeline.
//!
//! This crate provides the raw request resources and configuration:
//! - `CookieStore` / `HeaderStore` / `DraftModeProvider` - Request capabilities
//! - `RequestContext` - Raw resources of an incoming request
//! - `RouteConfig` - Route segment configuration
//! - `RenderConfig` - Development vs. production diagnostics

mod config;
mod context;
mod cookies;
mod draft;
mod error;
mod headers;

pub use config::*;
pub use context::*;
pub use cookies::*;
pub use draft::*;
pub use error::*;
pub use headers::*;
