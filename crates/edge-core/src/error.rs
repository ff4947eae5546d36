//! Errors raised by request resource stores.

use thiserror::Error;

/// Errors that can occur when reading or mutating a request resource.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Cookies were mutated outside a phase that allows it.
    #[error("Cookies can only be modified in a Server Action or Route Handler.")]
    ReadonlyCookies,

    /// Request headers are sealed.
    #[error("Headers cannot be modified during rendering.")]
    ReadonlyHeaders,

    /// A header name or value was rejected.
    #[error("Invalid header: {0}")]
    InvalidHeader(String),
}
