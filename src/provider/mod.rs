//! Aggregation provider gateway.
//!
//! # Data Flow
//! ```text
//! reconcile / sync / links
//!     → ProviderApi (trait object, injected)
//!     → ProviderGateway (reqwest, JSON over HTTPS)
//!     → bounded per-call timeout → ProviderError on failure
//! ```
//!
//! # Design Decisions
//! - Pure adapter: no state beyond the HTTP client and credentials
//! - Every call is bounded; elapse is a transient `ProviderError::Timeout`
//! - Access tokens are passed in, never logged, never retained

pub mod api;
pub mod client;
pub mod types;

pub use api::ProviderApi;
pub use client::ProviderGateway;
pub use types::{
    CreatedLinkToken, Institution, ItemMetadata, LinkTokenRequest, ProviderError, ProviderResult,
    TokenExchange, TransactionPage,
};
