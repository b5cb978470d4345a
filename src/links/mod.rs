//! Link token issuance.
//!
//! Tokens created here are stored `pending`; the link session completer
//! consumes them when the provider reports the session finished.

pub mod issuer;

pub use issuer::LinkTokenIssuer;
