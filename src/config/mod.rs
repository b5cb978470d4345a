//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse, deserialize, env overrides)
//!     → validation.rs (semantic checks)
//!     → ServiceConfig (validated, immutable)
//!     → shared via ArcSwap to handlers
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → atomic swap of Arc<ServiceConfig>
//!     → handlers observe new admin key / delivery windows
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require full reload
//! - All fields have defaults to allow minimal configs
//! - Secrets may come from the environment instead of the file
//! - Services built at startup (database pool, provider client) keep the
//!   values they were constructed with; only request-time settings reload

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, load_or_default, ConfigError};
pub use schema::{
    AdminConfig, DatabaseConfig, EncryptionConfig, ListenerConfig, ObservabilityConfig,
    ProviderConfig, ServiceConfig, SyncConfig, TimeoutConfig, WebhookConfig,
};
