//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (YAML/JSON/TOML)
//!     → loader.rs (parse & deserialize, regexps compiled here)
//!     → validation.rs (semantic checks, all errors collected)
//!     → Config (validated, immutable)
//!     → store.rs (SafeConfig, atomic swap of Arc<Config>)
//!
//! On reload (SIGHUP, /-/reload, watcher.rs):
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → store.rs swaps it in, or keeps the old one on error
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require full reload
//! - A document activates all of its modules or none of them
//! - Secrets serialize as a placeholder so dumps never leak them

pub mod loader;
pub mod regexp;
pub mod schema;
pub mod secret;
pub mod store;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, ConfigError};
pub use regexp::Regexp;
pub use schema::{
    Config, DnsProbe, DnsRrValidator, HeaderMatch, HttpProbe, IcmpProbe, IcmpProtocol,
    IpProtocol, Module, ProbeSettings, ProberKind, QueryResponse, TcpProbe, TransportProtocol,
};
pub use secret::Secret;
pub use store::SafeConfig;
pub use validation::ValidationError;
