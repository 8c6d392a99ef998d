//! # Lumen Core Library (`lumen-core`)
//!
//! `lumen-core` is the infrastructure layer of the lumen display stack. It
//! carries the pieces every other crate in the workspace leans on:
//!
//! - **Error Handling**: a unified error system through the [`CoreError`] enum
//!   and the more specific [`ConfigError`].
//! - **Configuration Management**: TOML-based configuration loading with
//!   default fallbacks through [`ConfigLoader`] and [`CoreConfig`].
//! - **Logging**: a flexible logging framework built on the `tracing` crate,
//!   configurable for console and file output in text or JSON format.
//! - **Core Data Types**: geometry primitives ([`Size`], [`SizeBounds`]) used
//!   by the display backend to express device capabilities.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use lumen_core::config::ConfigLoader;
//! use lumen_core::logging::initialize_logging;
//! use lumen_core::error::CoreError;
//!
//! fn main() -> Result<(), CoreError> {
//!     let config = ConfigLoader::load_from_path("lumen.toml".as_ref())?;
//!     initialize_logging(&config.logging)?;
//!     tracing::info!("lumen core initialized");
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod logging;
pub mod types;

// Re-export key types for convenience.
pub use config::{BackendConfig, ConfigLoader, CoreConfig, LoggingConfig};
pub use error::{ConfigError, CoreError};
pub use logging::{init_minimal_logging, initialize_logging};
pub use types::{Size, SizeBounds};
