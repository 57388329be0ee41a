//! Shared types, errors, and configuration for Fieldvault.
//!
//! This crate provides common types used across all other crates:
//! - Storage platform identifiers
//! - Secret wrappers that never print their contents
//! - Application-wide error types
//! - Configuration management

pub mod config;
pub mod error;
pub mod types;

pub use config::{AppConfig, ModuleSettings, ProjectConfig, ServerConfig, SigningConfig};
pub use error::{AppError, AppResult};
pub use types::{Platform, SecretString};
