//! Core signed-URL broker for Fieldvault.
//!
//! This crate decides which storage platform owns a form field's files,
//! builds deterministic object keys for those files, and produces
//! time-limited signed URLs so browsers can upload and download directly
//! against Google Cloud Storage or Azure Blob Storage.
//!
//! # Modules
//!
//! - `project` - The host project's data dictionary
//! - `registry` - Field to platform/container bindings
//! - `path` - Object key construction and validation
//! - `platform` - Provider adapters and their signing schemes
//! - `broker` - Orchestration of a single signed-URL issuance
//! - `audit` - Issuance audit trail
//! - `record` - Saving uploaded keys into records and listing download links

pub mod audit;
pub mod broker;
pub mod path;
pub mod platform;
pub mod project;
pub mod record;
pub mod registry;
