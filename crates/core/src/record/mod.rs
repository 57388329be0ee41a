//! Stored file keys in host records.
//!
//! After the browser finishes its direct uploads, the host saves the object
//! keys into the record as `field -> "key1,key2"`. This module writes those
//! values through a [`RecordRepository`] and signs download links for every
//! storage-backed field of a record.

mod error;
mod repository;
mod service;

pub use error::RecordError;
pub use repository::{FieldValues, InMemoryRecordRepository, RecordRepository, RecordSlot};
pub use service::{LinkSet, RecordLinkService};
