//! Saving uploaded object keys and listing their download links.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};

use super::error::RecordError;
use super::repository::{FieldValues, RecordRepository, RecordSlot};
use crate::broker::{BrokerError, IssueRequest, RequestContext, SignedUrlBroker};
use crate::path::{PathResolver, validate_stored_key};

/// Download links of a record, per field and stored key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LinkSet {
    /// Record the links belong to.
    pub record_id: String,
    /// Event the links belong to.
    pub event_id: Option<u64>,
    /// Whether link generation is switched off for this project.
    pub links_disabled: bool,
    /// `field -> (stored key -> signed URL)`.
    pub links: BTreeMap<String, BTreeMap<String, String>>,
}

/// Persists uploaded keys into records and signs download links for them.
pub struct RecordLinkService<R: RecordRepository> {
    broker: Arc<SignedUrlBroker>,
    repo: Arc<R>,
    links_disabled: bool,
}

impl<R: RecordRepository> RecordLinkService<R> {
    /// Create a new record link service.
    #[must_use]
    pub fn new(broker: Arc<SignedUrlBroker>, repo: Arc<R>, links_disabled: bool) -> Self {
        Self {
            broker,
            repo,
            links_disabled,
        }
    }

    /// Whether link generation is switched off.
    #[must_use]
    pub fn links_disabled(&self) -> bool {
        self.links_disabled
    }

    /// Store `field -> "key1,key2"` values into the context's record and
    /// return the record's download links.
    ///
    /// A record id is reserved when the context has none.
    ///
    /// # Errors
    ///
    /// Returns `NotConfigured` for fields without a binding, `InvalidPath`
    /// for unsafe keys, or a store error.
    pub async fn save_files(
        &self,
        ctx: &RequestContext,
        files_path: BTreeMap<String, String>,
    ) -> Result<LinkSet, RecordError> {
        for (field, value) in &files_path {
            if self.broker.registry().resolve(field).is_none() {
                return Err(BrokerError::not_configured(field).into());
            }
            for key in split_keys(value) {
                validate_stored_key(key).map_err(BrokerError::from)?;
            }
        }

        let record_id = match ctx.record_id.as_deref().filter(|id| !id.is_empty()) {
            Some(id) => id.to_string(),
            None => {
                let id = self.repo.reserve_record_id().await?;
                info!(record_id = %id, "Reserved new record id");
                id
            }
        };
        let ctx = RequestContext {
            record_id: Some(record_id),
            event_id: self.event_id(ctx),
            ..ctx.clone()
        };

        let mut grouped: BTreeMap<RecordSlot, FieldValues> = BTreeMap::new();
        for (field, value) in files_path {
            grouped
                .entry(self.slot(&ctx, &field))
                .or_default()
                .insert(field, value);
        }
        for (slot, values) in grouped {
            debug!(
                record_id = %slot.record_id,
                event_id = ?slot.event_id,
                instance_id = ?slot.instance_id,
                fields = values.len(),
                "Saving stored file keys"
            );
            self.repo.save_data(slot, values).await?;
        }

        self.download_links(&ctx).await
    }

    /// Sign a download link for every stored key of every bound field of the
    /// context's record and event.
    ///
    /// # Errors
    ///
    /// Returns `MissingRecordId` without a record id, or the first failed
    /// issuance.
    pub async fn download_links(&self, ctx: &RequestContext) -> Result<LinkSet, RecordError> {
        let record_id = ctx
            .record_id
            .clone()
            .filter(|id| !id.is_empty())
            .ok_or(RecordError::MissingRecordId)?;
        let ctx = RequestContext {
            record_id: Some(record_id.clone()),
            event_id: self.event_id(ctx),
            ..ctx.clone()
        };

        let mut set = LinkSet {
            record_id,
            event_id: ctx.event_id,
            links_disabled: self.links_disabled,
            links: BTreeMap::new(),
        };
        if self.links_disabled {
            return Ok(set);
        }

        let mut slots: HashMap<RecordSlot, FieldValues> = HashMap::new();
        for binding in self.broker.registry().bindings() {
            let slot = self.slot(&ctx, &binding.field_name);
            if !slots.contains_key(&slot) {
                let values = self.repo.get_data(slot.clone()).await?;
                slots.insert(slot.clone(), values);
            }
            let Some(value) = slots.get(&slot).and_then(|v| v.get(&binding.field_name)) else {
                continue;
            };

            for key in split_keys(value) {
                let issued = self
                    .broker
                    .issue(&ctx, &IssueRequest::download(&binding.field_name, key))
                    .await?;
                set.links
                    .entry(binding.field_name.clone())
                    .or_default()
                    .insert(key.to_string(), issued.signed.url);
            }
        }

        Ok(set)
    }

    fn event_id(&self, ctx: &RequestContext) -> Option<u64> {
        ctx.event_id
            .or_else(|| self.broker.metadata().first_event_id())
    }

    fn slot(&self, ctx: &RequestContext, field: &str) -> RecordSlot {
        let repeating = self.broker.metadata().is_field_repeating(ctx.event_id, field);
        RecordSlot {
            record_id: ctx.record_id.clone().unwrap_or_default(),
            event_id: ctx.event_id,
            instance_id: repeating
                .then(|| ctx.instance_id.unwrap_or(PathResolver::DEFAULT_INSTANCE)),
        }
    }
}

fn split_keys(value: &str) -> impl Iterator<Item = &str> {
    value.split(',').map(str::trim).filter(|k| !k.is_empty())
}
