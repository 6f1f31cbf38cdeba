use crate::entities::{spk, SpkStatus};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::services::spk_numbering::SpkNumber;
use crate::services::spks::{CreateSpkRequest, UpdateSpkRequest};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Validation and transformation hooks run around every persisted write.
///
/// `before_*` hooks run inside the write transaction and may reject the
/// request; `after_*` hooks run once the transaction has committed and are
/// purely observational.
#[async_trait]
pub trait RecordGuard: Send + Sync {
    type Record: Send + Sync;
    type Draft: Send;
    type Patch: Send;

    fn before_create(&self, draft: &mut Self::Draft, number: &SpkNumber);

    fn before_update(
        &self,
        existing: &Self::Record,
        patch: &mut Self::Patch,
    ) -> Result<(), ServiceError>;

    async fn after_create(&self, record: &Self::Record);

    async fn after_update(&self, before: &Self::Record, after: &Self::Record);

    async fn after_delete(&self, record: &Self::Record);
}

/// Enforces SPK number immutability and the FINISH edit-lock.
#[derive(Clone, Default)]
pub struct SpkGuard {
    event_sender: Option<Arc<EventSender>>,
}

impl SpkGuard {
    pub fn new(event_sender: Option<Arc<EventSender>>) -> Self {
        Self { event_sender }
    }

    async fn emit(&self, event: Event) {
        if let Some(sender) = &self.event_sender {
            sender.send_or_log(event).await;
        }
    }
}

fn is_locked(record: &spk::Model) -> bool {
    !record.is_editable || !record.status.is_editable()
}

#[async_trait]
impl RecordGuard for SpkGuard {
    type Record = spk::Model;
    type Draft = CreateSpkRequest;
    type Patch = UpdateSpkRequest;

    fn before_create(&self, draft: &mut CreateSpkRequest, number: &SpkNumber) {
        if let Some(supplied) = draft.spk_number.take() {
            warn!(
                supplied = %supplied,
                assigned = %number,
                "Ignoring client-supplied SPK number"
            );
        }
        draft.spk_number = Some(number.to_string());

        let status = *draft.status.get_or_insert(SpkStatus::OnProgress);
        if draft.is_editable.is_some_and(|v| v != status.is_editable()) {
            debug!(status = %status, "Overriding client-supplied isEditable");
        }
        draft.is_editable = Some(status.is_editable());
    }

    fn before_update(
        &self,
        existing: &spk::Model,
        patch: &mut UpdateSpkRequest,
    ) -> Result<(), ServiceError> {
        if let Some(requested) = patch.spk_number.take() {
            if requested != existing.spk_number {
                warn!(
                    spk_id = %existing.id,
                    spk_number = %existing.spk_number,
                    requested = %requested,
                    "Rejected attempt to change SPK number"
                );
                return Err(ServiceError::ImmutableField { field: "spkNumber" });
            }
        }

        if is_locked(existing) {
            warn!(
                spk_id = %existing.id,
                spk_number = %existing.spk_number,
                "Rejected update of finished SPK"
            );
            return Err(ServiceError::NotEditable(existing.spk_number.clone()));
        }

        let status = patch.status.unwrap_or(existing.status);
        patch.is_editable = Some(status.is_editable());
        Ok(())
    }

    async fn after_create(&self, record: &spk::Model) {
        info!(
            spk_id = %record.id,
            spk_number = %record.spk_number,
            status = %record.status,
            "SPK created"
        );
        self.emit(Event::SpkCreated {
            id: record.id,
            spk_number: record.spk_number.clone(),
            at: record.created_at,
        })
        .await;
        if record.status == SpkStatus::Finish {
            self.emit(Event::SpkFinished {
                id: record.id,
                spk_number: record.spk_number.clone(),
            })
            .await;
        }
    }

    async fn after_update(&self, before: &spk::Model, after: &spk::Model) {
        info!(
            spk_id = %after.id,
            spk_number = %after.spk_number,
            version = after.version,
            "SPK updated"
        );
        self.emit(Event::SpkUpdated {
            id: after.id,
            spk_number: after.spk_number.clone(),
            at: after.updated_at.unwrap_or_else(Utc::now),
        })
        .await;

        if before.status != after.status {
            self.emit(Event::SpkStatusChanged {
                id: after.id,
                spk_number: after.spk_number.clone(),
                old_status: before.status,
                new_status: after.status,
            })
            .await;
            if after.status == SpkStatus::Finish {
                self.emit(Event::SpkFinished {
                    id: after.id,
                    spk_number: after.spk_number.clone(),
                })
                .await;
            }
        }
    }

    async fn after_delete(&self, record: &spk::Model) {
        info!(spk_id = %record.id, spk_number = %record.spk_number, "SPK deleted");
        self.emit(Event::SpkDeleted {
            id: record.id,
            spk_number: record.spk_number.clone(),
        })
        .await;
    }
}
