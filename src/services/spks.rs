use crate::db::{self, DbPool, WriteGate};
use crate::entities::{spk, SpkStatus};
use crate::errors::ServiceError;
use crate::events::EventSender;
use crate::services::spk_guard::{RecordGuard, SpkGuard};
use crate::services::spk_numbering::{SpkNumber, SpkNumberGenerator};
use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DbErr, EntityTrait, ModelTrait,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set, SqlErr,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{error, info, instrument};
use uuid::Uuid;
use validator::Validate;

/// Request body for creating an SPK.
///
/// `spkNumber` (or the legacy `noSPK`) is accepted only so it can be discarded;
/// numbers are always assigned by the server.
#[derive(Debug, Clone, Default, Deserialize, Serialize, Validate)]
#[serde(default, rename_all = "camelCase")]
pub struct CreateSpkRequest {
    #[serde(alias = "noSPK")]
    pub spk_number: Option<String>,
    pub status: Option<SpkStatus>,
    pub is_editable: Option<bool>,
    #[validate(length(min = 1, max = 255, message = "Customer name is required"))]
    pub customer_name: String,
    #[validate(length(max = 32))]
    pub customer_phone: Option<String>,
    #[validate(email)]
    pub customer_email: Option<String>,
    pub notes: Option<String>,
    pub sales_id: Option<Uuid>,
    pub branch_id: Option<Uuid>,
    pub vehicle_type_id: Option<Uuid>,
}

/// Partial update; absent fields are left untouched.
///
/// Optional fields distinguish an absent key (`None`) from an explicit
/// `null` (`Some(None)`), which clears the stored value.
#[derive(Debug, Clone, Default, Deserialize, Serialize, Validate)]
#[serde(default, rename_all = "camelCase")]
pub struct UpdateSpkRequest {
    #[serde(alias = "noSPK")]
    pub spk_number: Option<String>,
    pub status: Option<SpkStatus>,
    pub is_editable: Option<bool>,
    #[validate(length(min = 1, max = 255, message = "Customer name cannot be empty"))]
    pub customer_name: Option<String>,
    #[serde(with = "serde_with::rust::double_option", skip_serializing_if = "Option::is_none")]
    #[validate(length(max = 32))]
    pub customer_phone: Option<Option<String>>,
    #[serde(with = "serde_with::rust::double_option", skip_serializing_if = "Option::is_none")]
    #[validate(email)]
    pub customer_email: Option<Option<String>>,
    #[serde(with = "serde_with::rust::double_option", skip_serializing_if = "Option::is_none")]
    pub notes: Option<Option<String>>,
    #[serde(with = "serde_with::rust::double_option", skip_serializing_if = "Option::is_none")]
    pub sales_id: Option<Option<Uuid>>,
    #[serde(with = "serde_with::rust::double_option", skip_serializing_if = "Option::is_none")]
    pub branch_id: Option<Option<Uuid>>,
    #[serde(with = "serde_with::rust::double_option", skip_serializing_if = "Option::is_none")]
    pub vehicle_type_id: Option<Option<Uuid>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpkResponse {
    pub id: Uuid,
    pub spk_number: String,
    pub status: SpkStatus,
    pub is_editable: bool,
    pub customer_name: String,
    pub customer_phone: Option<String>,
    pub customer_email: Option<String>,
    pub notes: Option<String>,
    pub sales_id: Option<Uuid>,
    pub branch_id: Option<Uuid>,
    pub vehicle_type_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub version: i32,
}

impl From<spk::Model> for SpkResponse {
    fn from(model: spk::Model) -> Self {
        Self {
            id: model.id,
            spk_number: model.spk_number,
            status: model.status,
            is_editable: model.is_editable,
            customer_name: model.customer_name,
            customer_phone: model.customer_phone,
            customer_email: model.customer_email,
            notes: model.notes,
            sales_id: model.sales_id,
            branch_id: model.branch_id,
            vehicle_type_id: model.vehicle_type_id,
            created_at: model.created_at,
            updated_at: model.updated_at,
            version: model.version,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpkListResponse {
    pub spks: Vec<SpkResponse>,
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
}

/// Aggregate counts; references that are not set are grouped under `"unknown"`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpkStatistics {
    pub total: u64,
    pub on_progress: u64,
    pub finished: u64,
    pub by_branch: BTreeMap<String, u64>,
    pub by_sales: BTreeMap<String, u64>,
    pub by_vehicle_type: BTreeMap<String, u64>,
}

const UNKNOWN_REFERENCE: &str = "unknown";

fn reference_key(id: Option<Uuid>) -> String {
    id.map(|id| id.to_string())
        .unwrap_or_else(|| UNKNOWN_REFERENCE.to_string())
}

fn insert_error(e: DbErr) -> ServiceError {
    match e.sql_err() {
        Some(SqlErr::UniqueConstraintViolation(detail)) => {
            ServiceError::Conflict(format!("SPK number already issued: {}", detail))
        }
        _ => ServiceError::DatabaseError(e),
    }
}

/// SPK lifecycle: numbering on create, edit-lock on update, pass-through reads.
#[derive(Clone)]
pub struct SpkService {
    db_pool: Arc<DbPool>,
    numbering: SpkNumberGenerator,
    guard: SpkGuard,
    write_gate: WriteGate,
}

impl SpkService {
    pub fn new(
        db_pool: Arc<DbPool>,
        event_sender: Option<Arc<EventSender>>,
        numbering: SpkNumberGenerator,
    ) -> Self {
        let write_gate = WriteGate::for_backend(db_pool.get_database_backend());
        Self {
            db_pool,
            numbering,
            guard: SpkGuard::new(event_sender),
            write_gate,
        }
    }

    /// Creates an SPK stamped with the current time.
    pub async fn create_spk(&self, request: CreateSpkRequest) -> Result<SpkResponse, ServiceError> {
        self.create_spk_at(request, Utc::now()).await
    }

    /// Creates an SPK as if it were created at `now`.
    ///
    /// Number issuance and the insert share one transaction; nothing is
    /// persisted and no number is consumed when either fails.
    #[instrument(skip(self, request), fields(customer_name = %request.customer_name))]
    pub async fn create_spk_at(
        &self,
        request: CreateSpkRequest,
        now: DateTime<Utc>,
    ) -> Result<SpkResponse, ServiceError> {
        request.validate()?;

        let db = &*self.db_pool;
        let writer = self.write_gate.enter("create_spk").await?;
        let txn = db::begin(db, "create_spk").await?;

        let number = self.numbering.generate_number(&txn, now).await?;

        let mut draft = request;
        self.guard.before_create(&mut draft, &number);

        let status = draft.status.unwrap_or_default();
        let spk = spk::ActiveModel {
            id: Set(Uuid::new_v4()),
            spk_number: Set(draft.spk_number.unwrap_or_else(|| number.to_string())),
            status: Set(status),
            is_editable: Set(draft.is_editable.unwrap_or_else(|| status.is_editable())),
            customer_name: Set(draft.customer_name),
            customer_phone: Set(draft.customer_phone),
            customer_email: Set(draft.customer_email),
            notes: Set(draft.notes),
            sales_id: Set(draft.sales_id),
            branch_id: Set(draft.branch_id),
            vehicle_type_id: Set(draft.vehicle_type_id),
            created_at: Set(now),
            updated_at: Set(None),
            version: Set(1),
        };

        let created = spk.insert(&txn).await.map_err(|e| {
            error!(spk_number = %number, error = %e, "Failed to insert SPK");
            insert_error(e)
        })?;

        db::commit(txn, "create_spk").await?;
        drop(writer);

        self.guard.after_create(&created).await;
        Ok(created.into())
    }

    /// Applies a partial update under an exclusive row lock.
    #[instrument(skip(self, patch), fields(spk_id = %id))]
    pub async fn update_spk(
        &self,
        id: Uuid,
        mut patch: UpdateSpkRequest,
    ) -> Result<SpkResponse, ServiceError> {
        patch.validate()?;

        let db = &*self.db_pool;
        let writer = self.write_gate.enter("update_spk").await?;
        let txn = db::begin(db, "update_spk").await?;

        let existing = spk::Entity::find_by_id(id)
            .lock_exclusive()
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("SPK {} not found", id)))?;

        self.guard.before_update(&existing, &mut patch)?;

        let mut active: spk::ActiveModel = existing.clone().into();
        if let Some(status) = patch.status {
            active.status = Set(status);
        }
        if let Some(is_editable) = patch.is_editable {
            active.is_editable = Set(is_editable);
        }
        if let Some(customer_name) = patch.customer_name {
            active.customer_name = Set(customer_name);
        }
        if let Some(phone) = patch.customer_phone {
            active.customer_phone = Set(phone);
        }
        if let Some(email) = patch.customer_email {
            active.customer_email = Set(email);
        }
        if let Some(notes) = patch.notes {
            active.notes = Set(notes);
        }
        if let Some(sales_id) = patch.sales_id {
            active.sales_id = Set(sales_id);
        }
        if let Some(branch_id) = patch.branch_id {
            active.branch_id = Set(branch_id);
        }
        if let Some(vehicle_type_id) = patch.vehicle_type_id {
            active.vehicle_type_id = Set(vehicle_type_id);
        }
        active.version = Set(existing.version + 1);
        active.updated_at = Set(Some(Utc::now()));

        let updated = active.update(&txn).await.map_err(|e| {
            error!(spk_id = %id, error = %e, "Failed to update SPK");
            ServiceError::DatabaseError(e)
        })?;

        db::commit(txn, "update_spk").await?;
        drop(writer);

        self.guard.after_update(&existing, &updated).await;
        Ok(updated.into())
    }

    #[instrument(skip(self), fields(spk_id = %id))]
    pub async fn get_spk(&self, id: Uuid) -> Result<Option<SpkResponse>, ServiceError> {
        let db = &*self.db_pool;
        let spk = spk::Entity::find_by_id(id).one(db).await.map_err(|e| {
            error!(spk_id = %id, error = %e, "Failed to fetch SPK");
            ServiceError::DatabaseError(e)
        })?;
        Ok(spk.map(Into::into))
    }

    /// Looks an SPK up by its document number; malformed numbers are rejected.
    #[instrument(skip(self))]
    pub async fn get_spk_by_number(&self, number: &str) -> Result<Option<SpkResponse>, ServiceError> {
        let number: SpkNumber = number.parse()?;
        let db = &*self.db_pool;
        let spk = spk::Entity::find()
            .filter(spk::Column::SpkNumber.eq(number.to_string()))
            .one(db)
            .await?;
        Ok(spk.map(Into::into))
    }

    /// Newest first, optionally filtered by status. `page` is 1-based; pages
    /// past the last one are empty.
    #[instrument(skip(self))]
    pub async fn list_spks(
        &self,
        page: u64,
        per_page: u64,
        status: Option<SpkStatus>,
    ) -> Result<SpkListResponse, ServiceError> {
        let db = &*self.db_pool;
        let page = page.max(1);
        let per_page = per_page.max(1);

        let mut query = spk::Entity::find();
        if let Some(status) = status {
            query = query.filter(spk::Column::Status.eq(status));
        }
        let paginator = query
            .order_by_desc(spk::Column::CreatedAt)
            .order_by_desc(spk::Column::SpkNumber)
            .paginate(db, per_page);

        let total = paginator.num_items().await.map_err(|e| {
            error!(error = %e, "Failed to count SPKs");
            ServiceError::DatabaseError(e)
        })?;

        // The offset of any page up to the last fits in the row count.
        let spks = if page > total.div_ceil(per_page) {
            Vec::new()
        } else {
            paginator.fetch_page(page - 1).await.map_err(|e| {
                error!(error = %e, page = page, per_page = per_page, "Failed to fetch SPK page");
                ServiceError::DatabaseError(e)
            })?
        };

        Ok(SpkListResponse {
            spks: spks.into_iter().map(Into::into).collect(),
            total,
            page,
            per_page,
        })
    }

    /// SPKs created within `[start, end]`, newest first.
    #[instrument(skip(self))]
    pub async fn find_by_date_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<SpkResponse>, ServiceError> {
        if start > end {
            return Err(ServiceError::BadRequest(
                "Range start must not be after range end".to_string(),
            ));
        }

        let db = &*self.db_pool;
        let spks = spk::Entity::find()
            .filter(spk::Column::CreatedAt.gte(start))
            .filter(spk::Column::CreatedAt.lte(end))
            .order_by_desc(spk::Column::CreatedAt)
            .all(db)
            .await?;

        Ok(spks.into_iter().map(Into::into).collect())
    }

    #[instrument(skip(self))]
    pub async fn statistics(&self) -> Result<SpkStatistics, ServiceError> {
        let db = &*self.db_pool;
        let rows: Vec<(SpkStatus, Option<Uuid>, Option<Uuid>, Option<Uuid>)> =
            spk::Entity::find()
                .select_only()
                .column(spk::Column::Status)
                .column(spk::Column::BranchId)
                .column(spk::Column::SalesId)
                .column(spk::Column::VehicleTypeId)
                .into_tuple()
                .all(db)
                .await?;

        let mut stats = SpkStatistics::default();
        for (status, branch_id, sales_id, vehicle_type_id) in rows {
            stats.total += 1;
            match status {
                SpkStatus::OnProgress => stats.on_progress += 1,
                SpkStatus::Finish => stats.finished += 1,
            }
            *stats.by_branch.entry(reference_key(branch_id)).or_default() += 1;
            *stats.by_sales.entry(reference_key(sales_id)).or_default() += 1;
            *stats
                .by_vehicle_type
                .entry(reference_key(vehicle_type_id))
                .or_default() += 1;
        }

        Ok(stats)
    }

    /// Deletes an SPK. Its number is not returned to the month's counter.
    #[instrument(skip(self), fields(spk_id = %id))]
    pub async fn delete_spk(&self, id: Uuid) -> Result<(), ServiceError> {
        let db = &*self.db_pool;
        let existing = spk::Entity::find_by_id(id)
            .one(db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("SPK {} not found", id)))?;

        existing.clone().delete(db).await.map_err(|e| {
            error!(spk_id = %id, error = %e, "Failed to delete SPK");
            ServiceError::DatabaseError(e)
        })?;

        info!(spk_id = %id, spk_number = %existing.spk_number, "SPK removed");
        self.guard.after_delete(&existing).await;
        Ok(())
    }
}
