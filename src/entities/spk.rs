use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use sea_orm::ActiveValue;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle status of an SPK (order letter).
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    Default,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    strum::Display,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
pub enum SpkStatus {
    #[default]
    #[sea_orm(string_value = "ON PROGRESS")]
    #[serde(rename = "ON PROGRESS")]
    #[strum(serialize = "ON PROGRESS")]
    OnProgress,
    #[sea_orm(string_value = "FINISH")]
    #[serde(rename = "FINISH")]
    #[strum(serialize = "FINISH")]
    Finish,
}

impl SpkStatus {
    /// A finished SPK is locked; everything else stays editable.
    pub fn is_editable(self) -> bool {
        !matches!(self, SpkStatus::Finish)
    }
}

/// The `spks` table.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "spks")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// `NNN/SPK/<ROMAN>/<YYYY>`, assigned once at creation.
    #[sea_orm(unique)]
    pub spk_number: String,

    pub status: SpkStatus,
    pub is_editable: bool,

    pub customer_name: String,
    pub customer_phone: Option<String>,
    pub customer_email: Option<String>,
    #[sea_orm(column_type = "Text", nullable)]
    pub notes: Option<String>,

    pub sales_id: Option<Uuid>,
    pub branch_id: Option<Uuid>,
    pub vehicle_type_id: Option<Uuid>,

    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub version: i32,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

#[async_trait]
impl ActiveModelBehavior for ActiveModel {
    async fn before_save<C>(mut self, _db: &C, insert: bool) -> Result<Self, DbErr>
    where
        C: ConnectionTrait,
    {
        // is_editable always mirrors status whenever status is written
        if let ActiveValue::Set(status) = &self.status {
            self.is_editable = ActiveValue::Set(status.is_editable());
        }
        if !insert {
            self.updated_at = ActiveValue::Set(Some(Utc::now()));
        }
        Ok(self)
    }
}
