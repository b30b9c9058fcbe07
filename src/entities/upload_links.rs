use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

pub const STATUS_ACTIVE: &str = "A";
pub const STATUS_DISABLED: &str = "D";

/// One minted upload link. Rows are written by the link admin; this service only reads them.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "upload_links")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub token: String,
    pub valid_from: DateTimeUtc,
    pub valid_until: DateTimeUtc,
    pub destination_path: String,
    pub status: String, // "A" (active) or "D" (disabled)
    pub created_at: Option<DateTimeUtc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
