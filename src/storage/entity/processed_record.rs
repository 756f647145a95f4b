use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// 处理完成的记录，(kind, fingerprint) 唯一
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Deserialize, Serialize)]
#[sea_orm(table_name = "processed_records")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub kind: String,
    pub fingerprint: String,
    pub symbol: Option<String>,
    pub record_date: Option<String>, // YYYYMMDD
    pub payload: String,             // Record JSON
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
