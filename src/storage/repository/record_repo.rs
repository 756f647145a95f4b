use crate::model::{DataKind, Record};
use crate::storage::entity::processed_record::{
    self, ActiveModel as ProcessedRecordActiveModel, Entity as ProcessedRecord,
};
use crate::storage::StorageError;
use chrono::Utc;
use sea_orm::sea_query::OnConflict;
use sea_orm::{
    ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter, Set,
};

fn record_symbol(record: &Record) -> Option<String> {
    match record {
        Record::Stock(s) => Some(s.symbol.clone()),
        Record::Market(b) => Some(b.symbol.clone()),
        Record::Financial(f) => Some(f.symbol.clone()),
        Record::News(_) => None,
        Record::Macro(m) => Some(m.indicator.clone()),
    }
}

const UPSERT_CHUNK: usize = 500;

pub struct RecordRepository;

impl RecordRepository {
    /// 按 (kind, fingerprint) upsert，返回写入条数
    pub async fn upsert_many(
        db: &DatabaseConnection,
        records: &[Record],
    ) -> Result<usize, StorageError> {
        if records.is_empty() {
            return Ok(0);
        }
        let now = Utc::now().timestamp();
        // SQLite 单条语句的参数个数有上限，分批写入
        for chunk in records.chunks(UPSERT_CHUNK) {
            Self::upsert_chunk(db, chunk, now).await?;
        }
        Ok(records.len())
    }

    async fn upsert_chunk(
        db: &DatabaseConnection,
        records: &[Record],
        now: i64,
    ) -> Result<(), StorageError> {
        let mut models = Vec::with_capacity(records.len());
        for r in records {
            models.push(ProcessedRecordActiveModel {
                kind: Set(r.kind().as_str().to_string()),
                fingerprint: Set(r.fingerprint()),
                symbol: Set(record_symbol(r)),
                record_date: Set(r.record_date().map(|d| d.format("%Y%m%d").to_string())),
                payload: Set(serde_json::to_string(r)?),
                created_at: Set(now),
                updated_at: Set(now),
                ..Default::default()
            });
        }
        ProcessedRecord::insert_many(models)
            .on_conflict(
                OnConflict::columns([
                    processed_record::Column::Kind,
                    processed_record::Column::Fingerprint,
                ])
                .update_columns([
                    processed_record::Column::Symbol,
                    processed_record::Column::RecordDate,
                    processed_record::Column::Payload,
                    processed_record::Column::UpdatedAt,
                ])
                .to_owned(),
            )
            .exec(db)
            .await?;
        Ok(())
    }

    pub async fn find(
        db: &DatabaseConnection,
        kind: DataKind,
        fingerprint: &str,
    ) -> Result<Option<Record>, StorageError> {
        let row = ProcessedRecord::find()
            .filter(processed_record::Column::Kind.eq(kind.as_str()))
            .filter(processed_record::Column::Fingerprint.eq(fingerprint))
            .one(db)
            .await?;
        match row {
            Some(m) => Ok(Some(serde_json::from_str(&m.payload)?)),
            None => Ok(None),
        }
    }

    pub async fn count_by_kind(
        db: &DatabaseConnection,
        kind: DataKind,
    ) -> Result<u64, StorageError> {
        Ok(ProcessedRecord::find()
            .filter(processed_record::Column::Kind.eq(kind.as_str()))
            .count(db)
            .await?)
    }
}
