//! SQLite 持久化：定时任务表与处理结果表

pub mod connection;
pub mod entity;
pub mod repository;

pub use connection::{backup_database, establish_connection};
pub use repository::{DataTaskRepository, RecordRepository};

use crate::model::Record;
use async_trait::async_trait;
use sea_orm::{DatabaseConnection, DbErr};
use std::sync::{Arc, Mutex};

#[derive(thiserror::Error, Debug)]
pub enum StorageError {
    #[error("database error: {0}")]
    Db(#[from] DbErr),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("duplicate: {0}")]
    Duplicate(String),
}

/// 处理完成的记录落地
#[async_trait]
pub trait RecordSink: Send + Sync {
    async fn store(&self, records: &[Record]) -> Result<usize, StorageError>;
}

pub struct SeaOrmSink {
    db: Arc<DatabaseConnection>,
}

impl SeaOrmSink {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl RecordSink for SeaOrmSink {
    async fn store(&self, records: &[Record]) -> Result<usize, StorageError> {
        RecordRepository::upsert_many(&self.db, records).await
    }
}

/// 只保存在内存中的落地实现，用于试运行
#[derive(Default)]
pub struct MemorySink {
    records: Mutex<Vec<Record>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<Record> {
        self.records.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or(0)
    }
}

#[async_trait]
impl RecordSink for MemorySink {
    async fn store(&self, records: &[Record]) -> Result<usize, StorageError> {
        let mut guard = self
            .records
            .lock()
            .map_err(|_| StorageError::Db(DbErr::Custom("memory sink poisoned".to_string())))?;
        guard.extend_from_slice(records);
        Ok(records.len())
    }
}
