use crate::storage::entity::{data_task, processed_record};
use log::info;
use sea_orm::{
    ConnectOptions, ConnectionTrait, Database, DatabaseBackend, DatabaseConnection, DbErr, Schema,
    Statement,
};
use std::time::Duration;

pub async fn establish_connection(db_url: &str) -> Result<DatabaseConnection, DbErr> {
    let mut opt = ConnectOptions::new(db_url.to_owned());
    opt.max_connections(10)
        .min_connections(1)
        .connect_timeout(Duration::from_secs(8))
        .acquire_timeout(Duration::from_secs(8))
        .sqlx_logging(false);

    let db = Database::connect(opt).await?;

    // 启用 WAL 模式
    if db.get_database_backend() == DatabaseBackend::Sqlite {
        db.execute(Statement::from_string(
            DatabaseBackend::Sqlite,
            "PRAGMA journal_mode=WAL;".to_string(),
        ))
        .await?;
    }

    // 创建表（如果不存在）
    let builder = db.get_database_backend();
    let schema = Schema::new(builder);

    let stmt = builder.build(
        schema
            .create_table_from_entity(data_task::Entity)
            .if_not_exists(),
    );
    db.execute(stmt).await?;

    let stmt = builder.build(
        schema
            .create_table_from_entity(processed_record::Entity)
            .if_not_exists(),
    );
    db.execute(stmt).await?;

    // 唯一索引：同一类别同一指纹只保留一行
    db.execute(Statement::from_string(
        builder,
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_processed_records_fp ON processed_records(kind, fingerprint);"
            .to_string(),
    ))
    .await?;

    info!("数据库连接已建立，表结构已初始化");
    Ok(db)
}

/// SQLite 在线备份：`VACUUM INTO`
pub async fn backup_database(db: &DatabaseConnection, path: &str) -> Result<(), DbErr> {
    if db.get_database_backend() != DatabaseBackend::Sqlite {
        return Err(DbErr::Custom("仅 SQLite 支持 VACUUM INTO 备份".to_string()));
    }
    let escaped = path.replace('\'', "''");
    db.execute(Statement::from_string(
        DatabaseBackend::Sqlite,
        format!("VACUUM INTO '{}';", escaped),
    ))
    .await?;
    info!("数据库已备份到 {}", path);
    Ok(())
}

pub async fn ping(db: &DatabaseConnection) -> Result<(), DbErr> {
    db.execute(Statement::from_string(
        db.get_database_backend(),
        "SELECT 1;".to_string(),
    ))
    .await
    .map(|_| ())
}
