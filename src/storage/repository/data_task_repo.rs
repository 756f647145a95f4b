use crate::model::{DataTaskConfig, DataTaskSpec, DataTaskStatus};
use crate::storage::entity::data_task::{self, ActiveModel as DataTaskActiveModel, Entity as DataTask};
use crate::storage::StorageError;
use chrono::Utc;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
};

pub struct DataTaskRepository;

impl DataTaskRepository {
    pub async fn create(
        db: &DatabaseConnection,
        spec: &DataTaskSpec,
        next_run_at: Option<i64>,
    ) -> Result<data_task::Model, StorageError> {
        if Self::find_by_name(db, &spec.task_name).await?.is_some() {
            return Err(StorageError::Duplicate(spec.task_name.clone()));
        }
        let now = Utc::now().timestamp();
        let active_model = DataTaskActiveModel {
            task_name: Set(spec.task_name.trim().to_string()),
            task_type: Set(spec.task_type.as_str().to_string()),
            cron_expr: Set(spec.cron_expr.trim().to_string()),
            status: Set(spec.status.as_str().to_string()),
            config: Set(serde_json::to_string(&spec.config)?),
            description: Set(spec.description.clone()),
            last_run_at: Set(None),
            next_run_at: Set(next_run_at),
            run_count: Set(0),
            success_count: Set(0),
            failure_count: Set(0),
            last_error: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        };
        Ok(active_model.insert(db).await?)
    }

    /// 覆盖定义字段，计数器保持不变
    pub async fn update(
        db: &DatabaseConnection,
        id: i32,
        spec: &DataTaskSpec,
        next_run_at: Option<i64>,
    ) -> Result<data_task::Model, StorageError> {
        let existing = Self::find_by_id(db, id)
            .await?
            .ok_or_else(|| StorageError::NotFound(format!("data_task {}", id)))?;
        if existing.task_name != spec.task_name {
            if let Some(other) = Self::find_by_name(db, &spec.task_name).await? {
                if other.id != id {
                    return Err(StorageError::Duplicate(spec.task_name.clone()));
                }
            }
        }
        let update = DataTaskActiveModel {
            id: Set(id),
            task_name: Set(spec.task_name.trim().to_string()),
            task_type: Set(spec.task_type.as_str().to_string()),
            cron_expr: Set(spec.cron_expr.trim().to_string()),
            status: Set(spec.status.as_str().to_string()),
            config: Set(serde_json::to_string(&spec.config)?),
            description: Set(spec.description.clone()),
            next_run_at: Set(next_run_at),
            updated_at: Set(Utc::now().timestamp()),
            ..Default::default()
        };
        Ok(update.update(db).await?)
    }

    pub async fn delete(db: &DatabaseConnection, id: i32) -> Result<bool, StorageError> {
        let res = DataTask::delete_by_id(id).exec(db).await?;
        Ok(res.rows_affected > 0)
    }

    pub async fn find_by_id(
        db: &DatabaseConnection,
        id: i32,
    ) -> Result<Option<data_task::Model>, StorageError> {
        Ok(DataTask::find_by_id(id).one(db).await?)
    }

    pub async fn find_by_name(
        db: &DatabaseConnection,
        name: &str,
    ) -> Result<Option<data_task::Model>, StorageError> {
        Ok(DataTask::find()
            .filter(data_task::Column::TaskName.eq(name.trim()))
            .one(db)
            .await?)
    }

    pub async fn list_all(db: &DatabaseConnection) -> Result<Vec<data_task::Model>, StorageError> {
        Ok(DataTask::find()
            .order_by_asc(data_task::Column::Id)
            .all(db)
            .await?)
    }

    /// 已启用且到期的任务
    pub async fn due_tasks(
        db: &DatabaseConnection,
        now: i64,
    ) -> Result<Vec<data_task::Model>, StorageError> {
        Ok(DataTask::find()
            .filter(data_task::Column::Status.eq(DataTaskStatus::Enabled.as_str()))
            .filter(data_task::Column::NextRunAt.lte(now))
            .order_by_asc(data_task::Column::NextRunAt)
            .all(db)
            .await?)
    }

    /// 认领一次执行：状态仍为 `from` 时置为 running，同时 run_count + 1 并记录本次和下次时间
    ///
    /// 单条条件更新，并发认领只有一个成功；返回 false 表示任务已被占用或状态已变化。
    pub async fn try_claim(
        db: &DatabaseConnection,
        id: i32,
        from: DataTaskStatus,
        now: i64,
        next_run_at: Option<i64>,
    ) -> Result<bool, StorageError> {
        if from == DataTaskStatus::Running {
            return Ok(false);
        }
        let res = DataTask::update_many()
            .col_expr(
                data_task::Column::Status,
                Expr::value(DataTaskStatus::Running.as_str()),
            )
            .col_expr(
                data_task::Column::RunCount,
                Expr::col(data_task::Column::RunCount).add(1),
            )
            .col_expr(data_task::Column::LastRunAt, Expr::value(now))
            .col_expr(data_task::Column::NextRunAt, Expr::value(next_run_at))
            .col_expr(data_task::Column::UpdatedAt, Expr::value(now))
            .filter(data_task::Column::Id.eq(id))
            .filter(data_task::Column::Status.eq(from.as_str()))
            .exec(db)
            .await?;
        Ok(res.rows_affected == 1)
    }

    /// 执行结束：成功/失败计数 + 1，running 恢复为认领前的状态
    pub async fn mark_finished(
        db: &DatabaseConnection,
        id: i32,
        restore: DataTaskStatus,
        error: Option<String>,
    ) -> Result<(), StorageError> {
        let now = Utc::now().timestamp();
        let counter = if error.is_none() {
            data_task::Column::SuccessCount
        } else {
            data_task::Column::FailureCount
        };
        DataTask::update_many()
            .col_expr(counter, Expr::col(counter).add(1))
            .col_expr(data_task::Column::LastError, Expr::value(error))
            .col_expr(data_task::Column::UpdatedAt, Expr::value(now))
            .filter(data_task::Column::Id.eq(id))
            .exec(db)
            .await?;
        DataTask::update_many()
            .col_expr(data_task::Column::Status, Expr::value(restore.as_str()))
            .filter(data_task::Column::Id.eq(id))
            .filter(data_task::Column::Status.eq(DataTaskStatus::Running.as_str()))
            .exec(db)
            .await?;
        Ok(())
    }

    /// 启动恢复：上次进程退出时仍为 running 的任务记一次失败并恢复为 enabled
    pub async fn reset_stale_running(db: &DatabaseConnection) -> Result<u64, StorageError> {
        let now = Utc::now().timestamp();
        let res = DataTask::update_many()
            .col_expr(
                data_task::Column::Status,
                Expr::value(DataTaskStatus::Enabled.as_str()),
            )
            .col_expr(
                data_task::Column::FailureCount,
                Expr::col(data_task::Column::FailureCount).add(1),
            )
            .col_expr(
                data_task::Column::LastError,
                Expr::value("进程退出时任务仍在运行"),
            )
            .col_expr(data_task::Column::UpdatedAt, Expr::value(now))
            .filter(data_task::Column::Status.eq(DataTaskStatus::Running.as_str()))
            .exec(db)
            .await?;
        Ok(res.rows_affected)
    }

    /// 运维操作：清零计数器
    pub async fn reset_counters(db: &DatabaseConnection, id: i32) -> Result<(), StorageError> {
        DataTask::update_many()
            .col_expr(data_task::Column::RunCount, Expr::value(0i64))
            .col_expr(data_task::Column::SuccessCount, Expr::value(0i64))
            .col_expr(data_task::Column::FailureCount, Expr::value(0i64))
            .col_expr(data_task::Column::UpdatedAt, Expr::value(Utc::now().timestamp()))
            .filter(data_task::Column::Id.eq(id))
            .exec(db)
            .await?;
        Ok(())
    }

    pub fn decode_config(model: &data_task::Model) -> Result<DataTaskConfig, StorageError> {
        Ok(serde_json::from_str(&model.config)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DataTaskType, FetchRequest};
    use crate::storage::connection::establish_connection;

    async fn test_db() -> (tempfile::TempDir, DatabaseConnection) {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("t.db").display());
        let db = establish_connection(&url).await.unwrap();
        (dir, db)
    }

    fn spec(name: &str) -> DataTaskSpec {
        DataTaskSpec {
            task_name: name.into(),
            task_type: DataTaskType::MarketData,
            cron_expr: "0 17 * * 1-5".into(),
            status: DataTaskStatus::Enabled,
            config: DataTaskConfig::Collect {
                collector: None,
                request: FetchRequest::DailyQuote {
                    symbol: "000001.SZ".into(),
                    start_date: "20240101".into(),
                    end_date: "20240105".into(),
                },
            },
            description: None,
        }
    }

    #[tokio::test]
    async fn task_names_are_unique() {
        let (_dir, db) = test_db().await;
        DataTaskRepository::create(&db, &spec("bars"), Some(0))
            .await
            .unwrap();
        let err = DataTaskRepository::create(&db, &spec("bars"), Some(0))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Duplicate(_)));
    }

    #[tokio::test]
    async fn run_lifecycle_updates_counters() {
        let (_dir, db) = test_db().await;
        let task = DataTaskRepository::create(&db, &spec("bars"), Some(100))
            .await
            .unwrap();
        assert_eq!(DataTaskRepository::due_tasks(&db, 99).await.unwrap().len(), 0);
        assert_eq!(DataTaskRepository::due_tasks(&db, 100).await.unwrap().len(), 1);

        assert!(DataTaskRepository::try_claim(
            &db,
            task.id,
            DataTaskStatus::Enabled,
            100,
            Some(200)
        )
        .await
        .unwrap());
        let running = DataTaskRepository::find_by_id(&db, task.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(running.status, "running");
        assert_eq!(running.run_count, 1);
        assert_eq!(running.next_run_at, Some(200));

        DataTaskRepository::mark_finished(
            &db,
            task.id,
            DataTaskStatus::Enabled,
            Some("boom".into()),
        )
            .await
            .unwrap();
        let done = DataTaskRepository::find_by_id(&db, task.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(done.status, "enabled");
        assert_eq!(done.failure_count, 1);
        assert_eq!(done.success_count, 0);
        assert_eq!(done.last_error.as_deref(), Some("boom"));
        assert_eq!(
            DataTaskRepository::decode_config(&done).unwrap(),
            spec("bars").config
        );
    }

    #[tokio::test]
    async fn delete_reports_missing_rows() {
        let (_dir, db) = test_db().await;
        let task = DataTaskRepository::create(&db, &spec("bars"), None)
            .await
            .unwrap();
        assert!(DataTaskRepository::delete(&db, task.id).await.unwrap());
        assert!(!DataTaskRepository::delete(&db, task.id).await.unwrap());
    }

    #[tokio::test]
    async fn second_claim_on_running_task_fails() {
        let (_dir, db) = test_db().await;
        let task = DataTaskRepository::create(&db, &spec("bars"), Some(0))
            .await
            .unwrap();
        let enabled = DataTaskStatus::Enabled;
        assert!(DataTaskRepository::try_claim(&db, task.id, enabled, 10, None)
            .await
            .unwrap());
        assert!(!DataTaskRepository::try_claim(&db, task.id, enabled, 11, None)
            .await
            .unwrap());
        let m = DataTaskRepository::find_by_id(&db, task.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(m.run_count, 1);
        assert_eq!(m.last_run_at, Some(10));
    }

    #[tokio::test]
    async fn stale_running_tasks_are_recovered() {
        let (_dir, db) = test_db().await;
        let stuck = DataTaskRepository::create(&db, &spec("stuck"), Some(0))
            .await
            .unwrap();
        let idle = DataTaskRepository::create(&db, &spec("idle"), Some(0))
            .await
            .unwrap();
        DataTaskRepository::try_claim(&db, stuck.id, DataTaskStatus::Enabled, 10, Some(20))
            .await
            .unwrap();

        assert_eq!(DataTaskRepository::reset_stale_running(&db).await.unwrap(), 1);
        let m = DataTaskRepository::find_by_id(&db, stuck.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(m.status, "enabled");
        assert_eq!(m.failure_count, 1);
        assert!(m.last_error.is_some());
        let other = DataTaskRepository::find_by_id(&db, idle.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(other.failure_count, 0);

        let due = DataTaskRepository::due_tasks(&db, 30).await.unwrap();
        assert_eq!(due.len(), 2);
        assert_eq!(DataTaskRepository::reset_stale_running(&db).await.unwrap(), 0);
    }
}
