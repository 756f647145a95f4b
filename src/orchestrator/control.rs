use super::{BusinessOrchestrator, OrchestratorError};
use crate::model::{
    next_run_after, CollectionTask, DataTaskConfig, DataTaskSpec, DataTaskStatus, Page,
    TaskFilter, TaskStatus, TaskSubmission,
};
use crate::news::{PipelineError, PipelineStats};
use crate::processing::Deduplicator;
use crate::storage::entity::data_task;
use crate::storage::{backup_database, DataTaskRepository};
use chrono::Utc;
use log::{error, info, warn};
use sea_orm::DatabaseConnection;
use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// 触发类操作的即时回执，结果通过状态查询观察
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerAck {
    Started,
    Busy,
}

/// 对外控制面：HTTP 层直接调用这里的方法
pub struct ControlService {
    orchestrator: Arc<BusinessOrchestrator>,
    db: Arc<DatabaseConnection>,
    dedup: Arc<dyn Deduplicator>,
    cancel: CancellationToken,
}

fn next_run_ts(cron_expr: &str, status: DataTaskStatus) -> Option<i64> {
    if status != DataTaskStatus::Enabled {
        return None;
    }
    next_run_after(cron_expr, Utc::now()).map(|t| t.timestamp())
}

impl ControlService {
    pub fn new(
        orchestrator: Arc<BusinessOrchestrator>,
        db: Arc<DatabaseConnection>,
        dedup: Arc<dyn Deduplicator>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            orchestrator,
            db,
            dedup,
            cancel,
        }
    }

    pub fn db(&self) -> &Arc<DatabaseConnection> {
        &self.db
    }

    // ---- 采集任务 ----

    pub fn submit_task(&self, submission: TaskSubmission) -> Result<String, OrchestratorError> {
        Ok(self.orchestrator.scheduler().submit(submission)?)
    }

    pub fn get_task(&self, id: &str) -> Result<CollectionTask, OrchestratorError> {
        self.orchestrator
            .scheduler()
            .get(id)
            .map_err(|_| OrchestratorError::NotFound(format!("task {}", id)))
    }

    pub fn list_tasks(&self, filter: &TaskFilter, page: Page) -> Vec<CollectionTask> {
        self.orchestrator.scheduler().list(filter, page)
    }

    // ---- 新闻流水线 ----

    /// 立即返回；运行标记在返回前已同步抢占
    pub fn trigger_news_processing(&self, sources: Vec<String>) -> TriggerAck {
        let news = self.orchestrator.news().clone();
        let guard = match news.try_start() {
            Ok(g) => g,
            Err(_) => {
                info!("新闻流水线正在运行，忽略本次触发");
                return TriggerAck::Busy;
            }
        };
        let cancel = self.cancel.child_token();
        tokio::spawn(async move {
            if let Err(e) = news.run_guarded(guard, &sources, &cancel).await {
                warn!("新闻流水线运行失败: {}", e);
            }
        });
        TriggerAck::Started
    }

    pub fn news_processing_status(&self) -> PipelineStats {
        self.orchestrator.news().stats()
    }

    pub fn reset_news_stats(&self) {
        self.orchestrator.news().reset_stats();
    }

    // ---- 定时任务 ----

    /// 启动时调用：把上次进程遗留的 running 任务恢复为可调度
    pub async fn recover(&self) -> u64 {
        match DataTaskRepository::reset_stale_running(&self.db).await {
            Ok(n) if n > 0 => {
                info!("✓ 恢复 {} 个中断的定时任务", n);
                n
            }
            Ok(_) => 0,
            Err(e) => {
                error!("恢复定时任务时出错: {}", e);
                0
            }
        }
    }

    pub async fn create_task(
        &self,
        spec: DataTaskSpec,
    ) -> Result<data_task::Model, OrchestratorError> {
        spec.validate().map_err(OrchestratorError::InvalidConfig)?;
        let next = next_run_ts(&spec.cron_expr, spec.status);
        let model = DataTaskRepository::create(&self.db, &spec, next).await?;
        info!("✓ 创建定时任务 [{}] {}", model.id, model.task_name);
        Ok(model)
    }

    pub async fn update_task(
        &self,
        id: i32,
        spec: DataTaskSpec,
    ) -> Result<data_task::Model, OrchestratorError> {
        spec.validate().map_err(OrchestratorError::InvalidConfig)?;
        let next = next_run_ts(&spec.cron_expr, spec.status);
        Ok(DataTaskRepository::update(&self.db, id, &spec, next).await?)
    }

    pub async fn delete_task(&self, id: i32) -> Result<(), OrchestratorError> {
        if DataTaskRepository::delete(&self.db, id).await? {
            info!("已删除定时任务 {}", id);
            Ok(())
        } else {
            Err(OrchestratorError::NotFound(format!("data_task {}", id)))
        }
    }

    pub async fn list_data_tasks(&self) -> Result<Vec<data_task::Model>, OrchestratorError> {
        Ok(DataTaskRepository::list_all(&self.db).await?)
    }

    /// 立即执行一次：先认领并返回，执行结束后更新成功/失败计数
    ///
    /// 认领是一条条件更新，同一任务的并发触发只有一个返回 Started。
    pub async fn run_task(self: &Arc<Self>, id: i32) -> Result<TriggerAck, OrchestratorError> {
        let model = DataTaskRepository::find_by_id(&self.db, id)
            .await?
            .ok_or_else(|| OrchestratorError::NotFound(format!("data_task {}", id)))?;
        let status: DataTaskStatus = model
            .status
            .parse()
            .map_err(OrchestratorError::InvalidConfig)?;
        if status == DataTaskStatus::Running {
            return Ok(TriggerAck::Busy);
        }
        let config = DataTaskRepository::decode_config(&model)?;

        let now = Utc::now();
        let next = if status == DataTaskStatus::Enabled {
            next_run_after(&model.cron_expr, now).map(|t| t.timestamp())
        } else {
            None
        };
        if !DataTaskRepository::try_claim(&self.db, id, status, now.timestamp(), next).await? {
            return Ok(TriggerAck::Busy);
        }
        info!("▶ 执行定时任务 [{}] {}", id, model.task_name);

        let this = self.clone();
        let name = model.task_name.clone();
        tokio::spawn(async move {
            let outcome = this.execute(config).await;
            let error = match &outcome {
                Ok(detail) => {
                    info!("✓ 定时任务 [{}] {} 完成: {}", id, name, detail);
                    None
                }
                Err(e) => {
                    error!("✗ 定时任务 [{}] {} 失败: {}", id, name, e);
                    Some(e.to_string())
                }
            };
            if let Err(e) = DataTaskRepository::mark_finished(&this.db, id, status, error).await {
                error!("更新定时任务 {} 结果失败: {}", id, e);
            }
        });
        Ok(TriggerAck::Started)
    }

    /// 执行任务配置，返回一句结果描述
    pub async fn execute(&self, config: DataTaskConfig) -> Result<String, OrchestratorError> {
        match config {
            DataTaskConfig::Collect { collector, request } => {
                let scheduler = self.orchestrator.scheduler();
                let collector =
                    collector.unwrap_or_else(|| self.orchestrator.default_collector().to_string());
                let id = scheduler.submit(TaskSubmission::now(collector, request))?;
                let task = scheduler.wait_for(&id, &self.cancel).await?;
                match task.status {
                    TaskStatus::Completed => {
                        let r = task.result.unwrap_or_default();
                        Ok(format!(
                            "任务 {} 采集 {} 入库 {} 重复 {} 拒绝 {}",
                            id, r.fetched, r.stored, r.duplicates, r.rejected
                        ))
                    }
                    _ => Err(OrchestratorError::Step {
                        step: id,
                        reason: task.error.unwrap_or_default(),
                    }),
                }
            }
            DataTaskConfig::News { sources } => {
                let summary = match self.orchestrator.news().run(&sources, &self.cancel).await {
                    Ok(s) => s,
                    Err(PipelineError::Busy) => {
                        return Err(OrchestratorError::Flow("新闻流水线正在运行".to_string()))
                    }
                    Err(e) => return Err(e.into()),
                };
                Ok(format!(
                    "抓取 {} 完成 {} 失败 {}",
                    summary.crawled, summary.completed, summary.failed
                ))
            }
            DataTaskConfig::Cleanup => {
                let removed = self
                    .dedup
                    .clean_expired()
                    .await
                    .map_err(|e| OrchestratorError::Flow(format!("清理去重记录失败: {}", e)))?;
                Ok(format!("清理过期去重记录 {} 条", removed))
            }
            DataTaskConfig::Backup { path } => {
                backup_database(&self.db, &path)
                    .await
                    .map_err(|e| OrchestratorError::Storage(e.into()))?;
                Ok(format!("数据库已备份到 {}", path))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::testing::FakeProvider;
    use crate::model::{DataTaskType, FetchRequest};
    use crate::orchestrator::testing::{fixture, Fixture};
    use crate::storage::establish_connection;
    use std::time::Duration;

    async fn service(f: &Fixture) -> (tempfile::TempDir, Arc<ControlService>) {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("c.db").display());
        let db = Arc::new(establish_connection(&url).await.unwrap());
        let svc = Arc::new(ControlService::new(
            f.orchestrator.clone(),
            db,
            f.dedup.clone(),
            f.cancel.clone(),
        ));
        (dir, svc)
    }

    fn collect_spec(name: &str) -> DataTaskSpec {
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
            description: Some("平安银行日线".into()),
        }
    }

    async fn wait_until_finished(svc: &ControlService, id: i32) -> data_task::Model {
        for _ in 0..200 {
            let m = DataTaskRepository::find_by_id(svc.db(), id)
                .await
                .unwrap()
                .unwrap();
            if m.success_count + m.failure_count > 0 {
                return m;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("data task {} never finished", id);
    }

    #[tokio::test]
    async fn submit_and_query_collection_tasks() {
        let f = fixture(FakeProvider::with_daily_bars("000001.SZ", 5), true);
        let (_dir, svc) = service(&f).await;
        let id = svc
            .submit_task(TaskSubmission::now(
                "tushare",
                FetchRequest::DailyQuote {
                    symbol: "000001.SZ".into(),
                    start_date: "20240101".into(),
                    end_date: "20240105".into(),
                },
            ))
            .unwrap();
        assert_eq!(svc.get_task(&id).unwrap().id, id);
        assert!(matches!(
            svc.get_task("task_0"),
            Err(OrchestratorError::NotFound(_))
        ));
        assert_eq!(svc.list_tasks(&TaskFilter::default(), Page::default()).len(), 1);
        f.cancel.cancel();
    }

    #[tokio::test]
    async fn news_trigger_reports_busy_while_running() {
        let f = fixture(FakeProvider::with_daily_bars("000001.SZ", 1), true);
        let (_dir, svc) = service(&f).await;
        let guard = f.orchestrator.news().try_start().unwrap();
        assert_eq!(svc.trigger_news_processing(vec![]), TriggerAck::Busy);
        drop(guard);

        assert_eq!(svc.trigger_news_processing(vec![]), TriggerAck::Started);
        for _ in 0..200 {
            let s = svc.news_processing_status();
            if !s.running && s.total_processed > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(svc.news_processing_status().process_success, 1);
        svc.reset_news_stats();
        assert_eq!(svc.news_processing_status().total_processed, 0);
        f.cancel.cancel();
    }

    #[tokio::test]
    async fn run_task_acknowledges_and_records_success() {
        let f = fixture(FakeProvider::with_daily_bars("000001.SZ", 5), true);
        let (_dir, svc) = service(&f).await;
        let model = svc.create_task(collect_spec("pingan_daily")).await.unwrap();
        assert!(model.next_run_at.is_some());

        assert_eq!(svc.run_task(model.id).await.unwrap(), TriggerAck::Started);
        let done = wait_until_finished(&svc, model.id).await;
        assert_eq!(done.run_count, 1);
        assert_eq!(done.success_count, 1);
        assert_eq!(done.status, "enabled");
        assert!(done.last_run_at.is_some());
        assert_eq!(f.sink.len(), 5);
        f.cancel.cancel();
    }

    #[tokio::test]
    async fn invalid_specs_and_missing_tasks_are_rejected() {
        let f = fixture(FakeProvider::with_daily_bars("000001.SZ", 1), true);
        let (_dir, svc) = service(&f).await;
        let mut bad = collect_spec("bad");
        bad.cron_expr = "every day".into();
        assert!(matches!(
            svc.create_task(bad).await,
            Err(OrchestratorError::InvalidConfig(_))
        ));
        assert!(matches!(
            svc.delete_task(42).await,
            Err(OrchestratorError::NotFound(_))
        ));
        assert!(matches!(
            svc.run_task(42).await,
            Err(OrchestratorError::NotFound(_))
        ));
        f.cancel.cancel();
    }

    #[tokio::test]
    async fn maintenance_tasks_clean_and_back_up() {
        let f = fixture(FakeProvider::with_daily_bars("000001.SZ", 1), true);
        let (dir, svc) = service(&f).await;
        let msg = svc.execute(DataTaskConfig::Cleanup).await.unwrap();
        assert!(msg.contains('0'));

        let backup = dir.path().join("backup.db");
        svc.execute(DataTaskConfig::Backup {
            path: backup.display().to_string(),
        })
        .await
        .unwrap();
        assert!(backup.exists());
        f.cancel.cancel();
    }

    #[tokio::test]
    async fn concurrent_triggers_start_the_task_once() {
        let f = fixture(FakeProvider::with_daily_bars("000001.SZ", 5), true);
        let (_dir, svc) = service(&f).await;
        let model = svc.create_task(collect_spec("pingan_daily")).await.unwrap();

        let (a, b) = tokio::join!(svc.run_task(model.id), svc.run_task(model.id));
        let mut acks = vec![a.unwrap(), b.unwrap()];
        acks.sort_by_key(|ack| *ack == TriggerAck::Busy);
        assert_eq!(acks, vec![TriggerAck::Started, TriggerAck::Busy]);

        let done = wait_until_finished(&svc, model.id).await;
        assert_eq!(done.run_count, 1);
        assert_eq!(done.success_count + done.failure_count, 1);
        f.cancel.cancel();
    }

    #[tokio::test]
    async fn task_left_running_by_previous_process_runs_after_recovery() {
        let f = fixture(FakeProvider::with_daily_bars("000001.SZ", 5), true);
        let (_dir, svc) = service(&f).await;
        let model = svc.create_task(collect_spec("pingan_daily")).await.unwrap();
        // 模拟进程在执行中退出
        DataTaskRepository::try_claim(svc.db(), model.id, DataTaskStatus::Enabled, 1, Some(2))
            .await
            .unwrap();
        assert_eq!(svc.run_task(model.id).await.unwrap(), TriggerAck::Busy);

        let restarted = Arc::new(ControlService::new(
            f.orchestrator.clone(),
            svc.db.clone(),
            f.dedup.clone(),
            f.cancel.clone(),
        ));
        assert_eq!(restarted.recover().await, 1);
        let due = DataTaskRepository::due_tasks(restarted.db(), Utc::now().timestamp())
            .await
            .unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(
            restarted.run_task(model.id).await.unwrap(),
            TriggerAck::Started
        );
        for _ in 0..200 {
            let m = DataTaskRepository::find_by_id(restarted.db(), model.id)
                .await
                .unwrap()
                .unwrap();
            if m.success_count == 1 {
                assert_eq!(m.failure_count, 1);
                assert_eq!(m.run_count, 2);
                assert_eq!(m.status, "enabled");
                f.cancel.cancel();
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("recovered task never finished");
    }
}
