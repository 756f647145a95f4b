use super::SchedulerError;
use crate::collector::{CollectorErrorKind, CollectorRegistry};
use crate::model::{CollectionTask, TaskResult};
use crate::processing::DataPipeline;
use crate::storage::RecordSink;
use async_trait::async_trait;
use log::{info, warn};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// 任务执行入口
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    async fn execute(
        &self,
        task: &CollectionTask,
        cancel: CancellationToken,
    ) -> Result<TaskResult, SchedulerError>;
}

/// 采集 -> 处理流水线 -> 落地
pub struct CollectionExecutor {
    registry: CollectorRegistry,
    pipeline: Arc<DataPipeline>,
    sink: Arc<dyn RecordSink>,
}

impl CollectionExecutor {
    pub fn new(
        registry: CollectorRegistry,
        pipeline: Arc<DataPipeline>,
        sink: Arc<dyn RecordSink>,
    ) -> Self {
        Self {
            registry,
            pipeline,
            sink,
        }
    }
}

#[async_trait]
impl TaskExecutor for CollectionExecutor {
    async fn execute(
        &self,
        task: &CollectionTask,
        cancel: CancellationToken,
    ) -> Result<TaskResult, SchedulerError> {
        let collector = match self.registry.get(&task.collector_name) {
            Some(c) => c,
            None => {
                let fallback = self.registry.for_kind(task.request.kind()).ok_or_else(|| {
                    SchedulerError::Execution(format!("没有可用的采集器: {}", task.collector_name))
                })?;
                warn!(
                    "[{}] 未注册的采集器 {}，改用 {}",
                    task.id,
                    task.collector_name,
                    fallback.name()
                );
                fallback
            }
        };

        let records = match collector.fetch(&task.request, &cancel).await {
            Ok(r) => r,
            // 非交易日等情况下数据源返回空表，不算失败
            Err(e) if e.kind == CollectorErrorKind::EmptyResult => {
                info!("[{}] 无数据: {}", task.id, e.message);
                return Ok(TaskResult::default());
            }
            Err(e) => return Err(SchedulerError::Execution(e.to_string())),
        };

        let fetched = records.len();
        let batch = self.pipeline.process_batch(records).await;
        let processed = batch.records.len();
        if batch.rejected > 0 {
            warn!("[{}] {} 条记录未通过校验", task.id, batch.rejected);
        }

        let stored = self
            .sink
            .store(&batch.records)
            .await
            .map_err(|e| SchedulerError::Execution(format!("写入失败: {}", e)))?;
        // 落地成功后才标记，写入失败的批次重跑时不会被当作重复
        self.pipeline.mark_stored(&batch.records).await;

        info!(
            "✓ [{}] {} 完成: 采集 {} 处理 {} 重复 {} 拒绝 {} 入库 {}",
            task.id, task.task_type, fetched, processed, batch.duplicates, batch.rejected, stored
        );
        Ok(TaskResult {
            fetched,
            processed,
            duplicates: batch.duplicates,
            rejected: batch.rejected,
            stored,
            avg_quality: batch.avg_quality,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::testing::FakeProvider;
    use crate::collector::ProviderCollector;
    use crate::config::RetryPolicy;
    use crate::model::{FetchRequest, Record, TaskStatus};
    use crate::processing::{EnrichingTransformer, MemoryDeduplicator, QualityChecker};
    use crate::storage::{MemorySink, StorageError};
    use chrono::Utc;
    use sea_orm::DbErr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// 前 n 次写入失败，之后转给内存实现
    struct FlakySink {
        failures: AtomicUsize,
        inner: MemorySink,
    }

    #[async_trait]
    impl RecordSink for FlakySink {
        async fn store(&self, records: &[Record]) -> Result<usize, StorageError> {
            if self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(StorageError::Db(DbErr::Custom("disk full".into())));
            }
            self.inner.store(records).await
        }
    }

    fn daily_task(collector: &str) -> CollectionTask {
        let now = Utc::now();
        CollectionTask {
            id: "task_1".into(),
            task_type: "daily_quote".into(),
            collector_name: collector.into(),
            request: FetchRequest::DailyQuote {
                symbol: "000001.SZ".into(),
                start_date: "20240101".into(),
                end_date: "20240105".into(),
            },
            scheduled_at: now,
            status: TaskStatus::Running,
            created_at: now,
            updated_at: now,
            error: None,
            result: None,
        }
    }

    fn executor(sink: Arc<dyn RecordSink>) -> CollectionExecutor {
        let retry = RetryPolicy {
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            ..RetryPolicy::default()
        };
        let provider = Arc::new(FakeProvider::with_daily_bars("000001.SZ", 5));
        let mut registry = CollectorRegistry::new();
        registry.register(Arc::new(ProviderCollector::new("tushare", provider, retry, None)));
        let pipeline = Arc::new(DataPipeline::new(
            Arc::new(MemoryDeduplicator::new(Duration::from_secs(60))),
            Arc::new(EnrichingTransformer::default()),
            QualityChecker::default(),
        ));
        CollectionExecutor::new(registry, pipeline, sink)
    }

    #[tokio::test]
    async fn failed_write_leaves_batch_retryable() {
        let sink = Arc::new(FlakySink {
            failures: AtomicUsize::new(1),
            inner: MemorySink::new(),
        });
        let exec = executor(sink.clone());
        let task = daily_task("tushare");

        let err = exec
            .execute(&task, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulerError::Execution(_)));
        assert_eq!(sink.inner.len(), 0);

        let result = exec.execute(&task, CancellationToken::new()).await.unwrap();
        assert_eq!(result.stored, 5);
        assert_eq!(result.duplicates, 0);
        assert_eq!(sink.inner.len(), 5);

        // 成功落地后才算已处理
        let again = exec.execute(&task, CancellationToken::new()).await.unwrap();
        assert_eq!(again.duplicates, 5);
        assert_eq!(again.stored, 0);
    }

    #[tokio::test]
    async fn unknown_collector_name_uses_kind_fallback() {
        let sink = Arc::new(MemorySink::new());
        let exec = executor(sink.clone());
        let result = exec
            .execute(&daily_task("tushar"), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.stored, 5);
    }
}
