//! 采集任务调度：到期轮询 + 固定并发上限 + 单任务超时

pub mod executor;
pub mod task_store;

pub use executor::{CollectionExecutor, TaskExecutor};
pub use task_store::{TaskCounts, TaskStore};

use crate::config::SchedulerConfig;
use crate::model::{CollectionTask, Page, TaskFilter, TaskStatus, TaskSubmission};
use chrono::Utc;
use log::{debug, error, info, warn};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum SchedulerError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("task not found: {0}")]
    NotFound(String),
    #[error("task timed out after {0:?}")]
    Timeout(Duration),
    #[error("task panicked: {0}")]
    Panicked(String),
    #[error("execution failed: {0}")]
    Execution(String),
    #[error("cancelled")]
    Cancelled,
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

pub struct TaskScheduler {
    store: Arc<TaskStore>,
    executor: Arc<dyn TaskExecutor>,
    slots: Arc<Semaphore>,
    config: SchedulerConfig,
    last_id: AtomicU64,
    running: AtomicBool,
}

impl TaskScheduler {
    pub fn new(executor: Arc<dyn TaskExecutor>, config: SchedulerConfig) -> Self {
        let parallelism = config.parallelism.max(1);
        Self {
            store: Arc::new(TaskStore::new()),
            executor,
            slots: Arc::new(Semaphore::new(parallelism)),
            config,
            last_id: AtomicU64::new(0),
            running: AtomicBool::new(false),
        }
    }

    pub fn store(&self) -> &Arc<TaskStore> {
        &self.store
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn parallelism(&self) -> usize {
        self.config.parallelism.max(1)
    }

    /// 纳秒时间戳，强制单调递增
    fn next_id(&self) -> String {
        let nanos = Utc::now()
            .timestamp_nanos_opt()
            .map(|n| n.max(0) as u64)
            .unwrap_or(0);
        let prev = self
            .last_id
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(nanos.max(last + 1))
            })
            .unwrap_or(0);
        format!("task_{}", nanos.max(prev + 1))
    }

    /// 校验并登记任务，返回任务 id
    pub fn submit(&self, submission: TaskSubmission) -> Result<String, SchedulerError> {
        if submission.collector_name.trim().is_empty() {
            return Err(SchedulerError::InvalidRequest(
                "collector_name 不能为空".to_string(),
            ));
        }
        submission
            .request
            .validate()
            .map_err(SchedulerError::InvalidRequest)?;

        let now = Utc::now();
        let id = self.next_id();
        let task = CollectionTask {
            id: id.clone(),
            task_type: submission.request.type_name().to_string(),
            collector_name: submission.collector_name,
            request: submission.request,
            scheduled_at: submission.scheduled_at.unwrap_or(now),
            status: TaskStatus::Pending,
            created_at: now,
            updated_at: now,
            error: None,
            result: None,
        };
        debug!("登记任务 {} ({})", id, task.task_type);
        self.store.insert(task);
        Ok(id)
    }

    pub fn get(&self, id: &str) -> Result<CollectionTask, SchedulerError> {
        self.store
            .get(id)
            .ok_or_else(|| SchedulerError::NotFound(id.to_string()))
    }

    pub fn list(&self, filter: &TaskFilter, page: Page) -> Vec<CollectionTask> {
        self.store.list(filter, page)
    }

    pub fn counts(&self) -> TaskCounts {
        self.store.counts()
    }

    /// 启动轮询循环，直到取消
    pub fn start(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let this = self.clone();
        this.running.store(true, Ordering::SeqCst);
        info!(
            "调度器启动: 并发 {} 轮询间隔 {:?} 单任务超时 {:?}",
            this.parallelism(),
            this.config.poll_interval,
            this.config.task_timeout
        );
        tokio::spawn(async move {
            loop {
                this.dispatch_due(&cancel);
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(this.config.poll_interval) => {}
                }
            }
            this.running.store(false, Ordering::SeqCst);
            info!("调度器已停止");
        })
    }

    /// 为到期任务申请执行槽；没有空槽时留在 pending，下次轮询再试
    pub fn dispatch_due(self: &Arc<Self>, cancel: &CancellationToken) -> usize {
        let mut started = 0;
        for id in self.store.due_pending(Utc::now()) {
            let permit = match self.slots.clone().try_acquire_owned() {
                Ok(p) => p,
                Err(_) => break,
            };
            if !self.store.try_mark_running(&id) {
                continue;
            }
            let Some(task) = self.store.get(&id) else {
                continue;
            };
            started += 1;
            let this = self.clone();
            let child = cancel.child_token();
            tokio::spawn(async move {
                this.run_task(task, permit, child).await;
            });
        }
        started
    }

    async fn run_task(
        &self,
        task: CollectionTask,
        permit: OwnedSemaphorePermit,
        cancel: CancellationToken,
    ) {
        let id = task.id.clone();
        info!("🚀 开始执行任务 [{}] {}", id, task.task_type);

        let executor = self.executor.clone();
        let exec_cancel = cancel.clone();
        let mut handle = tokio::spawn(async move { executor.execute(&task, exec_cancel).await });

        let outcome = match tokio::time::timeout(self.config.task_timeout, &mut handle).await {
            Ok(Ok(Ok(result))) => Ok(result),
            Ok(Ok(Err(e))) => Err(e),
            Ok(Err(join_err)) if join_err.is_panic() => {
                Err(SchedulerError::Panicked(panic_message(join_err.into_panic())))
            }
            Ok(Err(_)) => Err(SchedulerError::Cancelled),
            Err(_) => {
                cancel.cancel();
                handle.abort();
                Err(SchedulerError::Timeout(self.config.task_timeout))
            }
        };

        match outcome {
            Ok(result) => {
                self.store.complete(&id, result);
            }
            Err(e) => {
                match &e {
                    SchedulerError::Panicked(_) => error!("✗ 任务 [{}] panic: {}", id, e),
                    _ => warn!("✗ 任务 [{}] 失败: {}", id, e),
                }
                self.store.fail(&id, e.to_string());
            }
        }
        drop(permit);
    }

    /// 等待任务进入终态
    pub async fn wait_for(
        &self,
        id: &str,
        cancel: &CancellationToken,
    ) -> Result<CollectionTask, SchedulerError> {
        let tick = self.config.poll_interval.min(Duration::from_millis(50));
        loop {
            let task = self.get(id)?;
            if task.status.is_terminal() {
                return Ok(task);
            }
            tokio::select! {
                _ = cancel.cancelled() => return Err(SchedulerError::Cancelled),
                _ = tokio::time::sleep(tick) => {}
            }
        }
    }
}
