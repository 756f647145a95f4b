//! 业务编排：把调度器和新闻流水线组合成命名流程

pub mod control;
pub mod flow;
pub mod ticker;

pub use control::{ControlService, TriggerAck};
pub use flow::{FlowCommand, FlowStep, Stage};
pub use ticker::DataTaskTicker;

use crate::collector::CollectorRegistry;
use crate::model::{TaskResult, TaskStatus, TaskSubmission};
use crate::news::{NewsPipeline, PipelineError, RunSummary};
use crate::scheduler::{SchedulerError, TaskScheduler};
use crate::storage::StorageError;
use crate::store::KvStore;
use chrono::Local;
use futures::future::join_all;
use log::{error, info, warn};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(thiserror::Error, Debug)]
pub enum OrchestratorError {
    #[error("flow timed out after {0:?}")]
    Timeout(Duration),
    #[error("flow error: {0}")]
    Flow(String),
    #[error("step {step} failed: {reason}")]
    Step { step: String, reason: String },
    #[error("scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),
    #[error("news pipeline error: {0}")]
    Pipeline(#[from] PipelineError),
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("invalid config: {0}")]
    InvalidConfig(String),
}

/// 单个步骤的产出
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutput {
    Collection { task_id: String, result: TaskResult },
    News(RunSummary),
}

#[derive(Debug, Clone, PartialEq)]
pub struct FlowReport {
    pub flow: String,
    pub steps: Vec<StepOutput>,
}

/// 只读健康检查结果
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub store_ok: bool,
    pub collectors: BTreeMap<String, bool>,
    pub scheduler_running: bool,
    pub scheduler_tasks_running: usize,
    pub news_pipeline_running: bool,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.store_ok && self.scheduler_running && self.collectors.values().all(|ok| *ok)
    }
}

pub struct BusinessOrchestrator {
    scheduler: Arc<TaskScheduler>,
    news: Arc<NewsPipeline>,
    registry: CollectorRegistry,
    store: Arc<dyn KvStore>,
    default_collector: String,
}

impl BusinessOrchestrator {
    pub fn new(
        scheduler: Arc<TaskScheduler>,
        news: Arc<NewsPipeline>,
        registry: CollectorRegistry,
        store: Arc<dyn KvStore>,
        default_collector: impl Into<String>,
    ) -> Self {
        Self {
            scheduler,
            news,
            registry,
            store,
            default_collector: default_collector.into(),
        }
    }

    pub fn scheduler(&self) -> &Arc<TaskScheduler> {
        &self.scheduler
    }

    pub fn news(&self) -> &Arc<NewsPipeline> {
        &self.news
    }

    pub fn default_collector(&self) -> &str {
        &self.default_collector
    }

    /// 执行命名流程，整体受 `timeout` 约束；超时会取消仍在进行的步骤
    pub async fn run_flow(
        &self,
        command: &FlowCommand,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<FlowReport, OrchestratorError> {
        let plan = command.plan(Local::now().date_naive())?;
        if !self.scheduler.is_running() {
            return Err(OrchestratorError::Flow("调度器未启动".to_string()));
        }
        info!("▶ 开始流程 {} ({} 个阶段)", command.name(), plan.len());

        let flow_cancel = cancel.child_token();
        let result = tokio::time::timeout(timeout, async {
            let mut steps = Vec::new();
            for stage in &plan {
                match stage {
                    Stage::Serial(step) => {
                        steps.push(self.run_step(step, &flow_cancel).await?);
                    }
                    Stage::Concurrent(group) => {
                        steps.extend(self.run_concurrent(group, &flow_cancel).await?);
                    }
                }
            }
            Ok::<_, OrchestratorError>(steps)
        })
        .await;

        match result {
            Ok(Ok(steps)) => {
                info!("✓ 流程 {} 完成，共 {} 个步骤", command.name(), steps.len());
                Ok(FlowReport {
                    flow: command.name().to_string(),
                    steps,
                })
            }
            Ok(Err(e)) => {
                error!("✗ 流程 {} 失败: {}", command.name(), e);
                Err(e)
            }
            Err(_) => {
                flow_cancel.cancel();
                error!("✗ 流程 {} 超时 ({:?})", command.name(), timeout);
                Err(OrchestratorError::Timeout(timeout))
            }
        }
    }

    /// 串行执行，遇到第一个错误即停止
    pub async fn run_serial(
        &self,
        steps: &[FlowStep],
        cancel: &CancellationToken,
    ) -> Result<Vec<StepOutput>, OrchestratorError> {
        let mut out = Vec::with_capacity(steps.len());
        for step in steps {
            out.push(self.run_step(step, cancel).await?);
        }
        Ok(out)
    }

    /// 并发执行全部步骤，记录所有错误并返回第一个
    pub async fn run_concurrent(
        &self,
        steps: &[FlowStep],
        cancel: &CancellationToken,
    ) -> Result<Vec<StepOutput>, OrchestratorError> {
        let results = join_all(steps.iter().map(|s| self.run_step(s, cancel))).await;
        let mut out = Vec::with_capacity(results.len());
        let mut first_err = None;
        for (step, r) in steps.iter().zip(results) {
            match r {
                Ok(o) => out.push(o),
                Err(e) => {
                    warn!("步骤 {} 失败: {}", step, e);
                    if first_err.is_none() {
                        first_err = Some(e);
                    }
                }
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(out),
        }
    }

    pub async fn run_step(
        &self,
        step: &FlowStep,
        cancel: &CancellationToken,
    ) -> Result<StepOutput, OrchestratorError> {
        match step {
            FlowStep::Collect(request) => {
                let task_id = self.scheduler.submit(TaskSubmission::now(
                    self.default_collector.clone(),
                    request.clone(),
                ))?;
                let task = self.scheduler.wait_for(&task_id, cancel).await?;
                match (task.status, task.result) {
                    (TaskStatus::Completed, result) => Ok(StepOutput::Collection {
                        task_id,
                        result: result.unwrap_or_default(),
                    }),
                    (_, _) => Err(OrchestratorError::Step {
                        step: step.to_string(),
                        reason: task.error.unwrap_or_else(|| "unknown".to_string()),
                    }),
                }
            }
            FlowStep::News { sources } => {
                let summary = self.news.run(sources, cancel).await?;
                Ok(StepOutput::News(summary))
            }
        }
    }

    /// 探测共享存储和各采集器，不修改任何状态
    pub async fn health(&self) -> HealthReport {
        let store_ok = match self.store.ping().await {
            Ok(()) => true,
            Err(e) => {
                warn!("共享存储不可用: {}", e);
                false
            }
        };

        let checks = join_all(self.registry.all().into_iter().map(|c| async move {
            let ok = match c.ping().await {
                Ok(()) => true,
                Err(e) => {
                    warn!("采集器 {} 不可用: {}", c.name(), e);
                    false
                }
            };
            (c.name().to_string(), ok)
        }))
        .await;

        HealthReport {
            store_ok,
            collectors: checks.into_iter().collect(),
            scheduler_running: self.scheduler.is_running(),
            scheduler_tasks_running: self.scheduler.counts().running,
            news_pipeline_running: self.news.is_running(),
        }
    }
}
