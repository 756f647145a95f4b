use super::request::FetchRequest;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

/// 单次采集任务执行结果
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub fetched: usize,
    pub processed: usize,
    pub duplicates: usize,
    pub rejected: usize,
    pub stored: usize,
    pub avg_quality: Option<f64>,
}

/// 采集任务：提交时创建，只由调度器修改，不删除
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionTask {
    pub id: String,
    pub task_type: String,
    pub collector_name: String,
    pub request: FetchRequest,
    pub scheduled_at: DateTime<Utc>,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub error: Option<String>,
    pub result: Option<TaskResult>,
}

/// 任务提交参数
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSubmission {
    pub collector_name: String,
    pub request: FetchRequest,
    /// 为空时立即执行
    #[serde(default)]
    pub scheduled_at: Option<DateTime<Utc>>,
}

impl TaskSubmission {
    pub fn now(collector_name: impl Into<String>, request: FetchRequest) -> Self {
        Self {
            collector_name: collector_name.into(),
            request,
            scheduled_at: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    pub task_type: Option<String>,
    pub collector_name: Option<String>,
}

impl TaskFilter {
    pub fn matches(&self, task: &CollectionTask) -> bool {
        self.status.map_or(true, |s| task.status == s)
            && self
                .task_type
                .as_deref()
                .map_or(true, |t| task.task_type == t)
            && self
                .collector_name
                .as_deref()
                .map_or(true, |c| task.collector_name == c)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Page {
    pub offset: usize,
    pub limit: usize,
}

impl Default for Page {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: 50,
        }
    }
}
