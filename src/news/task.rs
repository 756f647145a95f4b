use crate::model::NewsItem;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NewsTaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Retrying,
}

impl NewsTaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, NewsTaskStatus::Completed | NewsTaskStatus::Failed)
    }
}

/// 新闻处理任务，队列中每个元素是一个 JSON 对象
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewsProcessingTask {
    pub id: String,
    pub payload: NewsItem,
    pub retry_count: u32,
    pub status: NewsTaskStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl NewsProcessingTask {
    pub fn new(payload: NewsItem) -> Self {
        let now = Utc::now();
        let mut metadata = HashMap::new();
        metadata.insert("source".to_string(), payload.source.clone());
        Self {
            id: format!("news_{}", payload.id),
            payload,
            retry_count: 0,
            status: NewsTaskStatus::Pending,
            created_at: now,
            updated_at: now,
            error: None,
            metadata,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    pub fn set_status(&mut self, status: NewsTaskStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }

    /// 记录一次失败；返回是否还能重试
    pub fn record_failure(&mut self, error: String, max_retries: u32) -> bool {
        self.retry_count += 1;
        self.error = Some(error);
        if self.retry_count <= max_retries {
            self.set_status(NewsTaskStatus::Retrying);
            true
        } else {
            self.set_status(NewsTaskStatus::Failed);
            false
        }
    }
}

/// 重试延迟 = retry_delay × retry_count × backoff_factor
pub fn retry_delay_for(base: Duration, retry_count: u32, backoff_factor: f64) -> Duration {
    let factor = (retry_count as f64 * backoff_factor).max(0.0);
    Duration::from_secs_f64(base.as_secs_f64() * factor)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item() -> NewsItem {
        NewsItem {
            id: "sina-abc".into(),
            title: "央行降准".into(),
            content: "央行宣布降准 0.5 个百分点".into(),
            source: "sina".into(),
            ..Default::default()
        }
    }

    #[test]
    fn wire_format_is_plain_json() {
        let task = NewsProcessingTask::new(item());
        let raw = task.to_json().unwrap();
        let v: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(v["id"], "news_sina-abc");
        assert_eq!(v["status"], "pending");
        assert_eq!(v["retry_count"], 0);
        assert_eq!(v["payload"]["title"], "央行降准");
        assert_eq!(NewsProcessingTask::from_json(&raw).unwrap(), task);
    }

    #[test]
    fn metadata_and_error_are_optional_on_the_wire() {
        let mut v = serde_json::to_value(NewsProcessingTask::new(item())).unwrap();
        let obj = v.as_object_mut().unwrap();
        obj.remove("metadata");
        obj.remove("error");
        let task: NewsProcessingTask = serde_json::from_value(v).unwrap();
        assert!(task.metadata.is_empty());
        assert!(task.error.is_none());
    }

    #[test]
    fn failures_exhaust_after_max_retries() {
        let mut task = NewsProcessingTask::new(item());
        assert!(task.record_failure("boom".into(), 2));
        assert!(task.record_failure("boom".into(), 2));
        assert_eq!(task.status, NewsTaskStatus::Retrying);
        assert!(!task.record_failure("boom".into(), 2));
        assert_eq!(task.status, NewsTaskStatus::Failed);
        assert_eq!(task.retry_count, 3);
    }

    #[test]
    fn retry_delay_grows_linearly_with_count() {
        let base = Duration::from_secs(5);
        assert_eq!(retry_delay_for(base, 1, 2.0), Duration::from_secs(10));
        assert_eq!(retry_delay_for(base, 2, 2.0), Duration::from_secs(20));
        assert_eq!(retry_delay_for(base, 3, 2.0), Duration::from_secs(30));
    }
}
