//! 新闻流水线：抓取入队、多 worker 异步增强（降级 + 延迟重试）、进度监控

pub mod pipeline;
pub mod queue;
pub mod stats;
pub mod task;

pub use pipeline::{NewsPipeline, RunGuard, RunSummary};
pub use queue::{NewsQueue, RetryQueue};
pub use stats::PipelineStats;
pub use task::{retry_delay_for, NewsProcessingTask, NewsTaskStatus};

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum PipelineError {
    #[error("news pipeline is busy")]
    Busy,
    #[error("queue store error: {0}")]
    Store(String),
    #[error("news pipeline cancelled")]
    Cancelled,
}
