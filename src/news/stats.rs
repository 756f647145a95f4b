use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Mutex, MutexGuard};

/// 新闻流水线累计统计，只在显式重置时清零
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PipelineStats {
    /// 抓取到的新闻条数
    pub total_crawled: u64,
    /// 抓取成功/失败的数据源次数
    pub crawl_success: u64,
    pub crawl_failed: u64,
    pub total_processed: u64,
    pub process_success: u64,
    pub process_failed: u64,
    pub fallback_processed: u64,
    pub retried: u64,
    pub duplicates: u64,
    pub avg_crawl_time_ms: f64,
    pub avg_process_time_ms: f64,
    pub queue_depth: usize,
    pub active_workers: usize,
    pub last_run: Option<DateTime<Utc>>,
    pub last_success: Option<DateTime<Utc>>,
    pub running: bool,
}

#[derive(Default)]
pub(crate) struct StatsCell {
    inner: Mutex<PipelineStats>,
}

impl StatsCell {
    fn lock(&self) -> MutexGuard<'_, PipelineStats> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn update<F: FnOnce(&mut PipelineStats)>(&self, f: F) {
        f(&mut self.lock());
    }

    pub fn snapshot(&self) -> PipelineStats {
        self.lock().clone()
    }

    pub fn reset(&self) {
        *self.lock() = PipelineStats::default();
    }

    /// 一次处理结束，更新计数和平均耗时
    pub fn record_processed(&self, elapsed_ms: f64, success: bool) {
        let mut s = self.lock();
        s.total_processed += 1;
        if success {
            s.process_success += 1;
        } else {
            s.process_failed += 1;
        }
        let n = s.total_processed as f64;
        s.avg_process_time_ms += (elapsed_ms - s.avg_process_time_ms) / n;
    }
}
