//! 数据采集：统一的采集器接口、按能力查询的注册表、重试与读穿缓存

pub mod cache;
pub mod error;
pub mod parse;
pub mod provider_collector;
pub mod retry;
#[cfg(test)]
pub mod testing;

pub use cache::{ttl_for, ResponseCache};
pub use error::{CollectorError, CollectorErrorKind};
pub use provider_collector::ProviderCollector;
pub use retry::retry_with_backoff;

use crate::model::{DataKind, FetchRequest, NewsItem, Record};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// 采集器：按 [`DataKind`] 声明能力，一次请求返回一批记录
#[async_trait]
pub trait Collector: Send + Sync {
    fn name(&self) -> &str;

    fn supports(&self, kind: DataKind) -> bool;

    async fn fetch(
        &self,
        request: &FetchRequest,
        cancel: &CancellationToken,
    ) -> Result<Vec<Record>, CollectorError>;

    /// 抓取单个新闻源的最新条目
    async fn crawl_news(
        &self,
        source: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<NewsItem>, CollectorError>;

    /// 连通性检查，幂等
    async fn ping(&self) -> Result<(), CollectorError>;
}

/// 采集器注册表，名称 -> 实例
#[derive(Clone, Default)]
pub struct CollectorRegistry {
    collectors: BTreeMap<String, Arc<dyn Collector>>,
}

impl CollectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, collector: Arc<dyn Collector>) {
        self.collectors
            .insert(collector.name().to_string(), collector);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Collector>> {
        self.collectors.get(name).cloned()
    }

    /// 第一个声明支持该类别的采集器
    pub fn for_kind(&self, kind: DataKind) -> Option<Arc<dyn Collector>> {
        self.collectors
            .values()
            .find(|c| c.supports(kind))
            .cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.collectors.keys().cloned().collect()
    }

    pub fn all(&self) -> impl Iterator<Item = &Arc<dyn Collector>> {
        self.collectors.values()
    }

    pub fn is_empty(&self) -> bool {
        self.collectors.is_empty()
    }
}

impl std::fmt::Debug for CollectorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.collectors.keys()).finish()
    }
}
