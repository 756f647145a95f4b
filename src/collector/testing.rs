//! 测试用的数据源与采集器替身

use super::{Collector, CollectorError};
use crate::model::{DataKind, FetchRequest, NewsItem, Record};
use crate::provider::{ProviderApi, ProviderTable};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// 按接口名返回预置表格，可注入若干次失败
#[derive(Default)]
pub struct FakeProvider {
    tables: Mutex<HashMap<String, ProviderTable>>,
    failures: Mutex<VecDeque<CollectorError>>,
    calls: Mutex<Vec<(String, Value)>>,
}

impl FakeProvider {
    pub fn with_table(api: &str, items: Vec<Vec<Value>>) -> Self {
        let p = Self::default();
        p.tables.lock().unwrap().insert(
            api.to_string(),
            ProviderTable {
                fields: vec![],
                items,
            },
        );
        p
    }

    /// 从 20240101 起连续 n 天的合法日线
    pub fn with_daily_bars(symbol: &str, n: u32) -> Self {
        let items = (0..n)
            .map(|i| {
                let close = 10.2 + i as f64 * 0.1;
                vec![
                    json!(symbol),
                    json!(format!("202401{:02}", i + 1)),
                    json!(10.0),
                    json!(close + 0.3),
                    json!(9.8),
                    json!(close),
                    json!(10.0),
                    json!(close - 10.0),
                    json!(0.5),
                    json!(1000.0),
                    json!(close * 100.0),
                ]
            })
            .collect();
        Self::with_table("daily", items)
    }

    pub fn fail_next(&self, times: usize, err: CollectorError) {
        let mut f = self.failures.lock().unwrap();
        for _ in 0..times {
            f.push_back(err.clone());
        }
    }

    pub fn calls(&self) -> Vec<(String, Value)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ProviderApi for FakeProvider {
    async fn query(
        &self,
        api_name: &str,
        params: Value,
        _fields: &[&str],
    ) -> Result<ProviderTable, CollectorError> {
        self.calls
            .lock()
            .unwrap()
            .push((api_name.to_string(), params));
        if let Some(e) = self.failures.lock().unwrap().pop_front() {
            return Err(e);
        }
        match self.tables.lock().unwrap().get(api_name) {
            Some(t) if !t.is_empty() => Ok(t.clone()),
            _ => Err(CollectorError::empty(format!("{} 返回空结果", api_name))),
        }
    }
}

/// 直接返回预置记录的采集器
#[derive(Default)]
pub struct FakeCollector {
    pub name: String,
    pub records: Vec<Record>,
    pub news: HashMap<String, Vec<NewsItem>>,
    pub fail_sources: Vec<String>,
    pub delay: Duration,
    pub healthy: bool,
}

impl FakeCollector {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            healthy: true,
            ..Default::default()
        }
    }
}

#[async_trait]
impl Collector for FakeCollector {
    fn name(&self) -> &str {
        &self.name
    }

    fn supports(&self, _kind: DataKind) -> bool {
        true
    }

    async fn fetch(
        &self,
        _request: &FetchRequest,
        cancel: &CancellationToken,
    ) -> Result<Vec<Record>, CollectorError> {
        if !self.delay.is_zero() {
            tokio::select! {
                _ = tokio::time::sleep(self.delay) => {}
                _ = cancel.cancelled() => return Err(CollectorError::cancelled()),
            }
        }
        Ok(self.records.clone())
    }

    async fn crawl_news(
        &self,
        source: &str,
        _cancel: &CancellationToken,
    ) -> Result<Vec<NewsItem>, CollectorError> {
        if self.fail_sources.iter().any(|s| s == source) {
            return Err(CollectorError::server(format!("{} 不可用", source)));
        }
        Ok(self.news.get(source).cloned().unwrap_or_default())
    }

    async fn ping(&self) -> Result<(), CollectorError> {
        if self.healthy {
            Ok(())
        } else {
            Err(CollectorError::network("unreachable"))
        }
    }
}
