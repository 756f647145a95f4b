use crate::model::{FetchRequest, Record};
use crate::store::{namespaced_key, KvStore};
use chrono::NaiveDate;
use log::{debug, warn};
use std::sync::Arc;
use std::time::Duration;

pub const TTL_INTRADAY: Duration = Duration::from_secs(60);
pub const TTL_SAME_DAY: Duration = Duration::from_secs(5 * 60);
pub const TTL_DAILY: Duration = Duration::from_secs(24 * 3600);
pub const TTL_REFERENCE: Duration = Duration::from_secs(7 * 24 * 3600);

/// 按数据波动性选择缓存时长；查询区间包含今天时当日数据仍在变化，一律用短 TTL
pub fn ttl_for(request: &FetchRequest, today: NaiveDate) -> Duration {
    if request.is_intraday() {
        return TTL_INTRADAY;
    }
    if let Some((start, end)) = request.date_range() {
        if start <= today && today <= end {
            return TTL_SAME_DAY;
        }
    }
    match request {
        FetchRequest::MinuteQuote { .. } => TTL_INTRADAY,
        FetchRequest::News { .. } => TTL_SAME_DAY,
        FetchRequest::DailyQuote { .. } => TTL_DAILY,
        FetchRequest::StockBasic { .. }
        | FetchRequest::Financial { .. }
        | FetchRequest::Macro { .. } => TTL_REFERENCE,
    }
}

/// 读穿缓存，键为 `prefix:kind:params`
///
/// 缓存读写失败只记日志，不影响采集。
pub struct ResponseCache {
    store: Arc<dyn KvStore>,
    prefix: String,
}

impl ResponseCache {
    pub fn new(store: Arc<dyn KvStore>, prefix: impl Into<String>) -> Self {
        Self {
            store,
            prefix: prefix.into(),
        }
    }

    pub fn cache_key(&self, request: &FetchRequest) -> String {
        let params = serde_json::to_string(request).unwrap_or_default();
        namespaced_key(&self.prefix, request.kind().as_str(), &params)
    }

    pub async fn get(&self, request: &FetchRequest) -> Option<Vec<Record>> {
        let key = self.cache_key(request);
        match self.store.get(&key).await {
            Ok(Some(raw)) => match serde_json::from_str::<Vec<Record>>(&raw) {
                Ok(records) => {
                    debug!("缓存命中: {} ({} 条)", key, records.len());
                    Some(records)
                }
                Err(e) => {
                    warn!("缓存内容无法解析，忽略: {} ({})", key, e);
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!("读取缓存失败: {} ({})", key, e);
                None
            }
        }
    }

    pub async fn put(&self, request: &FetchRequest, records: &[Record], today: NaiveDate) {
        let key = self.cache_key(request);
        let ttl = ttl_for(request, today);
        let raw = match serde_json::to_string(records) {
            Ok(r) => r,
            Err(e) => {
                warn!("缓存序列化失败: {} ({})", key, e);
                return;
            }
        };
        if let Err(e) = self.store.set(&key, &raw, Some(ttl)).await {
            warn!("写入缓存失败: {} ({})", key, e);
        } else {
            debug!("写入缓存: {} ttl={:?}", key, ttl);
        }
    }
}
