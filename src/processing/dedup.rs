use crate::model::DataKind;
use crate::store::{namespaced_key, KvStore, StoreError};
use async_trait::async_trait;
use log::{debug, info, warn};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub const DEDUP_PREFIX: &str = "dedup";

/// 已处理指纹集合
#[async_trait]
pub trait Deduplicator: Send + Sync {
    async fn exists(&self, kind: DataKind, key: &str) -> Result<bool, StoreError>;
    async fn mark(&self, kind: DataKind, key: &str) -> Result<(), StoreError>;
    async fn exists_batch(&self, kind: DataKind, keys: &[String]) -> Result<Vec<bool>, StoreError>;
    async fn mark_batch(&self, kind: DataKind, keys: &[String]) -> Result<(), StoreError>;
    /// 主动清理已过期的键，返回清理数量
    async fn clean_expired(&self) -> Result<usize, StoreError>;
    fn backend(&self) -> &'static str;
}

/// 基于共享 KV 存储的去重，键为 `dedup:{kind}:{key}`，过期由存储的 TTL 保证
pub struct StoreDeduplicator {
    store: Arc<dyn KvStore>,
    ttl: Duration,
}

impl StoreDeduplicator {
    pub fn new(store: Arc<dyn KvStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    fn key(kind: DataKind, key: &str) -> String {
        namespaced_key(DEDUP_PREFIX, kind.as_str(), key)
    }
}

#[async_trait]
impl Deduplicator for StoreDeduplicator {
    async fn exists(&self, kind: DataKind, key: &str) -> Result<bool, StoreError> {
        self.store.exists(&Self::key(kind, key)).await
    }

    async fn mark(&self, kind: DataKind, key: &str) -> Result<(), StoreError> {
        let now = chrono::Utc::now().timestamp().to_string();
        self.store
            .set(&Self::key(kind, key), &now, Some(self.ttl))
            .await
    }

    async fn exists_batch(&self, kind: DataKind, keys: &[String]) -> Result<Vec<bool>, StoreError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let full: Vec<String> = keys.iter().map(|k| Self::key(kind, k)).collect();
        self.store.exists_many(&full).await
    }

    async fn mark_batch(&self, kind: DataKind, keys: &[String]) -> Result<(), StoreError> {
        if keys.is_empty() {
            return Ok(());
        }
        let now = chrono::Utc::now().timestamp().to_string();
        let entries: Vec<(String, String)> = keys
            .iter()
            .map(|k| (Self::key(kind, k), now.clone()))
            .collect();
        self.store.set_many(&entries, Some(self.ttl)).await
    }

    async fn clean_expired(&self) -> Result<usize, StoreError> {
        let keys = self.store.scan(&format!("{}:*", DEDUP_PREFIX)).await?;
        let mut removed = 0usize;
        for key in keys {
            // -2: 已不存在/已过期
            if self.store.ttl(&key).await? == -2 && self.store.del(&key).await? {
                removed += 1;
            }
        }
        if removed > 0 {
            info!("清理过期去重键 {} 个", removed);
        }
        Ok(removed)
    }

    fn backend(&self) -> &'static str {
        "store"
    }
}

/// 进程内去重：互斥锁保护的 map + 定期清扫
///
/// 共享存储不可用时使用，只能在单进程内去重。
pub struct MemoryDeduplicator {
    entries: Mutex<HashMap<String, Instant>>,
    ttl: Duration,
}

impl MemoryDeduplicator {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Instant>>, StoreError> {
        self.entries
            .lock()
            .map_err(|_| StoreError::Command("dedup map poisoned".to_string()))
    }

    fn key(kind: DataKind, key: &str) -> String {
        namespaced_key("", kind.as_str(), key)
    }

    fn live(&self, map: &HashMap<String, Instant>, key: &str) -> bool {
        map.get(key).is_some_and(|at| at.elapsed() < self.ttl)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|m| m.len()).unwrap_or(0)
    }

    /// 定期清扫过期条目，直到取消
    pub fn spawn_sweeper(self: Arc<Self>, every: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(every) => {}
                }
                match self.clean_expired().await {
                    Ok(n) if n > 0 => debug!("内存去重清扫 {} 条", n),
                    Ok(_) => {}
                    Err(e) => warn!("内存去重清扫失败: {}", e),
                }
            }
        })
    }
}

#[async_trait]
impl Deduplicator for MemoryDeduplicator {
    async fn exists(&self, kind: DataKind, key: &str) -> Result<bool, StoreError> {
        let map = self.lock()?;
        Ok(self.live(&map, &Self::key(kind, key)))
    }

    async fn mark(&self, kind: DataKind, key: &str) -> Result<(), StoreError> {
        self.lock()?.insert(Self::key(kind, key), Instant::now());
        Ok(())
    }

    async fn exists_batch(&self, kind: DataKind, keys: &[String]) -> Result<Vec<bool>, StoreError> {
        let map = self.lock()?;
        Ok(keys
            .iter()
            .map(|k| self.live(&map, &Self::key(kind, k)))
            .collect())
    }

    async fn mark_batch(&self, kind: DataKind, keys: &[String]) -> Result<(), StoreError> {
        let now = Instant::now();
        let mut map = self.lock()?;
        for k in keys {
            map.insert(Self::key(kind, k), now);
        }
        Ok(())
    }

    async fn clean_expired(&self) -> Result<usize, StoreError> {
        let mut map = self.lock()?;
        let before = map.len();
        let ttl = self.ttl;
        map.retain(|_, at| at.elapsed() < ttl);
        Ok(before - map.len())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

/// 共享存储可达时用存储实现，否则退回内存实现并启动清扫
pub async fn connect_deduplicator(
    store: Option<Arc<dyn KvStore>>,
    ttl: Duration,
    cancel: &CancellationToken,
) -> Arc<dyn Deduplicator> {
    if let Some(store) = store {
        match store.ping().await {
            Ok(()) => return Arc::new(StoreDeduplicator::new(store, ttl)),
            Err(e) => warn!("共享存储不可用，去重降级为进程内实现: {}", e),
        }
    }
    let mem = Arc::new(MemoryDeduplicator::new(ttl));
    let every = (ttl / 10).clamp(Duration::from_secs(1), Duration::from_secs(3600));
    mem.clone().spawn_sweeper(every, cancel.clone());
    mem
}
