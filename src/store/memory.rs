use super::{KvStore, StoreError};
use async_trait::async_trait;
use log::{debug, warn};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct Inner {
    values: HashMap<String, (String, Option<Instant>)>,
    lists: HashMap<String, VecDeque<String>>,
}

impl Inner {
    fn live_value(&mut self, key: &str) -> Option<&(String, Option<Instant>)> {
        let expired = matches!(self.values.get(key), Some((_, Some(at))) if *at <= Instant::now());
        if expired {
            self.values.remove(key);
        }
        self.values.get(key)
    }

    fn purge_expired(&mut self, now: Instant) -> usize {
        let before = self.values.len();
        self.values
            .retain(|_, (_, at)| at.map_or(true, |at| at > now));
        before - self.values.len()
    }
}

/// 进程内实现：共享存储不可用时的降级方案，也用于测试
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    notify: Notify,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Inner>, StoreError> {
        self.inner
            .lock()
            .map_err(|_| StoreError::Command("memory store poisoned".to_string()))
    }

    /// 当前保存的键值数，含尚未清扫的过期条目
    pub fn len(&self) -> usize {
        self.inner.lock().map(|i| i.values.len()).unwrap_or(0)
    }

    /// 删除全部已过期的键值，返回删除条数
    pub fn purge_expired(&self) -> Result<usize, StoreError> {
        Ok(self.lock()?.purge_expired(Instant::now()))
    }

    /// 定期清扫过期键值，直到取消；缓存键很少重复读取，不清扫会一直增长
    pub fn spawn_sweeper(self: Arc<Self>, every: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(every) => {}
                }
                match self.purge_expired() {
                    Ok(n) if n > 0 => debug!("内存存储清扫过期键 {} 个", n),
                    Ok(_) => {}
                    Err(e) => warn!("内存存储清扫失败: {}", e),
                }
            }
        })
    }

    fn try_pop(&self, queue: &str) -> Result<Option<String>, StoreError> {
        Ok(self.lock()?.lists.get_mut(queue).and_then(|l| l.pop_back()))
    }
}

/// 只支持 `*` 通配
fn glob_match(pattern: &str, key: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.len() == 1 {
        return pattern == key;
    }
    let mut rest = key;
    for (i, part) in parts.iter().enumerate() {
        if part.is_empty() {
            continue;
        }
        if i == 0 {
            match rest.strip_prefix(part) {
                Some(r) => rest = r,
                None => return false,
            }
        } else if i == parts.len() - 1 {
            return rest.ends_with(part);
        } else {
            match rest.find(part) {
                Some(pos) => rest = &rest[pos + part.len()..],
                None => return false,
            }
        }
    }
    true
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn ping(&self) -> Result<(), StoreError> {
        self.lock().map(|_| ())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.lock()?.live_value(key).map(|(v, _)| v.clone()))
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError> {
        let expires = ttl.map(|t| Instant::now() + t);
        self.lock()?
            .values
            .insert(key.to_string(), (value.to_string(), expires));
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.lock()?.live_value(key).is_some())
    }

    async fn exists_many(&self, keys: &[String]) -> Result<Vec<bool>, StoreError> {
        let mut inner = self.lock()?;
        Ok(keys.iter().map(|k| inner.live_value(k).is_some()).collect())
    }

    async fn set_many(
        &self,
        entries: &[(String, String)],
        ttl: Option<Duration>,
    ) -> Result<(), StoreError> {
        let expires = ttl.map(|t| Instant::now() + t);
        let mut inner = self.lock()?;
        for (k, v) in entries {
            inner.values.insert(k.clone(), (v.clone(), expires));
        }
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<bool, StoreError> {
        let mut inner = self.lock()?;
        let removed_value = inner.values.remove(key).is_some();
        let removed_list = inner.lists.remove(key).is_some();
        Ok(removed_value || removed_list)
    }

    async fn ttl(&self, key: &str) -> Result<i64, StoreError> {
        let inner = self.lock()?;
        Ok(match inner.values.get(key) {
            None => -2,
            Some((_, None)) => -1,
            Some((_, Some(at))) => {
                let now = Instant::now();
                if *at <= now {
                    -2
                } else {
                    at.duration_since(now).as_secs() as i64
                }
            }
        })
    }

    async fn scan(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        let inner = self.lock()?;
        let now = Instant::now();
        Ok(inner
            .values
            .iter()
            .filter(|(_, (_, at))| at.map_or(true, |at| at > now))
            .filter(|(k, _)| glob_match(pattern, k))
            .map(|(k, _)| k.clone())
            .collect())
    }

    async fn push(&self, queue: &str, value: &str) -> Result<(), StoreError> {
        self.lock()?
            .lists
            .entry(queue.to_string())
            .or_default()
            .push_front(value.to_string());
        self.notify.notify_waiters();
        Ok(())
    }

    async fn pop(&self, queue: &str, timeout: Duration) -> Result<Option<String>, StoreError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(v) = self.try_pop(queue)? {
                return Ok(Some(v));
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.try_pop(queue);
            }
        }
    }

    async fn queue_len(&self, queue: &str) -> Result<usize, StoreError> {
        Ok(self.lock()?.lists.get(queue).map_or(0, |l| l.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn values_expire_after_ttl() {
        let store = MemoryStore::new();
        store
            .set("k", "v", Some(Duration::from_millis(30)))
            .await
            .unwrap();
        assert!(store.exists("k").await.unwrap());
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(!store.exists("k").await.unwrap());
        assert_eq!(store.ttl("k").await.unwrap(), -2);
    }

    #[tokio::test]
    async fn queue_is_fifo_with_lpush_brpop() {
        let store = MemoryStore::new();
        store.push("q", "a").await.unwrap();
        store.push("q", "b").await.unwrap();
        assert_eq!(store.queue_len("q").await.unwrap(), 2);
        let t = Duration::from_millis(10);
        assert_eq!(store.pop("q", t).await.unwrap().as_deref(), Some("a"));
        assert_eq!(store.pop("q", t).await.unwrap().as_deref(), Some("b"));
        assert_eq!(store.pop("q", t).await.unwrap(), None);
    }

    #[tokio::test]
    async fn blocked_pop_wakes_on_push() {
        let store = Arc::new(MemoryStore::new());
        let s = store.clone();
        let waiter = tokio::spawn(async move { s.pop("q", Duration::from_secs(2)).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        store.push("q", "x").await.unwrap();
        let got = waiter.await.unwrap().unwrap();
        assert_eq!(got.as_deref(), Some("x"));
    }

    #[tokio::test]
    async fn sweeper_evicts_expired_keys_without_reads() {
        let store = Arc::new(MemoryStore::new());
        store
            .set("cache:a", "1", Some(Duration::from_millis(20)))
            .await
            .unwrap();
        store.set("cache:b", "2", None).await.unwrap();
        assert_eq!(store.len(), 2);

        let cancel = CancellationToken::new();
        let sweeper = store
            .clone()
            .spawn_sweeper(Duration::from_millis(10), cancel.clone());
        for _ in 0..100 {
            if store.len() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        cancel.cancel();
        sweeper.await.unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.scan("cache:*").await.unwrap(), vec!["cache:b".to_string()]);
    }

    #[test]
    fn glob_supports_prefix_and_infix() {
        assert!(glob_match("dedup:*", "dedup:market:a"));
        assert!(glob_match("dedup:*:a", "dedup:market:a"));
        assert!(!glob_match("cache:*", "dedup:market:a"));
        assert!(glob_match("exact", "exact"));
    }
}
