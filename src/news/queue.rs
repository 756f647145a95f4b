use super::task::{NewsProcessingTask, NewsTaskStatus};
use crate::store::{KvStore, StoreError};
use log::{debug, warn};
use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// 共享工作队列：LPUSH 入队，BRPOP 出队
#[derive(Clone)]
pub struct NewsQueue {
    store: Arc<dyn KvStore>,
    key: String,
}

impl NewsQueue {
    pub fn new(store: Arc<dyn KvStore>, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub async fn push(&self, task: &NewsProcessingTask) -> Result<(), StoreError> {
        self.store.push(&self.key, &task.to_json()?).await
    }

    /// 超时返回 `Ok(None)`；无法解析的元素返回 `Serialization` 错误（元素已出队）
    pub async fn pop(&self, timeout: Duration) -> Result<Option<NewsProcessingTask>, StoreError> {
        match self.store.pop(&self.key, timeout).await? {
            Some(raw) => Ok(Some(NewsProcessingTask::from_json(&raw)?)),
            None => Ok(None),
        }
    }

    pub async fn len(&self) -> Result<usize, StoreError> {
        self.store.queue_len(&self.key).await
    }
}

struct Scheduled {
    due: Instant,
    seq: u64,
    task: NewsProcessingTask,
}

impl PartialEq for Scheduled {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl Eq for Scheduled {}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

// BinaryHeap 是大顶堆，反转比较让最早到期的在堆顶
impl Ord for Scheduled {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other
            .due
            .cmp(&self.due)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Default)]
struct RetryHeap {
    heap: BinaryHeap<Scheduled>,
    seq: u64,
}

/// 延迟重试队列：按到期时间排序，由 [`RetryQueue::pump`] 送回共享队列
#[derive(Default)]
pub struct RetryQueue {
    inner: Mutex<RetryHeap>,
    notify: Notify,
}

impl RetryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RetryHeap> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn schedule(&self, task: NewsProcessingTask, delay: Duration) {
        {
            let mut guard = self.lock();
            guard.seq += 1;
            let seq = guard.seq;
            guard.heap.push(Scheduled {
                due: Instant::now() + delay,
                seq,
                task,
            });
        }
        self.notify.notify_one();
    }

    pub fn len(&self) -> usize {
        self.lock().heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().heap.is_empty()
    }

    /// 等待中的任务 id，按到期先后
    pub fn pending_ids(&self) -> Vec<String> {
        let guard = self.lock();
        let mut entries: Vec<&Scheduled> = guard.heap.iter().collect();
        entries.sort_by(|a, b| b.cmp(a));
        entries.into_iter().map(|s| s.task.id.clone()).collect()
    }

    pub fn next_due(&self) -> Option<Instant> {
        self.lock().heap.peek().map(|s| s.due)
    }

    /// 取出所有已到期任务
    pub fn take_due(&self, now: Instant) -> Vec<NewsProcessingTask> {
        let mut guard = self.lock();
        let mut out = Vec::new();
        while guard.heap.peek().is_some_and(|s| s.due <= now) {
            if let Some(s) = guard.heap.pop() {
                out.push(s.task);
            }
        }
        out
    }

    /// 取消所有等待中的重试
    pub fn drain(&self) -> Vec<NewsProcessingTask> {
        let mut guard = self.lock();
        let mut entries: Vec<Scheduled> = guard.heap.drain().collect();
        entries.sort_by(|a, b| b.cmp(a));
        entries.into_iter().map(|s| s.task).collect()
    }

    /// 到期任务送回共享队列，直到取消
    pub async fn pump(&self, queue: &NewsQueue, cancel: &CancellationToken) {
        loop {
            for mut task in self.take_due(Instant::now()) {
                task.set_status(NewsTaskStatus::Pending);
                debug!("重试任务回到队列: {} (第 {} 次)", task.id, task.retry_count);
                if let Err(e) = queue.push(&task).await {
                    warn!("重试任务入队失败，1 秒后再试: {} ({})", task.id, e);
                    self.schedule(task, Duration::from_secs(1));
                }
            }

            let wait = self.next_due();
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = self.notify.notified() => {}
                _ = async {
                    match wait {
                        Some(due) => tokio::time::sleep_until(due).await,
                        None => std::future::pending::<()>().await,
                    }
                } => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NewsItem;
    use crate::store::MemoryStore;

    fn task(id: &str) -> NewsProcessingTask {
        NewsProcessingTask::new(NewsItem {
            id: id.into(),
            title: format!("标题 {}", id),
            content: "正文".into(),
            source: "sina".into(),
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn queue_round_trips_json_entries() {
        let store = Arc::new(MemoryStore::new());
        let queue = NewsQueue::new(store.clone(), "news:test");
        queue.push(&task("a")).await.unwrap();
        queue.push(&task("b")).await.unwrap();
        assert_eq!(queue.len().await.unwrap(), 2);

        let first = queue.pop(Duration::from_millis(10)).await.unwrap().unwrap();
        assert_eq!(first.payload.id, "a");
        store.push("news:test", "not json").await.unwrap();
        let second = queue.pop(Duration::from_millis(10)).await.unwrap().unwrap();
        assert_eq!(second.payload.id, "b");
        assert!(matches!(
            queue.pop(Duration::from_millis(10)).await,
            Err(StoreError::Serialization(_))
        ));
        assert!(queue.pop(Duration::from_millis(10)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn retry_heap_releases_in_due_order() {
        let retries = RetryQueue::new();
        retries.schedule(task("late"), Duration::from_secs(60));
        retries.schedule(task("soon"), Duration::from_millis(0));
        assert_eq!(retries.pending_ids(), vec!["news_soon", "news_late"]);

        let due = retries.take_due(Instant::now());
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].payload.id, "soon");
        assert_eq!(retries.len(), 1);

        let cancelled = retries.drain();
        assert_eq!(cancelled.len(), 1);
        assert!(retries.is_empty());
    }

    #[tokio::test]
    async fn pump_moves_due_tasks_to_the_shared_queue() {
        let store = Arc::new(MemoryStore::new());
        let queue = NewsQueue::new(store, "news:pump");
        let retries = Arc::new(RetryQueue::new());
        let cancel = CancellationToken::new();

        let pump = {
            let retries = retries.clone();
            let queue = queue.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { retries.pump(&queue, &cancel).await })
        };

        let mut t = task("r");
        t.set_status(NewsTaskStatus::Retrying);
        retries.schedule(t, Duration::from_millis(20));

        let popped = queue.pop(Duration::from_secs(2)).await.unwrap().unwrap();
        assert_eq!(popped.payload.id, "r");
        assert_eq!(popped.status, NewsTaskStatus::Pending);
        assert!(retries.is_empty());

        cancel.cancel();
        pump.await.unwrap();
    }
}
