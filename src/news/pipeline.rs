use super::queue::{NewsQueue, RetryQueue};
use super::stats::{PipelineStats, StatsCell};
use super::task::{retry_delay_for, NewsProcessingTask, NewsTaskStatus};
use super::PipelineError;
use crate::collector::Collector;
use crate::config::NewsConfig;
use crate::model::{NewsItem, Record};
use crate::processing::{DataPipeline, FallbackTransformer, ProcessingError, Transformer};
use crate::storage::RecordSink;
use crate::store::StoreError;
use chrono::Utc;
use futures::future::join_all;
use log::{debug, error, info, warn};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

/// 取消后等待 worker 收尾的上限
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// 已处理完、只差落库的任务在 metadata 中的标记
const STAGE_KEY: &str = "stage";
const STAGE_STORE: &str = "store";

/// 运行标记，drop 时释放
pub struct RunGuard {
    flag: Arc<AtomicBool>,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

/// 未完成的工作数：入队 +1，进入终态 -1
#[derive(Default)]
struct Outstanding {
    count: AtomicUsize,
    zero: Notify,
}

impl Outstanding {
    fn add(&self, n: usize) {
        self.count.fetch_add(n, Ordering::SeqCst);
    }

    fn done(&self) {
        let prev = self
            .count
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |c| Some(c.saturating_sub(1)))
            .unwrap_or(0);
        if prev <= 1 {
            self.zero.notify_waiters();
        }
    }

    fn get(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    async fn wait_zero(&self) {
        loop {
            let notified = self.zero.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.get() == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// 单次运行内共享的状态
#[derive(Default)]
struct RunState {
    outstanding: Outstanding,
    active: AtomicUsize,
    completed: AtomicUsize,
    failed: AtomicUsize,
    fallback: AtomicUsize,
}

/// 一次运行的汇总
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    pub sources: usize,
    pub crawled: usize,
    pub enqueued: usize,
    /// 运行开始时队列里已有的任务
    pub backlog: usize,
    pub completed: usize,
    pub failed: usize,
    pub fallback: usize,
    pub timed_out: bool,
}

enum Step {
    Stored,
    Duplicate,
}

pub struct NewsPipeline {
    collector: Arc<dyn Collector>,
    processing: Arc<DataPipeline>,
    fallback: Arc<dyn Transformer>,
    sink: Arc<dyn RecordSink>,
    queue: NewsQueue,
    retries: Arc<RetryQueue>,
    config: NewsConfig,
    running: Arc<AtomicBool>,
    stats: Arc<StatsCell>,
}

impl NewsPipeline {
    pub fn new(
        collector: Arc<dyn Collector>,
        processing: Arc<DataPipeline>,
        sink: Arc<dyn RecordSink>,
        queue: NewsQueue,
        config: NewsConfig,
    ) -> Self {
        Self {
            collector,
            processing,
            fallback: Arc::new(FallbackTransformer),
            sink,
            queue,
            retries: Arc::new(RetryQueue::new()),
            config,
            running: Arc::new(AtomicBool::new(false)),
            stats: Arc::new(StatsCell::default()),
        }
    }

    pub fn config(&self) -> &NewsConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn retry_queue(&self) -> &Arc<RetryQueue> {
        &self.retries
    }

    /// 同步抢占运行标记；已有运行时返回 Busy
    pub fn try_start(&self) -> Result<RunGuard, PipelineError> {
        self.running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| PipelineError::Busy)?;
        Ok(RunGuard {
            flag: self.running.clone(),
        })
    }

    pub fn stats(&self) -> PipelineStats {
        let mut s = self.stats.snapshot();
        s.running = self.is_running();
        s
    }

    pub fn reset_stats(&self) {
        self.stats.reset();
        info!("新闻流水线统计已清零");
    }

    pub async fn run(
        self: &Arc<Self>,
        sources: &[String],
        cancel: &CancellationToken,
    ) -> Result<RunSummary, PipelineError> {
        let guard = self.try_start()?;
        self.run_guarded(guard, sources, cancel).await
    }

    /// 在已持有运行标记的情况下执行：抓取 → 异步处理 → 监控
    pub async fn run_guarded(
        self: &Arc<Self>,
        _guard: RunGuard,
        sources: &[String],
        cancel: &CancellationToken,
    ) -> Result<RunSummary, PipelineError> {
        let sources: Vec<String> = if sources.is_empty() {
            self.config.default_sources.clone()
        } else {
            sources.to_vec()
        };
        self.stats.update(|s| s.last_run = Some(Utc::now()));
        info!("📰 新闻流水线启动，数据源: {:?}", sources);

        let state = Arc::new(RunState::default());
        let mut summary = RunSummary {
            sources: sources.len(),
            ..Default::default()
        };

        summary.backlog = match self.queue.len().await {
            Ok(n) => n,
            Err(e) => {
                warn!("读取队列长度失败，按空队列处理: {}", e);
                0
            }
        };
        state.outstanding.add(summary.backlog);

        self.crawl_phase(&sources, &state, &mut summary, cancel).await?;

        if state.outstanding.get() == 0 {
            info!("没有需要处理的新闻");
            self.stats.update(|s| s.last_success = Some(Utc::now()));
            return Ok(summary);
        }

        summary.timed_out = self.enrichment_phase(&state, cancel).await;

        summary.completed = state.completed.load(Ordering::SeqCst);
        summary.failed = state.failed.load(Ordering::SeqCst);
        summary.fallback = state.fallback.load(Ordering::SeqCst);

        if cancel.is_cancelled() {
            warn!("新闻流水线被取消");
            return Err(PipelineError::Cancelled);
        }
        if !summary.timed_out && summary.failed == 0 {
            self.stats.update(|s| s.last_success = Some(Utc::now()));
        }
        info!(
            "✓ 新闻流水线结束: 抓取 {} 入队 {} 完成 {} 失败 {} 降级 {}{}",
            summary.crawled,
            summary.enqueued,
            summary.completed,
            summary.failed,
            summary.fallback,
            if summary.timed_out { " (超时)" } else { "" }
        );
        Ok(summary)
    }

    /// 逐个数据源抓取并入队，单个数据源失败不影响其余
    async fn crawl_phase(
        &self,
        sources: &[String],
        state: &RunState,
        summary: &mut RunSummary,
        cancel: &CancellationToken,
    ) -> Result<(), PipelineError> {
        let mut crawl_ms_total = 0.0;
        let mut attempted = 0usize;
        let mut push_error: Option<StoreError> = None;

        for (i, source) in sources.iter().enumerate() {
            if i > 0 && !self.config.crawl_interval.is_zero() {
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = tokio::time::sleep(self.config.crawl_interval) => {}
                }
            }
            if cancel.is_cancelled() {
                return Err(PipelineError::Cancelled);
            }

            attempted += 1;
            let started = Instant::now();
            let result = self.collector.crawl_news(source, cancel).await;
            crawl_ms_total += started.elapsed().as_secs_f64() * 1000.0;

            let items = match result {
                Ok(items) => items,
                Err(e) => {
                    warn!("✗ 数据源 {} 抓取失败: {}", source, e);
                    self.stats.update(|s| s.crawl_failed += 1);
                    continue;
                }
            };
            info!("数据源 {} 抓取到 {} 条新闻", source, items.len());
            summary.crawled += items.len();
            let n = items.len() as u64;
            self.stats.update(|s| {
                s.crawl_success += 1;
                s.total_crawled += n;
            });

            for item in items {
                match self.enqueue(item, state).await {
                    Ok(()) => summary.enqueued += 1,
                    Err(e) => {
                        warn!("新闻入队失败: {}", e);
                        push_error = Some(e);
                    }
                }
            }
        }

        if attempted > 0 {
            let avg = crawl_ms_total / attempted as f64;
            self.stats.update(|s| s.avg_crawl_time_ms = avg);
        }
        match push_error {
            Some(e) if summary.enqueued == 0 => Err(PipelineError::Store(e.to_string())),
            _ => Ok(()),
        }
    }

    async fn enqueue(&self, item: NewsItem, state: &RunState) -> Result<(), StoreError> {
        let task = NewsProcessingTask::new(item);
        state.outstanding.add(1);
        if let Err(e) = self.queue.push(&task).await {
            state.outstanding.done();
            return Err(e);
        }
        Ok(())
    }

    /// 返回是否因超时结束
    async fn enrichment_phase(
        self: &Arc<Self>,
        state: &Arc<RunState>,
        cancel: &CancellationToken,
    ) -> bool {
        let phase = cancel.child_token();
        let workers = self.config.workers.max(1);
        info!(
            "启动 {} 个新闻处理 worker，待处理 {}",
            workers,
            state.outstanding.get()
        );

        let mut handles = Vec::with_capacity(workers + 2);
        for worker_id in 0..workers {
            let this = self.clone();
            let state = state.clone();
            let token = phase.clone();
            handles.push(tokio::spawn(async move {
                this.worker_loop(worker_id, &state, &token).await;
            }));
        }
        {
            let retries = self.retries.clone();
            let queue = self.queue.clone();
            let token = phase.clone();
            handles.push(tokio::spawn(async move {
                retries.pump(&queue, &token).await;
            }));
        }
        {
            let this = self.clone();
            let state = state.clone();
            let token = phase.clone();
            handles.push(tokio::spawn(async move {
                this.monitor_loop(&state, &token).await;
            }));
        }

        let timed_out = tokio::select! {
            _ = state.outstanding.wait_zero() => false,
            _ = tokio::time::sleep(self.config.batch_timeout) => {
                warn!(
                    "新闻处理超时 ({:?})，剩余 {} 个任务",
                    self.config.batch_timeout,
                    state.outstanding.get()
                );
                true
            }
            _ = cancel.cancelled() => false,
        };

        phase.cancel();
        let aborts: Vec<_> = handles.iter().map(|h| h.abort_handle()).collect();
        if tokio::time::timeout(SHUTDOWN_GRACE, join_all(handles))
            .await
            .is_err()
        {
            warn!("worker 未能在 {:?} 内退出，强制终止", SHUTDOWN_GRACE);
            for a in aborts {
                a.abort();
            }
        }

        // 未到期的重试放回共享队列，留给下一次运行
        let pending = self.retries.drain();
        if !pending.is_empty() {
            warn!("{} 个待重试任务放回队列", pending.len());
        }
        for task in pending {
            if let Err(e) = self.queue.push(&task).await {
                error!("待重试任务 {} 放回队列失败: {}", task.id, e);
            }
        }

        self.sample(state).await;
        timed_out
    }

    async fn worker_loop(&self, worker_id: usize, state: &RunState, cancel: &CancellationToken) {
        debug!("worker {} 启动", worker_id);
        while !cancel.is_cancelled() {
            // 出队本身不参与取消，避免已弹出的任务丢失
            match self.queue.pop(self.config.pop_timeout).await {
                Ok(Some(task)) => {
                    if cancel.is_cancelled() {
                        if let Err(e) = self.queue.push(&task).await {
                            error!("任务 {} 放回队列失败: {}", task.id, e);
                        }
                        break;
                    }
                    state.active.fetch_add(1, Ordering::SeqCst);
                    self.handle_task(task, state).await;
                    state.active.fetch_sub(1, Ordering::SeqCst);
                }
                Ok(None) => {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(self.config.idle_sleep) => {}
                    }
                }
                Err(StoreError::Serialization(e)) => {
                    warn!("丢弃无法解析的队列元素: {}", e);
                    state.failed.fetch_add(1, Ordering::SeqCst);
                    self.stats.record_processed(0.0, false);
                    state.outstanding.done();
                }
                Err(e) => {
                    warn!("worker {} 读取队列失败: {}", worker_id, e);
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(self.config.idle_sleep) => {}
                    }
                }
            }
        }
        debug!("worker {} 退出", worker_id);
    }

    async fn handle_task(&self, mut task: NewsProcessingTask, state: &RunState) {
        task.set_status(NewsTaskStatus::Processing);
        let started = Instant::now();

        let outcome = self.process_task(&mut task, state).await;
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

        match outcome {
            Ok(step) => {
                task.set_status(NewsTaskStatus::Completed);
                if matches!(step, Step::Duplicate) {
                    self.stats.update(|s| s.duplicates += 1);
                } else {
                    self.stats.update(|s| s.last_success = Some(Utc::now()));
                }
                self.stats.record_processed(elapsed_ms, true);
                state.completed.fetch_add(1, Ordering::SeqCst);
                state.outstanding.done();
            }
            Err(e) if e.is_validation() => {
                warn!("✗ 新闻 {} 校验失败，不再重试: {}", task.id, e);
                task.error = Some(e.to_string());
                task.set_status(NewsTaskStatus::Failed);
                self.finish_failed(elapsed_ms, state);
            }
            Err(e) => {
                if task.record_failure(e.to_string(), self.config.max_retries) {
                    let delay = retry_delay_for(
                        self.config.retry_delay,
                        task.retry_count,
                        self.config.backoff_factor,
                    );
                    info!(
                        "新闻 {} 处理失败，{:?} 后第 {} 次重试: {}",
                        task.id, delay, task.retry_count, e
                    );
                    self.stats.update(|s| s.retried += 1);
                    self.retries.schedule(task, delay);
                } else {
                    error!(
                        "✗ 新闻 {} 重试 {} 次后仍失败: {}",
                        task.id, self.config.max_retries, e
                    );
                    self.finish_failed(elapsed_ms, state);
                }
            }
        }
    }

    fn finish_failed(&self, elapsed_ms: f64, state: &RunState) {
        self.stats.record_processed(elapsed_ms, false);
        state.failed.fetch_add(1, Ordering::SeqCst);
        state.outstanding.done();
    }

    async fn process_task(
        &self,
        task: &mut NewsProcessingTask,
        state: &RunState,
    ) -> Result<Step, ProcessingError> {
        // 上次已处理完、只是落库失败的任务直接重新落库
        if task.metadata.get(STAGE_KEY).map(String::as_str) != Some(STAGE_STORE) {
            let record = Record::News(task.payload.clone());
            let result = match self.processing.process(record.clone()).await {
                Err(ProcessingError::Transform(reason)) if self.config.fallback_enabled => {
                    warn!("新闻 {} 增强失败，使用降级处理: {}", task.id, reason);
                    let out = self
                        .processing
                        .process_with(record, self.fallback.as_ref())
                        .await?;
                    if !out.duplicate {
                        state.fallback.fetch_add(1, Ordering::SeqCst);
                        self.stats.update(|s| s.fallback_processed += 1);
                    }
                    Ok(out)
                }
                other => other,
            }?;

            if result.duplicate {
                return Ok(Step::Duplicate);
            }
            if let Record::News(item) = result.record {
                task.payload = item;
            }
            task.metadata
                .insert(STAGE_KEY.to_string(), STAGE_STORE.to_string());
        }

        let record = Record::News(task.payload.clone());
        self.sink
            .store(std::slice::from_ref(&record))
            .await
            .map_err(|e| ProcessingError::Store(e.to_string()))?;
        Ok(Step::Stored)
    }

    async fn sample(&self, state: &RunState) {
        let depth = self.queue.len().await.unwrap_or(0);
        let active = state.active.load(Ordering::SeqCst);
        self.stats.update(|s| {
            s.queue_depth = depth;
            s.active_workers = active;
        });
    }

    async fn monitor_loop(&self, state: &RunState, cancel: &CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.monitor_interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = ticker.tick() => {}
            }
            self.sample(state).await;
            let s = self.stats.snapshot();
            info!(
                "📊 新闻处理进度: 队列 {} 活跃 worker {} 待完成 {} 重试中 {} 已处理 {}",
                s.queue_depth,
                s.active_workers,
                state.outstanding.get(),
                self.retries.len(),
                s.total_processed
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::testing::FakeCollector;
    use crate::processing::{
        EnrichingTransformer, MemoryDeduplicator, NewsEnricher, QualityChecker,
    };
    use crate::storage::{MemorySink, StorageError};
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use sea_orm::DbErr;

    fn config() -> NewsConfig {
        NewsConfig {
            workers: 3,
            queue_key: "news:test".into(),
            max_retries: 2,
            retry_delay: Duration::from_millis(1),
            backoff_factor: 1.0,
            batch_timeout: Duration::from_secs(5),
            monitor_interval: Duration::from_millis(10),
            crawl_interval: Duration::from_millis(1),
            pop_timeout: Duration::from_millis(20),
            idle_sleep: Duration::from_millis(5),
            fallback_enabled: true,
            default_sources: vec!["sina".into()],
        }
    }

    fn news(id: &str, title: &str) -> NewsItem {
        NewsItem {
            id: id.into(),
            title: title.into(),
            content: format!("{}。公司 000001.SZ 业绩增长，股价上涨。", title),
            source: "sina".into(),
            publish_time: Some(
                NaiveDate::from_ymd_opt(2024, 3, 1)
                    .unwrap()
                    .and_hms_opt(9, 30, 0)
                    .unwrap(),
            ),
            ..Default::default()
        }
    }

    struct BrokenEnricher;

    #[async_trait]
    impl NewsEnricher for BrokenEnricher {
        fn name(&self) -> &str {
            "broken"
        }

        async fn enrich(&self, _item: NewsItem) -> Result<NewsItem, ProcessingError> {
            Err(ProcessingError::Transform("model unavailable".into()))
        }
    }

    struct SlowEnricher;

    #[async_trait]
    impl NewsEnricher for SlowEnricher {
        fn name(&self) -> &str {
            "slow"
        }

        async fn enrich(&self, item: NewsItem) -> Result<NewsItem, ProcessingError> {
            tokio::time::sleep(Duration::from_millis(300)).await;
            Ok(item)
        }
    }

    /// 前 n 次写入失败
    struct FlakySink {
        failures: AtomicUsize,
        inner: MemorySink,
    }

    #[async_trait]
    impl RecordSink for FlakySink {
        async fn store(&self, records: &[Record]) -> Result<usize, StorageError> {
            let left = self.failures.load(Ordering::SeqCst);
            if left > 0 {
                self.failures.store(left - 1, Ordering::SeqCst);
                return Err(StorageError::Db(DbErr::Custom("disk full".into())));
            }
            self.inner.store(records).await
        }
    }

    fn build(
        collector: FakeCollector,
        enricher: Arc<dyn NewsEnricher>,
        sink: Arc<dyn RecordSink>,
        config: NewsConfig,
    ) -> Arc<NewsPipeline> {
        let processing = Arc::new(DataPipeline::new(
            Arc::new(MemoryDeduplicator::new(Duration::from_secs(60))),
            Arc::new(EnrichingTransformer::new(enricher)),
            QualityChecker::default(),
        ));
        let queue = NewsQueue::new(Arc::new(MemoryStore::new()), config.queue_key.clone());
        Arc::new(NewsPipeline::new(
            Arc::new(collector),
            processing,
            sink,
            queue,
            config,
        ))
    }

    fn collector_with(items: Vec<NewsItem>) -> FakeCollector {
        let mut c = FakeCollector::new("fake");
        c.news.insert("sina".into(), items);
        c.fail_sources.push("cls".into());
        c
    }

    fn processed_by(record: &Record) -> Option<&str> {
        match record {
            Record::News(n) => n.extra.get("processed_by").map(String::as_str),
            _ => None,
        }
    }

    #[tokio::test]
    async fn crawls_enriches_and_stores() {
        let sink = Arc::new(MemorySink::new());
        let pipeline = build(
            collector_with(vec![news("1", "央行降准"), news("2", "银行股走强"), news("3", "券商研报")]),
            Arc::new(crate::processing::LexiconEnricher),
            sink.clone(),
            config(),
        );
        let summary = pipeline
            .run(&["sina".into(), "cls".into()], &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(summary.crawled, 3);
        assert_eq!(summary.completed, 3);
        assert_eq!(summary.failed, 0);
        assert!(!summary.timed_out);

        let stats = pipeline.stats();
        assert_eq!(stats.crawl_success, 1);
        assert_eq!(stats.crawl_failed, 1);
        assert_eq!(stats.total_crawled, 3);
        assert_eq!(stats.process_success, 3);
        assert!(!stats.running);
        assert!(stats.last_success.is_some());

        let stored = sink.records();
        assert_eq!(stored.len(), 3);
        assert!(stored.iter().all(|r| processed_by(r) == Some("lexicon")));
        assert!(stored.iter().all(|r| matches!(
            r,
            Record::News(n) if n.related_stocks.contains(&"000001.SZ".to_string())
        )));
    }

    #[tokio::test]
    async fn enrichment_failure_falls_back() {
        let sink = Arc::new(MemorySink::new());
        let pipeline = build(
            collector_with(vec![news("1", "央行降准"), news("2", "银行股走强")]),
            Arc::new(BrokenEnricher),
            sink.clone(),
            config(),
        );
        let summary = pipeline
            .run(&["sina".into()], &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(summary.fallback, 2);
        assert_eq!(pipeline.stats().fallback_processed, 2);
        assert!(sink.records().iter().all(|r| processed_by(r) == Some("fallback")));
    }

    #[tokio::test]
    async fn without_fallback_tasks_retry_then_fail() {
        let sink = Arc::new(MemorySink::new());
        let mut cfg = config();
        cfg.fallback_enabled = false;
        let pipeline = build(
            collector_with(vec![news("1", "央行降准")]),
            Arc::new(BrokenEnricher),
            sink.clone(),
            cfg,
        );
        let summary = pipeline
            .run(&["sina".into()], &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(summary.failed, 1);
        let stats = pipeline.stats();
        assert_eq!(stats.retried, 2);
        assert_eq!(stats.process_failed, 1);
        assert_eq!(sink.len(), 0);
        assert!(pipeline.retry_queue().is_empty());
    }

    #[tokio::test]
    async fn validation_failures_are_not_retried() {
        let sink = Arc::new(MemorySink::new());
        let mut bad = news("1", "");
        bad.content = String::new();
        let pipeline = build(
            collector_with(vec![bad]),
            Arc::new(crate::processing::LexiconEnricher),
            sink.clone(),
            config(),
        );
        let summary = pipeline
            .run(&["sina".into()], &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(summary.failed, 1);
        assert_eq!(pipeline.stats().retried, 0);
    }

    #[tokio::test]
    async fn sink_failure_is_retried_without_reprocessing() {
        let sink = Arc::new(FlakySink {
            failures: AtomicUsize::new(1),
            inner: MemorySink::new(),
        });
        let pipeline = build(
            collector_with(vec![news("1", "央行降准")]),
            Arc::new(crate::processing::LexiconEnricher),
            sink.clone(),
            config(),
        );
        let summary = pipeline
            .run(&["sina".into()], &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(summary.completed, 1);
        assert_eq!(pipeline.stats().retried, 1);
        assert_eq!(pipeline.stats().duplicates, 0);
        assert_eq!(sink.inner.len(), 1);
    }

    #[tokio::test]
    async fn second_trigger_while_running_is_busy() {
        let pipeline = build(
            collector_with(vec![news("1", "央行降准")]),
            Arc::new(crate::processing::LexiconEnricher),
            Arc::new(MemorySink::new()),
            config(),
        );
        let guard = pipeline.try_start().unwrap();
        assert!(pipeline.stats().running);
        assert_eq!(
            pipeline
                .run(&["sina".into()], &CancellationToken::new())
                .await
                .unwrap_err(),
            PipelineError::Busy
        );
        drop(guard);
        assert!(!pipeline.is_running());
        assert!(pipeline
            .run(&["sina".into()], &CancellationToken::new())
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn batch_timeout_stops_the_phase() {
        let mut cfg = config();
        cfg.batch_timeout = Duration::from_millis(50);
        cfg.workers = 1;
        let pipeline = build(
            collector_with(vec![news("1", "央行降准"), news("2", "银行股走强")]),
            Arc::new(SlowEnricher),
            Arc::new(MemorySink::new()),
            cfg,
        );
        let summary = pipeline
            .run(&["sina".into()], &CancellationToken::new())
            .await
            .unwrap();
        assert!(summary.timed_out);
        assert!(summary.completed < 2);
        assert!(!pipeline.is_running());
    }

    #[tokio::test]
    async fn reset_zeroes_stats() {
        let pipeline = build(
            collector_with(vec![news("1", "央行降准")]),
            Arc::new(crate::processing::LexiconEnricher),
            Arc::new(MemorySink::new()),
            config(),
        );
        pipeline
            .run(&["sina".into()], &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(pipeline.stats().total_processed, 1);
        pipeline.reset_stats();
        assert_eq!(pipeline.stats(), PipelineStats::default());
    }
}
