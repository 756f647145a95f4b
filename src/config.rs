use std::str::FromStr;
use std::time::Duration;

/// 数据源 API 配置
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub base_url: String,
    pub token: String,
    pub request_timeout: Duration,
}

/// 采集重试策略：第 n 次失败后等待 min(d0 * f^n, dmax)
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub initial_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
    pub max_retries: u32,
    /// 单次采集（含所有重试）的总超时
    pub operation_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Duration::from_secs(30),
            max_retries: 3,
            operation_timeout: Duration::from_secs(120),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub enabled: bool,
    pub key_prefix: String,
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub parallelism: usize,
    pub poll_interval: Duration,
    pub task_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            parallelism: 4,
            poll_interval: Duration::from_secs(1),
            task_timeout: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProcessingConfig {
    pub quality_threshold: f64,
    pub dedup_ttl: Duration,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            quality_threshold: 0.8,
            dedup_ttl: Duration::from_secs(7 * 24 * 3600),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewsConfig {
    pub workers: usize,
    pub queue_key: String,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub backoff_factor: f64,
    pub batch_timeout: Duration,
    pub monitor_interval: Duration,
    pub crawl_interval: Duration,
    pub pop_timeout: Duration,
    pub idle_sleep: Duration,
    pub fallback_enabled: bool,
    pub default_sources: Vec<String>,
}

impl Default for NewsConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_key: "news:queue".to_string(),
            max_retries: 3,
            retry_delay: Duration::from_secs(5),
            backoff_factor: 2.0,
            batch_timeout: Duration::from_secs(600),
            monitor_interval: Duration::from_secs(2),
            crawl_interval: Duration::from_millis(500),
            pop_timeout: Duration::from_secs(1),
            idle_sleep: Duration::from_millis(200),
            fallback_enabled: true,
            default_sources: vec!["sina".to_string(), "cls".to_string(), "eastmoney".to_string()],
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub provider: ProviderConfig,
    pub retry: RetryPolicy,
    pub cache: CacheConfig,
    pub scheduler: SchedulerConfig,
    pub processing: ProcessingConfig,
    pub news: NewsConfig,
    pub redis_url: String,
    pub database_url: String,
    pub ticker_interval: Duration,
    /// 命令行流程的整体超时
    pub flow_timeout: Duration,
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

fn env_secs(key: &str, default: u64) -> Duration {
    Duration::from_secs(env_or(key, default))
}

fn env_millis(key: &str, default: u64) -> Duration {
    Duration::from_millis(env_or(key, default))
}

impl AppConfig {
    /// 从环境变量读取配置（.env 由 main 先行加载），缺省值见各字段
    pub fn from_env() -> Self {
        let retry_default = RetryPolicy::default();
        let sched_default = SchedulerConfig::default();
        let proc_default = ProcessingConfig::default();
        let news_default = NewsConfig::default();

        let default_sources = std::env::var("NEWS_SOURCES")
            .ok()
            .map(|s| {
                s.split(|c| c == ',' || c == ';' || c == ' ')
                    .map(|x| x.trim().to_string())
                    .filter(|x| !x.is_empty())
                    .collect::<Vec<_>>()
            })
            .filter(|v| !v.is_empty())
            .unwrap_or(news_default.default_sources);

        Self {
            provider: ProviderConfig {
                base_url: std::env::var("PROVIDER_URL")
                    .unwrap_or_else(|_| "http://api.tushare.pro".to_string()),
                token: std::env::var("PROVIDER_TOKEN").unwrap_or_default(),
                request_timeout: env_secs("PROVIDER_TIMEOUT_SECS", 30),
            },
            retry: RetryPolicy {
                initial_delay: env_millis(
                    "RETRY_INITIAL_DELAY_MS",
                    retry_default.initial_delay.as_millis() as u64,
                ),
                multiplier: env_or("RETRY_MULTIPLIER", retry_default.multiplier),
                max_delay: env_millis(
                    "RETRY_MAX_DELAY_MS",
                    retry_default.max_delay.as_millis() as u64,
                ),
                max_retries: env_or("RETRY_MAX_RETRIES", retry_default.max_retries),
                operation_timeout: env_secs(
                    "COLLECT_TIMEOUT_SECS",
                    retry_default.operation_timeout.as_secs(),
                ),
            },
            cache: CacheConfig {
                enabled: env_or("CACHE_ENABLED", true),
                key_prefix: std::env::var("CACHE_PREFIX").unwrap_or_else(|_| "qi".to_string()),
            },
            scheduler: SchedulerConfig {
                parallelism: env_or("SCHEDULER_PARALLELISM", sched_default.parallelism).max(1),
                poll_interval: env_millis(
                    "SCHEDULER_POLL_MS",
                    sched_default.poll_interval.as_millis() as u64,
                ),
                task_timeout: env_secs(
                    "SCHEDULER_TASK_TIMEOUT_SECS",
                    sched_default.task_timeout.as_secs(),
                ),
            },
            processing: ProcessingConfig {
                quality_threshold: env_or("QUALITY_THRESHOLD", proc_default.quality_threshold),
                dedup_ttl: env_secs("DEDUP_TTL_SECS", proc_default.dedup_ttl.as_secs()),
            },
            news: NewsConfig {
                workers: env_or("NEWS_WORKERS", news_default.workers).max(1),
                queue_key: std::env::var("NEWS_QUEUE_KEY").unwrap_or(news_default.queue_key),
                max_retries: env_or("NEWS_MAX_RETRIES", news_default.max_retries),
                retry_delay: env_millis(
                    "NEWS_RETRY_DELAY_MS",
                    news_default.retry_delay.as_millis() as u64,
                ),
                backoff_factor: env_or("NEWS_BACKOFF_FACTOR", news_default.backoff_factor),
                batch_timeout: env_secs(
                    "NEWS_BATCH_TIMEOUT_SECS",
                    news_default.batch_timeout.as_secs(),
                ),
                monitor_interval: env_millis(
                    "NEWS_MONITOR_INTERVAL_MS",
                    news_default.monitor_interval.as_millis() as u64,
                ),
                crawl_interval: env_millis(
                    "NEWS_CRAWL_INTERVAL_MS",
                    news_default.crawl_interval.as_millis() as u64,
                ),
                pop_timeout: env_millis(
                    "NEWS_POP_TIMEOUT_MS",
                    news_default.pop_timeout.as_millis() as u64,
                ),
                idle_sleep: news_default.idle_sleep,
                fallback_enabled: env_or("NEWS_FALLBACK_ENABLED", news_default.fallback_enabled),
                default_sources,
            },
            redis_url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string()),
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite://quant_ingest.db?mode=rwc".to_string()),
            ticker_interval: env_secs("DATA_TASK_TICK_SECS", 30),
            flow_timeout: env_secs("FLOW_TIMEOUT_SECS", 1800),
        }
    }
}
