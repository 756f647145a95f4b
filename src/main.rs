use anyhow::Context;
use chrono::Local;
use log::{error, info, warn};
use quant_ingest::collector::{Collector, CollectorRegistry, ProviderCollector, ResponseCache};
use quant_ingest::config::AppConfig;
use quant_ingest::model::DataKind;
use quant_ingest::news::{NewsPipeline, NewsQueue};
use quant_ingest::orchestrator::{
    BusinessOrchestrator, ControlService, DataTaskTicker, FlowCommand,
};
use quant_ingest::processing::{
    connect_deduplicator, DataPipeline, Deduplicator, EnrichingTransformer, QualityChecker,
};
use quant_ingest::provider::HttpProvider;
use quant_ingest::scheduler::{CollectionExecutor, TaskScheduler};
use quant_ingest::storage::{establish_connection, RecordSink, SeaOrmSink};
use quant_ingest::store::{KvStore, MemoryStore, RedisStore};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

const PRIMARY_COLLECTOR: &str = "tushare";

fn init_logging() -> anyhow::Result<()> {
    let mut builder = env_logger::Builder::from_default_env();
    // LOG_DIR 设置时写文件，否则写 stderr
    if let Ok(dir) = std::env::var("LOG_DIR") {
        let log_dir = std::path::PathBuf::from(dir);
        std::fs::create_dir_all(&log_dir)?;
        let ts = Local::now().format("%Y%m%d-%H%M%S").to_string();
        let log_file = std::fs::File::create(log_dir.join(format!("ingest-{}.log", ts)))?;
        builder.target(env_logger::Target::Pipe(Box::new(log_file)));
    }
    builder
        .filter_level(log::LevelFilter::Warn)
        .filter_module("quant_ingest", log::LevelFilter::Info)
        .filter_module("sqlx", log::LevelFilter::Error)
        .filter_module("sea_orm", log::LevelFilter::Error)
        .init();
    Ok(())
}

fn print_usage() {
    println!("用法: quant-ingest [daemon | health | <flow> ...]");
    println!("  daemon                                   常驻运行调度器和定时任务（默认）");
    println!("  health                                   输出健康检查结果");
    println!("  batch_collection <代码,代码> [开始] [结束] 批量采集日线");
    println!("  daily_full [交易日] [代码,代码]          股票列表 + 日线 + 新闻");
    println!("  news [数据源,数据源]                     运行新闻流水线");
    println!("  custom <步骤> ...                        自定义步骤，如 macro:cpi daily:000001.SZ");
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init_logging()?;

    let args: Vec<String> = std::env::args().skip(1).collect();
    if matches!(args.first().map(String::as_str), Some("help" | "-h" | "--help")) {
        print_usage();
        return Ok(());
    }

    let config = AppConfig::from_env();
    let cancel = CancellationToken::new();

    // 1. 数据库
    let db = Arc::new(
        establish_connection(&config.database_url)
            .await
            .with_context(|| format!("数据库连接失败: {}", config.database_url))?,
    );
    info!("✓ 数据库连接成功");

    // 2. 共享存储，不可用时退回进程内实现
    let store: Arc<dyn KvStore> = match RedisStore::connect(&config.redis_url).await {
        Ok(s) => Arc::new(s),
        Err(e) => {
            warn!("Redis 不可用，使用进程内存储（缓存和队列不跨进程共享）: {}", e);
            let memory = Arc::new(MemoryStore::new());
            memory
                .clone()
                .spawn_sweeper(std::time::Duration::from_secs(60), cancel.clone());
            memory
        }
    };
    let dedup = connect_deduplicator(
        Some(store.clone()),
        config.processing.dedup_ttl,
        &cancel,
    )
    .await;
    info!("去重后端: {}", dedup.backend());

    // 3. 采集器
    let provider = Arc::new(HttpProvider::new(&config.provider).context("创建数据源客户端失败")?);
    let cache = config
        .cache
        .enabled
        .then(|| ResponseCache::new(store.clone(), config.cache.key_prefix.clone()));
    let tushare = Arc::new(ProviderCollector::new(
        PRIMARY_COLLECTOR,
        provider,
        config.retry.clone(),
        cache,
    ));
    match tushare.ping().await {
        Ok(()) => info!("✓ 数据源连接正常"),
        Err(e) => warn!("⚠ 数据源连接检查失败: {}", e),
    }
    let mut registry = CollectorRegistry::new();
    registry.register(tushare);

    // 4. 处理流水线、调度器、新闻流水线
    let pipeline = Arc::new(DataPipeline::new(
        dedup.clone(),
        Arc::new(EnrichingTransformer::default()),
        QualityChecker::new(config.processing.quality_threshold),
    ));
    let sink: Arc<dyn RecordSink> = Arc::new(SeaOrmSink::new(db.clone()));
    let scheduler = Arc::new(TaskScheduler::new(
        Arc::new(CollectionExecutor::new(
            registry.clone(),
            pipeline.clone(),
            sink.clone(),
        )),
        config.scheduler.clone(),
    ));
    let news_collector = registry
        .for_kind(DataKind::News)
        .context("没有支持新闻的采集器")?;
    let news = Arc::new(NewsPipeline::new(
        news_collector,
        pipeline,
        sink,
        NewsQueue::new(store.clone(), config.news.queue_key.clone()),
        config.news.clone(),
    ));
    let orchestrator = Arc::new(BusinessOrchestrator::new(
        scheduler.clone(),
        news,
        registry,
        store,
        PRIMARY_COLLECTOR,
    ));
    let control = Arc::new(ControlService::new(
        orchestrator.clone(),
        db,
        dedup,
        cancel.clone(),
    ));
    control.recover().await;

    let scheduler_handle = scheduler.start(cancel.clone());

    match args.first().map(String::as_str) {
        None | Some("daemon") => {
            let ticker = DataTaskTicker::new(control, config.ticker_interval).start(cancel.clone());
            let health = orchestrator.health().await;
            info!(
                "服务已启动: 存储 {} 采集器 {:?}",
                if health.store_ok { "正常" } else { "异常" },
                health.collectors
            );
            tokio::signal::ctrl_c().await?;
            info!("收到退出信号，正在停止...");
            cancel.cancel();
            let _ = ticker.await;
        }
        Some("health") => {
            let report = orchestrator.health().await;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Some(_) => {
            let command: FlowCommand = args.join(" ").parse()?;
            let result = tokio::select! {
                r = orchestrator.run_flow(&command, config.flow_timeout, &cancel) => r,
                _ = tokio::signal::ctrl_c() => {
                    warn!("收到退出信号，取消流程 {}", command.name());
                    cancel.cancel();
                    Err(quant_ingest::orchestrator::OrchestratorError::Flow("已取消".to_string()))
                }
            };
            match result {
                Ok(report) => {
                    println!("流程 {} 完成:", report.flow);
                    for step in &report.steps {
                        println!("  {:?}", step);
                    }
                }
                Err(e) => {
                    error!("流程失败: {}", e);
                    cancel.cancel();
                    let _ = scheduler_handle.await;
                    return Err(e.into());
                }
            }
        }
    }

    cancel.cancel();
    let _ = scheduler_handle.await;
    Ok(())
}
