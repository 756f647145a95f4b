//! 单条记录处理流水线：Clean → Validate → Dedup → Transform → Quality → Mark

pub mod cleaner;
pub mod dedup;
pub mod quality;
pub mod transformer;
pub mod validator;

pub use cleaner::Cleaner;
pub use dedup::{connect_deduplicator, Deduplicator, MemoryDeduplicator, StoreDeduplicator};
pub use quality::QualityChecker;
pub use transformer::{
    EnrichingTransformer, FallbackTransformer, LexiconEnricher, NewsEnricher, Transformer,
};
pub use validator::Validator;

use crate::model::{DataKind, QualityReport, Record};
use log::{debug, warn};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ProcessingError {
    #[error("validation failed on {field}: {reason}")]
    Validation { field: String, reason: String },
    #[error("transform failed: {0}")]
    Transform(String),
    #[error("store error: {0}")]
    Store(String),
}

impl ProcessingError {
    pub fn is_validation(&self) -> bool {
        matches!(self, ProcessingError::Validation { .. })
    }
}

/// 单条记录处理结果；重复记录返回清洗后的原记录，不再 Transform
#[derive(Debug, Clone)]
pub struct ProcessOutcome {
    pub record: Record,
    pub duplicate: bool,
    pub quality: Option<QualityReport>,
}

/// 一批记录的处理汇总
#[derive(Debug, Default)]
pub struct BatchOutcome {
    pub records: Vec<Record>,
    pub duplicates: usize,
    pub rejected: usize,
    pub avg_quality: Option<f64>,
}

pub struct DataPipeline {
    cleaner: Cleaner,
    validator: Validator,
    dedup: Arc<dyn Deduplicator>,
    transformer: Arc<dyn Transformer>,
    quality: QualityChecker,
}

impl DataPipeline {
    pub fn new(
        dedup: Arc<dyn Deduplicator>,
        transformer: Arc<dyn Transformer>,
        quality: QualityChecker,
    ) -> Self {
        Self {
            cleaner: Cleaner::new(),
            validator: Validator::new(),
            dedup,
            transformer,
            quality,
        }
    }

    pub fn deduplicator(&self) -> &Arc<dyn Deduplicator> {
        &self.dedup
    }

    pub async fn process(&self, record: Record) -> Result<ProcessOutcome, ProcessingError> {
        self.process_with(record, self.transformer.as_ref()).await
    }

    /// 用指定的 Transform 处理；新闻降级路径借此替换增强器
    pub async fn process_with(
        &self,
        record: Record,
        transformer: &dyn Transformer,
    ) -> Result<ProcessOutcome, ProcessingError> {
        self.run(record, transformer, true).await
    }

    async fn run(
        &self,
        record: Record,
        transformer: &dyn Transformer,
        mark: bool,
    ) -> Result<ProcessOutcome, ProcessingError> {
        let cleaned = self.cleaner.clean(record);
        self.validator.validate(&cleaned)?;

        let kind = cleaned.kind();
        let fingerprint = cleaned.fingerprint();
        match self.dedup.exists(kind, &fingerprint).await {
            Ok(true) => {
                debug!("重复记录，跳过: {}:{}", kind, fingerprint);
                return Ok(ProcessOutcome {
                    record: cleaned,
                    duplicate: true,
                    quality: None,
                });
            }
            Ok(false) => {}
            Err(e) => warn!("去重查询失败，按新记录处理: {}", e),
        }

        let transformed = transformer.transform(cleaned).await?;

        let report = self.quality.check(&transformed);
        if !self.quality.is_acceptable(&report) {
            warn!(
                "⚠ 质量评分偏低 {}:{} score={:.2} issues={}",
                kind,
                fingerprint,
                report.quality_score,
                report.issues.len()
            );
        }

        if mark {
            if let Err(e) = self.dedup.mark(kind, &fingerprint).await {
                warn!("标记已处理失败（忽略）: {}:{} ({})", kind, fingerprint, e);
            }
        }

        Ok(ProcessOutcome {
            record: transformed,
            duplicate: false,
            quality: Some(report),
        })
    }

    /// 逐条处理；单条失败只计数，不影响其余记录
    ///
    /// 不写去重标记，批内重复按指纹剔除。调用方写入成功后再调用 [`DataPipeline::mark_stored`]，
    /// 写入失败时整批仍可重跑。
    pub async fn process_batch(&self, records: Vec<Record>) -> BatchOutcome {
        let mut out = BatchOutcome::default();
        let mut seen = HashSet::new();
        let mut quality_sum = 0.0;
        let mut scored = 0usize;
        for record in records {
            match self.run(record, self.transformer.as_ref(), false).await {
                Ok(o) if o.duplicate => out.duplicates += 1,
                Ok(o) if !seen.insert((o.record.kind(), o.record.fingerprint())) => {
                    out.duplicates += 1
                }
                Ok(o) => {
                    if let Some(q) = &o.quality {
                        quality_sum += q.quality_score;
                        scored += 1;
                    }
                    out.records.push(o.record);
                }
                Err(e) => {
                    debug!("记录被拒绝: {}", e);
                    out.rejected += 1;
                }
            }
        }
        if scored > 0 {
            out.avg_quality = Some(quality_sum / scored as f64);
        }
        out
    }

    /// 已落地的记录写入去重标记，按类型分批
    pub async fn mark_stored(&self, records: &[Record]) {
        let mut by_kind: HashMap<DataKind, Vec<String>> = HashMap::new();
        for r in records {
            by_kind.entry(r.kind()).or_default().push(r.fingerprint());
        }
        for (kind, keys) in by_kind {
            if let Err(e) = self.dedup.mark_batch(kind, &keys).await {
                warn!("批量标记已处理失败（忽略）: {} {} 条 ({})", kind, keys.len(), e);
            }
        }
    }
}
