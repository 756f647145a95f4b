//! Transform 阶段：行情/财报/宏观原样通过，新闻做实体、情感和行业标注
//!
//! NLP 模型不在本 crate 内，[`NewsEnricher`] 是它的插槽；默认由词典实现填充。

use super::ProcessingError;
use crate::model::{NewsItem, Record};
use async_trait::async_trait;
use regex::Regex;
use std::collections::BTreeSet;
use std::sync::{Arc, OnceLock};

const POSITIVE_WORDS: &[&str] = &[
    "增长", "上涨", "利好", "盈利", "突破", "回升", "大涨", "涨停", "扭亏", "超预期", "增持",
    "回购", "创新高", "提升", "改善",
];
const NEGATIVE_WORDS: &[&str] = &[
    "下跌", "亏损", "利空", "下滑", "暴跌", "跌停", "减持", "违约", "处罚", "预亏", "退市",
    "下降", "萎缩", "风险",
];

/// 行业 -> 触发词
const INDUSTRY_KEYWORDS: &[(&str, &[&str])] = &[
    ("银行", &["银行", "信贷", "存款", "降准"]),
    ("证券", &["券商", "证券", "投行"]),
    ("保险", &["保险", "保费"]),
    ("房地产", &["地产", "楼市", "房价", "住房"]),
    ("新能源", &["新能源", "光伏", "锂电", "风电", "储能"]),
    ("汽车", &["汽车", "整车", "乘用车"]),
    ("半导体", &["芯片", "半导体", "晶圆", "集成电路"]),
    ("医药", &["医药", "药品", "疫苗", "医疗"]),
    ("白酒", &["白酒", "酒企"]),
    ("有色金属", &["有色", "铜价", "黄金", "稀土"]),
];

fn stock_code_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?:\b(\d{6})\.(SH|SZ|BJ)\b)|(?:\b(SH|SZ|BJ)(\d{6})\b)")
            .expect("literal pattern")
    })
}

fn book_title_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"《([^》]{1,30})》").expect("literal pattern"))
}

/// 正文中出现的股票代码，统一为 `000001.SZ` 形式
pub fn extract_stock_codes(text: &str) -> Vec<String> {
    let upper = text.to_uppercase();
    let mut out = BTreeSet::new();
    for cap in stock_code_re().captures_iter(&upper) {
        let code = match (cap.get(1), cap.get(2), cap.get(3), cap.get(4)) {
            (Some(num), Some(ex), _, _) => format!("{}.{}", num.as_str(), ex.as_str()),
            (_, _, Some(ex), Some(num)) => format!("{}.{}", num.as_str(), ex.as_str()),
            _ => continue,
        };
        out.insert(code);
    }
    out.into_iter().collect()
}

fn matched<'a>(text: &str, words: &[&'a str]) -> Vec<&'a str> {
    words.iter().copied().filter(|w| text.contains(w)).collect()
}

/// 词典情感分：(正面词数 - 负面词数) / 命中总数，无命中为 0
pub fn lexicon_sentiment(text: &str) -> f64 {
    let pos = matched(text, POSITIVE_WORDS).len() as f64;
    let neg = matched(text, NEGATIVE_WORDS).len() as f64;
    if pos + neg == 0.0 {
        0.0
    } else {
        ((pos - neg) / (pos + neg)).clamp(-1.0, 1.0)
    }
}

pub fn tag_industries(text: &str) -> Vec<String> {
    INDUSTRY_KEYWORDS
        .iter()
        .filter(|(_, words)| words.iter().any(|w| text.contains(w)))
        .map(|(name, _)| name.to_string())
        .collect()
}

fn merge(existing: &mut Vec<String>, extra: impl IntoIterator<Item = String>) {
    let mut set: BTreeSet<String> = existing.drain(..).collect();
    set.extend(extra);
    *existing = set.into_iter().collect();
}

/// 新闻增强插槽
#[async_trait]
pub trait NewsEnricher: Send + Sync {
    fn name(&self) -> &str;
    async fn enrich(&self, item: NewsItem) -> Result<NewsItem, ProcessingError>;
}

/// 词典增强：实体抽取、情感打分、行业标注
#[derive(Debug, Default, Clone)]
pub struct LexiconEnricher;

#[async_trait]
impl NewsEnricher for LexiconEnricher {
    fn name(&self) -> &str {
        "lexicon"
    }

    async fn enrich(&self, mut item: NewsItem) -> Result<NewsItem, ProcessingError> {
        let text = format!("{} {}", item.title, item.content);

        let codes = extract_stock_codes(&text);
        merge(&mut item.related_stocks, codes.clone());

        let titles = book_title_re()
            .captures_iter(&text)
            .filter_map(|c| c.get(1).map(|m| m.as_str().to_string()));
        merge(&mut item.entities, codes.into_iter().chain(titles));

        let industries = tag_industries(&text);
        merge(&mut item.industries, industries);

        let keywords = matched(&text, POSITIVE_WORDS)
            .into_iter()
            .chain(matched(&text, NEGATIVE_WORDS))
            .map(str::to_string);
        merge(&mut item.keywords, keywords);

        item.sentiment = Some(lexicon_sentiment(&text));
        item.extra
            .insert("processed_by".to_string(), self.name().to_string());
        Ok(item)
    }
}

/// 流水线 Transform 步骤
#[async_trait]
pub trait Transformer: Send + Sync {
    fn name(&self) -> &str;
    async fn transform(&self, record: Record) -> Result<Record, ProcessingError>;
}

/// 默认 Transform：非新闻原样通过，新闻交给增强器
pub struct EnrichingTransformer {
    enricher: Arc<dyn NewsEnricher>,
}

impl EnrichingTransformer {
    pub fn new(enricher: Arc<dyn NewsEnricher>) -> Self {
        Self { enricher }
    }
}

impl Default for EnrichingTransformer {
    fn default() -> Self {
        Self::new(Arc::new(LexiconEnricher))
    }
}

#[async_trait]
impl Transformer for EnrichingTransformer {
    fn name(&self) -> &str {
        self.enricher.name()
    }

    async fn transform(&self, record: Record) -> Result<Record, ProcessingError> {
        match record {
            Record::News(item) => Ok(Record::News(self.enricher.enrich(item).await?)),
            other => Ok(other),
        }
    }
}

/// 降级 Transform：只从标题取股票代码和行业，情感记为中性
#[derive(Debug, Default, Clone)]
pub struct FallbackTransformer;

#[async_trait]
impl Transformer for FallbackTransformer {
    fn name(&self) -> &str {
        "fallback"
    }

    async fn transform(&self, record: Record) -> Result<Record, ProcessingError> {
        let Record::News(mut item) = record else {
            return Ok(record);
        };
        merge(&mut item.related_stocks, extract_stock_codes(&item.title));
        merge(&mut item.industries, tag_industries(&item.title));
        if item.sentiment.is_none() {
            item.sentiment = Some(0.0);
        }
        item.extra
            .insert("processed_by".to_string(), "fallback".to_string());
        Ok(Record::News(item))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn news(title: &str, content: &str) -> NewsItem {
        NewsItem {
            id: "n1".into(),
            title: title.into(),
            content: content.into(),
            source: "sina".into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn all_positive_keywords_score_plus_one() {
        let out = LexiconEnricher
            .enrich(news("业绩公告", "营收增长 股价上涨 政策利好"))
            .await
            .unwrap();
        assert_eq!(out.sentiment, Some(1.0));
        assert_eq!(out.keywords.len(), 3);
    }

    #[test]
    fn mixed_keywords_balance_out() {
        assert_eq!(lexicon_sentiment("利润增长但股价下跌"), 0.0);
        assert_eq!(lexicon_sentiment("没有任何情绪"), 0.0);
        assert_eq!(lexicon_sentiment("亏损扩大"), -1.0);
    }

    #[tokio::test]
    async fn stock_codes_and_industries_are_tagged() {
        let out = LexiconEnricher
            .enrich(news(
                "平安银行(000001.SZ)发布《年度报告》",
                "sh600036 同步公布信贷数据",
            ))
            .await
            .unwrap();
        assert_eq!(
            out.related_stocks,
            vec!["000001.SZ".to_string(), "600036.SH".to_string()]
        );
        assert!(out.industries.contains(&"银行".to_string()));
        assert!(out.entities.contains(&"年度报告".to_string()));
    }

    #[tokio::test]
    async fn non_news_records_pass_through() {
        let rec = Record::Macro(crate::model::MacroObservation {
            indicator: "CPI".into(),
            period: chrono::NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            value: 0.3,
            unit: "%".into(),
        });
        let out = EnrichingTransformer::default()
            .transform(rec.clone())
            .await
            .unwrap();
        assert_eq!(out, rec);
    }

    #[tokio::test]
    async fn fallback_marks_neutral_sentiment() {
        let Record::News(out) = FallbackTransformer
            .transform(Record::News(news("新能源车销量 300750.SZ", "")))
            .await
            .unwrap()
        else {
            unreachable!()
        };
        assert_eq!(out.sentiment, Some(0.0));
        assert_eq!(out.related_stocks, vec!["300750.SZ".to_string()]);
        assert_eq!(out.extra.get("processed_by").unwrap(), "fallback");
    }
}
