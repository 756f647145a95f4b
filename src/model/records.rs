use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// 数据类别，用于缓存键、去重键和质量规则选择
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataKind {
    Stock,
    Market,
    Financial,
    News,
    Macro,
}

impl DataKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataKind::Stock => "stock",
            DataKind::Market => "market",
            DataKind::Financial => "financial",
            DataKind::News => "news",
            DataKind::Macro => "macro",
        }
    }
}

impl fmt::Display for DataKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 股票列表条目（stock_basic）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockInfo {
    pub symbol: String,
    pub code: String,
    pub name: String,
    pub area: Option<String>,
    pub industry: Option<String>,
    pub market: Option<String>,
    pub list_date: Option<NaiveDate>,
}

/// K 线（日线或分钟线）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketBar {
    pub symbol: String,
    pub trade_time: NaiveDateTime,
    /// "1d" / "1min" / "5min" ...
    pub period: String,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    /// 股
    pub volume: f64,
    /// 元
    pub amount: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatementType {
    Income,
    Balance,
    Indicator,
}

impl StatementType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatementType::Income => "income",
            StatementType::Balance => "balance",
            StatementType::Indicator => "indicator",
        }
    }
}

/// 财务报表条目，不同报表只填充各自的字段
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FinancialStatement {
    pub symbol: String,
    pub ann_date: Option<NaiveDate>,
    pub report_date: Option<NaiveDate>,
    pub report_type: String,
    pub statement_type: Option<StatementType>,
    pub revenue: Option<f64>,
    pub net_profit: Option<f64>,
    pub total_assets: Option<f64>,
    pub total_liabilities: Option<f64>,
    pub equity: Option<f64>,
    pub eps: Option<f64>,
    pub roe: Option<f64>,
    pub roa: Option<f64>,
}

/// 新闻条目，enrichment 字段在 Transform 阶段填充
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct NewsItem {
    pub id: String,
    pub title: String,
    pub content: String,
    pub source: String,
    pub url: Option<String>,
    pub publish_time: Option<NaiveDateTime>,
    #[serde(default)]
    pub related_stocks: Vec<String>,
    #[serde(default)]
    pub entities: Vec<String>,
    #[serde(default)]
    pub industries: Vec<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
    pub sentiment: Option<f64>,
    #[serde(default)]
    pub extra: HashMap<String, String>,
}

/// 宏观指标观测值
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MacroObservation {
    /// CPI / GDP / SHIBOR_ON ...
    pub indicator: String,
    pub period: NaiveDate,
    pub value: f64,
    pub unit: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum Record {
    Stock(StockInfo),
    Market(MarketBar),
    Financial(FinancialStatement),
    News(NewsItem),
    Macro(MacroObservation),
}

impl Record {
    pub fn kind(&self) -> DataKind {
        match self {
            Record::Stock(_) => DataKind::Stock,
            Record::Market(_) => DataKind::Market,
            Record::Financial(_) => DataKind::Financial,
            Record::News(_) => DataKind::News,
            Record::Macro(_) => DataKind::Macro,
        }
    }

    /// 去重指纹：记录的自然组合键
    pub fn fingerprint(&self) -> String {
        match self {
            Record::Stock(s) => s.symbol.clone(),
            Record::Market(b) => format!(
                "{}|{}|{}",
                b.symbol,
                b.trade_time.format("%Y%m%d%H%M%S"),
                b.period
            ),
            Record::Financial(f) => format!(
                "{}|{}|{}|{}",
                f.symbol,
                f.report_date
                    .map(|d| d.format("%Y%m%d").to_string())
                    .unwrap_or_default(),
                f.statement_type.map(|t| t.as_str()).unwrap_or(""),
                f.report_type
            ),
            Record::News(n) => format!(
                "{}|{}",
                n.title,
                n.publish_time
                    .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                    .unwrap_or_default()
            ),
            Record::Macro(m) => format!("{}|{}", m.indicator, m.period.format("%Y%m%d")),
        }
    }

    /// 记录所属日期，用于时效性检查
    pub fn record_date(&self) -> Option<NaiveDate> {
        match self {
            Record::Stock(s) => s.list_date,
            Record::Market(b) => Some(b.trade_time.date()),
            Record::Financial(f) => f.report_date.or(f.ann_date),
            Record::News(n) => n.publish_time.map(|t| t.date()),
            Record::Macro(m) => Some(m.period),
        }
    }
}
