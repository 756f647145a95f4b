//! 表格响应的按位置解析
//!
//! 每个接口的 items 按请求时 fields 的顺序排列，这里逐列读取。

use super::error::CollectorError;
use crate::model::request::{DATETIME_FORMAT, DATE_FORMAT};
use crate::model::{
    FetchRequest, FinancialStatement, MacroIndicator, MacroObservation, MarketBar, NewsItem,
    Record, StatementType, StockInfo,
};
use crate::provider::ProviderTable;
use chrono::{NaiveDate, NaiveDateTime};
use log::warn;
use serde_json::Value;
use sha2::{Digest, Sha256};

/// 日线 vol 单位为手，amount 单位为千元
const LOT_SIZE: f64 = 100.0;
const AMOUNT_UNIT: f64 = 1000.0;

struct Row<'a> {
    cells: &'a [Value],
}

impl<'a> Row<'a> {
    fn str(&self, i: usize) -> Option<String> {
        match self.cells.get(i)? {
            Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    fn f64(&self, i: usize) -> Option<f64> {
        match self.cells.get(i)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        }
        .filter(|v| v.is_finite())
    }

    fn date(&self, i: usize) -> Option<NaiveDate> {
        NaiveDate::parse_from_str(&self.str(i)?, DATE_FORMAT).ok()
    }

    fn datetime(&self, i: usize) -> Option<NaiveDateTime> {
        NaiveDateTime::parse_from_str(&self.str(i)?, DATETIME_FORMAT).ok()
    }
}

fn rows<'a>(
    table: &'a ProviderTable,
    expected: usize,
    api: &str,
) -> Result<impl Iterator<Item = Row<'a>>, CollectorError> {
    if let Some(bad) = table.items.iter().find(|r| r.len() < expected) {
        return Err(CollectorError::parse(format!(
            "{} 行列数不足: 期望 {} 实际 {}",
            api,
            expected,
            bad.len()
        )));
    }
    Ok(table.items.iter().map(|r| Row { cells: r }))
}

fn skipped(api: &str, n: usize) {
    if n > 0 {
        warn!("{} 跳过 {} 行关键字段无法解析的数据", api, n);
    }
}

pub fn parse_stock_basic(table: &ProviderTable) -> Result<Vec<Record>, CollectorError> {
    let mut out = Vec::new();
    let mut bad = 0;
    for row in rows(table, 7, "stock_basic")? {
        let Some(symbol) = row.str(0) else {
            bad += 1;
            continue;
        };
        out.push(Record::Stock(StockInfo {
            symbol,
            code: row.str(1).unwrap_or_default(),
            name: row.str(2).unwrap_or_default(),
            area: row.str(3),
            industry: row.str(4),
            market: row.str(5),
            list_date: row.date(6),
        }));
    }
    skipped("stock_basic", bad);
    Ok(out)
}

pub fn parse_daily(table: &ProviderTable) -> Result<Vec<Record>, CollectorError> {
    let mut out = Vec::new();
    let mut bad = 0;
    for row in rows(table, 11, "daily")? {
        let (Some(symbol), Some(date)) = (row.str(0), row.date(1)) else {
            bad += 1;
            continue;
        };
        out.push(Record::Market(MarketBar {
            symbol,
            trade_time: date.and_hms_opt(0, 0, 0).unwrap_or_default(),
            period: "1d".to_string(),
            open: row.f64(2).unwrap_or(0.0),
            high: row.f64(3).unwrap_or(0.0),
            low: row.f64(4).unwrap_or(0.0),
            close: row.f64(5).unwrap_or(0.0),
            volume: row.f64(9).unwrap_or(0.0) * LOT_SIZE,
            amount: row.f64(10).unwrap_or(0.0) * AMOUNT_UNIT,
        }));
    }
    skipped("daily", bad);
    Ok(out)
}

pub fn parse_minutes(table: &ProviderTable, freq: &str) -> Result<Vec<Record>, CollectorError> {
    let mut out = Vec::new();
    let mut bad = 0;
    for row in rows(table, 8, "stk_mins")? {
        let (Some(symbol), Some(ts)) = (row.str(0), row.datetime(1)) else {
            bad += 1;
            continue;
        };
        out.push(Record::Market(MarketBar {
            symbol,
            trade_time: ts,
            period: freq.to_string(),
            open: row.f64(2).unwrap_or(0.0),
            close: row.f64(3).unwrap_or(0.0),
            high: row.f64(4).unwrap_or(0.0),
            low: row.f64(5).unwrap_or(0.0),
            volume: row.f64(6).unwrap_or(0.0),
            amount: row.f64(7).unwrap_or(0.0),
        }));
    }
    skipped("stk_mins", bad);
    Ok(out)
}

pub fn parse_financial(
    table: &ProviderTable,
    statement: StatementType,
) -> Result<Vec<Record>, CollectorError> {
    let expected = match statement {
        StatementType::Income => 6,
        StatementType::Balance => 7,
        StatementType::Indicator => 6,
    };
    let mut out = Vec::new();
    let mut bad = 0;
    for row in rows(table, expected, statement.as_str())? {
        let Some(symbol) = row.str(0) else {
            bad += 1;
            continue;
        };
        let mut fs = FinancialStatement {
            symbol,
            ann_date: row.date(1),
            report_date: row.date(2),
            statement_type: Some(statement),
            ..Default::default()
        };
        match statement {
            StatementType::Income => {
                fs.report_type = row.str(3).unwrap_or_else(|| "1".to_string());
                fs.revenue = row.f64(4);
                fs.net_profit = row.f64(5);
            }
            StatementType::Balance => {
                fs.report_type = row.str(3).unwrap_or_else(|| "1".to_string());
                fs.total_assets = row.f64(4);
                fs.total_liabilities = row.f64(5);
                fs.equity = row.f64(6);
            }
            StatementType::Indicator => {
                fs.report_type = "1".to_string();
                fs.eps = row.f64(3);
                fs.roe = row.f64(4);
                fs.roa = row.f64(5);
            }
        }
        out.push(Record::Financial(fs));
    }
    skipped(statement.as_str(), bad);
    Ok(out)
}

fn parse_month(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(&format!("{}01", s.trim()), DATE_FORMAT).ok()
}

/// "2024Q1" -> 2024-01-01
fn parse_quarter(s: &str) -> Option<NaiveDate> {
    let (year, q) = s.trim().split_once('Q')?;
    let year: i32 = year.parse().ok()?;
    let q: u32 = q.parse().ok()?;
    if !(1..=4).contains(&q) {
        return None;
    }
    NaiveDate::from_ymd_opt(year, (q - 1) * 3 + 1, 1)
}

pub fn parse_macro(
    table: &ProviderTable,
    indicator: MacroIndicator,
) -> Result<Vec<Record>, CollectorError> {
    let mut out = Vec::new();
    let mut bad = 0;
    match indicator {
        MacroIndicator::Cpi | MacroIndicator::Gdp => {
            let (name, api) = match indicator {
                MacroIndicator::Cpi => ("CPI", "cn_cpi"),
                _ => ("GDP", "cn_gdp"),
            };
            for row in rows(table, 3, api)? {
                let period = row.str(0).and_then(|p| match indicator {
                    MacroIndicator::Cpi => parse_month(&p),
                    _ => parse_quarter(&p),
                });
                let (Some(period), Some(value)) = (period, row.f64(2)) else {
                    bad += 1;
                    continue;
                };
                out.push(Record::Macro(MacroObservation {
                    indicator: name.to_string(),
                    period,
                    value,
                    unit: "%".to_string(),
                }));
            }
            skipped(api, bad);
        }
        MacroIndicator::Shibor => {
            let tenors = [(1, "SHIBOR_ON"), (2, "SHIBOR_1W"), (3, "SHIBOR_1M")];
            for row in rows(table, 4, "shibor")? {
                let Some(date) = row.date(0) else {
                    bad += 1;
                    continue;
                };
                for (col, name) in tenors {
                    if let Some(value) = row.f64(col) {
                        out.push(Record::Macro(MacroObservation {
                            indicator: name.to_string(),
                            period: date,
                            value,
                            unit: "%".to_string(),
                        }));
                    }
                }
            }
            skipped("shibor", bad);
        }
    }
    Ok(out)
}

pub fn news_id(source: &str, title: &str, publish_time: Option<NaiveDateTime>) -> String {
    let raw = format!(
        "{}|{}|{}",
        source,
        title,
        publish_time.map(|t| t.to_string()).unwrap_or_default()
    );
    let digest = hex::encode(Sha256::digest(raw.as_bytes()));
    format!("{}-{}", source, &digest[..16])
}

pub fn parse_news(table: &ProviderTable, source: &str) -> Result<Vec<Record>, CollectorError> {
    let mut out = Vec::new();
    let mut bad = 0;
    for row in rows(table, 4, "news")? {
        let content = row.str(2).unwrap_or_default();
        // 快讯常常没有标题，用正文开头代替
        let title = row
            .str(1)
            .unwrap_or_else(|| content.chars().take(50).collect::<String>());
        if title.is_empty() {
            bad += 1;
            continue;
        }
        let publish_time = row.datetime(0);
        let mut item = NewsItem {
            id: news_id(source, &title, publish_time),
            title,
            content,
            source: source.to_string(),
            publish_time,
            ..Default::default()
        };
        if let Some(ch) = row.str(3) {
            item.extra.insert("channels".to_string(), ch);
        }
        out.push(Record::News(item));
    }
    skipped("news", bad);
    Ok(out)
}

/// 按请求类型分派解析
pub fn parse_table(
    request: &FetchRequest,
    table: &ProviderTable,
) -> Result<Vec<Record>, CollectorError> {
    match request {
        FetchRequest::StockBasic { .. } => parse_stock_basic(table),
        FetchRequest::DailyQuote { .. } => parse_daily(table),
        FetchRequest::MinuteQuote { freq, .. } => parse_minutes(table, freq),
        FetchRequest::Financial { statement, .. } => parse_financial(table, *statement),
        FetchRequest::Macro { indicator, .. } => parse_macro(table, *indicator),
        FetchRequest::News { source, .. } => parse_news(table, source),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn table(items: Vec<Value>) -> ProviderTable {
        ProviderTable {
            fields: vec![],
            items: items
                .into_iter()
                .map(|v| v.as_array().cloned().unwrap())
                .collect(),
        }
    }

    #[test]
    fn daily_rows_parse_positionally_with_unit_conversion() {
        let t = table(vec![json!([
            "000001.SZ", "20240102", 9.39, 9.42, 9.21, 9.21, 9.39, -0.18, -1.92, 1158366.45,
            1075742.252
        ])]);
        let recs = parse_daily(&t).unwrap();
        let Record::Market(bar) = &recs[0] else {
            panic!("expected bar")
        };
        assert_eq!(bar.period, "1d");
        assert_eq!(bar.high, 9.42);
        assert_eq!(bar.low, 9.21);
        assert!((bar.volume - 115836645.0).abs() < 1e-3);
        assert!((bar.amount - 1075742252.0).abs() < 1e-3);
        assert_eq!(bar.trade_time.format("%Y%m%d").to_string(), "20240102");
    }

    #[test]
    fn minute_rows_use_intraday_datetime_and_column_order() {
        let t = table(vec![json!([
            "600000.SH", "2024-01-02 09:31:00", 6.60, 6.61, 6.62, 6.59, 120000, 792000.0
        ])]);
        let recs = parse_minutes(&t, "1min").unwrap();
        let Record::Market(bar) = &recs[0] else {
            panic!("expected bar")
        };
        assert_eq!(bar.close, 6.61);
        assert_eq!(bar.high, 6.62);
        assert_eq!(bar.period, "1min");
    }

    #[test]
    fn short_rows_are_a_parse_error() {
        let t = table(vec![json!(["000001.SZ", "20240102"])]);
        assert!(parse_daily(&t).is_err());
    }

    #[test]
    fn gdp_quarter_and_shibor_tenors() {
        let gdp = table(vec![json!(["2024Q2", 616836.2, 5.0])]);
        let recs = parse_macro(&gdp, MacroIndicator::Gdp).unwrap();
        let Record::Macro(obs) = &recs[0] else {
            panic!("expected macro")
        };
        assert_eq!(obs.period, NaiveDate::from_ymd_opt(2024, 4, 1).unwrap());
        assert_eq!(obs.value, 5.0);

        let shibor = table(vec![json!(["20240102", 1.6, 1.8, null])]);
        let recs = parse_macro(&shibor, MacroIndicator::Shibor).unwrap();
        assert_eq!(recs.len(), 2);
    }

    #[test]
    fn untitled_news_borrows_content_prefix() {
        let t = table(vec![json!(["2024-01-02 10:00:00", "", "央行宣布降准0.5个百分点", "宏观"])]);
        let recs = parse_news(&t, "sina").unwrap();
        let Record::News(item) = &recs[0] else {
            panic!("expected news")
        };
        assert_eq!(item.title, "央行宣布降准0.5个百分点");
        assert!(item.id.starts_with("sina-"));
        assert_eq!(item.extra.get("channels").map(String::as_str), Some("宏观"));
    }
}
