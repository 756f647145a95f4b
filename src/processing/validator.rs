use super::ProcessingError;
use crate::model::{FinancialStatement, MacroObservation, MarketBar, NewsItem, Record, StockInfo};

fn invalid(field: &str, reason: impl Into<String>) -> ProcessingError {
    ProcessingError::Validation {
        field: field.to_string(),
        reason: reason.into(),
    }
}

fn required(field: &str, value: &str) -> Result<(), ProcessingError> {
    if value.trim().is_empty() {
        Err(invalid(field, "必填字段为空"))
    } else {
        Ok(())
    }
}

/// 记录校验：缺字段、逻辑矛盾、取值越界的记录直接拒绝
#[derive(Debug, Default, Clone)]
pub struct Validator;

impl Validator {
    pub fn new() -> Self {
        Self
    }

    pub fn validate(&self, record: &Record) -> Result<(), ProcessingError> {
        match record {
            Record::Market(b) => self.validate_bar(b),
            Record::Stock(s) => self.validate_stock(s),
            Record::Financial(f) => self.validate_financial(f),
            Record::News(n) => self.validate_news(n),
            Record::Macro(m) => self.validate_macro(m),
        }
    }

    fn validate_bar(&self, b: &MarketBar) -> Result<(), ProcessingError> {
        required("symbol", &b.symbol)?;
        required("period", &b.period)?;
        for (field, v) in [
            ("open", b.open),
            ("high", b.high),
            ("low", b.low),
            ("close", b.close),
            ("volume", b.volume),
            ("amount", b.amount),
        ] {
            if !v.is_finite() || v < 0.0 {
                return Err(invalid(field, format!("取值非法: {}", v)));
            }
        }
        if b.high < b.low {
            return Err(invalid(
                "high",
                format!("最高价 {} 低于最低价 {}", b.high, b.low),
            ));
        }
        if b.close <= 0.0 {
            return Err(invalid("close", "收盘价必须大于 0"));
        }
        if b.close < b.low || b.close > b.high {
            return Err(invalid(
                "close",
                format!("收盘价 {} 超出 [{}, {}]", b.close, b.low, b.high),
            ));
        }
        if b.open < b.low || b.open > b.high {
            return Err(invalid(
                "open",
                format!("开盘价 {} 超出 [{}, {}]", b.open, b.low, b.high),
            ));
        }
        Ok(())
    }

    fn validate_stock(&self, s: &StockInfo) -> Result<(), ProcessingError> {
        required("symbol", &s.symbol)?;
        required("name", &s.name)
    }

    fn validate_financial(&self, f: &FinancialStatement) -> Result<(), ProcessingError> {
        required("symbol", &f.symbol)?;
        if f.report_date.is_none() {
            return Err(invalid("report_date", "缺少报告期"));
        }
        if f.statement_type.is_none() {
            return Err(invalid("statement_type", "缺少报表类型"));
        }
        if let Some(assets) = f.total_assets {
            if assets < 0.0 {
                return Err(invalid("total_assets", format!("总资产为负: {}", assets)));
            }
        }
        Ok(())
    }

    fn validate_news(&self, n: &NewsItem) -> Result<(), ProcessingError> {
        required("id", &n.id)?;
        required("title", &n.title)?;
        required("source", &n.source)?;
        if let Some(s) = n.sentiment {
            if !(-1.0..=1.0).contains(&s) {
                return Err(invalid("sentiment", format!("情感分超出 [-1, 1]: {}", s)));
            }
        }
        Ok(())
    }

    fn validate_macro(&self, m: &MacroObservation) -> Result<(), ProcessingError> {
        required("indicator", &m.indicator)?;
        if !m.value.is_finite() {
            return Err(invalid("value", "指标值非法"));
        }
        Ok(())
    }
}
