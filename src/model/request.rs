use super::records::{DataKind, StatementType};
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

pub const DATE_FORMAT: &str = "%Y%m%d";
pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const MINUTE_FREQS: [&str; 5] = ["1min", "5min", "15min", "30min", "60min"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MacroIndicator {
    Cpi,
    Gdp,
    Shibor,
}

/// 采集请求：每种任务类型一个带类型的参数变体，提交时校验一次
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FetchRequest {
    StockBasic {
        #[serde(default)]
        exchange: Option<String>,
    },
    DailyQuote {
        symbol: String,
        start_date: String,
        end_date: String,
    },
    MinuteQuote {
        symbol: String,
        freq: String,
        start_time: String,
        end_time: String,
    },
    Financial {
        symbol: String,
        statement: StatementType,
        start_date: String,
        end_date: String,
    },
    Macro {
        indicator: MacroIndicator,
        start_date: String,
        end_date: String,
    },
    News {
        source: String,
        start_date: String,
        end_date: String,
    },
}

pub fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), DATE_FORMAT).ok()
}

pub fn parse_datetime(s: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s.trim(), DATETIME_FORMAT).ok()
}

impl FetchRequest {
    pub fn kind(&self) -> DataKind {
        match self {
            FetchRequest::StockBasic { .. } => DataKind::Stock,
            FetchRequest::DailyQuote { .. } | FetchRequest::MinuteQuote { .. } => DataKind::Market,
            FetchRequest::Financial { .. } => DataKind::Financial,
            FetchRequest::Macro { .. } => DataKind::Macro,
            FetchRequest::News { .. } => DataKind::News,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            FetchRequest::StockBasic { .. } => "stock_basic",
            FetchRequest::DailyQuote { .. } => "daily_quote",
            FetchRequest::MinuteQuote { .. } => "minute_quote",
            FetchRequest::Financial { .. } => "financial",
            FetchRequest::Macro { .. } => "macro",
            FetchRequest::News { .. } => "news",
        }
    }

    pub fn is_intraday(&self) -> bool {
        matches!(self, FetchRequest::MinuteQuote { .. })
    }

    /// 请求覆盖的日期区间（闭区间）
    pub fn date_range(&self) -> Option<(NaiveDate, NaiveDate)> {
        match self {
            FetchRequest::StockBasic { .. } => None,
            FetchRequest::MinuteQuote {
                start_time,
                end_time,
                ..
            } => Some((
                parse_datetime(start_time)?.date(),
                parse_datetime(end_time)?.date(),
            )),
            FetchRequest::DailyQuote {
                start_date,
                end_date,
                ..
            }
            | FetchRequest::Financial {
                start_date,
                end_date,
                ..
            }
            | FetchRequest::Macro {
                start_date,
                end_date,
                ..
            }
            | FetchRequest::News {
                start_date,
                end_date,
                ..
            } => Some((parse_date(start_date)?, parse_date(end_date)?)),
        }
    }

    /// 参数校验，返回可读的错误说明
    pub fn validate(&self) -> Result<(), String> {
        match self {
            FetchRequest::StockBasic { .. } => return Ok(()),
            FetchRequest::DailyQuote { symbol, .. } | FetchRequest::Financial { symbol, .. } => {
                if symbol.trim().is_empty() {
                    return Err("symbol 不能为空".to_string());
                }
            }
            FetchRequest::MinuteQuote {
                symbol,
                freq,
                start_time,
                end_time,
            } => {
                if symbol.trim().is_empty() {
                    return Err("symbol 不能为空".to_string());
                }
                if !MINUTE_FREQS.contains(&freq.as_str()) {
                    return Err(format!("不支持的分钟频率: {}", freq));
                }
                let start = parse_datetime(start_time)
                    .ok_or_else(|| format!("start_time 格式错误: {}", start_time))?;
                let end = parse_datetime(end_time)
                    .ok_or_else(|| format!("end_time 格式错误: {}", end_time))?;
                if start > end {
                    return Err("start_time 晚于 end_time".to_string());
                }
                return Ok(());
            }
            FetchRequest::News { source, .. } => {
                if source.trim().is_empty() {
                    return Err("source 不能为空".to_string());
                }
            }
            FetchRequest::Macro { .. } => {}
        }

        let (start_raw, end_raw) = match self {
            FetchRequest::DailyQuote {
                start_date,
                end_date,
                ..
            }
            | FetchRequest::Financial {
                start_date,
                end_date,
                ..
            }
            | FetchRequest::Macro {
                start_date,
                end_date,
                ..
            }
            | FetchRequest::News {
                start_date,
                end_date,
                ..
            } => (start_date, end_date),
            _ => return Ok(()),
        };
        let start =
            parse_date(start_raw).ok_or_else(|| format!("start_date 格式错误: {}", start_raw))?;
        let end = parse_date(end_raw).ok_or_else(|| format!("end_date 格式错误: {}", end_raw))?;
        if start > end {
            return Err("start_date 晚于 end_date".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn daily_quote_round_trips_through_tagged_json() {
        let raw = r#"{"type":"daily_quote","symbol":"000001.SZ","start_date":"20240101","end_date":"20240105"}"#;
        let req: FetchRequest = serde_json::from_str(raw).unwrap();
        assert_eq!(req.type_name(), "daily_quote");
        assert_eq!(req.kind(), DataKind::Market);
        assert!(req.validate().is_ok());
    }

    #[test]
    fn validate_rejects_inverted_range_and_bad_freq() {
        let req = FetchRequest::DailyQuote {
            symbol: "000001.SZ".into(),
            start_date: "20240105".into(),
            end_date: "20240101".into(),
        };
        assert!(req.validate().is_err());

        let req = FetchRequest::MinuteQuote {
            symbol: "000001.SZ".into(),
            freq: "2min".into(),
            start_time: "2024-01-02 09:30:00".into(),
            end_time: "2024-01-02 15:00:00".into(),
        };
        assert!(req.validate().unwrap_err().contains("2min"));
    }

    #[test]
    fn date_range_for_minute_quote_uses_datetime_format() {
        let req = FetchRequest::MinuteQuote {
            symbol: "000001.SZ".into(),
            freq: "1min".into(),
            start_time: "2024-01-02 09:30:00".into(),
            end_time: "2024-01-03 15:00:00".into(),
        };
        let (s, e) = req.date_range().unwrap();
        assert_eq!(s, NaiveDate::from_ymd_opt(2024, 1, 2).unwrap());
        assert_eq!(e, NaiveDate::from_ymd_opt(2024, 1, 3).unwrap());
    }
}
