use super::cache::ResponseCache;
use super::error::CollectorError;
use super::parse::parse_table;
use super::retry::retry_with_backoff;
use super::Collector;
use crate::config::RetryPolicy;
use crate::model::request::{parse_date, DATE_FORMAT};
use crate::model::{DataKind, FetchRequest, MacroIndicator, NewsItem, Record, StatementType};
use crate::provider::apis::*;
use crate::provider::ProviderApi;
use async_trait::async_trait;
use chrono::{Datelike, Duration as ChronoDuration, Local, NaiveDate};
use log::{debug, info};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// 表格型数据源采集器：股票列表、行情、财报、宏观和新闻
pub struct ProviderCollector {
    name: String,
    provider: Arc<dyn ProviderApi>,
    retry: RetryPolicy,
    cache: Option<ResponseCache>,
}

fn month_of(date: &str) -> String {
    parse_date(date)
        .map(|d| d.format("%Y%m").to_string())
        .unwrap_or_else(|| date.chars().take(6).collect())
}

fn quarter_of(date: &str) -> String {
    parse_date(date)
        .map(|d| format!("{}Q{}", d.year(), d.month0() / 3 + 1))
        .unwrap_or_default()
}

fn news_bound(date: &str, end: bool) -> String {
    let day = parse_date(date)
        .map(|d| d.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| date.to_string());
    if end {
        format!("{} 23:59:59", day)
    } else {
        format!("{} 00:00:00", day)
    }
}

/// 请求 -> (接口名, 参数, 字段顺序)
fn plan(request: &FetchRequest) -> (&'static str, Value, &'static [&'static str]) {
    match request {
        FetchRequest::StockBasic { exchange } => {
            let mut params = json!({ "list_status": "L" });
            if let Some(ex) = exchange {
                params["exchange"] = json!(ex);
            }
            (API_STOCK_BASIC, params, FIELDS_STOCK_BASIC)
        }
        FetchRequest::DailyQuote {
            symbol,
            start_date,
            end_date,
        } => (
            API_DAILY,
            json!({ "ts_code": symbol, "start_date": start_date, "end_date": end_date }),
            FIELDS_DAILY,
        ),
        FetchRequest::MinuteQuote {
            symbol,
            freq,
            start_time,
            end_time,
        } => (
            API_STK_MINS,
            json!({
                "ts_code": symbol,
                "freq": freq,
                "start_date": start_time,
                "end_date": end_time,
            }),
            FIELDS_STK_MINS,
        ),
        FetchRequest::Financial {
            symbol,
            statement,
            start_date,
            end_date,
        } => {
            let params =
                json!({ "ts_code": symbol, "start_date": start_date, "end_date": end_date });
            match statement {
                StatementType::Income => (API_INCOME, params, FIELDS_INCOME),
                StatementType::Balance => (API_BALANCESHEET, params, FIELDS_BALANCESHEET),
                StatementType::Indicator => (API_FINA_INDICATOR, params, FIELDS_FINA_INDICATOR),
            }
        }
        FetchRequest::Macro {
            indicator,
            start_date,
            end_date,
        } => match indicator {
            MacroIndicator::Cpi => (
                API_CN_CPI,
                json!({ "start_m": month_of(start_date), "end_m": month_of(end_date) }),
                FIELDS_CN_CPI,
            ),
            MacroIndicator::Gdp => (
                API_CN_GDP,
                json!({ "start_q": quarter_of(start_date), "end_q": quarter_of(end_date) }),
                FIELDS_CN_GDP,
            ),
            MacroIndicator::Shibor => (
                API_SHIBOR,
                json!({ "start_date": start_date, "end_date": end_date }),
                FIELDS_SHIBOR,
            ),
        },
        FetchRequest::News {
            source,
            start_date,
            end_date,
        } => (
            API_NEWS,
            json!({
                "src": source,
                "start_date": news_bound(start_date, false),
                "end_date": news_bound(end_date, true),
            }),
            FIELDS_NEWS,
        ),
    }
}

impl ProviderCollector {
    pub fn new(
        name: impl Into<String>,
        provider: Arc<dyn ProviderApi>,
        retry: RetryPolicy,
        cache: Option<ResponseCache>,
    ) -> Self {
        Self {
            name: name.into(),
            provider,
            retry,
            cache,
        }
    }

    fn today() -> NaiveDate {
        Local::now().date_naive()
    }

    async fn query(
        &self,
        api: &'static str,
        params: Value,
        fields: &'static [&'static str],
        cancel: &CancellationToken,
    ) -> Result<crate::provider::ProviderTable, CollectorError> {
        let provider = &self.provider;
        retry_with_backoff(&self.retry, cancel, api, move |_| {
            provider.query(api, params.clone(), fields)
        })
        .await
    }
}

#[async_trait]
impl Collector for ProviderCollector {
    fn name(&self) -> &str {
        &self.name
    }

    fn supports(&self, _kind: DataKind) -> bool {
        true
    }

    async fn fetch(
        &self,
        request: &FetchRequest,
        cancel: &CancellationToken,
    ) -> Result<Vec<Record>, CollectorError> {
        request.validate().map_err(CollectorError::bad_request)?;

        if let Some(cache) = &self.cache {
            if let Some(hit) = cache.get(request).await {
                return Ok(hit);
            }
        }

        let (api, params, fields) = plan(request);
        debug!("{} -> {} {}", request.type_name(), api, params);
        let table = self.query(api, params, fields, cancel).await?;
        let records = parse_table(request, &table)?;
        info!(
            "[{}] {} 采集完成: {} 条",
            self.name,
            request.type_name(),
            records.len()
        );

        if let Some(cache) = &self.cache {
            cache.put(request, &records, Self::today()).await;
        }
        Ok(records)
    }

    async fn crawl_news(
        &self,
        source: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<NewsItem>, CollectorError> {
        let today = Self::today();
        let request = FetchRequest::News {
            source: source.to_string(),
            start_date: (today - ChronoDuration::days(1))
                .format(DATE_FORMAT)
                .to_string(),
            end_date: today.format(DATE_FORMAT).to_string(),
        };
        let records = self.fetch(&request, cancel).await?;
        Ok(records
            .into_iter()
            .filter_map(|r| match r {
                Record::News(n) => Some(n),
                _ => None,
            })
            .collect())
    }

    async fn ping(&self) -> Result<(), CollectorError> {
        let today = Self::today().format(DATE_FORMAT).to_string();
        let params = json!({ "exchange": "SSE", "start_date": today, "end_date": today });
        match self
            .provider
            .query(API_TRADE_CAL, params, &["exchange", "cal_date", "is_open"])
            .await
        {
            Ok(_) => Ok(()),
            // 能拿到空表说明链路和认证都正常
            Err(e) if e.kind == super::CollectorErrorKind::EmptyResult => Ok(()),
            Err(e) => Err(e),
        }
    }
}

impl std::fmt::Debug for ProviderCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "<ProviderCollector {}>", self.name)
    }
}
