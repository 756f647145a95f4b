use super::apis::{CODE_NO_PERMISSION, CODE_OK, CODE_RATE_LIMIT, CODE_TOKEN_INVALID};
use super::dto::{ProviderRequest, ProviderResponse, ProviderTable};
use crate::collector::CollectorError;
use crate::config::ProviderConfig;
use async_trait::async_trait;
use log::{debug, info};
use reqwest::{Client, StatusCode};
use serde_json::Value;

/// 数据源调用接口：单次请求，不含重试（重试由采集器统一处理）
#[async_trait]
pub trait ProviderApi: Send + Sync {
    async fn query(
        &self,
        api_name: &str,
        params: Value,
        fields: &[&str],
    ) -> Result<ProviderTable, CollectorError>;
}

/// HTTP 数据源会话
///
/// 请求体为 `{api_name, token, params, fields}`，同时带 Bearer 认证头。
pub struct HttpProvider {
    client: Client,
    base_url: String,
    token: String,
}

impl HttpProvider {
    pub fn new(config: &ProviderConfig) -> Result<Self, CollectorError> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .user_agent("quant-ingest/0.1")
            .build()
            .map_err(|e| CollectorError::network(format!("创建 HTTP 客户端失败: {}", e)))?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
        })
    }

    fn classify_status(status: StatusCode, body: &str) -> CollectorError {
        match status.as_u16() {
            401 | 403 => CollectorError::unauthorized(format!("认证失败 ({}): {}", status, body)),
            429 => CollectorError::rate_limited(format!("触发频率限制 (429): {}", body)),
            500..=599 => CollectorError::server(format!("数据源服务器波动 ({})", status)),
            _ => CollectorError::bad_request(format!("未预期的状态码 ({}): {}", status, body)),
        }
    }

    fn classify_code(api_name: &str, code: i64, msg: &str) -> CollectorError {
        match code {
            CODE_TOKEN_INVALID | CODE_NO_PERMISSION => {
                CollectorError::unauthorized(format!("{} 无权限 ({}): {}", api_name, code, msg))
            }
            CODE_RATE_LIMIT => {
                CollectorError::rate_limited(format!("{} 频率受限 ({}): {}", api_name, code, msg))
            }
            _ => CollectorError::bad_request(format!("{} 返回错误 ({}): {}", api_name, code, msg)),
        }
    }
}

#[async_trait]
impl ProviderApi for HttpProvider {
    async fn query(
        &self,
        api_name: &str,
        params: Value,
        fields: &[&str],
    ) -> Result<ProviderTable, CollectorError> {
        let body = ProviderRequest {
            api_name,
            token: &self.token,
            params,
            fields: fields.join(","),
        };

        let resp = self
            .client
            .post(&self.base_url)
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    CollectorError::timeout(format!("{} 请求超时: {}", api_name, e))
                } else {
                    CollectorError::network(format!("{} 网络请求失败: {}", api_name, e))
                }
            })?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(Self::classify_status(status, &text));
        }

        let text = resp
            .text()
            .await
            .map_err(|e| CollectorError::network(format!("读取响应失败: {}", e)))?;
        let parsed: ProviderResponse = serde_json::from_str(&text).map_err(|e| {
            CollectorError::parse(format!("JSON 解析失败: {}, 原始报文: {}", e, text))
        })?;

        if parsed.code != CODE_OK {
            return Err(Self::classify_code(
                api_name,
                parsed.code,
                parsed.msg.as_deref().unwrap_or(""),
            ));
        }

        let table = parsed.data.unwrap_or_default();
        debug!("{} 返回 {} 行", api_name, table.items.len());
        if table.is_empty() {
            return Err(CollectorError::empty(format!("{} 返回空结果", api_name)));
        }
        info!("{}(...) [{} rows]", api_name, table.items.len());
        Ok(table)
    }
}

impl std::fmt::Debug for HttpProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "<HttpProvider {}>", self.base_url)
    }
}
