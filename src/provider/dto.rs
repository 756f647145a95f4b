use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Serialize)]
pub struct ProviderRequest<'a> {
    pub api_name: &'a str,
    pub token: &'a str,
    pub params: Value,
    pub fields: String,
}

#[derive(Debug, Deserialize)]
pub struct ProviderResponse {
    pub code: i64,
    #[serde(default)]
    pub msg: Option<String>,
    #[serde(default)]
    pub data: Option<ProviderTable>,
}

/// 表格型响应：`fields` 为列名，`items` 为按列位置排列的行
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ProviderTable {
    #[serde(default)]
    pub fields: Vec<String>,
    #[serde(default)]
    pub items: Vec<Vec<Value>>,
}

impl ProviderTable {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
