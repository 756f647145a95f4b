use super::records::DataKind;
use super::request::FetchRequest;
use chrono::{DateTime, Utc};
use cron::Schedule;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 持久化定时任务的类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataTaskType {
    StockData,
    MarketData,
    FinancialData,
    NewsData,
    MacroData,
    Cleanup,
    Backup,
}

impl DataTaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataTaskType::StockData => "stock_data",
            DataTaskType::MarketData => "market_data",
            DataTaskType::FinancialData => "financial_data",
            DataTaskType::NewsData => "news_data",
            DataTaskType::MacroData => "macro_data",
            DataTaskType::Cleanup => "cleanup",
            DataTaskType::Backup => "backup",
        }
    }

    /// 采集类任务对应的数据类别
    pub fn data_kind(&self) -> Option<DataKind> {
        match self {
            DataTaskType::StockData => Some(DataKind::Stock),
            DataTaskType::MarketData => Some(DataKind::Market),
            DataTaskType::FinancialData => Some(DataKind::Financial),
            DataTaskType::NewsData => Some(DataKind::News),
            DataTaskType::MacroData => Some(DataKind::Macro),
            DataTaskType::Cleanup | DataTaskType::Backup => None,
        }
    }
}

impl fmt::Display for DataTaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataTaskType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "stock_data" => Ok(DataTaskType::StockData),
            "market_data" => Ok(DataTaskType::MarketData),
            "financial_data" => Ok(DataTaskType::FinancialData),
            "news_data" => Ok(DataTaskType::NewsData),
            "macro_data" => Ok(DataTaskType::MacroData),
            "cleanup" => Ok(DataTaskType::Cleanup),
            "backup" => Ok(DataTaskType::Backup),
            other => Err(format!("未知任务类型: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataTaskStatus {
    Disabled,
    Enabled,
    Running,
    Paused,
}

impl DataTaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataTaskStatus::Disabled => "disabled",
            DataTaskStatus::Enabled => "enabled",
            DataTaskStatus::Running => "running",
            DataTaskStatus::Paused => "paused",
        }
    }
}

impl FromStr for DataTaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "disabled" => Ok(DataTaskStatus::Disabled),
            "enabled" => Ok(DataTaskStatus::Enabled),
            "running" => Ok(DataTaskStatus::Running),
            "paused" => Ok(DataTaskStatus::Paused),
            other => Err(format!("未知任务状态: {}", other)),
        }
    }
}

/// 任务配置，按任务类型区分；入库为 JSON
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DataTaskConfig {
    Collect {
        #[serde(default)]
        collector: Option<String>,
        request: FetchRequest,
    },
    News {
        #[serde(default)]
        sources: Vec<String>,
    },
    Cleanup,
    Backup {
        path: String,
    },
}

/// 创建 / 更新定时任务的参数
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataTaskSpec {
    pub task_name: String,
    pub task_type: DataTaskType,
    pub cron_expr: String,
    pub status: DataTaskStatus,
    pub config: DataTaskConfig,
    #[serde(default)]
    pub description: Option<String>,
}

/// 解析 cron 表达式；5 段式（分 时 日 月 周）补秒位 0
pub fn parse_cron(expr: &str) -> Result<Schedule, String> {
    let expr = expr.trim();
    let normalized = if expr.split_whitespace().count() == 5 {
        format!("0 {}", expr)
    } else {
        expr.to_string()
    };
    Schedule::from_str(&normalized).map_err(|e| format!("cron 表达式无效 '{}': {}", expr, e))
}

pub fn next_run_after(expr: &str, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    parse_cron(expr).ok()?.after(&after).next()
}

impl DataTaskSpec {
    /// 校验名称、cron 以及配置与任务类型是否匹配
    pub fn validate(&self) -> Result<(), String> {
        if self.task_name.trim().is_empty() {
            return Err("task_name 不能为空".to_string());
        }
        parse_cron(&self.cron_expr)?;
        match (&self.task_type, &self.config) {
            (DataTaskType::Cleanup, DataTaskConfig::Cleanup) => Ok(()),
            (DataTaskType::Backup, DataTaskConfig::Backup { path }) => {
                if path.trim().is_empty() {
                    Err("备份路径不能为空".to_string())
                } else {
                    Ok(())
                }
            }
            (DataTaskType::NewsData, DataTaskConfig::News { .. }) => Ok(()),
            (t, DataTaskConfig::Collect { request, .. }) if t.data_kind().is_some() => {
                if t.data_kind() != Some(request.kind()) {
                    return Err(format!(
                        "任务类型 {} 与请求 {} 不匹配",
                        t,
                        request.type_name()
                    ));
                }
                request.validate()
            }
            (t, _) => Err(format!("任务类型 {} 的配置不匹配", t)),
        }
    }
}
