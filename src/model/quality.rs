use super::records::DataKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityIssue {
    /// completeness / consistency / reasonableness / timeliness
    pub issue_type: String,
    pub severity: Severity,
    pub description: String,
    pub field: Option<String>,
    pub value: Option<String>,
}

/// 单条记录的质量报告，只用于日志与观测，不落库
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityReport {
    pub data_type: DataKind,
    pub quality_score: f64,
    pub issues: Vec<QualityIssue>,
    pub metrics: BTreeMap<String, f64>,
    pub timestamp: DateTime<Utc>,
}

impl QualityReport {
    pub fn has_high_severity(&self) -> bool {
        self.issues.iter().any(|i| i.severity == Severity::High)
    }
}
