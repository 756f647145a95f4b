use crate::model::{
    DataKind, FinancialStatement, MacroObservation, MarketBar, NewsItem, QualityIssue,
    QualityReport, Record, Severity, StatementType, StockInfo,
};
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::BTreeMap;

const MAX_PRICE: f64 = 10_000.0;
const MAX_VOLUME: f64 = 1e9;
const AMOUNT_TOLERANCE: f64 = 0.10;
const MAX_TITLE_CHARS: usize = 200;
const MAX_CONTENT_CHARS: usize = 100_000;

/// 各类数据的过期阈值（天）
fn staleness_days(kind: DataKind) -> i64 {
    match kind {
        DataKind::Market | DataKind::News => 365,
        DataKind::Financial => 3 * 365,
        DataKind::Macro | DataKind::Stock => 5 * 365,
    }
}

/// 单个评分维度：通过数 / 检查数，无检查项时记满分
struct Component {
    name: &'static str,
    passed: usize,
    total: usize,
}

impl Component {
    fn new(name: &'static str) -> Self {
        Self {
            name,
            passed: 0,
            total: 0,
        }
    }

    fn check(
        &mut self,
        ok: bool,
        issues: &mut Vec<QualityIssue>,
        severity: Severity,
        field: &str,
        description: impl FnOnce() -> String,
        value: Option<String>,
    ) {
        self.total += 1;
        if ok {
            self.passed += 1;
        } else {
            issues.push(QualityIssue {
                issue_type: self.name.to_string(),
                severity,
                description: description(),
                field: Some(field.to_string()),
                value,
            });
        }
    }

    fn score(&self) -> f64 {
        if self.total == 0 {
            1.0
        } else {
            self.passed as f64 / self.total as f64
        }
    }
}

struct Assessment {
    kind: DataKind,
    issues: Vec<QualityIssue>,
    metrics: BTreeMap<String, f64>,
}

impl Assessment {
    fn new(kind: DataKind) -> Self {
        Self {
            kind,
            issues: Vec::new(),
            metrics: BTreeMap::new(),
        }
    }

    fn component(&mut self, name: &'static str, f: impl FnOnce(&mut Component, &mut Vec<QualityIssue>)) {
        let mut c = Component::new(name);
        f(&mut c, &mut self.issues);
        self.metrics.insert(name.to_string(), c.score());
    }

    /// 未来日期 0 分，超过阈值 0.5 分，否则满分；没有日期时不计该维度
    fn timeliness(&mut self, date: Option<NaiveDate>, today: NaiveDate) {
        let Some(date) = date else {
            return;
        };
        let score = if date > today {
            self.issues.push(QualityIssue {
                issue_type: "timeliness".to_string(),
                severity: Severity::High,
                description: "日期在未来".to_string(),
                field: Some("date".to_string()),
                value: Some(date.to_string()),
            });
            0.0
        } else if (today - date).num_days() > staleness_days(self.kind) {
            self.issues.push(QualityIssue {
                issue_type: "timeliness".to_string(),
                severity: Severity::Low,
                description: format!("数据已过期（超过 {} 天）", staleness_days(self.kind)),
                field: Some("date".to_string()),
                value: Some(date.to_string()),
            });
            0.5
        } else {
            1.0
        };
        self.metrics.insert("timeliness".to_string(), score);
    }

    fn finish(self, now: DateTime<Utc>) -> QualityReport {
        let score = if self.metrics.is_empty() {
            1.0
        } else {
            self.metrics.values().sum::<f64>() / self.metrics.len() as f64
        };
        QualityReport {
            data_type: self.kind,
            quality_score: score.clamp(0.0, 1.0),
            issues: self.issues,
            metrics: self.metrics,
            timestamp: now,
        }
    }
}

fn filled(s: &str) -> bool {
    !s.trim().is_empty()
}

/// 质量评估：完整性、一致性、合理性、时效性，取已有维度的算术平均
///
/// 评分只用于告警，不阻断流水线。
#[derive(Debug, Clone)]
pub struct QualityChecker {
    threshold: f64,
}

impl Default for QualityChecker {
    fn default() -> Self {
        Self::new(0.8)
    }
}

impl QualityChecker {
    pub fn new(threshold: f64) -> Self {
        Self {
            threshold: threshold.clamp(0.0, 1.0),
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn is_acceptable(&self, report: &QualityReport) -> bool {
        report.quality_score >= self.threshold
    }

    pub fn check(&self, record: &Record) -> QualityReport {
        self.check_at(record, Utc::now())
    }

    pub fn check_at(&self, record: &Record, now: DateTime<Utc>) -> QualityReport {
        let today = now.date_naive();
        let mut a = Assessment::new(record.kind());
        match record {
            Record::Market(b) => market(&mut a, b),
            Record::Financial(f) => financial(&mut a, f),
            Record::News(n) => news(&mut a, n),
            Record::Macro(m) => macro_obs(&mut a, m),
            Record::Stock(s) => stock(&mut a, s),
        }
        if record.kind() != DataKind::Stock {
            a.timeliness(record.record_date(), today);
        }
        a.finish(now)
    }
}

fn market(a: &mut Assessment, b: &MarketBar) {
    a.component("completeness", |c, issues| {
        c.check(filled(&b.symbol), issues, Severity::High, "symbol", || "缺少代码".into(), None);
        c.check(filled(&b.period), issues, Severity::Medium, "period", || "缺少周期".into(), None);
        for (field, v) in [
            ("open", b.open),
            ("high", b.high),
            ("low", b.low),
            ("close", b.close),
            ("volume", b.volume),
            ("amount", b.amount),
        ] {
            c.check(
                v > 0.0,
                issues,
                Severity::Medium,
                field,
                || format!("{} 缺失或为 0", field),
                Some(v.to_string()),
            );
        }
    });

    a.component("consistency", |c, issues| {
        c.check(
            b.high >= b.low,
            issues,
            Severity::High,
            "high",
            || "最高价低于最低价".into(),
            Some(format!("{}<{}", b.high, b.low)),
        );
        c.check(
            b.low <= b.open && b.open <= b.high,
            issues,
            Severity::Medium,
            "open",
            || "开盘价超出高低价区间".into(),
            Some(b.open.to_string()),
        );
        c.check(
            b.low <= b.close && b.close <= b.high,
            issues,
            Severity::Medium,
            "close",
            || "收盘价超出高低价区间".into(),
            Some(b.close.to_string()),
        );
        if b.volume > 0.0 && b.amount > 0.0 && b.close > 0.0 {
            let expected = b.volume * b.close;
            let diff = (b.amount - expected).abs() / expected;
            c.check(
                diff <= AMOUNT_TOLERANCE,
                issues,
                Severity::Low,
                "amount",
                || format!("成交额与 量×价 偏差 {:.1}%", diff * 100.0),
                Some(b.amount.to_string()),
            );
        }
    });

    a.component("reasonableness", |c, issues| {
        for (field, v) in [("open", b.open), ("high", b.high), ("low", b.low), ("close", b.close)] {
            c.check(
                v > 0.0 && v <= MAX_PRICE,
                issues,
                Severity::Medium,
                field,
                || format!("{} 不在 (0, {}] 内", field, MAX_PRICE),
                Some(v.to_string()),
            );
        }
        c.check(
            b.volume <= MAX_VOLUME,
            issues,
            Severity::Medium,
            "volume",
            || "成交量异常大".into(),
            Some(b.volume.to_string()),
        );
    });
}

fn financial(a: &mut Assessment, f: &FinancialStatement) {
    a.component("completeness", |c, issues| {
        c.check(filled(&f.symbol), issues, Severity::High, "symbol", || "缺少代码".into(), None);
        c.check(f.ann_date.is_some(), issues, Severity::Low, "ann_date", || "缺少公告日".into(), None);
        c.check(
            f.report_date.is_some(),
            issues,
            Severity::High,
            "report_date",
            || "缺少报告期".into(),
            None,
        );
        c.check(
            filled(&f.report_type),
            issues,
            Severity::Low,
            "report_type",
            || "缺少报表口径".into(),
            None,
        );
        let important: Vec<(&str, Option<f64>)> = match f.statement_type {
            Some(StatementType::Income) => vec![("revenue", f.revenue), ("net_profit", f.net_profit)],
            Some(StatementType::Balance) => vec![
                ("total_assets", f.total_assets),
                ("total_liabilities", f.total_liabilities),
                ("equity", f.equity),
            ],
            Some(StatementType::Indicator) => vec![("eps", f.eps), ("roe", f.roe), ("roa", f.roa)],
            None => vec![],
        };
        for (field, v) in important {
            c.check(v.is_some(), issues, Severity::Medium, field, || format!("缺少 {}", field), None);
        }
    });

    a.component("consistency", |c, issues| {
        if let (Some(ann), Some(rep)) = (f.ann_date, f.report_date) {
            c.check(
                ann >= rep,
                issues,
                Severity::Medium,
                "ann_date",
                || "公告日早于报告期".into(),
                Some(ann.to_string()),
            );
        }
        if let (Some(roe), Some(roa)) = (f.roe, f.roa) {
            // 净资产收益率按杠杆放大，一般不应明显低于总资产收益率
            c.check(
                roe >= roa - 1.0,
                issues,
                Severity::Low,
                "roe",
                || format!("ROE {} 明显低于 ROA {}", roe, roa),
                Some(roe.to_string()),
            );
        }
        if let (Some(assets), Some(liab), Some(equity)) =
            (f.total_assets, f.total_liabilities, f.equity)
        {
            if assets > 0.0 {
                let diff = (assets - liab - equity).abs() / assets;
                c.check(
                    diff <= AMOUNT_TOLERANCE,
                    issues,
                    Severity::Low,
                    "total_assets",
                    || format!("资产 != 负债 + 权益，偏差 {:.1}%", diff * 100.0),
                    Some(assets.to_string()),
                );
            }
        }
    });

    a.component("reasonableness", |c, issues| {
        for (field, v, lo, hi) in [
            ("roe", f.roe, -100.0, 100.0),
            ("roa", f.roa, -100.0, 100.0),
            ("eps", f.eps, -100.0, 1000.0),
        ] {
            if let Some(v) = v {
                c.check(
                    (lo..=hi).contains(&v),
                    issues,
                    Severity::Medium,
                    field,
                    || format!("{} 超出 [{}, {}]", field, lo, hi),
                    Some(v.to_string()),
                );
            }
        }
        if let Some(assets) = f.total_assets {
            c.check(
                assets >= 0.0,
                issues,
                Severity::Medium,
                "total_assets",
                || "总资产为负".into(),
                Some(assets.to_string()),
            );
        }
    });
}

fn news(a: &mut Assessment, n: &NewsItem) {
    a.component("completeness", |c, issues| {
        c.check(filled(&n.id), issues, Severity::Medium, "id", || "缺少 id".into(), None);
        c.check(filled(&n.title), issues, Severity::High, "title", || "缺少标题".into(), None);
        c.check(filled(&n.content), issues, Severity::Medium, "content", || "缺少正文".into(), None);
        c.check(filled(&n.source), issues, Severity::Medium, "source", || "缺少来源".into(), None);
        c.check(
            n.publish_time.is_some(),
            issues,
            Severity::Medium,
            "publish_time",
            || "缺少发布时间".into(),
            None,
        );
    });

    a.component("consistency", |c, issues| {
        if let Some(s) = n.sentiment {
            c.check(
                (-1.0..=1.0).contains(&s),
                issues,
                Severity::High,
                "sentiment",
                || "情感分超出 [-1, 1]".into(),
                Some(s.to_string()),
            );
        }
        c.check(
            n.content.chars().count() >= n.title.chars().count(),
            issues,
            Severity::Low,
            "content",
            || "正文短于标题".into(),
            None,
        );
    });

    a.component("reasonableness", |c, issues| {
        let title_len = n.title.chars().count();
        let content_len = n.content.chars().count();
        c.check(
            title_len <= MAX_TITLE_CHARS,
            issues,
            Severity::Low,
            "title",
            || format!("标题过长（{} 字）", title_len),
            None,
        );
        c.check(
            content_len <= MAX_CONTENT_CHARS,
            issues,
            Severity::Low,
            "content",
            || format!("正文过长（{} 字）", content_len),
            None,
        );
    });
}

fn macro_obs(a: &mut Assessment, m: &MacroObservation) {
    a.component("completeness", |c, issues| {
        c.check(filled(&m.indicator), issues, Severity::High, "indicator", || "缺少指标名".into(), None);
        c.check(filled(&m.unit), issues, Severity::Low, "unit", || "缺少单位".into(), None);
        c.check(m.value.is_finite(), issues, Severity::High, "value", || "指标值缺失".into(), None);
    });

    a.component("reasonableness", |c, issues| {
        let bounds = match m.indicator.as_str() {
            "CPI" => Some((-10.0, 50.0)),
            "GDP" => Some((-20.0, 30.0)),
            s if s.starts_with("SHIBOR") || s.contains("RATE") => Some((-5.0, 50.0)),
            _ => None,
        };
        if let Some((lo, hi)) = bounds {
            c.check(
                (lo..=hi).contains(&m.value),
                issues,
                Severity::Medium,
                "value",
                || format!("{} 超出 [{}, {}]", m.indicator, lo, hi),
                Some(m.value.to_string()),
            );
        }
    });
}

fn stock(a: &mut Assessment, s: &StockInfo) {
    a.component("completeness", |c, issues| {
        c.check(filled(&s.symbol), issues, Severity::High, "symbol", || "缺少代码".into(), None);
        c.check(filled(&s.code), issues, Severity::Medium, "code", || "缺少简码".into(), None);
        c.check(filled(&s.name), issues, Severity::High, "name", || "缺少名称".into(), None);
        c.check(s.industry.is_some(), issues, Severity::Low, "industry", || "缺少行业".into(), None);
        c.check(s.market.is_some(), issues, Severity::Low, "market", || "缺少板块".into(), None);
        c.check(s.list_date.is_some(), issues, Severity::Low, "list_date", || "缺少上市日期".into(), None);
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap()
    }

    fn bar(date: NaiveDate, high: f64, low: f64) -> Record {
        Record::Market(MarketBar {
            symbol: "600000.SH".into(),
            trade_time: date.and_hms_opt(0, 0, 0).unwrap(),
            period: "1d".into(),
            open: low,
            high,
            low,
            close: high,
            volume: 100_000.0,
            amount: 100_000.0 * high,
        })
    }

    #[test]
    fn clean_recent_bar_scores_full_marks() {
        let r = bar(NaiveDate::from_ymd_opt(2024, 5, 31).unwrap(), 10.5, 10.0);
        let report = QualityChecker::default().check_at(&r, now());
        assert_eq!(report.quality_score, 1.0);
        assert!(report.issues.is_empty());
        assert_eq!(report.metrics.len(), 4);
    }

    #[test]
    fn future_dates_are_flagged_high() {
        let r = bar(NaiveDate::from_ymd_opt(2024, 7, 1).unwrap(), 10.5, 10.0);
        let report = QualityChecker::default().check_at(&r, now());
        assert_eq!(report.metrics["timeliness"], 0.0);
        assert!(report.has_high_severity());
    }

    #[test]
    fn stale_macro_gets_half_timeliness() {
        let r = Record::Macro(MacroObservation {
            indicator: "CPI".into(),
            period: NaiveDate::from_ymd_opt(2015, 1, 1).unwrap(),
            value: 80.0,
            unit: "%".into(),
        });
        let report = QualityChecker::default().check_at(&r, now());
        assert_eq!(report.metrics["timeliness"], 0.5);
        assert_eq!(report.metrics["reasonableness"], 0.0);
        assert!(!report.metrics.contains_key("consistency"));
    }

    #[test]
    fn scores_and_components_stay_in_unit_interval() {
        let records = vec![
            bar(NaiveDate::from_ymd_opt(2010, 1, 1).unwrap(), 9.0, 20000.0),
            Record::News(NewsItem {
                title: "标题".repeat(300),
                sentiment: Some(5.0),
                ..Default::default()
            }),
            Record::Financial(FinancialStatement {
                symbol: "600000.SH".into(),
                roe: Some(-500.0),
                roa: Some(3.0),
                statement_type: Some(StatementType::Indicator),
                ..Default::default()
            }),
            Record::Stock(StockInfo {
                symbol: "".into(),
                code: "".into(),
                name: "".into(),
                area: None,
                industry: None,
                market: None,
                list_date: None,
            }),
        ];
        let checker = QualityChecker::new(0.8);
        for r in &records {
            let report = checker.check_at(r, now());
            assert!((0.0..=1.0).contains(&report.quality_score));
            for v in report.metrics.values() {
                assert!((0.0..=1.0).contains(v));
            }
            assert!(!checker.is_acceptable(&report));
        }
    }
}
