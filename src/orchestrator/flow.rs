use super::OrchestratorError;
use crate::model::{FetchRequest, MacroIndicator, StatementType};
use chrono::{Duration as ChronoDuration, NaiveDate};
use std::fmt;
use std::str::FromStr;

const DATE_FMT: &str = "%Y%m%d";

/// 流程中的一个步骤
#[derive(Debug, Clone, PartialEq)]
pub enum FlowStep {
    Collect(FetchRequest),
    News { sources: Vec<String> },
}

impl fmt::Display for FlowStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlowStep::Collect(req) => match req {
                FetchRequest::DailyQuote { symbol, .. }
                | FetchRequest::MinuteQuote { symbol, .. }
                | FetchRequest::Financial { symbol, .. } => {
                    write!(f, "{}:{}", req.type_name(), symbol)
                }
                _ => f.write_str(req.type_name()),
            },
            FlowStep::News { sources } if sources.is_empty() => f.write_str("news"),
            FlowStep::News { sources } => write!(f, "news:{}", sources.join(",")),
        }
    }
}

/// 按阶段串行执行，`Concurrent` 阶段内部并发
#[derive(Debug, Clone, PartialEq)]
pub enum Stage {
    Serial(FlowStep),
    Concurrent(Vec<FlowStep>),
}

/// 业务流程分发表
///
/// ```text
/// batch_collection <symbol,symbol> [start] [end]
/// daily_full [trade_date] [symbol,symbol]
/// news [source,source]
/// custom <step> <step> ...
/// ```
///
/// custom 步骤：`stock_basic`、`daily:<symbol>[:start[:end]]`、
/// `financial:<symbol>:<income|balance|indicator>`、`macro:<cpi|gdp|shibor>`、
/// `news[:source,source]`。
#[derive(Debug, Clone, PartialEq)]
pub enum FlowCommand {
    BatchCollection {
        symbols: Vec<String>,
        start_date: Option<String>,
        end_date: Option<String>,
    },
    DailyFull {
        trade_date: Option<String>,
        symbols: Vec<String>,
    },
    News {
        sources: Vec<String>,
    },
    Custom {
        steps: Vec<String>,
    },
}

fn split_list(s: &str) -> Vec<String> {
    s.split(',')
        .map(|x| x.trim().to_string())
        .filter(|x| !x.is_empty())
        .collect()
}

fn is_date(s: &str) -> bool {
    NaiveDate::parse_from_str(s, DATE_FMT).is_ok()
}

fn daily(symbol: &str, start: &str, end: &str) -> FlowStep {
    FlowStep::Collect(FetchRequest::DailyQuote {
        symbol: symbol.to_uppercase(),
        start_date: start.to_string(),
        end_date: end.to_string(),
    })
}

fn parse_custom_step(raw: &str, today: NaiveDate) -> Result<FlowStep, OrchestratorError> {
    let today_s = today.format(DATE_FMT).to_string();
    let year_ago = (today - ChronoDuration::days(365)).format(DATE_FMT).to_string();
    let parts: Vec<&str> = raw.split(':').collect();
    let bad = || OrchestratorError::Flow(format!("无法解析的步骤: {}", raw));

    match parts[0] {
        "stock_basic" => Ok(FlowStep::Collect(FetchRequest::StockBasic { exchange: None })),
        "daily" => {
            let symbol = parts.get(1).filter(|s| !s.is_empty()).ok_or_else(bad)?;
            let start = parts.get(2).copied().unwrap_or(&today_s);
            let end = parts.get(3).copied().unwrap_or(&today_s);
            Ok(daily(symbol, start, end))
        }
        "financial" => {
            let symbol = parts.get(1).filter(|s| !s.is_empty()).ok_or_else(bad)?;
            let statement = match parts.get(2).copied().unwrap_or("income") {
                "income" => StatementType::Income,
                "balance" => StatementType::Balance,
                "indicator" => StatementType::Indicator,
                _ => return Err(bad()),
            };
            Ok(FlowStep::Collect(FetchRequest::Financial {
                symbol: symbol.to_uppercase(),
                statement,
                start_date: year_ago,
                end_date: today_s,
            }))
        }
        "macro" => {
            let indicator = match parts.get(1).map(|s| s.to_lowercase()).as_deref() {
                Some("cpi") => MacroIndicator::Cpi,
                Some("gdp") => MacroIndicator::Gdp,
                Some("shibor") => MacroIndicator::Shibor,
                _ => return Err(bad()),
            };
            Ok(FlowStep::Collect(FetchRequest::Macro {
                indicator,
                start_date: year_ago,
                end_date: today_s,
            }))
        }
        "news" => Ok(FlowStep::News {
            sources: parts.get(1).map(|s| split_list(s)).unwrap_or_default(),
        }),
        _ => Err(bad()),
    }
}

impl FlowCommand {
    pub fn name(&self) -> &'static str {
        match self {
            FlowCommand::BatchCollection { .. } => "batch_collection",
            FlowCommand::DailyFull { .. } => "daily_full",
            FlowCommand::News { .. } => "news",
            FlowCommand::Custom { .. } => "custom",
        }
    }

    /// 展开成执行计划，日期缺省为 `today`
    pub fn plan(&self, today: NaiveDate) -> Result<Vec<Stage>, OrchestratorError> {
        let today_s = today.format(DATE_FMT).to_string();
        match self {
            FlowCommand::BatchCollection {
                symbols,
                start_date,
                end_date,
            } => {
                if symbols.is_empty() {
                    return Err(OrchestratorError::Flow(
                        "batch_collection 至少需要一个股票代码".to_string(),
                    ));
                }
                let start = start_date.as_deref().unwrap_or(&today_s);
                let end = end_date.as_deref().unwrap_or(start);
                Ok(vec![Stage::Concurrent(
                    symbols.iter().map(|s| daily(s, start, end)).collect(),
                )])
            }
            FlowCommand::DailyFull { trade_date, symbols } => {
                let date = trade_date.as_deref().unwrap_or(&today_s);
                let mut stages = vec![Stage::Serial(FlowStep::Collect(
                    FetchRequest::StockBasic { exchange: None },
                ))];
                if !symbols.is_empty() {
                    stages.push(Stage::Concurrent(
                        symbols.iter().map(|s| daily(s, date, date)).collect(),
                    ));
                }
                stages.push(Stage::Serial(FlowStep::News {
                    sources: Vec::new(),
                }));
                Ok(stages)
            }
            FlowCommand::News { sources } => Ok(vec![Stage::Serial(FlowStep::News {
                sources: sources.clone(),
            })]),
            FlowCommand::Custom { steps } => {
                if steps.is_empty() {
                    return Err(OrchestratorError::Flow("custom 需要至少一个步骤".to_string()));
                }
                steps
                    .iter()
                    .map(|s| parse_custom_step(s, today).map(Stage::Serial))
                    .collect()
            }
        }
    }
}

impl FromStr for FlowCommand {
    type Err = OrchestratorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split_whitespace().collect();
        let Some(name) = parts.first() else {
            return Err(OrchestratorError::Flow("流程名为空".to_string()));
        };
        match *name {
            "batch_collection" | "batch" => {
                let symbols = parts.get(1).map(|s| split_list(s)).unwrap_or_default();
                let start_date = parts.get(2).map(|s| s.to_string());
                let end_date = parts.get(3).map(|s| s.to_string());
                for d in start_date.iter().chain(end_date.iter()) {
                    if !is_date(d) {
                        return Err(OrchestratorError::Flow(format!("日期格式错误: {}", d)));
                    }
                }
                Ok(FlowCommand::BatchCollection {
                    symbols,
                    start_date,
                    end_date,
                })
            }
            "daily_full" | "daily" => {
                let mut trade_date = None;
                let mut symbols = Vec::new();
                for p in &parts[1..] {
                    if trade_date.is_none() && is_date(p) {
                        trade_date = Some(p.to_string());
                    } else {
                        symbols.extend(split_list(p));
                    }
                }
                Ok(FlowCommand::DailyFull {
                    trade_date,
                    symbols,
                })
            }
            "news" => Ok(FlowCommand::News {
                sources: parts[1..].iter().flat_map(|s| split_list(s)).collect(),
            }),
            "custom" => Ok(FlowCommand::Custom {
                steps: parts[1..].iter().map(|s| s.to_string()).collect(),
            }),
            other => Err(OrchestratorError::Flow(format!("未知流程: {}", other))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 5).unwrap()
    }

    #[test]
    fn parses_flow_names_and_arguments() {
        assert_eq!(
            "batch_collection 000001.SZ,600036.SH 20240101 20240105"
                .parse::<FlowCommand>()
                .unwrap(),
            FlowCommand::BatchCollection {
                symbols: vec!["000001.SZ".into(), "600036.SH".into()],
                start_date: Some("20240101".into()),
                end_date: Some("20240105".into()),
            }
        );
        assert_eq!(
            "news sina,cls".parse::<FlowCommand>().unwrap(),
            FlowCommand::News {
                sources: vec!["sina".into(), "cls".into()]
            }
        );
        assert!("rebalance".parse::<FlowCommand>().is_err());
        assert!("batch_collection 000001.SZ 2024-01-01"
            .parse::<FlowCommand>()
            .is_err());
    }

    #[test]
    fn daily_full_runs_roster_then_quotes_then_news() {
        let cmd: FlowCommand = "daily_full 20240105 000001.SZ,600036.SH".parse().unwrap();
        let plan = cmd.plan(today()).unwrap();
        assert_eq!(plan.len(), 3);
        assert!(matches!(
            &plan[0],
            Stage::Serial(FlowStep::Collect(FetchRequest::StockBasic { .. }))
        ));
        match &plan[1] {
            Stage::Concurrent(steps) => {
                assert_eq!(steps.len(), 2);
                assert_eq!(steps[0].to_string(), "daily_quote:000001.SZ");
            }
            other => panic!("unexpected stage {:?}", other),
        }
        assert!(matches!(&plan[2], Stage::Serial(FlowStep::News { .. })));
    }

    #[test]
    fn custom_steps_default_their_dates() {
        let cmd: FlowCommand = "custom macro:cpi daily:000001.sz news:sina"
            .parse()
            .unwrap();
        let plan = cmd.plan(today()).unwrap();
        assert_eq!(
            plan[0],
            Stage::Serial(FlowStep::Collect(FetchRequest::Macro {
                indicator: MacroIndicator::Cpi,
                start_date: "20230105".into(),
                end_date: "20240105".into(),
            }))
        );
        assert_eq!(
            plan[1],
            Stage::Serial(daily("000001.SZ", "20240105", "20240105"))
        );
        assert_eq!(plan[2].clone(), Stage::Serial(FlowStep::News {
            sources: vec!["sina".into()]
        }));
        assert!(FlowCommand::Custom {
            steps: vec!["daily".into()]
        }
        .plan(today())
        .is_err());
    }

    #[test]
    fn batch_collection_needs_symbols() {
        let cmd: FlowCommand = "batch_collection".parse().unwrap();
        assert!(cmd.plan(today()).is_err());
    }
}
