pub mod data_task;
pub mod quality;
pub mod records;
pub mod request;
pub mod task;

pub use data_task::{
    next_run_after, parse_cron, DataTaskConfig, DataTaskSpec, DataTaskStatus, DataTaskType,
};
pub use quality::{QualityIssue, QualityReport, Severity};
pub use records::{
    DataKind, FinancialStatement, MacroObservation, MarketBar, NewsItem, Record, StatementType,
    StockInfo,
};
pub use request::{FetchRequest, MacroIndicator};
pub use task::{CollectionTask, Page, TaskFilter, TaskResult, TaskStatus, TaskSubmission};
