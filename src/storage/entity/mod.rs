pub mod data_task;
pub mod processed_record;

pub use data_task::Entity as DataTask;
pub use processed_record::Entity as ProcessedRecord;
