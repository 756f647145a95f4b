pub mod data_task_repo;
pub mod record_repo;

pub use data_task_repo::DataTaskRepository;
pub use record_repo::RecordRepository;
