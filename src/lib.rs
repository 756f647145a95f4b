//! 行情 / 财务 / 宏观 / 新闻数据采集与处理

pub mod collector;
pub mod config;
pub mod model;
pub mod news;
pub mod orchestrator;
pub mod processing;
pub mod provider;
pub mod scheduler;
pub mod storage;
pub mod store;
