//! 共享 KV / 队列存储（Redis 或内存实现）
//!
//! 缓存、去重和新闻工作队列都通过 [`KvStore`] 访问共享存储。

pub mod memory;
pub mod redis_store;

pub use memory::MemoryStore;
pub use redis_store::RedisStore;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::time::Duration;

/// 超过该长度的自然键先做摘要再作为存储键
pub const MAX_NATURAL_KEY_LEN: usize = 200;

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("store connection error: {0}")]
    Connection(String),
    #[error("store command error: {0}")]
    Command(String),
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<redis::RedisError> for StoreError {
    fn from(e: redis::RedisError) -> Self {
        if e.is_connection_dropped() || e.is_connection_refusal() || e.is_io_error() {
            StoreError::Connection(e.to_string())
        } else {
            StoreError::Command(e.to_string())
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

/// 带 TTL 的键值存储 + 阻塞列表
///
/// `ttl` 语义与 Redis 一致：-2 表示不存在（或已过期），-1 表示没有过期时间。
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn ping(&self) -> Result<(), StoreError>;
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError>;
    async fn exists(&self, key: &str) -> Result<bool, StoreError>;
    async fn exists_many(&self, keys: &[String]) -> Result<Vec<bool>, StoreError>;
    async fn set_many(
        &self,
        entries: &[(String, String)],
        ttl: Option<Duration>,
    ) -> Result<(), StoreError>;
    async fn del(&self, key: &str) -> Result<bool, StoreError>;
    async fn ttl(&self, key: &str) -> Result<i64, StoreError>;
    async fn scan(&self, pattern: &str) -> Result<Vec<String>, StoreError>;
    /// LPUSH
    async fn push(&self, queue: &str, value: &str) -> Result<(), StoreError>;
    /// BRPOP，超时返回 None
    async fn pop(&self, queue: &str, timeout: Duration) -> Result<Option<String>, StoreError>;
    async fn queue_len(&self, queue: &str) -> Result<usize, StoreError>;
}

/// 构造 `prefix:kind:key` 形式的存储键，过长的自然键替换为 sha256 摘要
pub fn namespaced_key(prefix: &str, kind: &str, key: &str) -> String {
    let key_part = if key.chars().count() > MAX_NATURAL_KEY_LEN {
        hex::encode(Sha256::digest(key.as_bytes()))
    } else {
        key.to_string()
    };
    if prefix.is_empty() {
        format!("{}:{}", kind, key_part)
    } else {
        format!("{}:{}:{}", prefix, kind, key_part)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_keys_are_kept_verbatim() {
        assert_eq!(
            namespaced_key("dedup", "market", "600000.SH|20240102|1d"),
            "dedup:market:600000.SH|20240102|1d"
        );
    }

    #[test]
    fn oversized_keys_are_hashed() {
        let long = "新".repeat(MAX_NATURAL_KEY_LEN + 1);
        let key = namespaced_key("dedup", "news", &long);
        let digest = key.strip_prefix("dedup:news:").unwrap();
        assert_eq!(digest.len(), 64);
        assert_eq!(key, namespaced_key("dedup", "news", &long));
    }
}
