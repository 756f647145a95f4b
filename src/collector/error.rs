use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum CollectorErrorKind {
    Network,     // 网络/连接失败（可重试）
    RateLimited, // 频率限制（可重试）
    Server,      // 5xx（可重试）
    Timeout,     // 单次请求超时（可重试）
    EmptyResult, // 空结果集（不可重试）
    BadRequest,  // 参数错误（不可重试）
    Unauthorized,
    Parse,
    MaxRetriesExceeded,
    Cancelled,
}

impl CollectorErrorKind {
    pub fn code(&self) -> &'static str {
        match self {
            CollectorErrorKind::Network => "NETWORK",
            CollectorErrorKind::RateLimited => "RATE_LIMITED",
            CollectorErrorKind::Server => "SERVER",
            CollectorErrorKind::Timeout => "TIMEOUT",
            CollectorErrorKind::EmptyResult => "EMPTY_RESULT",
            CollectorErrorKind::BadRequest => "BAD_REQUEST",
            CollectorErrorKind::Unauthorized => "UNAUTHORIZED",
            CollectorErrorKind::Parse => "PARSE",
            CollectorErrorKind::MaxRetriesExceeded => "MAX_RETRIES_EXCEEDED",
            CollectorErrorKind::Cancelled => "CANCELLED",
        }
    }
}

/// 采集错误，按是否可重试分型
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectorError {
    pub kind: CollectorErrorKind,
    pub message: String,
    pub retryable: bool,
    pub attempts: u32,
}

impl CollectorError {
    fn new(kind: CollectorErrorKind, msg: impl Into<String>, retryable: bool) -> Self {
        Self {
            kind,
            message: msg.into(),
            retryable,
            attempts: 0,
        }
    }

    pub fn network(msg: impl Into<String>) -> Self {
        Self::new(CollectorErrorKind::Network, msg, true)
    }

    pub fn rate_limited(msg: impl Into<String>) -> Self {
        Self::new(CollectorErrorKind::RateLimited, msg, true)
    }

    pub fn server(msg: impl Into<String>) -> Self {
        Self::new(CollectorErrorKind::Server, msg, true)
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::new(CollectorErrorKind::Timeout, msg, true)
    }

    pub fn empty(msg: impl Into<String>) -> Self {
        Self::new(CollectorErrorKind::EmptyResult, msg, false)
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(CollectorErrorKind::BadRequest, msg, false)
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::new(CollectorErrorKind::Unauthorized, msg, false)
    }

    pub fn parse(msg: impl Into<String>) -> Self {
        Self::new(CollectorErrorKind::Parse, msg, false)
    }

    pub fn cancelled() -> Self {
        Self::new(CollectorErrorKind::Cancelled, "操作已取消", false)
    }

    /// 重试耗尽，包装最后一次错误
    pub fn max_retries_exceeded(last: &CollectorError, attempts: u32) -> Self {
        Self {
            kind: CollectorErrorKind::MaxRetriesExceeded,
            message: format!(
                "重试 {} 次后仍失败, 最后错误: [{}] {}",
                attempts,
                last.kind.code(),
                last.message
            ),
            retryable: false,
            attempts,
        }
    }
}

impl fmt::Display for CollectorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind.code(), self.message)
    }
}

impl std::error::Error for CollectorError {}
