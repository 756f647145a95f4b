use super::error::CollectorError;
use crate::config::RetryPolicy;
use log::{info, warn};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

impl RetryPolicy {
    /// 第 `attempt` 次（从 0 开始）失败后的等待时间：min(d0 * f^n, dmax)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.initial_delay.as_secs_f64();
        let secs = base * self.multiplier.powi(attempt.min(i32::MAX as u32) as i32);
        if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
            self.max_delay
        } else {
            Duration::from_secs_f64(secs.max(0.0))
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

/// 带指数退避的重试执行器
///
/// - 不可重试错误立即返回，不消耗重试次数
/// - 最多执行 `max_retries + 1` 次，耗尽后返回 MAX_RETRIES_EXCEEDED
/// - 整体受 `operation_timeout` 约束；取消令牌在每次等待时检查
pub async fn retry_with_backoff<T, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    label: &str,
    mut op: F,
) -> Result<T, CollectorError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, CollectorError>>,
{
    let max_attempts = policy.max_attempts();
    let run = async {
        let mut attempt: u32 = 0;
        loop {
            if cancel.is_cancelled() {
                return Err(CollectorError::cancelled());
            }
            let result = tokio::select! {
                r = op(attempt) => r,
                _ = cancel.cancelled() => return Err(CollectorError::cancelled()),
            };

            match result {
                Ok(v) => {
                    if attempt > 0 {
                        info!("{} 第 {} 次尝试成功", label, attempt + 1);
                    }
                    return Ok(v);
                }
                Err(e) if !e.retryable => return Err(e),
                Err(e) => {
                    attempt += 1;
                    if attempt >= max_attempts {
                        warn!("✗ {} 重试耗尽 [{} 次]: {}", label, attempt, e);
                        return Err(CollectorError::max_retries_exceeded(&e, attempt));
                    }
                    let delay = policy.delay_for(attempt - 1);
                    warn!(
                        "⏳ {} 第 {}/{} 次失败: {}，{:?} 后重试",
                        label, attempt, max_attempts, e, delay
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = cancel.cancelled() => return Err(CollectorError::cancelled()),
                    }
                }
            }
        }
    };

    match tokio::time::timeout(policy.operation_timeout, run).await {
        Ok(r) => r,
        Err(_) => Err(CollectorError::timeout(format!(
            "{} 超过整体超时 {:?}",
            label, policy.operation_timeout
        ))),
    }
}
