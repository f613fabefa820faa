// retry.rs
use super::ScanError;
use std::future::Future;

/// 重试策略: 固定次数, 无退避
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 2 }
    }
}

impl RetryPolicy {
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
        }
    }

    /// 执行 `operation`, 只对 `is_retryable()` 的错误重试
    pub async fn run<T, F, Fut>(&self, name: &str, mut operation: F) -> Result<T, ScanError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, ScanError>>,
    {
        let mut attempt = 1;
        loop {
            match operation(attempt).await {
                Ok(value) => {
                    if attempt > 1 {
                        log::info!("{} 第 {} 次尝试成功", name, attempt);
                    }
                    return Ok(value);
                }
                Err(e) if e.is_retryable() && attempt < self.max_attempts => {
                    log::warn!(
                        "{} 失败 (第 {}/{} 次), 重试: {}",
                        name,
                        attempt,
                        self.max_attempts,
                        e
                    );
                    attempt += 1;
                }
                Err(e) => {
                    if attempt > 1 {
                        log::error!("{} 在 {} 次尝试后失败: {}", name, attempt, e);
                    }
                    return Err(e);
                }
            }
        }
    }
}
