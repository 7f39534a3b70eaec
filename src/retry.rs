//! 带抖动的指数退避重试
//!
//! 瞬时性错误（网络故障、429/502/503/504）按 `min(100·2ⁿ, 10s)` 退避重试，
//! 退避时间乘以 [0.75, 1.25] 的均匀随机因子；总尝试次数为 maxRetries + 1。
//! 若退避会超出整体截止时间，立即以最后一次错误失败。

use crate::error::ProxyError;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

const INITIAL_DELAY_MS: u64 = 100;
const MAX_DELAY_MS: u64 = 10_000;

/// HTTP 状态码级别的可重试判定
pub fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 502 | 503 | 504)
}

const RETRYABLE_MESSAGE_MARKERS: &[&str] = &[
    "429",
    "Too Many Requests",
    "502",
    "Bad Gateway",
    "503",
    "Service Unavailable",
    "504",
    "Connection refused",
    "Connection reset",
    "Connection timed out",
    "Timeout",
];

/// 错误级别的可重试判定：优先按类型分类，再回退到消息子串匹配
pub fn is_retryable(err: &ProxyError) -> bool {
    match err {
        ProxyError::UpstreamStatus { status, .. } => is_retryable_status(*status),
        ProxyError::Http(err) if err.is_timeout() || err.is_connect() => true,
        other => {
            let message = other.to_string();
            RETRYABLE_MESSAGE_MARKERS
                .iter()
                .any(|marker| message.contains(marker))
        }
    }
}

/// 第 n 次尝试后的退避时长（0 起始），含抖动
pub fn backoff_delay(attempt: u32) -> Duration {
    let base = INITIAL_DELAY_MS
        .saturating_mul(1u64 << attempt.min(16))
        .min(MAX_DELAY_MS);
    let jitter = rand::thread_rng().gen_range(0.75..=1.25);
    Duration::from_millis((base as f64 * jitter) as u64)
}

/// 在截止时间内以重试执行异步操作
pub async fn execute_with_retry<T, F, Fut>(
    operation: F,
    max_retries: u32,
    deadline: Instant,
    context: &str,
) -> Result<T, ProxyError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, ProxyError>>,
{
    let mut attempt: u32 = 0;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if attempt >= max_retries {
                    tracing::error!(
                        "{} - All retry attempts exhausted (attempt {}/{})",
                        context,
                        attempt + 1,
                        max_retries + 1
                    );
                    return Err(err);
                }
                if !is_retryable(&err) {
                    tracing::error!(
                        "{} - Non-retryable error on attempt {}: {}",
                        context,
                        attempt + 1,
                        err
                    );
                    return Err(err);
                }

                let delay = backoff_delay(attempt);
                if Instant::now() + delay > deadline {
                    tracing::warn!(
                        "{} - Backoff of {:?} would exceed deadline, giving up",
                        context,
                        delay
                    );
                    return Err(err);
                }

                tracing::warn!(
                    "{} - Attempt {}/{} failed with retryable error: {}. Retrying in {:?}",
                    context,
                    attempt + 1,
                    max_retries + 1,
                    err,
                    delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn far_deadline() -> Instant {
        Instant::now() + Duration::from_secs(600)
    }

    #[test]
    fn test_retryable_status_codes() {
        for status in [429, 502, 503, 504] {
            assert!(is_retryable_status(status), "{} should retry", status);
        }
        for status in [200, 400, 401, 404, 500] {
            assert!(!is_retryable_status(status), "{} should not retry", status);
        }
    }

    #[test]
    fn test_classification_by_message() {
        assert!(is_retryable(&ProxyError::Upstream("Connection refused".into())));
        assert!(is_retryable(&ProxyError::Upstream("Connection reset by peer".into())));
        assert!(is_retryable(&ProxyError::Upstream("Timeout waiting for response".into())));
        assert!(is_retryable(&ProxyError::Upstream("got 503 Service Unavailable".into())));
        assert!(!is_retryable(&ProxyError::Upstream("invalid api key".into())));
        assert!(!is_retryable(&ProxyError::Internal("boom".into())));
    }

    #[test]
    fn test_classification_by_status() {
        assert!(is_retryable(&ProxyError::UpstreamStatus {
            status: 429,
            body: String::new(),
        }));
        assert!(!is_retryable(&ProxyError::UpstreamStatus {
            status: 401,
            body: String::new(),
        }));
    }

    #[test]
    fn test_backoff_delay_within_jitter_bounds() {
        for attempt in 0..12u32 {
            let base = (INITIAL_DELAY_MS * 2u64.pow(attempt)).min(MAX_DELAY_MS);
            let lower = base * 3 / 4;
            let upper = base * 5 / 4;
            for _ in 0..20 {
                let delay = backoff_delay(attempt).as_millis() as u64;
                assert!(
                    delay >= lower && delay <= upper,
                    "attempt {}: {}ms outside [{}, {}]",
                    attempt,
                    delay,
                    lower,
                    upper
                );
            }
        }
    }

    #[test]
    fn test_backoff_delay_caps_at_max() {
        let delay = backoff_delay(30).as_millis() as u64;
        assert!(delay <= MAX_DELAY_MS * 5 / 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_takes_one_attempt() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();
        let result: Result<u32, ProxyError> = execute_with_retry(
            move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(7)
                }
            },
            3,
            far_deadline(),
            "test",
        )
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retryable_error_exhausts_all_attempts() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();
        let result: Result<u32, ProxyError> = execute_with_retry(
            move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(ProxyError::UpstreamStatus {
                        status: 503,
                        body: "Service Unavailable".into(),
                    })
                }
            },
            3,
            far_deadline(),
            "test",
        )
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_error_takes_one_attempt() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();
        let result: Result<u32, ProxyError> = execute_with_retry(
            move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(ProxyError::Upstream("invalid api key".into()))
                }
            },
            3,
            far_deadline(),
            "test",
        )
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_retries_runs_initial_attempt_only() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();
        let _: Result<u32, ProxyError> = execute_with_retry(
            move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(ProxyError::UpstreamStatus {
                        status: 503,
                        body: String::new(),
                    })
                }
            },
            0,
            far_deadline(),
            "test",
        )
        .await;

        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_two_failures_then_success() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();
        let start = Instant::now();
        let result: Result<u16, ProxyError> = execute_with_retry(
            move || {
                let counter = counter.clone();
                async move {
                    let attempt = counter.fetch_add(1, Ordering::SeqCst);
                    if attempt < 2 {
                        Err(ProxyError::UpstreamStatus {
                            status: 503,
                            body: "Service Unavailable".into(),
                        })
                    } else {
                        Ok(200)
                    }
                }
            },
            3,
            far_deadline(),
            "test",
        )
        .await;

        assert_eq!(result.unwrap(), 200);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        // 两次退避的下界分别为 75ms 与 150ms
        assert!(start.elapsed() >= Duration::from_millis(225));
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_exceeding_deadline_fails_immediately() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();
        let deadline = Instant::now() + Duration::from_millis(10);
        let result: Result<u32, ProxyError> = execute_with_retry(
            move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(ProxyError::UpstreamStatus {
                        status: 503,
                        body: String::new(),
                    })
                }
            },
            5,
            deadline,
            "test",
        )
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
