use std::fmt::Display;
use std::future::Future;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use clientvault_core::RemoteError;
use rand::Rng;

const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_BASE_DELAY_MS: u64 = 500;
const DEFAULT_JITTER_MS: u64 = 250;
const DEFAULT_MAX_DELAY_SECS: u64 = 30;

const TRANSIENT_MARKERS: [&str; 12] = [
    "502",
    "503",
    "504",
    "5xx",
    "bad gateway",
    "service unavailable",
    "gateway timeout",
    "connection reset",
    "connection refused",
    "connection aborted",
    "timed out",
    "timeout",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    Retryable,
    Fatal,
}

pub trait Classify {
    fn failure_class(&self) -> FailureClass;
}

pub fn message_indicates_transient(message: &str) -> bool {
    let lower = message.to_lowercase();
    TRANSIENT_MARKERS.iter().any(|marker| lower.contains(marker))
}

impl Classify for RemoteError {
    fn failure_class(&self) -> FailureClass {
        let retryable = match self {
            // The status is authoritative; the body is free text from the server.
            RemoteError::Api { .. } => self.is_transient(),
            RemoteError::NotConfigured => false,
            _ => self.is_transient() || message_indicates_transient(&self.to_string()),
        };
        if retryable {
            FailureClass::Retryable
        } else {
            FailureClass::Fatal
        }
    }
}

impl Classify for io::Error {
    fn failure_class(&self) -> FailureClass {
        let transient_kind = matches!(
            self.kind(),
            io::ErrorKind::ConnectionReset
                | io::ErrorKind::ConnectionAborted
                | io::ErrorKind::ConnectionRefused
                | io::ErrorKind::TimedOut
        );
        if transient_kind || message_indicates_transient(&self.to_string()) {
            FailureClass::Retryable
        } else {
            FailureClass::Fatal
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    jitter: Option<Duration>,
    max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(
            DEFAULT_MAX_ATTEMPTS,
            Duration::from_millis(DEFAULT_BASE_DELAY_MS),
        )
        .with_jitter(Duration::from_millis(DEFAULT_JITTER_MS))
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            jitter: None,
            max_delay: Duration::from_secs(DEFAULT_MAX_DELAY_SECS),
        }
    }

    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = (!jitter.is_zero()).then_some(jitter);
        self
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    /// Delay after the `attempt`-th (1-based) failed attempt.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let mut rng = rand::thread_rng();
        self.delay_with_rng(attempt, &mut rng)
    }

    pub fn delay_with_rng<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let base_ms = self.base_delay.as_millis().min(u128::from(u64::MAX)) as u64;
        let max_ms = self.max_delay.as_millis().min(u128::from(u64::MAX)) as u64;
        let shift = attempt.saturating_sub(1).min(16);
        let exp = base_ms.saturating_mul(1u64 << shift).min(max_ms);
        let jitter_ms = match self.jitter {
            Some(jitter) => {
                let bound = jitter.as_millis().min(u128::from(u64::MAX)) as u64;
                rng.gen_range(0..=bound)
            }
            None => 0,
        };
        Duration::from_millis(exp.saturating_add(jitter_ms))
    }
}

#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

#[derive(Clone)]
pub struct RetryExecutor {
    sleeper: Arc<dyn Sleeper>,
}

impl Default for RetryExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl RetryExecutor {
    pub fn new() -> Self {
        Self::with_sleeper(Arc::new(TokioSleeper))
    }

    pub fn with_sleeper(sleeper: Arc<dyn Sleeper>) -> Self {
        Self { sleeper }
    }

    /// Runs `operation` until it succeeds, fails fatally or exhausts the
    /// policy. The last failure is returned unchanged.
    pub async fn run<T, E, F, Fut>(&self, policy: &RetryPolicy, mut operation: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Classify + Display,
    {
        let mut attempt = 1u32;
        loop {
            let err = match operation().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };
            if err.failure_class() == FailureClass::Fatal {
                return Err(err);
            }
            if attempt >= policy.max_attempts() {
                tracing::warn!(
                    attempts = attempt,
                    error = %err,
                    "retryable failure persisted, giving up"
                );
                return Err(err);
            }
            let delay = policy.delay_for(attempt);
            tracing::warn!(
                attempt,
                max_attempts = policy.max_attempts(),
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "retryable failure, backing off"
            );
            self.sleeper.sleep(delay).await;
            attempt += 1;
        }
    }
}
