use std::{future::Future, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::time::{Instant, sleep};
use tracing::debug;
use url::Url;

use crate::{
    ByteStream,
    error::{NetError, NetResult},
    traits::Net,
    types::{RangeSpec, RetryBudget, RetryPolicy},
};

/// Runs `op` until it succeeds, `should_retry` refuses the error, or the policy's attempt
/// budget is spent.
///
/// `op` receives the zero-based attempt number. `on_retry` is called with the failed
/// attempt's error, the retry number and the delay about to be slept. When the policy has
/// a reset window and the previous retry is older than that window, the budget starts
/// over.
pub async fn retry_with_backoff<T, E, F, Fut, S, R>(
    policy: &RetryPolicy,
    mut should_retry: S,
    on_retry: R,
    op: F,
) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    S: FnMut(&E) -> bool,
    R: FnMut(&E, u32, Duration),
{
    retry_with_budgets(
        policy,
        |error| should_retry(error).then_some(RetryBudget::Request),
        on_retry,
        op,
    )
    .await
}

/// [`retry_with_backoff`] with failures charged to separate budgets.
///
/// `classify` names the budget a failure draws from, or `None` to stop. Each budget counts
/// its own retries against [`RetryPolicy::attempts_for`] and backs off from its own count.
/// The retry number handed to `on_retry` is the one of the charged budget.
pub async fn retry_with_budgets<T, E, F, Fut, C, R>(
    policy: &RetryPolicy,
    mut classify: C,
    mut on_retry: R,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    C: FnMut(&E) -> Option<RetryBudget>,
    R: FnMut(&E, u32, Duration),
{
    let mut attempt = 0;
    let mut request_retries = 0;
    let mut offline_retries = 0;
    let mut last_retry_at: Option<Instant> = None;

    loop {
        let error = match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(error) => error,
        };
        attempt += 1;

        if let (Some(window), Some(at)) = (policy.reset_after, last_retry_at) {
            if at.elapsed() >= window {
                request_retries = 0;
                offline_retries = 0;
            }
        }

        let Some(budget) = classify(&error) else {
            return Err(error);
        };
        let retries = match budget {
            RetryBudget::Request => &mut request_retries,
            RetryBudget::Offline => &mut offline_retries,
        };
        if *retries + 1 >= policy.attempts_for(budget) {
            return Err(error);
        }

        let delay = policy.delay_for_retry(*retries);
        *retries += 1;
        on_retry(&error, *retries, delay);
        if !delay.is_zero() {
            sleep(delay).await;
        }
        last_retry_at = Some(Instant::now());
    }
}

/// Retry decorator for Net implementations
pub struct RetryNet<N> {
    inner: N,
    policy: RetryPolicy,
}

impl<N: Net> RetryNet<N> {
    pub fn new(inner: N, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    async fn run<T, F, Fut>(&self, url: &Url, op: F) -> NetResult<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = NetResult<T>>,
    {
        let mut attempts = 0;
        let result = retry_with_budgets(
            &self.policy,
            NetError::retry_budget,
            |error, retry, delay| {
                attempts += 1;
                debug!(%url, %error, retry, delay_ms = delay.as_millis(), "retrying request");
            },
            op,
        )
        .await;

        result.map_err(|error| {
            if attempts > 0 && error.is_retryable() {
                NetError::RetryExhausted {
                    attempts: attempts + 1,
                    source: Box::new(error),
                }
            } else {
                error
            }
        })
    }
}

#[async_trait]
impl<N: Net> Net for RetryNet<N> {
    async fn get_bytes(&self, url: Url) -> NetResult<Bytes> {
        self.run(&url, |_| self.inner.get_bytes(url.clone())).await
    }

    async fn stream(&self, url: Url, range: Option<RangeSpec>) -> NetResult<ByteStream> {
        self.run(&url, |_| self.inner.stream(url.clone(), range.clone()))
            .await
    }
}
