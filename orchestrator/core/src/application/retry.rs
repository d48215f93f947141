// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Bounded retry with exponential backoff for external calls
//!
//! Every attempt runs under `call_timeout`; a timeout is a transient failure
//! like any other collaborator error. After `max_attempts` the last error is
//! returned and the caller converts it into its own fatal error.

use std::future::Future;
use tracing::{debug, warn};

use crate::domain::collaborators::CollaboratorError;
use crate::domain::orchestrator_config::RetryPolicy;

/// Successful result plus the number of attempts it took
#[derive(Debug, Clone, PartialEq)]
pub struct Attempted<T> {
    pub value: T,
    pub attempts: u32,
}

pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    operation: &'static str,
    mut call: F,
) -> Result<Attempted<T>, CollaboratorError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, CollaboratorError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut last_error = None;

    for attempt in 0..max_attempts {
        let outcome = match tokio::time::timeout(policy.call_timeout, call()).await {
            Ok(result) => result,
            Err(_) => Err(CollaboratorError::Timeout {
                operation: operation.to_string(),
                after: policy.call_timeout,
            }),
        };

        match outcome {
            Ok(value) => {
                if attempt > 0 {
                    debug!(operation, attempts = attempt + 1, "External call succeeded after retry");
                }
                return Ok(Attempted {
                    value,
                    attempts: attempt + 1,
                });
            }
            Err(e) => {
                warn!(
                    operation,
                    "External call failed (attempt {}/{}): {}",
                    attempt + 1,
                    max_attempts,
                    e
                );
                last_error = Some(e);

                if attempt + 1 < max_attempts {
                    metrics::counter!("keel_external_call_retries_total", "operation" => operation)
                        .increment(1);
                    tokio::time::sleep(policy.backoff_for(attempt)).await;
                }
            }
        }
    }

    Err(last_error.unwrap_or_else(|| CollaboratorError::Failed(format!("{} was never attempted", operation))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(1),
            call_timeout: Duration::from_secs(2),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result = with_retry(&policy(), "apply", || {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(CollaboratorError::Unavailable("busy".into()))
                } else {
                    Ok("done")
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(result.value, "done");
        assert_eq!(result.attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeouts_exhaust_attempts() {
        let start = tokio::time::Instant::now();
        let result: Result<Attempted<()>, _> = with_retry(&policy(), "apply", || async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        })
        .await;

        assert!(matches!(result, Err(CollaboratorError::Timeout { .. })));
        // three 2s timeouts plus 100ms and 200ms backoff
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(6300));
        assert!(elapsed < Duration::from_millis(6400));
    }
}
