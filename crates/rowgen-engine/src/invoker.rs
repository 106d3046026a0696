//! Service Invoker: bounded retries for a batch, then per-record degradation.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

use rowgen_core::{ErrorClass, GenerationService, ItemOutcome, Payload, Record, RetryPolicy, ServiceError};
use rowgen_telemetry::RunMetrics;

/// Ordered outcomes for one batch.
#[derive(Debug)]
pub struct Invocation {
    /// Same length and order as the batch.
    pub outcomes: Vec<ItemOutcome>,
    /// Retries spent on the batch call.
    pub retries: u32,
    /// Whether the batch was split into single-record calls.
    pub degraded: bool,
}

/// Failure reason written to the Failure Log.
pub fn failure_reason(err: &ServiceError) -> String {
    format!("{}: {err}", err.error_kind())
}

pub struct ServiceInvoker {
    service: Arc<dyn GenerationService>,
    policy: RetryPolicy,
    metrics: Arc<RunMetrics>,
}

impl ServiceInvoker {
    pub fn new(service: Arc<dyn GenerationService>, policy: RetryPolicy, metrics: Arc<RunMetrics>) -> Self {
        Self {
            service,
            policy,
            metrics,
        }
    }

    pub fn service(&self) -> &Arc<dyn GenerationService> {
        &self.service
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Produce one outcome per record. Only fatal errors are returned as
    /// `Err`; everything else ends up as [`ItemOutcome::Failure`].
    pub async fn invoke(&self, batch: &[Record]) -> Result<Invocation, ServiceError> {
        let Some(first) = batch.first() else {
            return Ok(Invocation {
                outcomes: Vec::new(),
                retries: 0,
                degraded: false,
            });
        };
        let mut retries = 0;
        let mut attempt = 0;

        let err = loop {
            match self.call(batch).await {
                Ok(payloads) => {
                    return Ok(Invocation {
                        outcomes: payloads.into_iter().map(ItemOutcome::Success).collect(),
                        retries,
                        degraded: false,
                    });
                }
                Err(e) => match e.class() {
                    ErrorClass::Fatal => return Err(e),
                    ErrorClass::Transient if self.policy.has_next(attempt) => {
                        let delay = self.retry_delay(attempt, &e);
                        warn!(
                            service = self.service.name(),
                            attempt = attempt + 1,
                            max_attempts = self.policy.max_attempts,
                            delay_ms = delay.as_millis() as u64,
                            error_kind = e.error_kind(),
                            error = %e,
                            "batch call failed, retrying"
                        );
                        self.metrics.record_retry();
                        retries += 1;
                        attempt += 1;
                        tokio::time::sleep(delay).await;
                    }
                    ErrorClass::Transient | ErrorClass::PerRecordIsolated => break e,
                },
            }
        };

        if batch.len() == 1 {
            warn!(row = first.index, error = %err, "record failed");
            return Ok(Invocation {
                outcomes: vec![ItemOutcome::Failure(failure_reason(&err))],
                retries,
                degraded: false,
            });
        }

        warn!(
            service = self.service.name(),
            size = batch.len(),
            first_row = first.index,
            error_kind = err.error_kind(),
            error = %err,
            "batch failed, falling back to per-record calls"
        );
        self.metrics.record_degraded();

        let mut outcomes = Vec::with_capacity(batch.len());
        for record in batch {
            match self.call(std::slice::from_ref(record)).await {
                Ok(payloads) => match payloads.into_iter().next() {
                    Some(payload) => outcomes.push(ItemOutcome::Success(payload)),
                    None => outcomes.push(ItemOutcome::Failure(failure_reason(
                        &ServiceError::CountMismatch { expected: 1, actual: 0 },
                    ))),
                },
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(row = record.index, error_kind = e.error_kind(), error = %e, "record failed");
                    outcomes.push(ItemOutcome::Failure(failure_reason(&e)));
                }
            }
        }

        Ok(Invocation {
            outcomes,
            retries,
            degraded: true,
        })
    }

    async fn call(&self, batch: &[Record]) -> Result<Vec<Payload>, ServiceError> {
        let started = Instant::now();
        let result = self.service.generate(batch).await;
        let elapsed = started.elapsed();
        self.metrics.observe_call(elapsed);
        debug!(
            service = self.service.name(),
            size = batch.len(),
            elapsed_ms = elapsed.as_millis() as u64,
            ok = result.is_ok(),
            "service call"
        );

        let payloads = result?;
        if payloads.len() != batch.len() {
            return Err(ServiceError::CountMismatch {
                expected: batch.len(),
                actual: payloads.len(),
            });
        }
        Ok(payloads)
    }

    /// Exponential schedule; a longer `Retry-After` hint wins.
    fn retry_delay(&self, attempt: u32, err: &ServiceError) -> Duration {
        let scheduled = self.policy.delay_for(attempt);
        match err {
            ServiceError::RateLimited {
                retry_after: Some(hint),
            } => scheduled.max(*hint),
            _ => scheduled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rowgen_llm::{MockResponse, MockService};

    fn records(n: u64) -> Vec<Record> {
        (1..=n)
            .map(|i| Record {
                index: i,
                fields: vec![format!("w{i}")],
                resolved_text: format!("w{i}"),
                identifier: None,
            })
            .collect()
    }

    fn invoker(mock: &Arc<MockService>, attempts: u32, backoff_secs: f64) -> ServiceInvoker {
        ServiceInvoker::new(
            mock.clone(),
            RetryPolicy::from_secs_f64(attempts, backoff_secs),
            Arc::new(RunMetrics::new()),
        )
    }

    fn server_error() -> MockResponse {
        MockResponse::Error(ServiceError::ServerError {
            status: 502,
            body: "bad gateway".into(),
        })
    }

    fn texts(outcomes: &[ItemOutcome]) -> Vec<Option<String>> {
        outcomes
            .iter()
            .map(|o| match o {
                ItemOutcome::Success(p) => Some(p.cell()),
                ItemOutcome::Failure(_) => None,
            })
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_two_failures_with_doubling_backoff() {
        let mock = Arc::new(MockService::new(vec![server_error(), server_error(), MockResponse::Echo]));
        let inv = invoker(&mock, 3, 2.0);

        let result = inv.invoke(&records(3)).await.unwrap();
        assert_eq!(result.retries, 2);
        assert!(!result.degraded);
        assert_eq!(
            texts(&result.outcomes),
            vec![
                Some(MockService::echo_text("w1")),
                Some(MockService::echo_text("w2")),
                Some(MockService::echo_text("w3")),
            ]
        );

        let calls = mock.calls();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[1].at - calls[0].at, Duration::from_secs(2));
        assert_eq!(calls[2].at - calls[1].at, Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_degrade_without_trailing_sleep() {
        let mock = Arc::new(MockService::new(vec![server_error(), server_error(), server_error()]));
        let inv = invoker(&mock, 3, 1.0);

        let result = inv.invoke(&records(4)).await.unwrap();
        assert!(result.degraded);
        assert_eq!(result.retries, 2);
        assert!(result.outcomes.iter().all(ItemOutcome::is_success));
        assert_eq!(mock.batch_sizes(), vec![4, 4, 4, 1, 1, 1, 1]);

        let calls = mock.calls();
        // first single call follows the last batch attempt immediately
        assert_eq!(calls[3].at, calls[2].at);
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_item_degrades_immediately() {
        let mock = Arc::new(MockService::echo().with_poisoned("w2"));
        let inv = invoker(&mock, 3, 2.0);

        let result = inv.invoke(&records(3)).await.unwrap();
        assert_eq!(result.retries, 0);
        assert!(result.degraded);
        assert_eq!(mock.batch_sizes(), vec![3, 1, 1, 1]);

        let outcomes = texts(&result.outcomes);
        assert!(outcomes[0].is_some());
        assert!(outcomes[1].is_none());
        assert!(outcomes[2].is_some());
        match &result.outcomes[1] {
            ItemOutcome::Failure(reason) => assert!(reason.starts_with("item_rejected: ")),
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn count_mismatch_is_retried() {
        let mock = Arc::new(MockService::new(vec![MockResponse::texts(["only one"]), MockResponse::Echo]));
        let inv = invoker(&mock, 3, 0.5);

        let result = inv.invoke(&records(2)).await.unwrap();
        assert_eq!(result.retries, 1);
        assert!(!result.degraded);
        assert_eq!(mock.batch_sizes(), vec![2, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn fatal_error_aborts() {
        let mock = Arc::new(MockService::new(vec![MockResponse::Error(
            ServiceError::AuthenticationFailed("401".into()),
        )]));
        let inv = invoker(&mock, 3, 2.0);

        let err = inv.invoke(&records(5)).await.unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(mock.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn fatal_error_while_degraded_aborts() {
        let mock = Arc::new(MockService::new(vec![
            MockResponse::Error(ServiceError::InvalidRequest("bad".into())),
            MockResponse::Echo,
            MockResponse::Error(ServiceError::ArtifactWrite {
                path: "out/a.wav".into(),
                reason: "disk full".into(),
            }),
        ]));
        let inv = invoker(&mock, 3, 2.0);

        let err = inv.invoke(&records(3)).await.unwrap_err();
        assert_eq!(err.error_kind(), "artifact_write");
        assert_eq!(mock.call_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_batch_makes_no_call() {
        let mock = Arc::new(MockService::echo());
        let invocation = invoker(&mock, 3, 2.0).invoke(&[]).await.unwrap();
        assert!(invocation.outcomes.is_empty());
        assert_eq!(mock.call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn single_record_batch_is_not_split() {
        let mock = Arc::new(MockService::new(vec![server_error(), server_error()]));
        let inv = invoker(&mock, 2, 1.0);

        let result = inv.invoke(&records(1)).await.unwrap();
        assert!(!result.degraded);
        assert_eq!(mock.call_count(), 2);
        match &result.outcomes[0] {
            ItemOutcome::Failure(reason) => assert!(reason.starts_with("server_error: ")),
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retry_after_hint_extends_the_wait() {
        let mock = Arc::new(MockService::new(vec![
            MockResponse::Error(ServiceError::RateLimited {
                retry_after: Some(Duration::from_secs(30)),
            }),
            MockResponse::Echo,
        ]));
        let inv = invoker(&mock, 3, 2.0);

        inv.invoke(&records(2)).await.unwrap();
        let calls = mock.calls();
        assert_eq!(calls[1].at - calls[0].at, Duration::from_secs(30));
    }

    #[test]
    fn reason_carries_kind_and_message() {
        let err = ServiceError::CountMismatch { expected: 10, actual: 9 };
        assert_eq!(
            failure_reason(&err),
            "count_mismatch: output length mismatch: expected 10, got 9"
        );
    }
}
