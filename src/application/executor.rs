use crate::application::events::{BatchEvent, EventSender, publish};
use crate::config::RetryPolicy;
use crate::domain::job::{BatchItem, ItemError, ItemResult};
use crate::domain::ports::{SharedExecutionClient, SharedJobStore};
use crate::error::{ExecutionError, Result};
use tokio::time::{sleep, timeout};
use tracing::{debug, instrument, warn};

/// Drives a single claimed item through the payment backend.
///
/// Retryable failures are retried with exponential backoff up to
/// `max_attempts`; terminal failures end the item immediately. Every attempt
/// is written to the job store before `execute` returns or sleeps, so the
/// stored item always reflects what was actually tried.
pub struct ItemExecutor {
    client: SharedExecutionClient,
    store: SharedJobStore,
    retry: RetryPolicy,
    events: EventSender,
}

impl ItemExecutor {
    pub fn new(
        client: SharedExecutionClient,
        store: SharedJobStore,
        retry: RetryPolicy,
        events: EventSender,
    ) -> Self {
        Self {
            client,
            store,
            retry,
            events,
        }
    }

    /// Executes a `Processing` item to a terminal outcome.
    ///
    /// Returns an error only when the job store could not record progress.
    #[instrument(skip(self, item), fields(job_id = %item.batch_id, item = item.index))]
    pub async fn execute(&self, item: &mut BatchItem) -> Result<ItemResult> {
        let key = item.idempotency_key();

        loop {
            // Left over from an attempt interrupted by a restart.
            if item.attempts >= self.retry.max_attempts {
                let error = item.last_error.clone().unwrap_or_else(|| ItemError {
                    code: "RETRIES_EXHAUSTED".to_string(),
                    message: format!("gave up after {} attempts", item.attempts),
                });
                return self.finish(item, ItemResult::Failed(error)).await;
            }

            item.attempts += 1;
            let attempt = item.attempts;
            debug!(attempt, "submitting payment");

            let outcome = match timeout(
                self.retry.call_timeout(),
                self.client.submit_payment(&item.payload, &key),
            )
            .await
            {
                Ok(outcome) => outcome,
                Err(_) => Err(ExecutionError::timeout(self.retry.call_timeout())),
            };

            let result = match outcome {
                Ok(receipt) => ItemResult::Completed {
                    external_tx_id: receipt.external_tx_id,
                },
                Err(err @ ExecutionError::Terminal { .. }) => {
                    warn!(attempt, error = %err, "payment rejected");
                    ItemResult::Failed(err.into())
                }
                Err(err) if attempt >= self.retry.max_attempts => {
                    warn!(attempt, error = %err, "retries exhausted");
                    ItemResult::Failed(err.into())
                }
                Err(err) => {
                    let delay = self.retry.delay_after(attempt);
                    warn!(attempt, error = %err, ?delay, "transient failure, retrying");
                    let error: ItemError = err.into();
                    item.last_error = Some(error.clone());
                    self.store.update_item_status(item).await?;
                    publish(
                        &self.events,
                        BatchEvent::ItemAttempted {
                            job_id: item.batch_id,
                            item_index: item.index,
                            attempt,
                            error,
                        },
                    );
                    sleep(delay).await;
                    continue;
                }
            };

            return self.finish(item, result).await;
        }
    }

    async fn finish(&self, item: &mut BatchItem, result: ItemResult) -> Result<ItemResult> {
        item.settle(result.clone());
        self.store.update_item_status(item).await?;
        Ok(result)
    }
}
