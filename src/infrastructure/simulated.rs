use crate::domain::instruction::{IdempotencyKey, PaymentInstruction, PaymentReceipt};
use crate::domain::ports::ExecutionClient;
use crate::error::ExecutionError;
use async_trait::async_trait;
use rand::Rng;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;

/// Stand-in payment backend with configurable latency and failure rates.
///
/// Honours idempotency keys the way a real backend would: a key that was
/// already accepted returns the original receipt without a new payment.
pub struct SimulatedExecutionClient {
    min_latency: Duration,
    max_latency: Duration,
    retryable_failure_rate: f64,
    terminal_failure_rate: f64,
    accepted: Mutex<HashMap<IdempotencyKey, PaymentReceipt>>,
    sequence: AtomicU64,
}

impl Default for SimulatedExecutionClient {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedExecutionClient {
    /// A backend that accepts every payment instantly.
    pub fn new() -> Self {
        Self {
            min_latency: Duration::ZERO,
            max_latency: Duration::ZERO,
            retryable_failure_rate: 0.0,
            terminal_failure_rate: 0.0,
            accepted: Mutex::new(HashMap::new()),
            sequence: AtomicU64::new(0),
        }
    }

    pub fn with_latency(mut self, min: Duration, max: Duration) -> Self {
        self.min_latency = min;
        self.max_latency = max.max(min);
        self
    }

    /// Share of calls that fail with a transient error (clamped to `0..=1`).
    pub fn with_retryable_failure_rate(mut self, rate: f64) -> Self {
        self.retryable_failure_rate = rate.clamp(0.0, 1.0);
        self
    }

    /// Share of calls rejected permanently (clamped to `0..=1`).
    pub fn with_terminal_failure_rate(mut self, rate: f64) -> Self {
        self.terminal_failure_rate = rate.clamp(0.0, 1.0);
        self
    }

    /// Number of distinct payments accepted so far.
    pub async fn accepted_count(&self) -> usize {
        self.accepted.lock().await.len()
    }
}

#[async_trait]
impl ExecutionClient for SimulatedExecutionClient {
    async fn submit_payment(
        &self,
        payload: &PaymentInstruction,
        idempotency_key: &IdempotencyKey,
    ) -> Result<PaymentReceipt, ExecutionError> {
        // ThreadRng is not Send; draw everything before the first await.
        let (latency, roll) = {
            let mut rng = rand::thread_rng();
            let latency = if self.max_latency > self.min_latency {
                rng.gen_range(self.min_latency..=self.max_latency)
            } else {
                self.min_latency
            };
            (latency, rng.r#gen::<f64>())
        };

        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        if let Some(receipt) = self.accepted.lock().await.get(idempotency_key) {
            return Ok(receipt.clone());
        }

        if roll < self.terminal_failure_rate {
            return Err(ExecutionError::terminal(
                "REJECTED",
                format!("payment to {} was rejected by the backend", payload.recipient),
            ));
        }
        if roll < self.terminal_failure_rate + self.retryable_failure_rate {
            return Err(ExecutionError::retryable(
                "UNAVAILABLE",
                "payment backend temporarily unavailable",
            ));
        }

        let receipt = PaymentReceipt {
            external_tx_id: format!("sim-{:08}", self.sequence.fetch_add(1, Ordering::Relaxed) + 1),
        };
        self.accepted
            .lock()
            .await
            .insert(idempotency_key.clone(), receipt.clone());
        Ok(receipt)
    }
}
