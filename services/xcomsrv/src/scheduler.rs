//! Poll scheduler
//!
//! Iterates the static descriptor table over one serial link, one
//! transaction per descriptor, and forwards every outcome to an
//! [`OutcomeSink`]. Two strategies share the same executor: a blocking
//! full-table sweep and a cooperative one-descriptor-per-tick round robin.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::{ParameterDescriptor, PollConfig};
use crate::executor::{RequestExecutor, TransactionOutcome};
use crate::transport::SerialLink;

/// Consumer of per-descriptor poll outcomes.
#[async_trait]
pub trait OutcomeSink: Send + Sync {
    async fn publish_outcome(&self, descriptor: &ParameterDescriptor, outcome: &TransactionOutcome);

    /// Periodic maintenance hook driven from the poll loop, once per sweep
    /// cycle or round-robin tick. Must stay bounded: it shares the poll
    /// task with serial I/O.
    async fn maintain(&self) {}
}

/// How the descriptor table is walked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PollStrategy {
    /// Process the whole table synchronously, then idle until the next cycle.
    Sweep,
    /// Process one descriptor per rate-limited tick, wrapping at the end.
    RoundRobin,
}

/// Walks the descriptor table and runs one transaction per descriptor.
///
/// Every full pass visits each descriptor exactly once, in declaration
/// order; the cursor only ever advances by one.
pub struct PollScheduler<L> {
    executor: RequestExecutor<L>,
    table: Arc<Vec<ParameterDescriptor>>,
    strategy: PollStrategy,
    next_index: usize,
    param_delay: Duration,
    cycle_delay: Duration,
    tick_interval: Duration,
}

impl<L: SerialLink> PollScheduler<L> {
    pub fn new(
        executor: RequestExecutor<L>,
        table: Arc<Vec<ParameterDescriptor>>,
        poll: &PollConfig,
    ) -> Self {
        Self {
            executor,
            table,
            strategy: poll.strategy,
            next_index: 0,
            param_delay: Duration::from_millis(poll.param_delay_ms),
            cycle_delay: Duration::from_millis(poll.cycle_delay_ms),
            tick_interval: Duration::from_millis(poll.tick_interval_ms),
        }
    }

    /// Process exactly one descriptor (the one after the last processed,
    /// wrapping to the start) and forward its outcome.
    pub async fn poll_next<S: OutcomeSink>(&mut self, sink: &S) {
        if self.table.is_empty() {
            return;
        }
        if self.next_index >= self.table.len() {
            self.next_index = 0;
        }
        let descriptor = &self.table[self.next_index];
        self.next_index += 1;

        let outcome = self
            .executor
            .read_parameter(descriptor.device_address, descriptor.parameter_id)
            .await;
        sink.publish_outcome(descriptor, &outcome).await;
    }

    /// One full pass over the table in declaration order.
    ///
    /// The cancellation token is checked between transactions, so shutdown
    /// latency is bounded by one transaction's timeout, not a full pass.
    /// Returns false when the pass was cancelled part-way.
    pub async fn run_sweep<S: OutcomeSink>(&mut self, sink: &S, cancel: &CancellationToken) -> bool {
        self.next_index = 0;
        for _ in 0..self.table.len() {
            if cancel.is_cancelled() {
                return false;
            }
            self.poll_next(sink).await;
            // Give the device's command processor room to breathe.
            tokio::time::sleep(self.param_delay).await;
        }
        true
    }

    /// Run the configured strategy until cancelled.
    pub async fn run<S: OutcomeSink>(&mut self, sink: &S, cancel: &CancellationToken) {
        info!(
            "polling {} parameters ({:?} strategy)",
            self.table.len(),
            self.strategy
        );
        match self.strategy {
            PollStrategy::Sweep => {
                while !cancel.is_cancelled() {
                    sink.maintain().await;
                    if !self.run_sweep(sink, cancel).await {
                        break;
                    }
                    debug!("sweep complete");
                    tokio::select! {
                        _ = tokio::time::sleep(self.cycle_delay) => {}
                        _ = cancel.cancelled() => break,
                    }
                }
            }
            PollStrategy::RoundRobin => {
                let mut tick = tokio::time::interval(self.tick_interval);
                tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        _ = tick.tick() => {}
                        _ = cancel.cancelled() => break,
                    }
                    sink.maintain().await;
                    self.poll_next(sink).await;
                }
            }
        }
    }
}
