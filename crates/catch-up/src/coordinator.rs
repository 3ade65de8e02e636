// Copyright 2022 Webb Technologies Inc.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::{FutureExt, StreamExt};
use tokio::sync::watch;
use typed_builder::TypedBuilder;
use warp_relayer_admission::{Admission, AdmissionPolicy};
use warp_relayer_config::CatchUpConfig;
use warp_relayer_context::{CoordinatorState, RelayerContext};
use warp_relayer_store::{CheckpointKey, CheckpointStore};
use warp_relayer_types::{Id, MessagePosition, ObservedMessage};
use warp_relayer_utils::metric::Metrics;
use warp_relayer_utils::{probe, retry, Error, Result};

use crate::{DeliveryOutcome, DeliveryPipeline, MessageSource};

/// Drives one (instance, source chain) pair.
///
/// See the crate documentation for the processing order.
#[derive(TypedBuilder)]
pub struct CatchUpCoordinator<M, P, S> {
    /// The chain this coordinator follows.
    source_blockchain: Id,
    /// Where messages come from.
    source: M,
    /// Where admitted messages go.
    pipeline: P,
    /// Where the checkpoint lives.
    store: S,
    /// Allow-lists of the instance.
    policy: Arc<AdmissionPolicy>,
    #[builder(default)]
    config: CatchUpConfig,
    /// First height replayed when the pair has no checkpoint yet.
    #[builder(default, setter(strip_option))]
    start_height: Option<u64>,
}

/// Per run handles of one pair.
struct Pair {
    key: CheckpointKey,
    labels: [String; 2],
    metrics: Arc<Metrics>,
    state: watch::Sender<CoordinatorState>,
}

impl Pair {
    fn labels(&self) -> [&str; 2] {
        [self.labels[0].as_str(), self.labels[1].as_str()]
    }

    fn set_state(&self, state: CoordinatorState) {
        let previous = self.state.send_replace(state);
        self.metrics
            .coordinator_state
            .with_label_values(&self.labels())
            .set(state.as_gauge());
        if previous != state {
            tracing::event!(
                target: probe::TARGET,
                tracing::Level::DEBUG,
                kind = %probe::Kind::Lifecycle,
                key = %self.key,
                from = %previous,
                to = %state,
            );
        }
    }

    fn set_target(&self, height: u64) {
        self.metrics
            .target_height
            .with_label_values(&self.labels())
            .set(i64::try_from(height).unwrap_or(i64::MAX));
    }

    fn checkpointed(&self, position: MessagePosition) {
        self.metrics
            .checkpoint_advances
            .with_label_values(&self.labels())
            .inc();
        self.metrics
            .checkpoint_height
            .with_label_values(&self.labels())
            .set(i64::try_from(position.height).unwrap_or(i64::MAX));
        tracing::event!(
            target: probe::TARGET,
            tracing::Level::TRACE,
            kind = %probe::Kind::Checkpoint,
            key = %self.key,
            %position,
        );
    }
}

impl<M, P, S> CatchUpCoordinator<M, P, S>
where
    M: MessageSource,
    P: DeliveryPipeline,
    S: CheckpointStore,
{
    /// The chain this coordinator follows.
    pub fn source_blockchain(&self) -> Id {
        self.source_blockchain
    }

    /// Runs until shutdown or until an unrecoverable error.
    ///
    /// Transient errors restart the pair from its durable checkpoint after
    /// `retry-interval`. Any other error moves the pair to
    /// [`CoordinatorState::Faulted`] and is returned.
    #[tracing::instrument(
        skip_all,
        fields(source_blockchain = %self.source_blockchain),
    )]
    pub async fn run(&self, ctx: &RelayerContext) -> Result<()> {
        let key = ctx.checkpoint_key(self.source_blockchain);
        let pair = Pair {
            key,
            labels: [key.namespace.short(), key.chain_id.to_string()],
            metrics: ctx.metrics.clone(),
            state: ctx.health.register(key),
        };
        pair.set_state(CoordinatorState::Initializing);
        let mut shutdown = ctx.shutdown_signal();

        let backoff = backoff::backoff::Constant::new(Duration::from_millis(
            self.config.retry_interval,
        ));
        let pair_ref = &pair;
        let task = || async move {
            self.run_once(pair_ref).await.map_err(Error::into_backoff)
        };
        let notify = |e: Error, after: Duration| {
            tracing::warn!(
                error = %e,
                "Restarting coordinator in {}ms ...",
                after.as_millis()
            );
            pair.metrics
                .coordinator_restarts
                .with_label_values(&pair.labels())
                .inc();
            tracing::event!(
                target: probe::TARGET,
                tracing::Level::DEBUG,
                kind = %probe::Kind::Retry,
                key = %pair.key,
                error = %e,
            );
        };

        let result = tokio::select! {
            result = backoff::future::retry_notify(backoff, task, notify) => result,
            _ = shutdown.recv() => {
                tracing::info!("Coordinator shutting down");
                tracing::event!(
                    target: probe::TARGET,
                    tracing::Level::DEBUG,
                    kind = %probe::Kind::Lifecycle,
                    key = %pair.key,
                    shutdown = true,
                );
                return Ok(());
            }
        };

        if let Err(e) = &result {
            pair.set_state(CoordinatorState::Faulted);
            pair.metrics
                .coordinator_faults
                .with_label_values(&pair.labels())
                .inc();
            tracing::error!(error = %e, key = %pair.key, "Coordinator faulted");
            tracing::event!(
                target: probe::TARGET,
                tracing::Level::ERROR,
                kind = %probe::Kind::Fault,
                key = %pair.key,
                error = %e,
            );
        }
        result
    }

    async fn run_once(&self, pair: &Pair) -> Result<()> {
        pair.set_state(CoordinatorState::Initializing);
        // subscribe before reading the head, so nothing falls in between.
        let mut live = self.source.subscribe().await?;
        let head = self.source.head_height().await?;
        self.store.set_target_height(&pair.key, head)?;
        pair.set_target(head);

        let mut checkpoint = self.store.load(&pair.key)?;
        let from = match checkpoint {
            Some(p) if p == MessagePosition::end_of_block(p.height) => {
                p.height.saturating_add(1)
            }
            Some(p) => p.height,
            None => self.start_height.unwrap_or(0),
        };
        tracing::info!(
            checkpoint = ?checkpoint.map(|p| p.to_string()),
            from,
            head,
            "Starting catch-up",
        );

        pair.set_state(CoordinatorState::ReplayingHistory);
        self.replay(pair, &mut checkpoint, from, head).await?;

        let mut buffered = Vec::new();
        while let Some(item) = live.next().now_or_never().flatten() {
            buffered.push(item?);
        }
        buffered.sort_by_key(|m| m.position);
        buffered.dedup_by_key(|m| m.position);
        tracing::debug!("Draining #{} buffered live messages", buffered.len());
        for message in buffered {
            self.handle(pair, &mut checkpoint, message).await?;
        }

        pair.set_state(CoordinatorState::Live);
        let mut target = head;
        loop {
            let message = match live.next().await {
                Some(item) => item?,
                None => {
                    return Err(Error::SubscriptionClosed {
                        chain_id: self.source_blockchain.to_string(),
                    })
                }
            };
            if message.position.height > target {
                target = message.position.height;
                self.store.set_target_height(&pair.key, target)?;
                pair.set_target(target);
            }
            self.handle(pair, &mut checkpoint, message).await?;
        }
    }

    async fn replay(
        &self,
        pair: &Pair,
        checkpoint: &mut Option<MessagePosition>,
        from: u64,
        head: u64,
    ) -> Result<()> {
        let step = self.config.max_blocks_per_step.max(1);
        let print_progress_interval =
            Duration::from_millis(self.config.print_progress_interval);
        // saves the last time we printed sync progress.
        let mut instant = Instant::now();
        let mut block = from;
        while block <= head {
            let dest_block = block.saturating_add(step - 1).min(head);
            let mut found =
                self.source.messages_in_range(block, dest_block).await?;
            found.sort_by_key(|m| m.position);
            tracing::trace!("Found #{} messages", found.len());
            for message in found {
                self.handle(pair, checkpoint, message).await?;
            }

            // every message of the step is handled, move past the blocks.
            let end = MessagePosition::end_of_block(dest_block);
            if checkpoint.map_or(true, |c| c < end) {
                self.store.advance(&pair.key, end)?;
                *checkpoint = Some(end);
                pair.checkpointed(end);
            }

            if print_progress_interval != Duration::from_millis(0)
                && instant.elapsed() > print_progress_interval
            {
                let progress = if head == 0 {
                    100.0
                } else {
                    dest_block as f64 / head as f64 * 100.0
                };
                tracing::info!(
                    target_block = head,
                    currently_at = dest_block,
                    diff = head.saturating_sub(dest_block),
                    is_syncing = dest_block < head,
                    progress,
                    chain_id = %self.source_blockchain,
                );
                tracing::event!(
                    target: probe::TARGET,
                    tracing::Level::TRACE,
                    kind = %probe::Kind::Sync,
                    chain_id = %self.source_blockchain,
                    %block,
                    %dest_block,
                );
                instant = Instant::now();
            }

            block = match dest_block.checked_add(1) {
                Some(next) => next,
                None => break,
            };
        }
        Ok(())
    }

    /// Admits, delivers and checkpoints one message.
    ///
    /// Messages at or before the checkpoint were handled already and are
    /// skipped.
    async fn handle(
        &self,
        pair: &Pair,
        checkpoint: &mut Option<MessagePosition>,
        message: ObservedMessage,
    ) -> Result<()> {
        let position = message.position;
        if checkpoint.map_or(false, |c| position <= c) {
            tracing::trace!(%position, "message already handled");
            return Ok(());
        }
        let labels = pair.labels();
        pair.metrics
            .messages_observed
            .with_label_values(&labels)
            .inc();

        match self.policy.evaluate(&message) {
            Admission::Rejected(reason) => {
                pair.metrics
                    .messages_rejected
                    .with_label_values(&labels)
                    .inc();
                tracing::debug!(%position, %reason, "message rejected");
                tracing::event!(
                    target: probe::TARGET,
                    tracing::Level::DEBUG,
                    kind = %probe::Kind::Admission,
                    %position,
                    admitted = false,
                    %reason,
                );
            }
            Admission::Admitted => {
                pair.metrics
                    .messages_admitted
                    .with_label_values(&labels)
                    .inc();
                tracing::event!(
                    target: probe::TARGET,
                    tracing::Level::DEBUG,
                    kind = %probe::Kind::Admission,
                    %position,
                    admitted = true,
                );
                match self.deliver(pair, &message).await? {
                    DeliveryOutcome::Failed => {
                        pair.metrics
                            .messages_failed
                            .with_label_values(&labels)
                            .inc();
                        tracing::warn!(
                            %position,
                            destination = %message.destination_blockchain_id,
                            "message refused by its destination",
                        );
                    }
                    _ => {
                        pair.metrics
                            .messages_delivered
                            .with_label_values(&labels)
                            .inc();
                        tracing::debug!(%position, "message delivered");
                    }
                }
            }
        }

        self.store.advance(&pair.key, position)?;
        *checkpoint = Some(position);
        pair.checkpointed(position);
        Ok(())
    }

    /// Delivers `message`, retrying deferrals and transient errors up to
    /// `max-delivery-attempts` times in total.
    async fn deliver(
        &self,
        pair: &Pair,
        message: &ObservedMessage,
    ) -> Result<DeliveryOutcome> {
        let backoff = retry::ConstantWithMaxRetryCount::new(
            Duration::from_millis(self.config.retry_interval),
            self.config.max_delivery_attempts.saturating_sub(1),
        );
        let task = || async move {
            match self.pipeline.deliver(message).await {
                Ok(DeliveryOutcome::Deferred) => {
                    pair.metrics
                        .messages_deferred
                        .with_label_values(&pair.labels())
                        .inc();
                    Err(backoff::Error::transient(Error::DeliveryDeferred {
                        position: message.position.to_string(),
                    }))
                }
                Ok(outcome) => Ok(outcome),
                Err(e) => Err(e.into_backoff()),
            }
        };
        backoff::future::retry(backoff, task).await
    }
}
