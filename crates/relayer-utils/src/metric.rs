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

use prometheus::{
    Encoder, Gauge, GaugeVec, IntCounterVec, IntGaugeVec, Opts, Registry,
    TextEncoder,
};

/// Labels attached to every metric that belongs to a single coordinator.
pub const PAIR_LABELS: [&str; 2] = ["namespace", "source_blockchain"];

/// A struct definition for collecting metrics in the relayer.
///
/// Every instance owns its own [`Registry`], so several relayer instances
/// (or tests) living in one process never collide on registration.
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    /// Messages seen on a source chain, admitted or not.
    pub messages_observed: IntCounterVec,
    /// Messages that passed the allow-lists.
    pub messages_admitted: IntCounterVec,
    /// Messages rejected by the allow-lists.
    pub messages_rejected: IntCounterVec,
    /// Messages the destination accepted.
    pub messages_delivered: IntCounterVec,
    /// Messages the destination refused for good.
    pub messages_failed: IntCounterVec,
    /// Delivery attempts that ended without quorum.
    pub messages_deferred: IntCounterVec,
    /// Durable checkpoint writes.
    pub checkpoint_advances: IntCounterVec,
    /// Coordinators that moved to the faulted state.
    pub coordinator_faults: IntCounterVec,
    /// Coordinator restarts after a transient failure.
    pub coordinator_restarts: IntCounterVec,
    /// Current coordinator state, see `CoordinatorState::as_gauge`.
    pub coordinator_state: IntGaugeVec,
    /// Chain head the coordinator is catching up to.
    pub target_height: IntGaugeVec,
    /// Height of the last durable checkpoint.
    pub checkpoint_height: IntGaugeVec,
    /// Latency of calling the P-chain API in milliseconds.
    pub p_chain_api_call_latency_ms: GaugeVec,
    /// Total amount of data stored metric
    pub total_amount_of_data_stored: Gauge,
}

impl Metrics {
    /// Instantiates the various metrics and registers them on a fresh registry.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry =
            Registry::new_custom(Some(String::from("warp_relayer")), None)?;

        let messages_observed = counter_vec(
            &registry,
            "messages_observed",
            "Number of messages observed on the source chain",
        )?;
        let messages_admitted = counter_vec(
            &registry,
            "messages_admitted",
            "Number of messages admitted by the allow-lists",
        )?;
        let messages_rejected = counter_vec(
            &registry,
            "messages_rejected",
            "Number of messages rejected by the allow-lists",
        )?;
        let messages_delivered = counter_vec(
            &registry,
            "messages_delivered",
            "Number of messages delivered to their destination",
        )?;
        let messages_failed = counter_vec(
            &registry,
            "messages_failed",
            "Number of messages permanently refused by their destination",
        )?;
        let messages_deferred = counter_vec(
            &registry,
            "messages_deferred",
            "Number of delivery attempts that ended without quorum",
        )?;
        let checkpoint_advances = counter_vec(
            &registry,
            "checkpoint_advances",
            "Number of durable checkpoint writes",
        )?;
        let coordinator_faults = counter_vec(
            &registry,
            "coordinator_faults",
            "Number of times a coordinator moved to the faulted state",
        )?;
        let coordinator_restarts = counter_vec(
            &registry,
            "coordinator_restarts",
            "Number of times a coordinator restarted after a transient error",
        )?;
        let coordinator_state = gauge_vec(
            &registry,
            "coordinator_state",
            "0 initializing, 1 replaying history, 2 live, 3 faulted",
        )?;
        let target_height = gauge_vec(
            &registry,
            "catch_up_target_height",
            "Chain head the coordinator is catching up to",
        )?;
        let checkpoint_height = gauge_vec(
            &registry,
            "checkpoint_height",
            "Height of the last durable checkpoint",
        )?;

        let p_chain_api_call_latency_ms = GaugeVec::new(
            Opts::new(
                "p_chain_api_call_latency_ms",
                "Latency of calling p-chain rpc in milliseconds",
            ),
            &["p_chain_api_base_url"],
        )?;
        registry.register(Box::new(p_chain_api_call_latency_ms.clone()))?;

        let total_amount_of_data_stored = Gauge::new(
            "total_amount_of_data_stored",
            "The Total number of data stored",
        )?;
        registry.register(Box::new(total_amount_of_data_stored.clone()))?;

        Ok(Self {
            registry,
            messages_observed,
            messages_admitted,
            messages_rejected,
            messages_delivered,
            messages_failed,
            messages_deferred,
            checkpoint_advances,
            coordinator_faults,
            coordinator_restarts,
            coordinator_state,
            target_height,
            checkpoint_height,
            p_chain_api_call_latency_ms,
            total_amount_of_data_stored,
        })
    }

    /// Gathers the whole relayer metrics in the prometheus text format.
    pub fn gather(&self) -> Result<String, GatherMetricsError> {
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics").finish_non_exhaustive()
    }
}

fn counter_vec(
    registry: &Registry,
    name: &str,
    help: &str,
) -> Result<IntCounterVec, prometheus::Error> {
    let counter = IntCounterVec::new(Opts::new(name, help), &PAIR_LABELS)?;
    registry.register(Box::new(counter.clone()))?;
    Ok(counter)
}

fn gauge_vec(
    registry: &Registry,
    name: &str,
    help: &str,
) -> Result<IntGaugeVec, prometheus::Error> {
    let gauge = IntGaugeVec::new(Opts::new(name, help), &PAIR_LABELS)?;
    registry.register(Box::new(gauge.clone()))?;
    Ok(gauge)
}

/// Errors raised while rendering the metrics.
#[derive(Debug, thiserror::Error)]
pub enum GatherMetricsError {
    /// Prometheus encoding error.
    #[error(transparent)]
    PrometheusError(#[from] prometheus::Error),
    /// The encoder produced invalid UTF-8.
    #[error(transparent)]
    FromUtf8Error(#[from] std::string::FromUtf8Error),
}
