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

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::watch;
use warp_relayer_store::CheckpointKey;

/// Where a catch-up coordinator is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CoordinatorState {
    /// Loading the checkpoint and the head of the source chain.
    Initializing,
    /// Replaying the messages between the checkpoint and the head.
    ReplayingHistory,
    /// Following the live feed.
    Live,
    /// Stopped on an unrecoverable error, needs an operator.
    Faulted,
}

impl CoordinatorState {
    /// Value reported by the `coordinator_state` gauge.
    pub fn as_gauge(self) -> i64 {
        match self {
            Self::Initializing => 0,
            Self::ReplayingHistory => 1,
            Self::Live => 2,
            Self::Faulted => 3,
        }
    }
}

impl std::fmt::Display for CoordinatorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Initializing => "initializing",
            Self::ReplayingHistory => "replaying-history",
            Self::Live => "live",
            Self::Faulted => "faulted",
        };
        f.write_str(s)
    }
}

/// State of one (instance, source chain) pair as reported by `/health`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PairHealth {
    /// Hex digest of the instance namespace.
    pub namespace: String,
    /// The source chain, CB58 encoded.
    pub source_blockchain: String,
    /// Current lifecycle state.
    pub state: CoordinatorState,
}

/// Lifecycle states of every coordinator of the process.
///
/// Each coordinator publishes through its own [`watch::Sender`], so a
/// coordinator that stopped keeps reporting its last state.
#[derive(Debug, Clone, Default)]
pub struct HealthRegistry {
    pairs: Arc<RwLock<BTreeMap<CheckpointKey, watch::Receiver<CoordinatorState>>>>,
}

impl HealthRegistry {
    /// Registers `key`, starting in [`CoordinatorState::Initializing`].
    ///
    /// Registering a key again replaces the previous publisher.
    pub fn register(&self, key: CheckpointKey) -> watch::Sender<CoordinatorState> {
        let (tx, rx) = watch::channel(CoordinatorState::Initializing);
        self.pairs.write().insert(key, rx);
        tx
    }

    /// Last published state of `key`.
    pub fn state(&self, key: &CheckpointKey) -> Option<CoordinatorState> {
        self.pairs.read().get(key).map(|rx| *rx.borrow())
    }

    /// A receiver that wakes on every state change of `key`.
    pub fn subscribe(
        &self,
        key: &CheckpointKey,
    ) -> Option<watch::Receiver<CoordinatorState>> {
        self.pairs.read().get(key).cloned()
    }

    /// Every registered pair, ordered by key.
    pub fn snapshot(&self) -> Vec<PairHealth> {
        self.pairs
            .read()
            .iter()
            .map(|(key, rx)| PairHealth {
                namespace: key.namespace.to_string(),
                source_blockchain: key.chain_id.to_string(),
                state: *rx.borrow(),
            })
            .collect()
    }

    /// Whether at least one pair is [`CoordinatorState::Faulted`].
    pub fn any_faulted(&self) -> bool {
        self.pairs
            .read()
            .values()
            .any(|rx| *rx.borrow() == CoordinatorState::Faulted)
    }
}
