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

#![warn(missing_docs)]
//! # Relayer Context Module 🕸️
//!
//! A module for managing the context of the relayer.
use std::sync::Arc;

use tokio::sync::broadcast;

use warp_relayer_config::WarpRelayerConfig;
use warp_relayer_store::CheckpointKey;
use warp_relayer_types::{Id, InstanceNamespace};
use warp_relayer_utils::metric::Metrics;

/// Lifecycle states of the coordinators, as served by `/health`.
pub mod health;

pub use health::{CoordinatorState, HealthRegistry, PairHealth};

/// RelayerContext contains Relayer's configuration and shutdown signal.
#[derive(Clone)]
pub struct RelayerContext {
    /// The configuration of the relayer.
    pub config: WarpRelayerConfig,
    /// Broadcasts a shutdown signal to all coordinators.
    ///
    /// When a coordinator is spawned, it is passed a broadcast receiver
    /// handle. When a graceful shutdown is initiated, a `()` value is sent
    /// via the broadcast::Sender. Each coordinator receives it, reaches a
    /// safe terminal state, and completes the task.
    notify_shutdown: broadcast::Sender<()>,
    /// Represents the metrics for the relayer
    pub metrics: Arc<Metrics>,
    /// Lifecycle state of every coordinator.
    pub health: HealthRegistry,
    namespace: InstanceNamespace,
}

impl RelayerContext {
    /// Creates a new RelayerContext.
    pub fn new(config: WarpRelayerConfig) -> warp_relayer_utils::Result<Self> {
        let (notify_shutdown, _) = broadcast::channel(2);
        let metrics = Arc::new(Metrics::new()?);
        let namespace = config.instance_namespace();
        tracing::debug!(namespace = %namespace, "relayer context created");
        Ok(Self {
            config,
            notify_shutdown,
            metrics,
            health: HealthRegistry::default(),
            namespace,
        })
    }

    /// The checkpoint namespace of this instance.
    pub fn namespace(&self) -> InstanceNamespace {
        self.namespace
    }

    /// The checkpoint key of `source_blockchain` for this instance.
    pub fn checkpoint_key(&self, source_blockchain: Id) -> CheckpointKey {
        CheckpointKey::new(self.namespace, source_blockchain)
    }

    /// Returns a broadcast receiver handle for the shutdown signal.
    pub fn shutdown_signal(&self) -> Shutdown {
        Shutdown::new(self.notify_shutdown.subscribe())
    }

    /// Sends a shutdown signal to all subscribed tasks/connections.
    pub fn shutdown(&self) {
        let _ = self.notify_shutdown.send(());
    }
}

impl std::fmt::Debug for RelayerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayerContext")
            .field("namespace", &self.namespace)
            .field("health", &self.health)
            .finish_non_exhaustive()
    }
}

/// Listens for the server shutdown signal.
///
/// Shutdown is signalled using a `broadcast::Receiver`. Only a single value is
/// ever sent. Once a value has been sent via the broadcast channel, the server
/// should shutdown.
///
/// The `Shutdown` struct listens for the signal and tracks that the signal has
/// been received. Callers may query for whether the shutdown signal has been
/// received or not.
#[derive(Debug)]
pub struct Shutdown {
    /// `true` if the shutdown signal has been received
    shutdown: bool,

    /// The receive half of the channel used to listen for shutdown.
    notify: broadcast::Receiver<()>,
}

impl Shutdown {
    /// Create a new `Shutdown` backed by the given `broadcast::Receiver`.
    pub fn new(notify: broadcast::Receiver<()>) -> Shutdown {
        Shutdown {
            shutdown: false,
            notify,
        }
    }

    /// Returns `true` if the shutdown signal has been received.
    pub fn is_shutdown(&self) -> bool {
        self.shutdown
    }

    /// Receive the shutdown notice, waiting if necessary.
    pub async fn recv(&mut self) {
        // If the shutdown signal has already been received, then return
        // immediately.
        if self.shutdown {
            return;
        }

        // Cannot receive a "lag error" as only one value is ever sent.
        let _ = self.notify.recv().await;

        // Remember that the signal has been received.
        self.shutdown = true;
    }
}
