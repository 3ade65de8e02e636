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

//! # Relayer Configuration Module 🕸️
//!
//! A module for configuring the relayer.
//!
//! ## Overview
//!
//! Possible configuration include:
//! * `api-port`: The port of the health and metrics API. Defaults to 8080
//! * `p-chain-api`: Where to query validator sets from.
//! * `source-blockchains`: The chains to watch, with the origin senders
//!   accepted on each of them.
//! * `destination-blockchains`: The chains to deliver to, with the
//!   receivers accepted on each of them.
//!
//! Every `*.toml` and `*.json` file of the config directory is merged, and
//! environment variables prefixed with `WARP_` override them, using `__` to
//! reach nested keys (`WARP_CATCH_UP__MAX_BLOCKS_PER_STEP=50`).

/// Default values of optional settings
pub mod defaults;
/// Logger, config directory and store setup
pub mod setup;
/// Utils for processing configuration
pub mod utils;

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use warp_relayer_admission::{AdmissionPolicy, AllowList};
use warp_relayer_types::rpc_url::RpcUrl;
use warp_relayer_types::{Address, Id, InstanceNamespace};

/// WarpRelayerConfig is the configuration for the warp relayer.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct WarpRelayerConfig {
    /// Directory of the checkpoint database.
    ///
    /// defaults to the local data directory of the OS.
    #[serde(default, alias = "storage_location")]
    pub storage_location: Option<PathBuf>,
    /// How checkpoints are kept in `storage-location`.
    ///
    /// defaults to `file`, which several relayer processes may share.
    #[serde(default, alias = "storage_engine")]
    pub storage_engine: StorageEngine,
    /// The P-chain API used to resolve validator sets.
    #[serde(alias = "p_chain_api")]
    pub p_chain_api: PChainApiConfig,
    /// Share of the total stake weight, in percent, that must attest a
    /// message before it is delivered.
    ///
    /// default to 67
    #[serde(
        default = "defaults::quorum_percentage",
        alias = "quorum_percentage"
    )]
    pub quorum_percentage: u64,
    /// Catch-up and retry tuning.
    #[serde(default, alias = "catch_up")]
    pub catch_up: CatchUpConfig,
    /// Signature collection tuning.
    #[serde(default, alias = "signature_collection")]
    pub signature_collection: SignatureCollectionConfig,
    /// The chains this instance watches.
    #[serde(default, alias = "source_blockchains")]
    pub source_blockchains: Vec<SourceBlockchainConfig>,
    /// The chains this instance delivers to.
    #[serde(default, alias = "destination_blockchains")]
    pub destination_blockchains: Vec<DestinationBlockchainConfig>,
    /// Health and metrics API port number
    ///
    /// default to 8080
    #[serde(default = "defaults::api_port", alias = "api_port")]
    pub api_port: u16,
}

impl WarpRelayerConfig {
    /// The admission policy described by the enabled chains.
    pub fn admission_policy(&self) -> AdmissionPolicy {
        let policy = self.source_blockchains.iter().fold(
            AdmissionPolicy::new(),
            |policy, source| {
                policy.with_source(
                    source.blockchain_id,
                    AllowList::from_addresses(
                        source.allowed_origin_sender_addresses.iter().copied(),
                    ),
                )
            },
        );
        self.destination_blockchains
            .iter()
            .fold(policy, |policy, destination| {
                policy.with_destination(
                    destination.blockchain_id,
                    AllowList::from_addresses(
                        destination
                            .allowed_destination_addresses
                            .iter()
                            .copied(),
                    ),
                )
            })
    }

    /// The checkpoint namespace of this instance.
    pub fn instance_namespace(&self) -> InstanceNamespace {
        self.admission_policy().namespace()
    }

    /// Looks up a source chain by id.
    pub fn source(&self, blockchain_id: &Id) -> Option<&SourceBlockchainConfig> {
        self.source_blockchains
            .iter()
            .find(|s| &s.blockchain_id == blockchain_id)
    }

    /// Looks up a destination chain by id.
    pub fn destination(
        &self,
        blockchain_id: &Id,
    ) -> Option<&DestinationBlockchainConfig> {
        self.destination_blockchains
            .iter()
            .find(|d| &d.blockchain_id == blockchain_id)
    }
}

/// PChainApiConfig is the configuration of the platform chain API.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct PChainApiConfig {
    /// Base url of the node, without the `/ext/bc/P` suffix.
    /// It can be an env var, written as `$NAME`.
    #[serde(alias = "base_url")]
    pub base_url: RpcUrl,
    /// Query parameters appended to every call.
    #[serde(default, alias = "query_parameters")]
    pub query_parameters: HashMap<String, String>,
    /// HTTP headers sent with every call.
    #[serde(default, alias = "http_headers", skip_serializing)]
    pub http_headers: HashMap<String, String>,
}

/// CatchUpConfig is the configuration of the catch-up coordinators.
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct CatchUpConfig {
    /// The maximum number of blocks fetched in one replay step.
    #[serde(
        default = "defaults::max_blocks_per_step",
        alias = "max_blocks_per_step"
    )]
    pub max_blocks_per_step: u64,
    /// Polling interval of the live feed in milliseconds.
    #[serde(
        default = "defaults::polling_interval",
        alias = "polling_interval"
    )]
    pub polling_interval: u64,
    /// print sync progress frequency in milliseconds
    /// if it is zero, means no progress will be printed.
    #[serde(
        default = "defaults::print_progress_interval",
        alias = "print_progress_interval"
    )]
    pub print_progress_interval: u64,
    /// Pause between two attempts of a failed step, in milliseconds.
    #[serde(default = "defaults::retry_interval", alias = "retry_interval")]
    pub retry_interval: u64,
    /// Delivery attempts of one message before the coordinator restarts.
    #[serde(
        default = "defaults::max_delivery_attempts",
        alias = "max_delivery_attempts"
    )]
    pub max_delivery_attempts: usize,
}

impl Default for CatchUpConfig {
    fn default() -> Self {
        Self {
            max_blocks_per_step: defaults::max_blocks_per_step(),
            polling_interval: defaults::polling_interval(),
            print_progress_interval: defaults::print_progress_interval(),
            retry_interval: defaults::retry_interval(),
            max_delivery_attempts: defaults::max_delivery_attempts(),
        }
    }
}

/// SignatureCollectionConfig bounds one attempt at gathering attestations.
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct SignatureCollectionConfig {
    /// Request rounds before the delivery is deferred.
    #[serde(
        default = "defaults::max_collection_rounds",
        alias = "max_collection_rounds"
    )]
    pub max_collection_rounds: u32,
    /// Pause between two rounds, in milliseconds.
    #[serde(
        default = "defaults::collection_round_interval",
        alias = "round_interval"
    )]
    pub round_interval: u64,
}

impl Default for SignatureCollectionConfig {
    fn default() -> Self {
        Self {
            max_collection_rounds: defaults::max_collection_rounds(),
            round_interval: defaults::collection_round_interval(),
        }
    }
}

/// The engine backing the checkpoint store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum StorageEngine {
    /// One file per record, guarded by advisory locks. Any number of
    /// relayer processes can point at the same location.
    #[default]
    File,
    /// A sled database. Only one process at a time can open it.
    Sled,
}

/// SourceBlockchainConfig describes a watched chain.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct SourceBlockchainConfig {
    /// The chain id, in cb58 or `0x` hex.
    pub blockchain_id: Id,
    /// The subnet validating the chain. Resolved through the P-chain when
    /// omitted.
    #[serde(default)]
    pub subnet_id: Option<Id>,
    /// Origin senders whose messages are relayed. Empty means any sender.
    #[serde(default)]
    pub allowed_origin_sender_addresses: Vec<Address>,
    /// Replay starts here when the chain has no checkpoint yet.
    #[serde(default)]
    pub process_historical_blocks_from_height: Option<u64>,
    /// if it is enabled for this chain or not.
    #[serde(default = "defaults::enabled")]
    pub enabled: bool,
}

/// DestinationBlockchainConfig describes a chain messages are delivered to.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct DestinationBlockchainConfig {
    /// The chain id, in cb58 or `0x` hex.
    pub blockchain_id: Id,
    /// The subnet validating the chain.
    #[serde(default)]
    pub subnet_id: Option<Id>,
    /// Receivers messages may be delivered to. Empty means any receiver.
    #[serde(default)]
    pub allowed_destination_addresses: Vec<Address>,
    /// if it is enabled for this chain or not.
    #[serde(default = "defaults::enabled")]
    pub enabled: bool,
}
