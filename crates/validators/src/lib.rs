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

//! # Validator sets and quorum
//!
//! Resolves the weighted validator set of a subnet through the platform
//! chain API and decides whether collected attestations carry enough of
//! its stake weight.

#![deny(unsafe_code)]

/// Canonical ordering of API validator lists.
pub mod canonical;
/// Platform chain API clients.
pub mod client;
/// Quorum evaluation over a validator set.
pub mod quorum;
/// Height-aware, cached validator set resolution.
pub mod resolver;

pub use canonical::canonical_validator_set;
pub use client::{JsonRpcPlatformClient, PlatformClient, RawValidator};
pub use quorum::{
    has_quorum, signed_weight, Attestation, AttestationSet, QuorumRequirement,
};
pub use resolver::CanonicalValidatorClient;

/// A type alias for the result of validator operations.
pub type Result<T> = warp_relayer_utils::Result<T>;
