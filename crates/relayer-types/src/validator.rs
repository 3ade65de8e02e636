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

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use warp_relayer_utils::Error;

use crate::{Id, NodeId};

/// A compressed BLS public key used by a validator to attest messages.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PublicKey([u8; PublicKey::LEN]);

impl PublicKey {
    /// Size of a compressed key.
    pub const LEN: usize = 48;

    /// Wraps the raw compressed key.
    pub const fn new(bytes: [u8; Self::LEN]) -> Self {
        Self(bytes)
    }

    /// The raw compressed key.
    pub fn as_bytes(&self) -> &[u8; Self::LEN] {
        &self.0
    }
}

impl std::fmt::Display for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl std::fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PublicKey(0x{}..)", hex::encode(&self.0[..4]))
    }
}

impl FromStr for PublicKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = hex::decode(s.trim().trim_start_matches("0x"))
            .map_err(|e| Error::InvalidId(format!("public key {s}: {e}")))?;
        <[u8; Self::LEN]>::try_from(raw.as_slice())
            .map(Self)
            .map_err(|_| {
                Error::InvalidId(format!(
                    "public key {s}: expected {} bytes but got {}",
                    Self::LEN,
                    raw.len()
                ))
            })
    }
}

impl Serialize for PublicKey {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        value.parse().map_err(serde::de::Error::custom)
    }
}

/// One member of a canonical validator set.
///
/// Nodes that registered the same public key act as a single signer, so a
/// member may carry more than one node id. They are kept sorted and the
/// first one names the member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Validator {
    /// Key used to verify this member's attestations.
    pub public_key: PublicKey,
    /// Stake weight backing the key.
    pub weight: u64,
    /// Every node that registered `public_key`, ascending.
    pub node_ids: Vec<NodeId>,
}

impl Validator {
    /// The node naming this member.
    pub fn node_id(&self) -> Option<&NodeId> {
        self.node_ids.first()
    }

    /// Whether `node` is one of the nodes behind this member.
    pub fn has_node(&self, node: &NodeId) -> bool {
        self.node_ids.binary_search(node).is_ok()
    }
}

/// The P-chain height a validator set was resolved at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ValidatorSetHeight {
    /// The set as of a concrete height. Immutable and cacheable.
    At(u64),
    /// The set at the most recently proposed height.
    Proposed,
    /// The live set, returned when the requested height could not be honoured.
    Current,
}

impl ValidatorSetHeight {
    /// Whether the set is pinned to a concrete height.
    pub fn is_concrete(&self) -> bool {
        matches!(self, Self::At(_))
    }
}

impl std::fmt::Display for ValidatorSetHeight {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::At(h) => write!(f, "{h}"),
            Self::Proposed => f.write_str("proposed"),
            Self::Current => f.write_str("current"),
        }
    }
}

/// An ordered, weighted set of validators of one subnet.
///
/// The members and the total weight are fixed at construction, so the
/// total always equals the sum of member weights.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidatorSet {
    subnet_id: Id,
    height: ValidatorSetHeight,
    validators: Vec<Validator>,
    total_weight: u64,
}

impl ValidatorSet {
    /// Builds a set from members that are already in canonical order.
    ///
    /// Fails with [`Error::EmptySubnet`] when there is no member with a
    /// positive weight and with [`Error::WeightOverflow`] when the weights
    /// do not fit in a `u64`.
    pub fn new(
        subnet_id: Id,
        height: ValidatorSetHeight,
        validators: Vec<Validator>,
    ) -> Result<Self, Error> {
        let total_weight = validators
            .iter()
            .try_fold(0u64, |acc, v| acc.checked_add(v.weight))
            .ok_or_else(|| Error::WeightOverflow {
                subnet_id: subnet_id.to_string(),
            })?;
        if total_weight == 0 {
            return Err(Error::EmptySubnet {
                subnet_id: subnet_id.to_string(),
            });
        }
        Ok(Self {
            subnet_id,
            height,
            validators,
            total_weight,
        })
    }

    /// The subnet these validators validate.
    pub fn subnet_id(&self) -> Id {
        self.subnet_id
    }

    /// The height the set was resolved at.
    pub fn height(&self) -> ValidatorSetHeight {
        self.height
    }

    /// Members in canonical order.
    pub fn validators(&self) -> &[Validator] {
        &self.validators
    }

    /// Sum of all member weights.
    pub fn total_weight(&self) -> u64 {
        self.total_weight
    }

    /// Number of members.
    pub fn len(&self) -> usize {
        self.validators.len()
    }

    /// Whether the set has no members.
    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }

    /// Canonical index of the member that `node` belongs to.
    pub fn index_of(&self, node: &NodeId) -> Option<usize> {
        self.validators.iter().position(|v| v.has_node(node))
    }

    /// The member that `node` belongs to.
    pub fn member(&self, node: &NodeId) -> Option<&Validator> {
        self.index_of(node).map(|i| &self.validators[i])
    }

    /// Re-labels the set, keeping its members.
    pub fn with_height(mut self, height: ValidatorSetHeight) -> Self {
        self.height = height;
        self
    }
}
