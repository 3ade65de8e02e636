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

use std::collections::{BTreeMap, BTreeSet};

use warp_relayer_types::{NodeId, ValidatorSet};
use warp_relayer_utils::Error;

/// Share of the total stake weight that has to attest a message.
///
/// Stored as the fraction `numerator / denominator` with
/// `0 < numerator <= denominator`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuorumRequirement {
    numerator: u64,
    denominator: u64,
}

impl QuorumRequirement {
    /// Creates the requirement `numerator / denominator`.
    pub fn new(numerator: u64, denominator: u64) -> crate::Result<Self> {
        if numerator == 0 || denominator == 0 || numerator > denominator {
            return Err(Error::InvalidConfig(format!(
                "quorum fraction must be in (0, 1], got {numerator}/{denominator}"
            )));
        }
        Ok(Self {
            numerator,
            denominator,
        })
    }

    /// Creates the requirement from an integer percentage, `67` being 67%.
    pub fn from_percentage(percentage: u64) -> crate::Result<Self> {
        Self::new(percentage, 100)
    }

    /// Numerator of the required fraction of total weight.
    pub fn numerator(&self) -> u64 {
        self.numerator
    }

    /// Denominator of the required fraction, never zero.
    pub fn denominator(&self) -> u64 {
        self.denominator
    }

    /// Whether `signed_weight` out of `total_weight` meets the requirement.
    pub fn is_met(&self, signed_weight: u64, total_weight: u64) -> bool {
        u128::from(signed_weight) * u128::from(self.denominator)
            >= u128::from(total_weight) * u128::from(self.numerator)
    }
}

/// A validator's endorsement of one message, opaque to the relayer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attestation(pub Vec<u8>);

/// Attestations gathered during one aggregation attempt, by signer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttestationSet {
    inner: BTreeMap<NodeId, Attestation>,
}

impl AttestationSet {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `attestation` from `node`.
    ///
    /// Signers outside `set` are refused with [`Error::UnknownValidator`]
    /// and leave the collection untouched. A repeated signer replaces its
    /// earlier attestation.
    pub fn accept(
        &mut self,
        set: &ValidatorSet,
        node: NodeId,
        attestation: Attestation,
    ) -> crate::Result<()> {
        if set.member(&node).is_none() {
            return Err(Error::UnknownValidator {
                node_id: node.to_string(),
            });
        }
        self.inner.insert(node, attestation);
        Ok(())
    }

    /// The attestation recorded for `node`, if it signed.
    pub fn get(&self, node: &NodeId) -> Option<&Attestation> {
        self.inner.get(node)
    }

    /// Signers in ascending order.
    pub fn signers(&self) -> impl Iterator<Item = &NodeId> {
        self.inner.keys()
    }

    /// Signers with their attestations, in ascending signer order.
    pub fn iter(&self) -> impl Iterator<Item = (&NodeId, &Attestation)> {
        self.inner.iter()
    }

    /// Number of distinct signers.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Whether nobody has signed yet.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

/// Stake weight of the members of `set` that signed.
///
/// Signers that are not members are ignored. A member backed by several
/// nodes counts once no matter how many of its nodes signed.
pub fn signed_weight<'a, I>(set: &ValidatorSet, signers: I) -> u64
where
    I: IntoIterator<Item = &'a NodeId>,
{
    let members: BTreeSet<usize> = signers
        .into_iter()
        .filter_map(|node| set.index_of(node))
        .collect();
    // bounded by the set's total weight, which fits in a u64.
    members
        .into_iter()
        .map(|i| set.validators()[i].weight)
        .sum()
}

/// Whether the attestations collected so far reach `requirement` of the
/// total weight of `set`. Reaching the threshold exactly counts.
pub fn has_quorum(
    set: &ValidatorSet,
    attestations: &AttestationSet,
    requirement: QuorumRequirement,
) -> bool {
    let weight = signed_weight(set, attestations.signers());
    requirement.is_met(weight, set.total_weight())
}
