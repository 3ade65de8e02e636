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

use warp_relayer_types::{
    Id, NodeId, PublicKey, Validator, ValidatorSet, ValidatorSetHeight,
};
use warp_relayer_utils::Error;

use crate::client::RawValidator;

/// Turns the validators reported by the API into a canonical set.
///
/// Nodes without a public key cannot attest and are left out. Nodes sharing
/// a public key become one member holding their summed weight. Members are
/// ordered by public key, so the same input always yields the same set no
/// matter the order the API listed it in.
pub fn canonical_validator_set(
    subnet_id: Id,
    height: ValidatorSetHeight,
    raw: Vec<RawValidator>,
) -> crate::Result<ValidatorSet> {
    let overflow = || Error::WeightOverflow {
        subnet_id: subnet_id.to_string(),
    };
    let mut by_key: BTreeMap<PublicKey, (u64, Vec<NodeId>)> = BTreeMap::new();
    for v in raw {
        let Some(public_key) = v.public_key else {
            tracing::trace!(node_id = %v.node_id, "skipping validator without public key");
            continue;
        };
        let entry = by_key.entry(public_key).or_default();
        entry.0 = entry.0.checked_add(v.weight).ok_or_else(overflow)?;
        entry.1.push(v.node_id);
    }
    let validators = by_key
        .into_iter()
        .map(|(public_key, (weight, mut node_ids))| {
            node_ids.sort();
            node_ids.dedup();
            Validator {
                public_key,
                weight,
                node_ids,
            }
        })
        .collect();
    ValidatorSet::new(subnet_id, height, validators)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(node: u8, key: Option<u8>, weight: u64) -> RawValidator {
        RawValidator {
            node_id: NodeId::new([node; 20]),
            public_key: key.map(|k| PublicKey::new([k; PublicKey::LEN])),
            weight,
        }
    }

    #[test]
    fn order_does_not_depend_on_input_order() {
        let input = vec![raw(1, Some(9), 10), raw(2, Some(3), 20), raw(3, Some(5), 30)];
        let mut reversed = input.clone();
        reversed.reverse();
        let a = canonical_validator_set(Id::EMPTY, ValidatorSetHeight::At(1), input)
            .unwrap();
        let b =
            canonical_validator_set(Id::EMPTY, ValidatorSetHeight::At(1), reversed)
                .unwrap();
        assert_eq!(a, b);
        let keys: Vec<u8> =
            a.validators().iter().map(|v| v.public_key.as_bytes()[0]).collect();
        assert_eq!(keys, vec![3, 5, 9]);
        assert_eq!(a.total_weight(), 60);
    }

    #[test]
    fn shared_keys_are_merged_and_keyless_nodes_dropped() {
        let set = canonical_validator_set(
            Id::EMPTY,
            ValidatorSetHeight::Proposed,
            vec![raw(4, Some(1), 10), raw(2, Some(1), 15), raw(3, None, 100)],
        )
        .unwrap();
        assert_eq!(set.len(), 1);
        assert_eq!(set.total_weight(), 25);
        let member = &set.validators()[0];
        assert_eq!(member.node_id(), Some(&NodeId::new([2; 20])));
        assert!(member.has_node(&NodeId::new([4; 20])));
        assert!(set.member(&NodeId::new([3; 20])).is_none());
    }

    #[test]
    fn subnet_without_keys_is_empty() {
        let err = canonical_validator_set(
            Id::EMPTY,
            ValidatorSetHeight::Proposed,
            vec![raw(1, None, 10)],
        )
        .unwrap_err();
        assert!(matches!(err, Error::EmptySubnet { .. }));
    }

    #[test]
    fn merged_weight_overflow_is_detected() {
        let err = canonical_validator_set(
            Id::EMPTY,
            ValidatorSetHeight::Proposed,
            vec![raw(1, Some(1), u64::MAX), raw(2, Some(1), 1)],
        )
        .unwrap_err();
        assert!(matches!(err, Error::WeightOverflow { .. }));
    }
}
