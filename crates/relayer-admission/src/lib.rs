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

//! # Admission Filter
//!
//! Decides whether a relayer instance may relay an observed message, based
//! only on its routing configuration: which source chains it watches and
//! which origin senders it accepts there, and which destination chains and
//! receivers it delivers to.
//!
//! A rejection is a normal outcome, not an error. The caller still records
//! the message as handled so that a disallowed message never blocks the
//! messages behind it.

use std::collections::{BTreeMap, BTreeSet};

use sha3::{Digest, Keccak256};
use warp_relayer_types::{Address, Id, InstanceNamespace, ObservedMessage};

/// The set of addresses accepted on one side of a route.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum AllowList {
    /// Every address is accepted.
    #[default]
    Any,
    /// Only the listed addresses are accepted.
    Only(BTreeSet<Address>),
}

impl AllowList {
    /// An empty configuration list means "no restriction".
    pub fn from_addresses<I>(addresses: I) -> Self
    where
        I: IntoIterator<Item = Address>,
    {
        let set: BTreeSet<_> = addresses.into_iter().collect();
        if set.is_empty() {
            Self::Any
        } else {
            Self::Only(set)
        }
    }

    /// Whether `address` is accepted.
    pub fn allows(&self, address: &Address) -> bool {
        match self {
            Self::Any => true,
            Self::Only(set) => set.contains(address),
        }
    }

    fn encode_into(&self, hasher: &mut Keccak256) {
        match self {
            Self::Any => hasher.update([0u8]),
            Self::Only(set) => {
                hasher.update([1u8]);
                hasher.update((set.len() as u64).to_be_bytes());
                for address in set {
                    hasher.update(address.as_bytes());
                }
            }
        }
    }
}

/// Why a message was not admitted. Both sides are checked independently,
/// so a message may fail on either or on both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rejection {
    /// The source chain is not watched by this instance.
    pub unknown_source: bool,
    /// The origin sender is not in the source allow-list.
    pub sender_not_allowed: bool,
    /// The destination chain is not served by this instance.
    pub unknown_destination: bool,
    /// The receiver is not in the destination allow-list.
    pub destination_not_allowed: bool,
}

impl Rejection {
    /// Rejected because of the source side.
    pub fn on_source(&self) -> bool {
        self.unknown_source || self.sender_not_allowed
    }

    /// Rejected because of the destination side.
    pub fn on_destination(&self) -> bool {
        self.unknown_destination || self.destination_not_allowed
    }

    fn is_rejected(&self) -> bool {
        self.on_source() || self.on_destination()
    }
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let reasons = [
            (self.unknown_source, "unknown source chain"),
            (self.sender_not_allowed, "origin sender not allowed"),
            (self.unknown_destination, "unknown destination chain"),
            (self.destination_not_allowed, "destination address not allowed"),
        ];
        let mut first = true;
        for (_, reason) in reasons.iter().filter(|(hit, _)| *hit) {
            if !first {
                f.write_str(", ")?;
            }
            f.write_str(reason)?;
            first = false;
        }
        Ok(())
    }
}

/// The outcome of [`AdmissionPolicy::evaluate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The message may be relayed by this instance.
    Admitted,
    /// The message must be skipped by this instance.
    Rejected(Rejection),
}

impl Admission {
    /// Whether the message was admitted.
    pub fn is_admitted(&self) -> bool {
        matches!(self, Self::Admitted)
    }
}

/// Routing configuration of one relayer instance. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AdmissionPolicy {
    sources: BTreeMap<Id, AllowList>,
    destinations: BTreeMap<Id, AllowList>,
}

impl AdmissionPolicy {
    /// Creates an empty policy that admits nothing.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a watched source chain and the origin senders accepted on it.
    pub fn with_source(mut self, chain: Id, senders: AllowList) -> Self {
        self.sources.insert(chain, senders);
        self
    }

    /// Adds a served destination chain and the receivers accepted on it.
    pub fn with_destination(mut self, chain: Id, receivers: AllowList) -> Self {
        self.destinations.insert(chain, receivers);
        self
    }

    /// Watched source chains, ascending.
    pub fn source_chains(&self) -> impl Iterator<Item = &Id> {
        self.sources.keys()
    }

    /// Served destination chains, ascending.
    pub fn destination_chains(&self) -> impl Iterator<Item = &Id> {
        self.destinations.keys()
    }

    /// Checks both sides of the route of `message`.
    pub fn evaluate(&self, message: &ObservedMessage) -> Admission {
        let mut rejection = Rejection::default();
        match self.sources.get(&message.source_blockchain_id) {
            None => rejection.unknown_source = true,
            Some(list) => {
                rejection.sender_not_allowed =
                    !list.allows(&message.origin_sender_address)
            }
        }
        match self.destinations.get(&message.destination_blockchain_id) {
            None => rejection.unknown_destination = true,
            Some(list) => {
                rejection.destination_not_allowed =
                    !list.allows(&message.destination_address)
            }
        }
        if rejection.is_rejected() {
            Admission::Rejected(rejection)
        } else {
            Admission::Admitted
        }
    }

    /// Shorthand for `evaluate(message).is_admitted()`.
    pub fn is_admitted(&self, message: &ObservedMessage) -> bool {
        self.evaluate(message).is_admitted()
    }

    /// Derives the checkpoint namespace of this instance.
    ///
    /// The digest covers every route and allow-list in a canonical order, so
    /// it is stable across restarts and config file reordering, and differs
    /// for any two policies that admit different traffic.
    pub fn namespace(&self) -> InstanceNamespace {
        let mut hasher = Keccak256::new();
        hasher.update(b"warp-relayer/namespace/v1");
        for (tag, routes) in [(b's', &self.sources), (b'd', &self.destinations)]
        {
            hasher.update([tag]);
            hasher.update((routes.len() as u64).to_be_bytes());
            for (chain, list) in routes {
                hasher.update(chain.as_bytes());
                list.encode_into(&mut hasher);
            }
        }
        InstanceNamespace::new(hasher.finalize().into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warp_relayer_types::MessagePosition;

    fn chain(seed: u8) -> Id {
        Id::new([seed; 32])
    }

    fn addr(seed: u8) -> Address {
        Address::new([seed; 20])
    }

    fn message(sender: Address, receiver: Address) -> ObservedMessage {
        ObservedMessage {
            source_blockchain_id: chain(1),
            origin_sender_address: sender,
            destination_blockchain_id: chain(2),
            destination_address: receiver,
            position: MessagePosition::new(1, 0),
            payload: vec![],
        }
    }

    #[test]
    fn explicit_sender_list_rejects_outsiders() {
        let aaa = addr(0xaa);
        let bbb = addr(0xbb);
        let policy = AdmissionPolicy::new()
            .with_source(chain(1), AllowList::from_addresses([aaa]))
            .with_destination(chain(2), AllowList::Any);

        let rejected = policy.evaluate(&message(bbb, addr(1)));
        match rejected {
            Admission::Rejected(r) => {
                assert!(r.sender_not_allowed);
                assert!(!r.on_destination());
            }
            Admission::Admitted => panic!("0xbbb must be rejected"),
        }
        assert!(policy.is_admitted(&message(aaa, addr(1))));
    }

    #[test]
    fn explicit_destination_list_rejects_outsiders() {
        let policy = AdmissionPolicy::new()
            .with_source(chain(1), AllowList::Any)
            .with_destination(chain(2), AllowList::from_addresses([addr(7)]));
        assert!(policy.is_admitted(&message(addr(3), addr(7))));
        let Admission::Rejected(r) = policy.evaluate(&message(addr(3), addr(8)))
        else {
            panic!("receiver 8 must be rejected");
        };
        assert!(r.destination_not_allowed && !r.on_source());
    }

    #[test]
    fn both_sides_are_reported() {
        let policy = AdmissionPolicy::new()
            .with_source(chain(1), AllowList::from_addresses([addr(1)]))
            .with_destination(chain(2), AllowList::from_addresses([addr(2)]));
        let Admission::Rejected(r) = policy.evaluate(&message(addr(9), addr(9)))
        else {
            panic!("must be rejected");
        };
        assert!(r.on_source() && r.on_destination());
        assert_eq!(
            r.to_string(),
            "origin sender not allowed, destination address not allowed"
        );
    }

    #[test]
    fn unknown_chains_are_rejected() {
        let policy =
            AdmissionPolicy::new().with_source(chain(1), AllowList::Any);
        let Admission::Rejected(r) = policy.evaluate(&message(addr(1), addr(1)))
        else {
            panic!("destination chain is not served");
        };
        assert!(r.unknown_destination);
        assert!(!r.unknown_source);
    }

    #[test]
    fn empty_list_is_a_wildcard() {
        assert_eq!(AllowList::from_addresses([]), AllowList::Any);
        assert!(AllowList::Any.allows(&addr(42)));
    }

    #[test]
    fn namespace_is_stable_and_distinguishes_routes() {
        let a = AdmissionPolicy::new()
            .with_source(chain(1), AllowList::from_addresses([addr(1), addr(2)]))
            .with_destination(chain(2), AllowList::Any);
        let same = AdmissionPolicy::new()
            .with_destination(chain(2), AllowList::Any)
            .with_source(chain(1), AllowList::from_addresses([addr(2), addr(1)]));
        let other = AdmissionPolicy::new()
            .with_source(chain(1), AllowList::from_addresses([addr(1)]))
            .with_destination(chain(2), AllowList::Any);
        let swapped = AdmissionPolicy::new()
            .with_source(chain(2), AllowList::Any)
            .with_destination(chain(1), AllowList::from_addresses([addr(1), addr(2)]));
        assert_eq!(a.namespace(), same.namespace());
        assert_ne!(a.namespace(), other.namespace());
        assert_ne!(a.namespace(), swapped.namespace());
    }
}
