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

//! # Relayer Store Module 🕸️
//!
//! A module for managing the checkpoints of the relayer.
//!
//! ## Overview
//!
//! Every relayer instance records, per source chain, the position of the
//! last message it finished handling. Several instances may share one
//! physical store: the instance namespace is part of every key, so records
//! of different instances never overlap.
//!
use std::fmt::{Debug, Display};

use warp_relayer_types::{Id, InstanceNamespace, MessagePosition};
use warp_relayer_utils::Result;

/// A module for keeping checkpoints in plain files, shareable by processes.
pub mod file;
/// A module for managing in-memory storage of the relayer.
pub mod mem;
/// A module for setting up and managing a [Sled](https://sled.rs)-based database.
#[cfg(feature = "sled")]
pub mod sled;

/// A store that uses [`sled`](https://sled.rs) as the backend.
#[cfg(feature = "sled")]
pub use self::sled::SledStore;
/// A store that keeps one file per record, safe to share between processes.
pub use file::FileStore;
/// A store that uses in memory data structures as the backend.
pub use mem::InMemoryStore;

/// Identifies one checkpoint record: a relayer instance and a source chain.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct CheckpointKey {
    /// The instance that owns the record.
    pub namespace: InstanceNamespace,
    /// The source chain the record tracks.
    pub chain_id: Id,
}

impl CheckpointKey {
    /// Size of the encoded key.
    pub const ENCODED_LEN: usize = 64;

    /// Creates a new key.
    pub fn new(namespace: InstanceNamespace, chain_id: Id) -> Self {
        Self {
            namespace,
            chain_id,
        }
    }

    /// Returns the bytes of the key: the namespace followed by the chain id.
    pub fn to_bytes(&self) -> [u8; Self::ENCODED_LEN] {
        let mut out = [0u8; Self::ENCODED_LEN];
        out[..32].copy_from_slice(self.namespace.as_bytes());
        out[32..].copy_from_slice(self.chain_id.as_bytes());
        out
    }
}

impl Display for CheckpointKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Checkpoint({}/{})", self.namespace.short(), self.chain_id)
    }
}

/// CheckpointStore is a simple trait for storing and retrieving the last
/// handled message position of every (instance, source chain) pair.
pub trait CheckpointStore: Clone + Send + Sync + Debug {
    /// Returns the last durably recorded position, or `None` if nothing was
    /// ever recorded for that key.
    fn load(&self, key: &CheckpointKey) -> Result<Option<MessagePosition>>;

    /// Durably records `position`.
    ///
    /// Fails with `NonMonotonic` if `position` is smaller than the stored
    /// one, leaving the stored value unchanged. Recording the stored
    /// position again is a no-op.
    fn advance(&self, key: &CheckpointKey, position: MessagePosition)
        -> Result<()>;

    /// Sets the target height (usually the head of the source chain) and
    /// returns the previous one. Used to report how far behind a pair is.
    fn set_target_height(&self, key: &CheckpointKey, height: u64)
        -> Result<u64>;

    /// Get the target height.
    /// if not found, returns the `default_height`.
    fn target_height(
        &self,
        key: &CheckpointKey,
        default_height: u64,
    ) -> Result<u64>;

    /// Total amount of data kept by the store, in bytes.
    fn data_stored_size(&self) -> u64 {
        0
    }
}

/// The persistent store picked by the configuration.
#[derive(Clone, Debug)]
pub enum PersistentStore {
    /// One file per record. Several relayer processes may share it.
    File(FileStore),
    /// A sled database, locked by the process that opened it.
    #[cfg(feature = "sled")]
    Sled(SledStore),
}

impl CheckpointStore for PersistentStore {
    fn load(&self, key: &CheckpointKey) -> Result<Option<MessagePosition>> {
        match self {
            Self::File(store) => store.load(key),
            #[cfg(feature = "sled")]
            Self::Sled(store) => store.load(key),
        }
    }

    fn advance(
        &self,
        key: &CheckpointKey,
        position: MessagePosition,
    ) -> Result<()> {
        match self {
            Self::File(store) => store.advance(key, position),
            #[cfg(feature = "sled")]
            Self::Sled(store) => store.advance(key, position),
        }
    }

    fn set_target_height(
        &self,
        key: &CheckpointKey,
        height: u64,
    ) -> Result<u64> {
        match self {
            Self::File(store) => store.set_target_height(key, height),
            #[cfg(feature = "sled")]
            Self::Sled(store) => store.set_target_height(key, height),
        }
    }

    fn target_height(
        &self,
        key: &CheckpointKey,
        default_height: u64,
    ) -> Result<u64> {
        match self {
            Self::File(store) => store.target_height(key, default_height),
            #[cfg(feature = "sled")]
            Self::Sled(store) => store.target_height(key, default_height),
        }
    }

    fn data_stored_size(&self) -> u64 {
        match self {
            Self::File(store) => store.data_stored_size(),
            #[cfg(feature = "sled")]
            Self::Sled(store) => store.data_stored_size(),
        }
    }
}

fn non_monotonic(
    key: &CheckpointKey,
    stored: MessagePosition,
    attempted: MessagePosition,
) -> warp_relayer_utils::Error {
    warp_relayer_utils::Error::NonMonotonic {
        key: key.to_string(),
        stored: stored.to_string(),
        attempted: attempted.to_string(),
    }
}

#[cfg(test)]
pub(crate) mod test_utils {
    use super::*;
    use warp_relayer_utils::Error;

    pub fn key(namespace: u8, chain: u8) -> CheckpointKey {
        CheckpointKey::new(
            InstanceNamespace::new([namespace; 32]),
            Id::new([chain; 32]),
        )
    }

    pub fn rejects_backwards_writes<S: CheckpointStore>(store: &S) {
        let key = key(1, 1);
        store.advance(&key, MessagePosition::new(10, 2)).unwrap();
        store.advance(&key, MessagePosition::new(10, 2)).unwrap();
        let err = store.advance(&key, MessagePosition::new(10, 1)).unwrap_err();
        assert!(matches!(err, Error::NonMonotonic { .. }));
        assert_eq!(
            store.load(&key).unwrap(),
            Some(MessagePosition::new(10, 2))
        );
        store.advance(&key, MessagePosition::new(11, 0)).unwrap();
        assert_eq!(
            store.load(&key).unwrap(),
            Some(MessagePosition::new(11, 0))
        );
    }

    pub fn isolates_namespaces<S: CheckpointStore>(store: &S) {
        let first = key(1, 7);
        let second = key(2, 7);
        assert_eq!(store.load(&first).unwrap(), None);
        store.advance(&first, MessagePosition::new(100, 0)).unwrap();
        assert_eq!(store.load(&second).unwrap(), None);
        store.advance(&second, MessagePosition::new(5, 0)).unwrap();
        assert_eq!(
            store.load(&first).unwrap(),
            Some(MessagePosition::new(100, 0))
        );
        assert_eq!(
            store.load(&second).unwrap(),
            Some(MessagePosition::new(5, 0))
        );
    }

    pub fn tracks_target_height<S: CheckpointStore>(store: &S) {
        let key = key(3, 3);
        assert_eq!(store.target_height(&key, 1).unwrap(), 1);
        assert_eq!(store.set_target_height(&key, 50).unwrap(), 50);
        assert_eq!(store.set_target_height(&key, 60).unwrap(), 50);
        assert_eq!(store.target_height(&key, 1).unwrap(), 60);
    }
}
