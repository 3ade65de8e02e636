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

use std::path::Path;

use sled::transaction::{abort, TransactionError};
use warp_relayer_types::MessagePosition;
use warp_relayer_utils::Error;

use super::{non_monotonic, CheckpointKey, CheckpointStore};

const CHECKPOINTS_TREE: &str = "checkpoints";
const TARGET_HEIGHTS_TREE: &str = "target_heights";

/// Why a checkpoint transaction gave up.
#[derive(Debug)]
enum Refusal {
    Behind(MessagePosition),
    Corrupted,
}

/// SledStore is a store that keeps the checkpoints in a [Sled](https://sled.rs)-based database.
#[derive(Clone)]
pub struct SledStore {
    db: sled::Db,
}

impl std::fmt::Debug for SledStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SledStore").finish()
    }
}

impl SledStore {
    /// Create a new SledStore.
    pub fn open<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        let db = sled::Config::new()
            .path(path)
            .mode(sled::Mode::HighThroughput)
            .open()?;
        Ok(Self { db })
    }

    /// Creates a temporary SledStore.
    pub fn temporary() -> crate::Result<Self> {
        let dir = tempfile::tempdir()?;
        let db = sled::Config::new()
            .path(dir.path())
            .temporary(true)
            .open()?;
        Ok(Self { db })
    }

    /// Gets the total amount of data stored on disk
    pub fn get_data_stored_size(&self) -> u64 {
        self.db.size_on_disk().unwrap_or_default()
    }

    fn corrupted(key: &CheckpointKey) -> Error {
        Error::StorageUnavailable(format!("corrupted record for {key}").into())
    }
}

impl CheckpointStore for SledStore {
    #[tracing::instrument(skip(self), fields(key = %key))]
    fn load(
        &self,
        key: &CheckpointKey,
    ) -> crate::Result<Option<MessagePosition>> {
        let tree = self.db.open_tree(CHECKPOINTS_TREE)?;
        match tree.get(key.to_bytes())? {
            Some(v) => MessagePosition::from_bytes(&v)
                .map(Some)
                .ok_or_else(|| Self::corrupted(key)),
            None => Ok(None),
        }
    }

    #[tracing::instrument(skip(self), fields(key = %key, position = %position))]
    fn advance(
        &self,
        key: &CheckpointKey,
        position: MessagePosition,
    ) -> crate::Result<()> {
        let tree = self.db.open_tree(CHECKPOINTS_TREE)?;
        let key_bytes = key.to_bytes();
        let value = position.to_bytes();
        // compare and write inside one transaction, so concurrent writers of
        // the same key can never move it backwards.
        let result = tree.transaction(|db| {
            if let Some(old) = db.get(key_bytes)? {
                match MessagePosition::from_bytes(&old) {
                    Some(stored) if position < stored => {
                        return abort(Refusal::Behind(stored));
                    }
                    Some(_) => {}
                    None => return abort(Refusal::Corrupted),
                }
            }
            db.insert(&key_bytes[..], &value[..])?;
            Ok(())
        });
        match result {
            Ok(()) => {}
            Err(TransactionError::Abort(Refusal::Behind(stored))) => {
                return Err(non_monotonic(key, stored, position));
            }
            Err(TransactionError::Abort(Refusal::Corrupted)) => {
                return Err(Self::corrupted(key));
            }
            Err(TransactionError::Storage(e)) => return Err(e.into()),
        }
        tree.flush()?;
        Ok(())
    }

    #[tracing::instrument(skip(self), fields(key = %key))]
    fn set_target_height(
        &self,
        key: &CheckpointKey,
        height: u64,
    ) -> crate::Result<u64> {
        let tree = self.db.open_tree(TARGET_HEIGHTS_TREE)?;
        let old = tree.insert(key.to_bytes(), &height.to_be_bytes())?;
        match old {
            Some(v) if v.len() == 8 => {
                let mut output = [0u8; 8];
                output.copy_from_slice(&v);
                Ok(u64::from_be_bytes(output))
            }
            Some(_) => Err(Self::corrupted(key)),
            None => Ok(height),
        }
    }

    #[tracing::instrument(skip(self), fields(key = %key))]
    fn target_height(
        &self,
        key: &CheckpointKey,
        default_height: u64,
    ) -> crate::Result<u64> {
        let tree = self.db.open_tree(TARGET_HEIGHTS_TREE)?;
        let val = tree.get(key.to_bytes())?;
        match val {
            Some(v) if v.len() == 8 => {
                let mut output = [0u8; 8];
                output.copy_from_slice(&v);
                Ok(u64::from_be_bytes(output))
            }
            Some(_) => Err(Self::corrupted(key)),
            None => Ok(default_height),
        }
    }

    fn data_stored_size(&self) -> u64 {
        self.get_data_stored_size()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils;

    #[test]
    fn advance_rejects_backwards_writes() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SledStore::open(tmp.path()).unwrap();
        test_utils::rejects_backwards_writes(&store);
    }

    #[test]
    fn namespaces_are_isolated() {
        let store = SledStore::temporary().unwrap();
        test_utils::isolates_namespaces(&store);
    }

    #[test]
    fn target_height_should_work() {
        let store = SledStore::temporary().unwrap();
        test_utils::tracks_target_height(&store);
    }

    #[test]
    fn malformed_target_height_is_reported() {
        let store = SledStore::temporary().unwrap();
        let key = test_utils::key(4, 4);
        let tree = store.db.open_tree(TARGET_HEIGHTS_TREE).unwrap();
        tree.insert(key.to_bytes(), &[1u8, 2, 3][..]).unwrap();
        let err = store.target_height(&key, 0).unwrap_err();
        assert!(matches!(err, Error::StorageUnavailable(_)));
        let err = store.set_target_height(&key, 10).unwrap_err();
        assert!(matches!(err, Error::StorageUnavailable(_)));
    }

    #[test]
    fn checkpoint_survives_restart() {
        let tmp = tempfile::tempdir().unwrap();
        let key = test_utils::key(1, 0xa);
        {
            let store = SledStore::open(tmp.path()).unwrap();
            assert_eq!(store.load(&key).unwrap(), None);
            store
                .advance(&key, MessagePosition::end_of_block(100))
                .unwrap();
        }
        let store = SledStore::open(tmp.path()).unwrap();
        let loaded = store.load(&key).unwrap().unwrap();
        assert_eq!(loaded.height, 100);
        assert!(MessagePosition::new(101, 0) > loaded);
    }

    #[test]
    fn concurrent_writers_never_move_backwards() {
        let store = SledStore::temporary().unwrap();
        let shared = test_utils::key(9, 9);
        let handles: Vec<_> = (0..4u8)
            .map(|worker| {
                let store = store.clone();
                std::thread::spawn(move || {
                    let own = test_utils::key(worker, 9);
                    for height in 0..200u64 {
                        let pos = MessagePosition::new(height, worker as u32);
                        store.advance(&own, pos).unwrap();
                        // racing writers on one key may lose, never regress.
                        let _ = store.advance(&shared, pos);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        for worker in 0..4u8 {
            let own = test_utils::key(worker, 9);
            assert_eq!(
                store.load(&own).unwrap(),
                Some(MessagePosition::new(199, worker as u32))
            );
        }
        let last = store.load(&shared).unwrap().unwrap();
        assert_eq!(last.height, 199);
    }
}
