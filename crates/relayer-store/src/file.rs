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

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use fs2::FileExt;
use warp_relayer_types::MessagePosition;
use warp_relayer_utils::Error;

use super::{non_monotonic, CheckpointKey, CheckpointStore};

const CHECKPOINTS_DIR: &str = "checkpoints";
const TARGET_HEIGHTS_DIR: &str = "target_heights";
const LOCKS_DIR: &str = "locks";

fn storage_error(path: &Path, e: std::io::Error) -> Error {
    Error::StorageUnavailable(format!("{}: {e}", path.display()).into())
}

/// Advisory lock on one record, released on drop.
struct RecordLock {
    file: File,
    path: PathBuf,
}

impl RecordLock {
    fn open(path: PathBuf) -> crate::Result<File> {
        OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(|e| storage_error(&path, e))
    }

    fn shared(path: PathBuf) -> crate::Result<Self> {
        let file = Self::open(path.clone())?;
        FileExt::lock_shared(&file).map_err(|e| storage_error(&path, e))?;
        Ok(Self { file, path })
    }

    fn exclusive(path: PathBuf) -> crate::Result<Self> {
        let file = Self::open(path.clone())?;
        FileExt::lock_exclusive(&file).map_err(|e| storage_error(&path, e))?;
        Ok(Self { file, path })
    }
}

impl Drop for RecordLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to release record lock");
        }
    }
}

/// FileStore keeps every record in its own file below a directory.
///
/// Any number of processes may open the same directory at once. Each
/// record is guarded by an advisory lock of its own, so instances with
/// different namespaces never wait on each other, and a record is replaced
/// through an atomic rename, so a crash never leaves a torn value behind.
#[derive(Clone)]
pub struct FileStore {
    root: PathBuf,
    // removes a temporary store once the last handle is gone.
    _tmp: Option<Arc<tempfile::TempDir>>,
}

impl std::fmt::Debug for FileStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileStore")
            .field("root", &self.root)
            .finish()
    }
}

impl FileStore {
    /// Opens the store rooted at `path`, creating it if needed.
    pub fn open<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        let root = path.as_ref().to_path_buf();
        for dir in [CHECKPOINTS_DIR, TARGET_HEIGHTS_DIR, LOCKS_DIR] {
            let dir = root.join(dir);
            fs::create_dir_all(&dir).map_err(|e| storage_error(&dir, e))?;
        }
        Ok(Self { root, _tmp: None })
    }

    /// Creates a store in a temporary directory, deleted with the store.
    pub fn temporary() -> crate::Result<Self> {
        let tmp = tempfile::tempdir()?;
        let store = Self::open(tmp.path())?;
        Ok(Self {
            _tmp: Some(Arc::new(tmp)),
            ..store
        })
    }

    /// Directory of the store.
    pub fn path(&self) -> &Path {
        &self.root
    }

    fn record_name(key: &CheckpointKey) -> String {
        hex::encode(key.to_bytes())
    }

    fn record_path(&self, dir: &str, key: &CheckpointKey) -> PathBuf {
        self.root.join(dir).join(Self::record_name(key))
    }

    fn lock_path(&self, key: &CheckpointKey) -> PathBuf {
        self.root
            .join(LOCKS_DIR)
            .join(format!("{}.lock", Self::record_name(key)))
    }

    fn read(path: &Path) -> crate::Result<Option<Vec<u8>>> {
        match fs::read(path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(storage_error(path, e)),
        }
    }

    fn write(path: &Path, bytes: &[u8]) -> crate::Result<()> {
        let tmp = path.with_extension(format!("{}.tmp", std::process::id()));
        let write = || -> std::io::Result<()> {
            let mut file = File::create(&tmp)?;
            file.write_all(bytes)?;
            file.sync_all()?;
            fs::rename(&tmp, path)
        };
        write().map_err(|e| storage_error(path, e))
    }

    fn decode_height(
        key: &CheckpointKey,
        bytes: &[u8],
    ) -> crate::Result<u64> {
        let raw: [u8; 8] =
            bytes.try_into().map_err(|_| Self::corrupted(key))?;
        Ok(u64::from_be_bytes(raw))
    }

    fn corrupted(key: &CheckpointKey) -> Error {
        Error::StorageUnavailable(format!("corrupted record for {key}").into())
    }

    fn dir_size(&self, dir: &str) -> u64 {
        let Ok(entries) = fs::read_dir(self.root.join(dir)) else {
            return 0;
        };
        entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| entry.metadata().ok())
            .map(|metadata| metadata.len())
            .sum()
    }
}

impl CheckpointStore for FileStore {
    #[tracing::instrument(skip(self), fields(key = %key))]
    fn load(
        &self,
        key: &CheckpointKey,
    ) -> crate::Result<Option<MessagePosition>> {
        let _lock = RecordLock::shared(self.lock_path(key))?;
        match Self::read(&self.record_path(CHECKPOINTS_DIR, key))? {
            Some(bytes) => MessagePosition::from_bytes(&bytes)
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
        // compare and write under the exclusive lock, so writers of the
        // same key in other processes can never move it backwards.
        let _lock = RecordLock::exclusive(self.lock_path(key))?;
        let path = self.record_path(CHECKPOINTS_DIR, key);
        if let Some(bytes) = Self::read(&path)? {
            let stored = MessagePosition::from_bytes(&bytes)
                .ok_or_else(|| Self::corrupted(key))?;
            if position < stored {
                return Err(non_monotonic(key, stored, position));
            }
            if position == stored {
                return Ok(());
            }
        }
        Self::write(&path, &position.to_bytes())
    }

    #[tracing::instrument(skip(self), fields(key = %key))]
    fn set_target_height(
        &self,
        key: &CheckpointKey,
        height: u64,
    ) -> crate::Result<u64> {
        let _lock = RecordLock::exclusive(self.lock_path(key))?;
        let path = self.record_path(TARGET_HEIGHTS_DIR, key);
        let previous = match Self::read(&path)? {
            Some(bytes) => Self::decode_height(key, &bytes)?,
            None => height,
        };
        Self::write(&path, &height.to_be_bytes())?;
        Ok(previous)
    }

    #[tracing::instrument(skip(self), fields(key = %key))]
    fn target_height(
        &self,
        key: &CheckpointKey,
        default_height: u64,
    ) -> crate::Result<u64> {
        let _lock = RecordLock::shared(self.lock_path(key))?;
        match Self::read(&self.record_path(TARGET_HEIGHTS_DIR, key))? {
            Some(bytes) => Self::decode_height(key, &bytes),
            None => Ok(default_height),
        }
    }

    fn data_stored_size(&self) -> u64 {
        self.dir_size(CHECKPOINTS_DIR) + self.dir_size(TARGET_HEIGHTS_DIR)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils;

    #[test]
    fn advance_rejects_backwards_writes() {
        let store = FileStore::temporary().unwrap();
        test_utils::rejects_backwards_writes(&store);
    }

    #[test]
    fn namespaces_are_isolated() {
        let store = FileStore::temporary().unwrap();
        test_utils::isolates_namespaces(&store);
    }

    #[test]
    fn target_height_should_work() {
        let store = FileStore::temporary().unwrap();
        test_utils::tracks_target_height(&store);
        assert!(store.data_stored_size() > 0);
    }

    #[test]
    fn two_handles_share_one_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let first = FileStore::open(tmp.path()).unwrap();
        let second = FileStore::open(tmp.path()).unwrap();
        let a = test_utils::key(1, 5);
        let b = test_utils::key(2, 5);

        first.advance(&a, MessagePosition::new(10, 0)).unwrap();
        second.advance(&b, MessagePosition::new(3, 1)).unwrap();
        assert_eq!(second.load(&a).unwrap(), Some(MessagePosition::new(10, 0)));
        assert_eq!(first.load(&b).unwrap(), Some(MessagePosition::new(3, 1)));

        // the other handle sees the stored position and refuses to regress.
        let err = second.advance(&a, MessagePosition::new(9, 0)).unwrap_err();
        assert!(matches!(err, Error::NonMonotonic { .. }));
        second.advance(&a, MessagePosition::new(11, 0)).unwrap();
        assert_eq!(first.load(&a).unwrap(), Some(MessagePosition::new(11, 0)));
    }

    #[test]
    fn checkpoint_survives_reopen() {
        let tmp = tempfile::tempdir().unwrap();
        let key = test_utils::key(1, 0xa);
        FileStore::open(tmp.path())
            .unwrap()
            .advance(&key, MessagePosition::end_of_block(100))
            .unwrap();
        let store = FileStore::open(tmp.path()).unwrap();
        assert_eq!(
            store.load(&key).unwrap(),
            Some(MessagePosition::end_of_block(100))
        );
    }

    #[test]
    fn writers_with_separate_handles_never_move_backwards() {
        let tmp = tempfile::tempdir().unwrap();
        let shared = test_utils::key(9, 9);
        let handles: Vec<_> = (0..4u8)
            .map(|worker| {
                // one handle per worker, like separate processes.
                let store = FileStore::open(tmp.path()).unwrap();
                std::thread::spawn(move || {
                    let own = test_utils::key(worker, 9);
                    for height in 0..50u64 {
                        let pos = MessagePosition::new(height, worker as u32);
                        store.advance(&own, pos).unwrap();
                        let _ = store.advance(&shared, pos);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let store = FileStore::open(tmp.path()).unwrap();
        for worker in 0..4u8 {
            assert_eq!(
                store.load(&test_utils::key(worker, 9)).unwrap(),
                Some(MessagePosition::new(49, worker as u32))
            );
        }
        assert_eq!(store.load(&shared).unwrap().unwrap().height, 49);
    }

    #[test]
    fn malformed_records_are_reported() {
        let store = FileStore::temporary().unwrap();
        let key = test_utils::key(4, 4);
        fs::write(store.record_path(TARGET_HEIGHTS_DIR, &key), [1u8, 2, 3])
            .unwrap();
        fs::write(store.record_path(CHECKPOINTS_DIR, &key), [7u8; 5]).unwrap();
        let err = store.set_target_height(&key, 10).unwrap_err();
        assert!(matches!(err, Error::StorageUnavailable(_)));
        let err = store.load(&key).unwrap_err();
        assert!(matches!(err, Error::StorageUnavailable(_)));
    }
}
