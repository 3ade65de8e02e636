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

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use warp_relayer_types::MessagePosition;

use super::{non_monotonic, CheckpointKey, CheckpointStore};

/// InMemoryStore is a store that keeps the checkpoints in memory.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    checkpoints: Arc<RwLock<HashMap<CheckpointKey, MessagePosition>>>,
    target_heights: Arc<RwLock<HashMap<CheckpointKey, u64>>>,
}

impl std::fmt::Debug for InMemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryStore").finish()
    }
}

impl CheckpointStore for InMemoryStore {
    #[tracing::instrument(skip(self), fields(key = %key))]
    fn load(
        &self,
        key: &CheckpointKey,
    ) -> crate::Result<Option<MessagePosition>> {
        Ok(self.checkpoints.read().get(key).copied())
    }

    #[tracing::instrument(skip(self), fields(key = %key, position = %position))]
    fn advance(
        &self,
        key: &CheckpointKey,
        position: MessagePosition,
    ) -> crate::Result<()> {
        let mut guard = self.checkpoints.write();
        match guard.get(key) {
            Some(stored) if position < *stored => {
                Err(non_monotonic(key, *stored, position))
            }
            _ => {
                guard.insert(*key, position);
                Ok(())
            }
        }
    }

    #[tracing::instrument(skip(self), fields(key = %key))]
    fn set_target_height(
        &self,
        key: &CheckpointKey,
        height: u64,
    ) -> crate::Result<u64> {
        let mut guard = self.target_heights.write();
        let val = guard.entry(*key).or_insert(height);
        let old = *val;
        *val = height;
        Ok(old)
    }

    #[tracing::instrument(skip(self), fields(key = %key))]
    fn target_height(
        &self,
        key: &CheckpointKey,
        default_height: u64,
    ) -> crate::Result<u64> {
        let guard = self.target_heights.read();
        Ok(guard.get(key).copied().unwrap_or(default_height))
    }
}
