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

use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;
use warp_relayer_types::{Id, ValidatorSet, ValidatorSetHeight};
use warp_relayer_utils::{probe, Error};

use crate::canonical::canonical_validator_set;
use crate::client::PlatformClient;

/// Number of height-pinned validator sets kept in memory.
pub const DEFAULT_CACHE_CAPACITY: usize = 64;

#[derive(Default)]
struct SetCache {
    sets: HashMap<(Id, u64), ValidatorSet>,
    order: VecDeque<(Id, u64)>,
}

impl SetCache {
    fn get(&self, key: &(Id, u64)) -> Option<ValidatorSet> {
        self.sets.get(key).cloned()
    }

    fn insert(&mut self, key: (Id, u64), set: ValidatorSet, capacity: usize) {
        if self.sets.insert(key, set).is_none() {
            self.order.push_back(key);
        }
        while self.order.len() > capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.sets.remove(&oldest);
            }
        }
    }
}

/// Resolves canonical validator sets through a [`PlatformClient`].
///
/// Height-scoped queries are preferred. When the node does not serve them,
/// and only then, the live set is returned instead, labelled
/// [`ValidatorSetHeight::Current`] and logged as a warning.
pub struct CanonicalValidatorClient<C> {
    client: C,
    cache: Mutex<SetCache>,
    subnets: Mutex<HashMap<Id, Id>>,
    capacity: usize,
}

impl<C> std::fmt::Debug for CanonicalValidatorClient<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CanonicalValidatorClient")
            .field("capacity", &self.capacity)
            .finish()
    }
}

impl<C: PlatformClient> CanonicalValidatorClient<C> {
    /// Wraps `client` with the default cache capacity.
    pub fn new(client: C) -> Self {
        Self::with_cache_capacity(client, DEFAULT_CACHE_CAPACITY)
    }

    /// Wraps `client`, keeping at most `capacity` height-pinned sets.
    pub fn with_cache_capacity(client: C, capacity: usize) -> Self {
        Self {
            client,
            cache: Mutex::new(SetCache::default()),
            subnets: Mutex::new(HashMap::new()),
            capacity,
        }
    }

    /// The validator set at the most recently proposed platform height.
    ///
    /// Platforms without the height-scoped query are answered with the
    /// current validators instead, labelled [`ValidatorSetHeight::Current`].
    #[tracing::instrument(skip(self), fields(subnet_id = %subnet_id))]
    pub async fn current_validator_set(
        &self,
        subnet_id: Id,
    ) -> crate::Result<ValidatorSet> {
        let result = async {
            match self
                .client
                .validators_at(subnet_id, ValidatorSetHeight::Proposed)
                .await
            {
                Ok(raw) => canonical_validator_set(
                    subnet_id,
                    ValidatorSetHeight::Proposed,
                    raw,
                ),
                Err(Error::MethodUnsupported { method }) => {
                    tracing::warn!(
                        subnet_id = %subnet_id,
                        method = %method,
                        "Proposed-height validator query is not supported, falling back to the current validators",
                    );
                    tracing::event!(
                        target: probe::TARGET,
                        tracing::Level::DEBUG,
                        kind = %probe::Kind::Validators,
                        subnet_id = %subnet_id,
                        fallback = true,
                    );
                    let raw = self.client.current_validators(subnet_id).await?;
                    canonical_validator_set(
                        subnet_id,
                        ValidatorSetHeight::Current,
                        raw,
                    )
                }
                Err(e) => Err(e),
            }
        }
        .await;
        if let Err(e) = &result {
            tracing::error!(
                subnet_id = %subnet_id,
                error = %e,
                "Failed to get the canonical subnet validator set",
            );
        }
        result
    }

    /// The validator set as of platform height `height`.
    ///
    /// Only [`Error::MethodUnsupported`] triggers the height-agnostic
    /// fallback. Every other failure is returned untouched, so callers never
    /// get a set for the wrong height in place of a retryable error.
    #[tracing::instrument(skip(self), fields(subnet_id = %subnet_id))]
    pub async fn validator_set_at_height(
        &self,
        subnet_id: Id,
        height: u64,
    ) -> crate::Result<ValidatorSet> {
        if let Some(set) = self.cache.lock().get(&(subnet_id, height)) {
            tracing::trace!(height, "validator set served from cache");
            return Ok(set);
        }
        match self
            .client
            .validators_at(subnet_id, ValidatorSetHeight::At(height))
            .await
        {
            Ok(raw) => {
                let set = canonical_validator_set(
                    subnet_id,
                    ValidatorSetHeight::At(height),
                    raw,
                )?;
                self.cache
                    .lock()
                    .insert((subnet_id, height), set.clone(), self.capacity);
                Ok(set)
            }
            Err(Error::MethodUnsupported { method }) => {
                tracing::warn!(
                    subnet_id = %subnet_id,
                    p_chain_height = height,
                    method = %method,
                    "Height-scoped validator query is not supported, falling back to the current validators; the requested height is not honoured",
                );
                tracing::event!(
                    target: probe::TARGET,
                    tracing::Level::DEBUG,
                    kind = %probe::Kind::Validators,
                    subnet_id = %subnet_id,
                    requested_height = height,
                    fallback = true,
                );
                let raw = self.client.current_validators(subnet_id).await?;
                canonical_validator_set(
                    subnet_id,
                    ValidatorSetHeight::Current,
                    raw,
                )
            }
            Err(e) => Err(e),
        }
    }

    /// Height of the last accepted platform chain block.
    pub async fn current_height(&self) -> crate::Result<u64> {
        self.client.height().await
    }

    /// Lowest platform height the validator sets of `subnet_id` can be
    /// queried at. The node keeps no older history than its current
    /// height for this purpose, so both are the same value.
    pub async fn minimum_height(&self, subnet_id: Id) -> crate::Result<u64> {
        tracing::trace!(subnet_id = %subnet_id, "querying minimum height");
        self.client.height().await
    }

    /// The subnet that validates `blockchain_id`. Remembered once resolved.
    #[tracing::instrument(skip(self), fields(blockchain_id = %blockchain_id))]
    pub async fn subnet_for_chain(&self, blockchain_id: Id) -> crate::Result<Id> {
        if let Some(subnet) = self.subnets.lock().get(&blockchain_id) {
            return Ok(*subnet);
        }
        let subnet = self.client.validated_by(blockchain_id).await?;
        self.subnets.lock().insert(blockchain_id, subnet);
        Ok(subnet)
    }

    /// Records a known chain to subnet mapping, skipping the API.
    pub fn remember_subnet(&self, blockchain_id: Id, subnet_id: Id) {
        self.subnets.lock().insert(blockchain_id, subnet_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::RawValidator;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use warp_relayer_types::{NodeId, PublicKey};

    #[derive(Default)]
    struct MockPlatform {
        at_error: Option<fn() -> Error>,
        at_calls: AtomicUsize,
        current_calls: AtomicUsize,
        validated_by_calls: AtomicUsize,
    }

    fn sample(weights: &[u64]) -> Vec<RawValidator> {
        weights
            .iter()
            .enumerate()
            .map(|(i, w)| RawValidator {
                node_id: NodeId::new([i as u8 + 1; 20]),
                public_key: Some(PublicKey::new([i as u8 + 1; PublicKey::LEN])),
                weight: *w,
            })
            .collect()
    }

    #[async_trait::async_trait]
    impl PlatformClient for MockPlatform {
        async fn height(&self) -> crate::Result<u64> {
            Ok(1_000)
        }

        async fn validators_at(
            &self,
            _subnet_id: Id,
            _height: ValidatorSetHeight,
        ) -> crate::Result<Vec<RawValidator>> {
            self.at_calls.fetch_add(1, Ordering::SeqCst);
            match self.at_error {
                Some(make) => Err(make()),
                None => Ok(sample(&[40, 30, 20, 10])),
            }
        }

        async fn current_validators(
            &self,
            _subnet_id: Id,
        ) -> crate::Result<Vec<RawValidator>> {
            self.current_calls.fetch_add(1, Ordering::SeqCst);
            Ok(sample(&[50, 50]))
        }

        async fn validated_by(&self, _blockchain_id: Id) -> crate::Result<Id> {
            self.validated_by_calls.fetch_add(1, Ordering::SeqCst);
            Ok(Id::new([7; 32]))
        }
    }

    #[tokio::test]
    async fn height_scoped_sets_are_cached() {
        let resolver = CanonicalValidatorClient::new(MockPlatform::default());
        let a = resolver.validator_set_at_height(Id::EMPTY, 5).await.unwrap();
        let b = resolver.validator_set_at_height(Id::EMPTY, 5).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.height(), ValidatorSetHeight::At(5));
        assert_eq!(a.total_weight(), 100);
        assert_eq!(resolver.client.at_calls.load(Ordering::SeqCst), 1);
        resolver.current_validator_set(Id::EMPTY).await.unwrap();
        resolver.current_validator_set(Id::EMPTY).await.unwrap();
        assert_eq!(resolver.client.at_calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn falls_back_only_when_method_is_unsupported() {
        let resolver = CanonicalValidatorClient::new(MockPlatform {
            at_error: Some(|| Error::MethodUnsupported {
                method: "platform.getValidatorsAt".into(),
            }),
            ..Default::default()
        });
        let set = resolver.validator_set_at_height(Id::EMPTY, 5).await.unwrap();
        assert_eq!(set.height(), ValidatorSetHeight::Current);
        assert_eq!(set.total_weight(), 100);
        assert_eq!(resolver.client.current_calls.load(Ordering::SeqCst), 1);
        assert!(logs_contain("falling back to the current validators"));
        // fallback results are never cached.
        resolver.validator_set_at_height(Id::EMPTY, 5).await.unwrap();
        assert_eq!(resolver.client.at_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn current_set_falls_back_when_method_is_unsupported() {
        let resolver = CanonicalValidatorClient::new(MockPlatform {
            at_error: Some(|| Error::MethodUnsupported {
                method: "platform.getValidatorsAt".into(),
            }),
            ..Default::default()
        });
        let set = resolver.current_validator_set(Id::EMPTY).await.unwrap();
        assert_eq!(set.height(), ValidatorSetHeight::Current);
        assert_eq!(set.total_weight(), 100);
        assert_eq!(set.len(), 2);
        assert_eq!(resolver.client.at_calls.load(Ordering::SeqCst), 1);
        assert_eq!(resolver.client.current_calls.load(Ordering::SeqCst), 1);
        assert!(logs_contain(
            "Proposed-height validator query is not supported"
        ));
        assert!(!logs_contain("Failed to get the canonical subnet validator set"));
    }

    #[tokio::test]
    async fn current_set_keeps_transient_errors() {
        let resolver = CanonicalValidatorClient::new(MockPlatform {
            at_error: Some(|| Error::UpstreamUnavailable {
                endpoint: "http://127.0.0.1:9650".into(),
                reason: "connection refused".into(),
            }),
            ..Default::default()
        });
        let err = resolver.current_validator_set(Id::EMPTY).await.unwrap_err();
        assert!(matches!(err, Error::UpstreamUnavailable { .. }));
        assert_eq!(resolver.client.current_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn transient_errors_are_not_masked() {
        let resolver = CanonicalValidatorClient::new(MockPlatform {
            at_error: Some(|| Error::UpstreamUnavailable {
                endpoint: "http://127.0.0.1:9650".into(),
                reason: "connection refused".into(),
            }),
            ..Default::default()
        });
        let err = resolver
            .validator_set_at_height(Id::EMPTY, 5)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UpstreamUnavailable { .. }));
        assert_eq!(resolver.client.current_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn subnet_lookup_is_remembered() {
        let resolver = CanonicalValidatorClient::new(MockPlatform::default());
        let chain = Id::new([1; 32]);
        assert_eq!(
            resolver.subnet_for_chain(chain).await.unwrap(),
            Id::new([7; 32])
        );
        resolver.subnet_for_chain(chain).await.unwrap();
        assert_eq!(resolver.client.validated_by_calls.load(Ordering::SeqCst), 1);
        resolver.remember_subnet(Id::new([2; 32]), Id::EMPTY);
        assert_eq!(
            resolver.subnet_for_chain(Id::new([2; 32])).await.unwrap(),
            Id::EMPTY
        );
        assert_eq!(resolver.current_height().await.unwrap(), 1_000);
        assert_eq!(resolver.minimum_height(Id::EMPTY).await.unwrap(), 1_000);
    }

    #[tokio::test]
    async fn cache_is_bounded() {
        let resolver =
            CanonicalValidatorClient::with_cache_capacity(MockPlatform::default(), 2);
        for h in 0..3 {
            resolver.validator_set_at_height(Id::EMPTY, h).await.unwrap();
        }
        resolver.validator_set_at_height(Id::EMPTY, 0).await.unwrap();
        assert_eq!(resolver.client.at_calls.load(Ordering::SeqCst), 4);
        resolver.validator_set_at_height(Id::EMPTY, 2).await.unwrap();
        assert_eq!(resolver.client.at_calls.load(Ordering::SeqCst), 4);
    }
}
