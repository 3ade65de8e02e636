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

//! Quorum-gated delivery of admitted messages.

use std::sync::Arc;
use std::time::Duration;

use typed_builder::TypedBuilder;
use warp_relayer_catch_up::{DeliveryOutcome, DeliveryPipeline};
use warp_relayer_config::SignatureCollectionConfig;
use warp_relayer_types::{NodeId, ObservedMessage, ValidatorSet};
use warp_relayer_validators::{
    has_quorum, signed_weight, Attestation, AttestationSet,
    CanonicalValidatorClient, PlatformClient, QuorumRequirement,
};

/// Asks validators to attest messages.
#[async_trait::async_trait]
pub trait SignatureCollector: Send + Sync {
    /// Requests an attestation of `message` from every node of `nodes` and
    /// returns the answers received in this round. Nodes that did not
    /// answer are simply missing from the result.
    async fn request_attestations(
        &self,
        message: &ObservedMessage,
        validators: &ValidatorSet,
        nodes: &[NodeId],
    ) -> crate::Result<Vec<(NodeId, Attestation)>>;
}

#[async_trait::async_trait]
impl<T: SignatureCollector + ?Sized> SignatureCollector for Arc<T> {
    async fn request_attestations(
        &self,
        message: &ObservedMessage,
        validators: &ValidatorSet,
        nodes: &[NodeId],
    ) -> crate::Result<Vec<(NodeId, Attestation)>> {
        (**self)
            .request_attestations(message, validators, nodes)
            .await
    }
}

/// What the destination chain made of a submitted message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    /// The message was accepted.
    Accepted,
    /// The message will never be accepted, for example because it was
    /// delivered by another relayer already.
    Refused,
}

/// Hands attested messages to their destination chain.
#[async_trait::async_trait]
pub trait DestinationSubmitter: Send + Sync {
    /// Submits `message` with the attestations that reached quorum.
    async fn submit(
        &self,
        message: &ObservedMessage,
        validators: &ValidatorSet,
        attestations: &AttestationSet,
    ) -> crate::Result<Submission>;
}

#[async_trait::async_trait]
impl<T: DestinationSubmitter + ?Sized> DestinationSubmitter for Arc<T> {
    async fn submit(
        &self,
        message: &ObservedMessage,
        validators: &ValidatorSet,
        attestations: &AttestationSet,
    ) -> crate::Result<Submission> {
        (**self).submit(message, validators, attestations).await
    }
}

/// The delivery pipeline of the relayer.
///
/// Resolves the validator set of the source subnet at the current platform
/// height, gathers attestations in rounds until they carry the required
/// share of its weight, then submits the message. Running out of rounds
/// defers the message instead of failing it.
#[derive(TypedBuilder)]
pub struct AttestedDelivery<V, C, D> {
    validators: Arc<CanonicalValidatorClient<V>>,
    collector: C,
    submitter: D,
    requirement: QuorumRequirement,
    #[builder(default)]
    config: SignatureCollectionConfig,
}

impl<V, C, D> AttestedDelivery<V, C, D>
where
    V: PlatformClient,
    C: SignatureCollector,
    D: DestinationSubmitter,
{
    async fn collect(
        &self,
        message: &ObservedMessage,
        set: &ValidatorSet,
    ) -> crate::Result<Option<AttestationSet>> {
        let mut attestations = AttestationSet::new();
        let rounds = self.config.max_collection_rounds.max(1);
        for round in 1..=rounds {
            let missing: Vec<NodeId> = set
                .validators()
                .iter()
                .filter(|v| {
                    !v.node_ids.iter().any(|n| attestations.get(n).is_some())
                })
                .flat_map(|v| v.node_ids.iter().copied())
                .collect();
            let answers = self
                .collector
                .request_attestations(message, set, &missing)
                .await?;
            for (node, attestation) in answers {
                if let Err(e) = attestations.accept(set, node, attestation) {
                    tracing::debug!(error = %e, "ignoring attestation");
                }
            }
            if has_quorum(set, &attestations, self.requirement) {
                tracing::debug!(
                    round,
                    signers = attestations.len(),
                    "quorum reached",
                );
                return Ok(Some(attestations));
            }
            tracing::trace!(
                round,
                signed_weight = signed_weight(set, attestations.signers()),
                total_weight = set.total_weight(),
                "quorum not reached yet",
            );
            if round < rounds {
                tokio::time::sleep(Duration::from_millis(
                    self.config.round_interval,
                ))
                .await;
            }
        }
        Ok(None)
    }
}

#[async_trait::async_trait]
impl<V, C, D> DeliveryPipeline for AttestedDelivery<V, C, D>
where
    V: PlatformClient,
    C: SignatureCollector,
    D: DestinationSubmitter,
{
    #[tracing::instrument(
        skip_all,
        fields(
            source_blockchain = %message.source_blockchain_id,
            position = %message.position,
        ),
    )]
    async fn deliver(
        &self,
        message: &ObservedMessage,
    ) -> crate::Result<DeliveryOutcome> {
        let subnet_id = self
            .validators
            .subnet_for_chain(message.source_blockchain_id)
            .await?;
        let height = self.validators.current_height().await?;
        let set = self
            .validators
            .validator_set_at_height(subnet_id, height)
            .await?;

        let Some(attestations) = self.collect(message, &set).await? else {
            tracing::info!(
                subnet_id = %subnet_id,
                p_chain_height = height,
                "Not enough attestations, deferring the message",
            );
            return Ok(DeliveryOutcome::Deferred);
        };

        match self.submitter.submit(message, &set, &attestations).await? {
            Submission::Accepted => Ok(DeliveryOutcome::Delivered),
            Submission::Refused => Ok(DeliveryOutcome::Failed),
        }
    }
}
