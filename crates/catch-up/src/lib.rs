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

#![warn(missing_docs)]
//! # Relayer Catch-Up Module 🕸️
//!
//! A module that replays and follows the messages of a source chain.
//!
//! ## Overview
//!
//! One [`CatchUpCoordinator`] runs per (instance, source chain) pair. On
//! start it reads the pair's checkpoint, replays every message between the
//! checkpoint and the head of the chain, then follows the live feed. Each
//! message goes through the admission policy and, when admitted, through a
//! [`DeliveryPipeline`]. The checkpoint is advanced once the message reached
//! a terminal outcome, strictly in position order.

use futures::stream::BoxStream;
use warp_relayer_types::ObservedMessage;
use warp_relayer_utils::Result;

mod coordinator;
/// Live feeds built on top of range queries.
pub mod polling;

pub use coordinator::CatchUpCoordinator;

/// A source chain, as seen by the coordinator.
///
/// Implementations return messages in ascending position order.
#[async_trait::async_trait]
pub trait MessageSource: Send + Sync {
    /// Height of the last finalized block.
    async fn head_height(&self) -> Result<u64>;

    /// Messages emitted in blocks `from..=to`.
    async fn messages_in_range(
        &self,
        from: u64,
        to: u64,
    ) -> Result<Vec<ObservedMessage>>;

    /// Messages emitted from now on. Items are buffered until consumed.
    async fn subscribe(
        &self,
    ) -> Result<BoxStream<'static, Result<ObservedMessage>>>;
}

#[async_trait::async_trait]
impl<T: MessageSource + ?Sized> MessageSource for std::sync::Arc<T> {
    async fn head_height(&self) -> Result<u64> {
        (**self).head_height().await
    }

    async fn messages_in_range(
        &self,
        from: u64,
        to: u64,
    ) -> Result<Vec<ObservedMessage>> {
        (**self).messages_in_range(from, to).await
    }

    async fn subscribe(
        &self,
    ) -> Result<BoxStream<'static, Result<ObservedMessage>>> {
        (**self).subscribe().await
    }
}

/// How one delivery attempt of an admitted message ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// The destination accepted the message.
    Delivered,
    /// The destination refused the message for good.
    Failed,
    /// Not enough attestations yet. The message has to be tried again.
    Deferred,
}

impl DeliveryOutcome {
    /// Whether the checkpoint may move past the message.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Deferred)
    }
}

/// Signature collection and submission of admitted messages.
#[async_trait::async_trait]
pub trait DeliveryPipeline: Send + Sync {
    /// Tries to deliver `message` once.
    ///
    /// Errors are retried when [`warp_relayer_utils::Error::is_transient`]
    /// holds and fault the coordinator otherwise.
    async fn deliver(&self, message: &ObservedMessage) -> Result<DeliveryOutcome>;
}

#[async_trait::async_trait]
impl<T: DeliveryPipeline + ?Sized> DeliveryPipeline for std::sync::Arc<T> {
    async fn deliver(&self, message: &ObservedMessage) -> Result<DeliveryOutcome> {
        (**self).deliver(message).await
    }
}
