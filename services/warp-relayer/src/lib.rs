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

#![deny(unsafe_code)]
#![warn(missing_docs)]

//! # Warp Relayer Crate 🕸️
//!
//! A crate used to relay cross-chain messages between the chains of
//! validator subnets.
//!
//! ## Overview
//!
//! Every relayer instance is restricted by its configuration to a set of
//! source chains with the origin senders it accepts, and a set of
//! destination chains with the receivers it accepts. Several instances may
//! share one checkpoint database, each under its own namespace.
//!
//! For every configured source chain the relayer:
//!
//!   1. Replays the messages emitted since its last checkpoint, then follows
//!      the live feed of the chain.
//!   2. Drops the messages its allow-lists do not cover.
//!   3. Collects attestations from the validators of the source subnet
//!      until they carry the configured share of the subnet stake weight.
//!   4. Submits the attested message to its destination chain.
//!
//! The checkpoint of the chain moves past a message only once the message
//! was delivered, refused by its destination or rejected by the
//! allow-lists.
//!
//! The chain specific parts (reading source chains, requesting
//! attestations, submitting transactions) are plugged in through
//! [`service::ChainBackend`].
//!
//! # Features
//!
//! * `integration-tests`: logs in JSON, easy to parse from a test harness.
//!   By default, this is disabled.

/// Quorum-gated delivery pipeline.
pub mod delivery;
/// Health and metrics handlers.
pub mod routes;
/// A module for starting long-running tasks for message relaying.
pub mod service;

pub use warp_relayer_utils::{Error, Result};
