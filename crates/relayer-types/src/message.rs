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

use serde::{Deserialize, Serialize};

use crate::{Address, Id};

/// The position of a message in its source chain history: block height
/// first, then the index of the message inside that block.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Default,
    Serialize,
    Deserialize,
)]
pub struct MessagePosition {
    /// Block height.
    pub height: u64,
    /// Index of the message inside the block.
    pub index: u32,
}

impl MessagePosition {
    /// Size of the encoded position.
    pub const ENCODED_LEN: usize = 12;

    /// Creates a new position.
    pub const fn new(height: u64, index: u32) -> Self {
        Self { height, index }
    }

    /// The greatest position inside block `height`. Recording it marks the
    /// whole block as handled.
    pub const fn end_of_block(height: u64) -> Self {
        Self {
            height,
            index: u32::MAX,
        }
    }

    /// Big endian encoding, so the byte order matches the position order.
    pub fn to_bytes(&self) -> [u8; Self::ENCODED_LEN] {
        let mut out = [0u8; Self::ENCODED_LEN];
        out[..8].copy_from_slice(&self.height.to_be_bytes());
        out[8..].copy_from_slice(&self.index.to_be_bytes());
        out
    }

    /// Decodes [`Self::to_bytes`]. Returns `None` for a value of the wrong size.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != Self::ENCODED_LEN {
            return None;
        }
        let mut height = [0u8; 8];
        let mut index = [0u8; 4];
        height.copy_from_slice(&bytes[..8]);
        index.copy_from_slice(&bytes[8..]);
        Some(Self {
            height: u64::from_be_bytes(height),
            index: u32::from_be_bytes(index),
        })
    }
}

impl std::fmt::Display for MessagePosition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.height, self.index)
    }
}

/// A cross-chain message seen on a source chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObservedMessage {
    /// Chain the message was emitted on.
    pub source_blockchain_id: Id,
    /// Contract that sent the message.
    pub origin_sender_address: Address,
    /// Chain the message is addressed to.
    pub destination_blockchain_id: Id,
    /// Contract that should receive the message.
    pub destination_address: Address,
    /// Where the message sits in the source chain history.
    pub position: MessagePosition,
    /// Opaque application payload.
    #[serde(with = "hex_bytes")]
    pub payload: Vec<u8>,
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        bytes: &[u8],
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("0x{}", hex::encode(bytes)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Vec<u8>, D::Error> {
        let value = String::deserialize(deserializer)?;
        hex::decode(value.trim_start_matches("0x"))
            .map_err(serde::de::Error::custom)
    }
}
