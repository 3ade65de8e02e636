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

//! Blockchain, subnet and node identifiers.
//!
//! Identifiers are rendered in the checksummed base58 form used by the
//! platform chain (`cb58`): the raw bytes followed by the last four bytes
//! of their SHA-256 digest, base58 encoded.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use warp_relayer_utils::Error;

const CHECKSUM_LEN: usize = 4;
const NODE_ID_PREFIX: &str = "NodeID-";

fn cb58_encode(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut buf = Vec::with_capacity(bytes.len() + CHECKSUM_LEN);
    buf.extend_from_slice(bytes);
    buf.extend_from_slice(&digest[digest.len() - CHECKSUM_LEN..]);
    bs58::encode(buf).into_string()
}

fn cb58_decode<const N: usize>(value: &str) -> Result<[u8; N], Error> {
    let raw = bs58::decode(value)
        .into_vec()
        .map_err(|e| Error::InvalidId(format!("{value}: {e}")))?;
    if raw.len() != N + CHECKSUM_LEN {
        return Err(Error::InvalidId(format!(
            "{value}: expected {} bytes but got {}",
            N + CHECKSUM_LEN,
            raw.len()
        )));
    }
    let (body, checksum) = raw.split_at(N);
    let digest = Sha256::digest(body);
    if checksum != &digest[digest.len() - CHECKSUM_LEN..] {
        return Err(Error::InvalidId(format!("{value}: bad checksum")));
    }
    let mut out = [0u8; N];
    out.copy_from_slice(body);
    Ok(out)
}

fn hex_decode<const N: usize>(value: &str) -> Result<[u8; N], Error> {
    let digits = value.strip_prefix("0x").unwrap_or(value);
    let raw = hex::decode(digits)
        .map_err(|e| Error::InvalidId(format!("{value}: {e}")))?;
    <[u8; N]>::try_from(raw.as_slice()).map_err(|_| {
        Error::InvalidId(format!(
            "{value}: expected {N} bytes but got {}",
            raw.len()
        ))
    })
}

/// A 32 byte identifier of a blockchain or a subnet.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Id([u8; 32]);

impl Id {
    /// The all zero id, which names the primary network subnet.
    pub const EMPTY: Id = Id([0u8; 32]);

    /// Creates an id from its raw bytes.
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// The raw bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Whether this is the primary network id.
    pub fn is_empty(&self) -> bool {
        *self == Self::EMPTY
    }
}

impl std::fmt::Display for Id {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", cb58_encode(&self.0))
    }
}

impl std::fmt::Debug for Id {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Id({self})")
    }
}

impl FromStr for Id {
    type Err = Error;

    /// Accepts both the cb58 and the `0x` prefixed hex forms.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.starts_with("0x") {
            hex_decode(s).map(Self)
        } else {
            cb58_decode(s).map(Self)
        }
    }
}

impl From<[u8; 32]> for Id {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl Serialize for Id {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Id {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        value.parse().map_err(serde::de::Error::custom)
    }
}

/// A 20 byte validator node identifier, rendered as `NodeID-<cb58>`.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct NodeId([u8; 20]);

impl NodeId {
    /// Creates a node id from its raw bytes.
    pub const fn new(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    /// The raw bytes.
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{NODE_ID_PREFIX}{}", cb58_encode(&self.0))
    }
}

impl std::fmt::Debug for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self}")
    }
}

impl FromStr for NodeId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let body = s.strip_prefix(NODE_ID_PREFIX).ok_or_else(|| {
            Error::InvalidId(format!("{s}: missing {NODE_ID_PREFIX} prefix"))
        })?;
        cb58_decode(body).map(Self)
    }
}

impl Serialize for NodeId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for NodeId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        value.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_id_is_the_primary_network() {
        let id: Id = "11111111111111111111111111111111LpoYY".parse().unwrap();
        assert_eq!(id, Id::EMPTY);
        assert!(id.is_empty());
        assert_eq!(id.to_string(), "11111111111111111111111111111111LpoYY");
    }

    #[test]
    fn cb58_and_hex_forms_agree() {
        let id = Id::new([7u8; 32]);
        let from_cb58: Id = id.to_string().parse().unwrap();
        let from_hex: Id =
            format!("0x{}", hex::encode([7u8; 32])).parse().unwrap();
        assert_eq!(from_cb58, id);
        assert_eq!(from_hex, id);
    }

    #[test]
    fn corrupted_checksum_is_rejected() {
        let mut s = Id::new([1u8; 32]).to_string();
        let last = s.pop().unwrap();
        s.push(if last == '2' { '3' } else { '2' });
        assert!(matches!(s.parse::<Id>(), Err(Error::InvalidId(_))));
    }

    #[test]
    fn node_id_requires_prefix() {
        let node = NodeId::new([9u8; 20]);
        let text = node.to_string();
        assert!(text.starts_with("NodeID-"));
        assert_eq!(text.parse::<NodeId>().unwrap(), node);
        let bare = text.trim_start_matches("NodeID-");
        assert!(bare.parse::<NodeId>().is_err());
    }

    #[test]
    fn ids_serialize_as_strings() {
        let id = Id::new([3u8; 32]);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{id}\""));
        let back: Id = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
