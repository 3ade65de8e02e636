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
//! # Relayer Utils Module 🕸️
//!
//! Errors, retry policies, metrics and probe targets shared by every crate
//! of the warp relayer.

/// Metrics functionality
pub mod metric;
/// A module used for debugging relayer lifecycle, sync state, or other relayer state.
pub mod probe;
/// Retry functionality
pub mod retry;

/// An enum of all possible errors that could be encountered during the execution of the Warp
/// Relayer.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An Io error occurred.
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// JSON Error occurred.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    /// Config loading error.
    #[error(transparent)]
    Config(#[from] config::ConfigError),
    /// Error while parsing the config files.
    #[error("Config parse error: {}", _0)]
    ParseConfig(#[from] serde_path_to_error::Error<config::ConfigError>),
    /// Error while iterating over a glob pattern.
    #[error(transparent)]
    GlobPattern(#[from] glob::PatternError),
    /// Error from Glob Iterator.
    #[error(transparent)]
    Glob(#[from] glob::GlobError),
    /// Error while parsing a URL.
    #[error(transparent)]
    Url(#[from] url::ParseError),
    /// HTTP Error
    #[error(transparent)]
    Hyper(#[from] hyper::Error),
    /// Prometheus registration or encoding error.
    #[error(transparent)]
    PrometheusError(#[from] prometheus::Error),
    /// The checkpoint storage could not be read or written.
    #[error("Storage unavailable: {}", _0)]
    StorageUnavailable(Box<dyn std::error::Error + Send + Sync>),
    /// A checkpoint write would move the stored position backwards.
    #[error(
        "Non monotonic checkpoint for {key}: stored {stored}, attempted {attempted}"
    )]
    NonMonotonic {
        /// The checkpoint key.
        key: String,
        /// The position currently stored.
        stored: String,
        /// The rejected position.
        attempted: String,
    },
    /// The upstream API could not be reached or answered with a server error.
    #[error("Upstream {endpoint} unavailable: {reason}")]
    UpstreamUnavailable {
        /// The endpoint that failed.
        endpoint: String,
        /// What went wrong.
        reason: String,
    },
    /// The upstream API does not implement the requested method.
    #[error("Method {method} is not supported by the upstream API")]
    MethodUnsupported {
        /// The RPC method name.
        method: String,
    },
    /// The upstream API answered the call with an error object.
    #[error("RPC {method} failed with code {code}: {message}")]
    JsonRpc {
        /// The RPC method name.
        method: String,
        /// JSON-RPC error code.
        code: i64,
        /// JSON-RPC error message.
        message: String,
    },
    /// The subnet has no validator able to attest.
    #[error("Subnet {subnet_id} has no registered validators")]
    EmptySubnet {
        /// The subnet that was queried.
        subnet_id: String,
    },
    /// The sum of validator weights does not fit in a u64.
    #[error("Total validator weight of subnet {subnet_id} overflows")]
    WeightOverflow {
        /// The subnet that was queried.
        subnet_id: String,
    },
    /// An attestation was offered by a node outside the validator set.
    #[error("Node {node_id} is not a member of the validator set")]
    UnknownValidator {
        /// The offending node.
        node_id: String,
    },
    /// Malformed blockchain, subnet or node identifier.
    #[error("Invalid identifier: {}", _0)]
    InvalidId(String),
    /// Malformed account address.
    #[error("Invalid address: {}", _0)]
    InvalidAddress(String),
    /// The configuration is well formed but not usable.
    #[error("Invalid configuration: {}", _0)]
    InvalidConfig(String),
    /// The live message feed of a chain ended.
    #[error("Message subscription closed for chain {chain_id}")]
    SubscriptionClosed {
        /// The source chain.
        chain_id: String,
    },
    /// The delivery of a message did not reach a terminal outcome in time.
    #[error("Delivery of message at {position} deferred")]
    DeliveryDeferred {
        /// Position of the pending message.
        position: String,
    },
}

impl From<sled::Error> for Error {
    fn from(e: sled::Error) -> Self {
        Self::StorageUnavailable(Box::new(e))
    }
}

impl Error {
    /// Whether retrying the failed operation later may succeed.
    ///
    /// Storage failures, ordering violations and configuration problems
    /// are fatal: retrying them would either loop forever or hide a bug.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::UpstreamUnavailable { .. }
                | Self::JsonRpc { .. }
                | Self::SubscriptionClosed { .. }
                | Self::DeliveryDeferred { .. }
        )
    }

    /// Wraps the error for [`backoff`], keeping fatal errors permanent.
    pub fn into_backoff(self) -> backoff::Error<Self> {
        if self.is_transient() {
            backoff::Error::transient(self)
        } else {
            backoff::Error::permanent(self)
        }
    }
}

/// A type alias for the result for warp relayer, that uses the `Error` enum.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_and_ordering_errors_are_fatal() {
        let err = Error::NonMonotonic {
            key: "k".into(),
            stored: "10:0".into(),
            attempted: "9:0".into(),
        };
        assert!(!err.is_transient());
        assert!(!Error::EmptySubnet {
            subnet_id: "s".into()
        }
        .is_transient());
        let err = Error::from(sled::Error::Unsupported("read only".into()));
        assert!(matches!(err, Error::StorageUnavailable(_)));
        assert!(matches!(err.into_backoff(), backoff::Error::Permanent(_)));
        let err = Error::StorageUnavailable("disk full".into());
        assert!(!err.is_transient());
    }

    #[test]
    fn upstream_errors_are_transient() {
        let err = Error::UpstreamUnavailable {
            endpoint: "http://localhost:9650".into(),
            reason: "connection refused".into(),
        };
        assert!(err.is_transient());
        assert!(matches!(
            err.into_backoff(),
            backoff::Error::Transient { .. }
        ));
    }
}
