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

//! Platform chain API access.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use warp_relayer_config::PChainApiConfig;
use warp_relayer_types::{Id, NodeId, PublicKey, ValidatorSetHeight};
use warp_relayer_utils::metric::Metrics;
use warp_relayer_utils::Error;

/// Path of the platform chain API below the node base url.
pub const P_CHAIN_ENDPOINT: &str = "ext/bc/P";

/// JSON-RPC code returned by the node for a method it does not serve.
const METHOD_NOT_FOUND: i64 = -32601;

/// A validator as reported by the API, before canonical ordering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawValidator {
    /// The node.
    pub node_id: NodeId,
    /// Attestation key, absent for nodes that never registered one.
    pub public_key: Option<PublicKey>,
    /// Stake weight.
    pub weight: u64,
}

/// Queries the platform chain answers.
#[async_trait::async_trait]
pub trait PlatformClient: Send + Sync {
    /// Height of the last accepted platform chain block.
    async fn height(&self) -> crate::Result<u64>;

    /// Validators of `subnet_id` at `height`. Fails with
    /// [`Error::MethodUnsupported`] when the node does not serve
    /// height-scoped queries.
    async fn validators_at(
        &self,
        subnet_id: Id,
        height: ValidatorSetHeight,
    ) -> crate::Result<Vec<RawValidator>>;

    /// The live validators of `subnet_id`, whatever the height.
    async fn current_validators(
        &self,
        subnet_id: Id,
    ) -> crate::Result<Vec<RawValidator>>;

    /// The subnet that validates `blockchain_id`.
    async fn validated_by(&self, blockchain_id: Id) -> crate::Result<Id>;
}

#[async_trait::async_trait]
impl<T: PlatformClient + ?Sized> PlatformClient for Arc<T> {
    async fn height(&self) -> crate::Result<u64> {
        (**self).height().await
    }

    async fn validators_at(
        &self,
        subnet_id: Id,
        height: ValidatorSetHeight,
    ) -> crate::Result<Vec<RawValidator>> {
        (**self).validators_at(subnet_id, height).await
    }

    async fn current_validators(
        &self,
        subnet_id: Id,
    ) -> crate::Result<Vec<RawValidator>> {
        (**self).current_validators(subnet_id).await
    }

    async fn validated_by(&self, blockchain_id: Id) -> crate::Result<Id> {
        (**self).validated_by(blockchain_id).await
    }
}

/// The node encodes `uint64` values as strings; older versions used numbers.
#[derive(Debug, Clone, Copy)]
struct JsonU64(u64);

impl<'de> Deserialize<'de> for JsonU64 {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Number(u64),
            Text(String),
        }
        match Repr::deserialize(deserializer)? {
            Repr::Number(n) => Ok(Self(n)),
            Repr::Text(s) => {
                s.parse().map(Self).map_err(serde::de::Error::custom)
            }
        }
    }
}

#[derive(Serialize)]
struct JsonRpcRequest<'a, P> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: P,
}

#[derive(Deserialize)]
struct JsonRpcResponse<R> {
    #[serde(default = "Option::default")]
    result: Option<R>,
    #[serde(default)]
    error: Option<JsonRpcErrorObject>,
}

#[derive(Deserialize)]
struct JsonRpcErrorObject {
    code: i64,
    #[serde(default)]
    message: String,
}

#[derive(Deserialize)]
struct HeightReply {
    height: JsonU64,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ValidatorAtEntry {
    Detailed {
        #[serde(rename = "publicKey", default)]
        public_key: Option<PublicKey>,
        weight: JsonU64,
    },
    Weight(JsonU64),
}

#[derive(Deserialize)]
struct ValidatorsAtReply {
    validators: HashMap<NodeId, ValidatorAtEntry>,
}

#[derive(Deserialize)]
struct Signer {
    #[serde(rename = "publicKey")]
    public_key: PublicKey,
}

#[derive(Deserialize)]
struct CurrentValidator {
    #[serde(rename = "nodeID")]
    node_id: NodeId,
    #[serde(alias = "stakeAmount")]
    weight: JsonU64,
    #[serde(default)]
    signer: Option<Signer>,
}

#[derive(Deserialize)]
struct CurrentValidatorsReply {
    #[serde(default)]
    validators: Vec<CurrentValidator>,
}

#[derive(Deserialize)]
struct ValidatedByReply {
    #[serde(rename = "subnetID")]
    subnet_id: Id,
}

/// [`PlatformClient`] speaking JSON-RPC to `<base-url>/ext/bc/P`.
pub struct JsonRpcPlatformClient {
    http: reqwest::Client,
    endpoint: reqwest::Url,
    base_url: String,
    query: Vec<(String, String)>,
    metrics: Option<Arc<Metrics>>,
    next_id: AtomicU64,
}

impl std::fmt::Debug for JsonRpcPlatformClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonRpcPlatformClient")
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl JsonRpcPlatformClient {
    /// Builds a client from the `p-chain-api` section of the config.
    pub fn new(config: &PChainApiConfig) -> crate::Result<Self> {
        let endpoint = config.base_url.endpoint(P_CHAIN_ENDPOINT)?;
        let mut headers = HeaderMap::new();
        for (name, value) in &config.http_headers {
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
                Error::InvalidConfig(format!("http header {name}: {e}"))
            })?;
            let value = HeaderValue::from_str(value).map_err(|e| {
                Error::InvalidConfig(format!("http header {name}: {e}"))
            })?;
            headers.insert(name, value);
        }
        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| Error::InvalidConfig(format!("http client: {e}")))?;
        let mut query: Vec<_> = config
            .query_parameters
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        query.sort();
        Ok(Self {
            http,
            endpoint,
            base_url: config.base_url.to_string(),
            query,
            metrics: None,
            next_id: AtomicU64::new(1),
        })
    }

    /// Records the latency of every call in `p_chain_api_call_latency_ms`.
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    fn unavailable(&self, reason: impl std::fmt::Display) -> Error {
        Error::UpstreamUnavailable {
            endpoint: self.base_url.clone(),
            reason: reason.to_string(),
        }
    }

    #[tracing::instrument(skip(self, params), fields(base_url = %self.base_url))]
    async fn call<P, R>(&self, method: &str, params: P) -> crate::Result<R>
    where
        P: Serialize + Send,
        R: DeserializeOwned,
    {
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method,
            params,
        };
        let started = Instant::now();
        let response = self
            .http
            .post(self.endpoint.clone())
            .query(&self.query)
            .json(&request)
            .send()
            .await;
        if let Some(metrics) = &self.metrics {
            metrics
                .p_chain_api_call_latency_ms
                .with_label_values(&[self.base_url.as_str()])
                .set(started.elapsed().as_secs_f64() * 1_000.0);
        }
        let response = response.map_err(|e| self.unavailable(e))?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(Error::MethodUnsupported {
                method: method.to_owned(),
            });
        }
        if !status.is_success() {
            return Err(self.unavailable(format!("HTTP {status}")));
        }
        let reply: JsonRpcResponse<R> =
            response.json().await.map_err(|e| self.unavailable(e))?;
        match (reply.result, reply.error) {
            (_, Some(e)) if e.code == METHOD_NOT_FOUND => {
                Err(Error::MethodUnsupported {
                    method: method.to_owned(),
                })
            }
            (_, Some(e)) => Err(Error::JsonRpc {
                method: method.to_owned(),
                code: e.code,
                message: e.message,
            }),
            (Some(result), None) => Ok(result),
            (None, None) => Err(Error::JsonRpc {
                method: method.to_owned(),
                code: 0,
                message: "response has neither result nor error".into(),
            }),
        }
    }
}

#[async_trait::async_trait]
impl PlatformClient for JsonRpcPlatformClient {
    async fn height(&self) -> crate::Result<u64> {
        let reply: HeightReply =
            self.call("platform.getHeight", json!({})).await?;
        Ok(reply.height.0)
    }

    async fn validators_at(
        &self,
        subnet_id: Id,
        height: ValidatorSetHeight,
    ) -> crate::Result<Vec<RawValidator>> {
        let height = match height {
            ValidatorSetHeight::At(h) => json!(h),
            ValidatorSetHeight::Proposed | ValidatorSetHeight::Current => {
                json!("proposed")
            }
        };
        let reply: ValidatorsAtReply = self
            .call(
                "platform.getValidatorsAt",
                json!({ "subnetID": subnet_id, "height": height }),
            )
            .await?;
        Ok(reply
            .validators
            .into_iter()
            .map(|(node_id, entry)| match entry {
                ValidatorAtEntry::Detailed { public_key, weight } => {
                    RawValidator {
                        node_id,
                        public_key,
                        weight: weight.0,
                    }
                }
                ValidatorAtEntry::Weight(weight) => RawValidator {
                    node_id,
                    public_key: None,
                    weight: weight.0,
                },
            })
            .collect())
    }

    async fn current_validators(
        &self,
        subnet_id: Id,
    ) -> crate::Result<Vec<RawValidator>> {
        let reply: CurrentValidatorsReply = self
            .call(
                "platform.getCurrentValidators",
                json!({ "subnetID": subnet_id }),
            )
            .await?;
        Ok(reply
            .validators
            .into_iter()
            .map(|v| RawValidator {
                node_id: v.node_id,
                public_key: v.signer.map(|s| s.public_key),
                weight: v.weight.0,
            })
            .collect())
    }

    async fn validated_by(&self, blockchain_id: Id) -> crate::Result<Id> {
        let reply: ValidatedByReply = self
            .call(
                "platform.validatedBy",
                json!({ "blockchainID": blockchain_id }),
            )
            .await?;
        Ok(reply.subnet_id)
    }
}
