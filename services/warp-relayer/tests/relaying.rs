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

//! Runs whole relayer instances against in-process chains.

use std::collections::HashMap;
use std::net::TcpListener;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{BoxStream, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnboundedReceiverStream;
use warp_relayer::delivery::{
    DestinationSubmitter, SignatureCollector, Submission,
};
use warp_relayer::service::{build_router, ignite_with_platform, ChainBackend};
use warp_relayer::Result;
use warp_relayer_catch_up::MessageSource;
use warp_relayer_config::{SourceBlockchainConfig, WarpRelayerConfig};
use warp_relayer_context::{CoordinatorState, RelayerContext};
use warp_relayer_store::{CheckpointStore, FileStore, InMemoryStore};
use warp_relayer_types::{
    Address, Id, MessagePosition, NodeId, ObservedMessage, PublicKey,
    ValidatorSet, ValidatorSetHeight,
};
use warp_relayer_validators::{
    Attestation, AttestationSet, PlatformClient, RawValidator,
};

const CHAIN_A: &str = "SeLqn3UAUoRymWmwW7axrzJK7JfNaBR2cHCryA6cFscgkny8";
const CHAIN_B: &str = "tHggZ5wKxbrxY2Yt1EAviybdDcKk9Mq4DZQiwKCDWkFWVpsj";
const DESTINATION: &str = "yH8D7ThNJkxmtkuv2jgBa4P1Rn3Qpr4pPr7QYNfcdoS6k6HWp";
const ALLOWED: u8 = 0xaa;
const RECEIVER: u8 = 0xcc;
/// Payload the destination refuses.
const REFUSED: &[u8] = b"refuse me";

fn id(cb58: &str) -> Id {
    cb58.parse().unwrap()
}

fn config() -> WarpRelayerConfig {
    serde_json::from_value(serde_json::json!({
        "p-chain-api": { "base-url": "http://127.0.0.1:9650" },
        "quorum-percentage": 67,
        "catch-up": {
            "max-blocks-per-step": 2,
            "polling-interval": 10,
            "retry-interval": 10,
            "max-delivery-attempts": 3
        },
        "signature-collection": {
            "max-collection-rounds": 2,
            "round-interval": 5
        },
        "source-blockchains": [
            {
                "blockchain-id": CHAIN_A,
                "allowed-origin-sender-addresses": [
                    "0x00000000000000000000000000000000000000aa"
                ]
            },
            {
                "blockchain-id": CHAIN_B,
                "subnet-id": "2q9e4r6Mu3U68nU1fYjgbR6JvwrRx36CohpAX5UQxse55x1Q5"
            }
        ],
        "destination-blockchains": [{
            "blockchain-id": DESTINATION,
            "allowed-destination-addresses": [
                "0x00000000000000000000000000000000000000cc"
            ]
        }]
    }))
    .unwrap()
}

fn msg(chain: &str, height: u64, sender: u8) -> ObservedMessage {
    ObservedMessage {
        source_blockchain_id: id(chain),
        origin_sender_address: Address::new([sender; 20]),
        destination_blockchain_id: id(DESTINATION),
        destination_address: Address::new([RECEIVER; 20]),
        position: MessagePosition::new(height, 0),
        payload: vec![height as u8],
    }
}

struct Chain {
    history: Mutex<Vec<ObservedMessage>>,
    head: Mutex<u64>,
    live: Mutex<Option<mpsc::UnboundedReceiver<Result<ObservedMessage>>>>,
}

impl Chain {
    fn new(
        history: Vec<ObservedMessage>,
    ) -> (Arc<Self>, mpsc::UnboundedSender<Result<ObservedMessage>>) {
        let head = history.iter().map(|m| m.position.height).max().unwrap_or(0);
        let (tx, rx) = mpsc::unbounded_channel();
        let chain = Arc::new(Self {
            history: Mutex::new(history),
            head: Mutex::new(head),
            live: Mutex::new(Some(rx)),
        });
        (chain, tx)
    }
}

#[async_trait::async_trait]
impl MessageSource for Chain {
    async fn head_height(&self) -> Result<u64> {
        Ok(*self.head.lock())
    }

    async fn messages_in_range(
        &self,
        from: u64,
        to: u64,
    ) -> Result<Vec<ObservedMessage>> {
        Ok(self
            .history
            .lock()
            .iter()
            .filter(|m| (from..=to).contains(&m.position.height))
            .cloned()
            .collect())
    }

    async fn subscribe(
        &self,
    ) -> Result<BoxStream<'static, Result<ObservedMessage>>> {
        match self.live.lock().take() {
            Some(rx) => Ok(UnboundedReceiverStream::new(rx).boxed()),
            None => Ok(futures::stream::pending().boxed()),
        }
    }
}

/// Three validators of equal weight, node 3 never answers.
struct Platform;

#[async_trait::async_trait]
impl PlatformClient for Platform {
    async fn height(&self) -> Result<u64> {
        Ok(100)
    }

    async fn validators_at(
        &self,
        _subnet_id: Id,
        _height: ValidatorSetHeight,
    ) -> Result<Vec<RawValidator>> {
        Ok((1..=3u8)
            .map(|i| RawValidator {
                node_id: NodeId::new([i; 20]),
                public_key: Some(PublicKey::new([i; PublicKey::LEN])),
                weight: 100,
            })
            .collect())
    }

    async fn current_validators(
        &self,
        subnet_id: Id,
    ) -> Result<Vec<RawValidator>> {
        self.validators_at(subnet_id, ValidatorSetHeight::Current).await
    }

    async fn validated_by(&self, _blockchain_id: Id) -> Result<Id> {
        Ok(Id::new([9; 32]))
    }
}

struct Collector;

#[async_trait::async_trait]
impl SignatureCollector for Collector {
    async fn request_attestations(
        &self,
        message: &ObservedMessage,
        _validators: &ValidatorSet,
        nodes: &[NodeId],
    ) -> Result<Vec<(NodeId, Attestation)>> {
        Ok(nodes
            .iter()
            .filter(|n| **n != NodeId::new([3; 20]))
            .map(|n| (*n, Attestation(message.payload.clone())))
            .collect())
    }
}

#[derive(Default)]
struct Destination {
    accepted: Mutex<Vec<ObservedMessage>>,
}

#[async_trait::async_trait]
impl DestinationSubmitter for Destination {
    async fn submit(
        &self,
        message: &ObservedMessage,
        _validators: &ValidatorSet,
        attestations: &AttestationSet,
    ) -> Result<Submission> {
        assert_eq!(attestations.len(), 2);
        if message.payload == REFUSED {
            return Ok(Submission::Refused);
        }
        self.accepted.lock().push(message.clone());
        Ok(Submission::Accepted)
    }
}

struct Backend {
    chains: HashMap<Id, Arc<Chain>>,
    destination: Arc<Destination>,
}

impl ChainBackend for Backend {
    fn message_source(
        &self,
        chain: &SourceBlockchainConfig,
    ) -> Result<Arc<dyn MessageSource>> {
        let source: Arc<dyn MessageSource> =
            match self.chains.get(&chain.blockchain_id) {
                Some(source) => source.clone(),
                None => Chain::new(Vec::new()).0,
            };
        Ok(source)
    }

    fn signature_collector(&self) -> Arc<dyn SignatureCollector> {
        Arc::new(Collector)
    }

    fn destination_submitter(&self) -> Arc<dyn DestinationSubmitter> {
        self.destination.clone()
    }
}

async fn eventually<F: Fn() -> bool>(what: &str, check: F) {
    for _ in 0..500 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

async fn stop(ctx: &RelayerContext, handles: Vec<JoinHandle<()>>) {
    ctx.shutdown();
    for handle in handles {
        handle.await.unwrap();
    }
}

fn heights(messages: &[ObservedMessage]) -> Vec<u64> {
    messages.iter().map(|m| m.position.height).collect()
}

#[tokio::test]
async fn relays_admitted_messages_from_every_chain() {
    let mut refused = msg(CHAIN_A, 3, ALLOWED);
    refused.payload = REFUSED.to_vec();
    let (chain_a, live_a) = Chain::new(vec![
        msg(CHAIN_A, 1, ALLOWED),
        msg(CHAIN_A, 2, 0xbb),
        refused,
        msg(CHAIN_A, 4, ALLOWED),
    ]);
    let (chain_b, _live_b) = Chain::new(vec![msg(CHAIN_B, 7, 0xbb)]);
    let destination = Arc::new(Destination::default());
    let backend = Backend {
        chains: HashMap::from([
            (id(CHAIN_A), chain_a.clone()),
            (id(CHAIN_B), chain_b),
        ]),
        destination: destination.clone(),
    };
    let ctx = RelayerContext::new(config()).unwrap();
    let store = InMemoryStore::default();
    let handles =
        ignite_with_platform(&ctx, store.clone(), &backend, Platform).unwrap();

    let key_a = ctx.checkpoint_key(id(CHAIN_A));
    let key_b = ctx.checkpoint_key(id(CHAIN_B));
    eventually("the history of both chains", || {
        store.load(&key_a).unwrap() == Some(MessagePosition::end_of_block(4))
            && store.load(&key_b).unwrap()
                == Some(MessagePosition::end_of_block(7))
    })
    .await;
    {
        let mut accepted = destination.accepted.lock().clone();
        accepted.sort_by_key(|m| m.position);
        // the unlisted sender of chain A is dropped, chain B takes anyone.
        assert_eq!(heights(&accepted), vec![1, 4, 7]);
    }

    *chain_a.head.lock() = 5;
    live_a.send(Ok(msg(CHAIN_A, 5, ALLOWED))).unwrap();
    eventually("the live message", || destination.accepted.lock().len() == 4)
        .await;
    eventually("the live checkpoint", || {
        store.load(&key_a).unwrap() == Some(MessagePosition::new(5, 0))
    })
    .await;
    assert_eq!(ctx.health.state(&key_a), Some(CoordinatorState::Live));

    let delivered = ctx
        .metrics
        .messages_delivered
        .with_label_values(&[
            ctx.namespace().short().as_str(),
            id(CHAIN_A).to_string().as_str(),
        ])
        .get();
    let failed = ctx
        .metrics
        .messages_failed
        .with_label_values(&[
            ctx.namespace().short().as_str(),
            id(CHAIN_A).to_string().as_str(),
        ])
        .get();
    assert_eq!((delivered, failed), (3, 1));
    stop(&ctx, handles).await;
}

#[tokio::test]
async fn restarted_instance_resumes_from_its_checkpoints() {
    let dir = tempfile::tempdir().unwrap();
    let history: Vec<_> = (1..=4).map(|h| msg(CHAIN_B, h, 0x01)).collect();

    {
        let (chain, _live) = Chain::new(history[..2].to_vec());
        let destination = Arc::new(Destination::default());
        let backend = Backend {
            chains: HashMap::from([(id(CHAIN_B), chain)]),
            destination: destination.clone(),
        };
        let ctx = RelayerContext::new(config()).unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        let key = ctx.checkpoint_key(id(CHAIN_B));
        let handles =
            ignite_with_platform(&ctx, store.clone(), &backend, Platform)
                .unwrap();
        eventually("the first run", || {
            store.load(&key).unwrap() == Some(MessagePosition::end_of_block(2))
        })
        .await;
        assert_eq!(heights(&destination.accepted.lock()), vec![1, 2]);
        stop(&ctx, handles).await;
    }

    let (chain, _live) = Chain::new(history);
    let destination = Arc::new(Destination::default());
    let backend = Backend {
        chains: HashMap::from([(id(CHAIN_B), chain)]),
        destination: destination.clone(),
    };
    let ctx = RelayerContext::new(config()).unwrap();
    let store = FileStore::open(dir.path()).unwrap();
    let key = ctx.checkpoint_key(id(CHAIN_B));
    let handles =
        ignite_with_platform(&ctx, store.clone(), &backend, Platform).unwrap();
    eventually("the second run", || {
        store.load(&key).unwrap() == Some(MessagePosition::end_of_block(4))
    })
    .await;
    assert_eq!(heights(&destination.accepted.lock()), vec![3, 4]);
    stop(&ctx, handles).await;
}

#[tokio::test]
async fn instances_share_one_store_location() {
    let dir = tempfile::tempdir().unwrap();
    let history = vec![msg(CHAIN_A, 1, ALLOWED), msg(CHAIN_A, 2, 0xbb)];
    let mut other = config();
    other.source_blockchains[0].allowed_origin_sender_addresses =
        vec![Address::new([0xbb; 20])];

    let mut runs = Vec::new();
    for config in [config(), other] {
        let (chain, live) = Chain::new(history.clone());
        let destination = Arc::new(Destination::default());
        let backend = Backend {
            chains: HashMap::from([(id(CHAIN_A), chain)]),
            destination: destination.clone(),
        };
        let ctx = RelayerContext::new(config).unwrap();
        // every instance opens the location on its own.
        let store = FileStore::open(dir.path()).unwrap();
        let handles =
            ignite_with_platform(&ctx, store.clone(), &backend, Platform)
                .unwrap();
        runs.push((ctx, store, destination, handles, live));
    }
    assert_ne!(runs[0].0.namespace(), runs[1].0.namespace());

    for (ctx, store, ..) in &runs {
        let key = ctx.checkpoint_key(id(CHAIN_A));
        eventually("the history of every instance", || {
            store.load(&key).unwrap() == Some(MessagePosition::end_of_block(2))
        })
        .await;
    }
    assert_eq!(heights(&runs[0].2.accepted.lock()), vec![1]);
    assert_eq!(heights(&runs[1].2.accepted.lock()), vec![2]);
    for (ctx, _, _, handles, _) in runs {
        stop(&ctx, handles).await;
    }
}

#[tokio::test]
async fn health_and_metrics_are_served() {
    let ctx = RelayerContext::new(config()).unwrap();
    let key = ctx.checkpoint_key(id(CHAIN_A));
    let state = ctx.health.register(key);
    state.send_replace(CoordinatorState::Live);
    ctx.metrics
        .messages_observed
        .with_label_values(&["ns", "chain"])
        .inc();

    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let app = build_router(ctx.clone()).into_make_service();
    let server = tokio::spawn(axum::Server::from_tcp(listener).unwrap().serve(app));
    let base = format!("http://{addr}");

    let res = reqwest::get(format!("{base}/health")).await.unwrap();
    assert_eq!(res.status(), reqwest::StatusCode::OK);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["healthy"], true);
    assert_eq!(body["pairs"][0]["state"], "live");
    assert_eq!(body["pairs"][0]["sourceBlockchain"], CHAIN_A);

    state.send_replace(CoordinatorState::Faulted);
    let res = reqwest::get(format!("{base}/health")).await.unwrap();
    assert_eq!(res.status(), reqwest::StatusCode::SERVICE_UNAVAILABLE);

    let metrics = reqwest::get(format!("{base}/metrics"))
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(metrics.contains("warp_relayer_messages_observed"));
    server.abort();
}
