// Copyright 2026 Boundless Foundation, Inc.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Lending pool event source and block time resolution.

use std::{
    collections::{BTreeSet, HashMap},
    sync::Arc,
};

use alloy::{
    primitives::Address,
    providers::Provider,
    rpc::types::{BlockNumberOrTag, Filter, Log},
};
use anyhow::Context;
use async_trait::async_trait;

use crate::{
    cache::build_block_timestamp_cache,
    events::{decode_pool_log, EventBatches, EventKind},
};

/// Maximum block span of a single `eth_getLogs` request.
pub const LOG_QUERY_CHUNK_SIZE: u64 = 5000;

/// Where events and block times come from.
#[async_trait]
pub trait LendingEventSource: Send + Sync {
    /// Latest block number.
    async fn current_block(&self) -> anyhow::Result<u64>;

    /// Supply, withdraw, borrow and repay events for the target asset over the
    /// inclusive range `[from_block, to_block]`.
    async fn fetch_events(&self, from_block: u64, to_block: u64)
        -> anyhow::Result<EventBatches>;

    /// Timestamp of a block. `Ok(None)` if the block is not known.
    async fn block_timestamp(&self, block_number: u64) -> anyhow::Result<Option<u64>>;

    /// Timestamps for several blocks. Unknown blocks are absent from the map.
    async fn block_timestamps(&self, blocks: &BTreeSet<u64>) -> anyhow::Result<HashMap<u64, u64>> {
        let mut timestamps = HashMap::with_capacity(blocks.len());
        for &block_number in blocks {
            if let Some(timestamp) = self.block_timestamp(block_number).await? {
                timestamps.insert(block_number, timestamp);
            }
        }
        Ok(timestamps)
    }
}

#[async_trait]
impl<T: LendingEventSource + ?Sized> LendingEventSource for Arc<T> {
    async fn current_block(&self) -> anyhow::Result<u64> {
        (**self).current_block().await
    }

    async fn fetch_events(
        &self,
        from_block: u64,
        to_block: u64,
    ) -> anyhow::Result<EventBatches> {
        (**self).fetch_events(from_block, to_block).await
    }

    async fn block_timestamp(&self, block_number: u64) -> anyhow::Result<Option<u64>> {
        (**self).block_timestamp(block_number).await
    }

    async fn block_timestamps(&self, blocks: &BTreeSet<u64>) -> anyhow::Result<HashMap<u64, u64>> {
        (**self).block_timestamps(blocks).await
    }
}

/// Query logs in chunks to avoid rate limiting
pub async fn query_logs_chunked<P: Provider>(
    provider: &P,
    filter: Filter,
    from_block: u64,
    to_block: u64,
) -> anyhow::Result<Vec<Log>> {
    let mut all_logs = Vec::new();
    let mut current_from = from_block;

    while current_from <= to_block {
        let current_to = current_from.saturating_add(LOG_QUERY_CHUNK_SIZE - 1).min(to_block);

        let chunk_filter = filter
            .clone()
            .from_block(BlockNumberOrTag::Number(current_from))
            .to_block(BlockNumberOrTag::Number(current_to));

        let logs = provider.get_logs(&chunk_filter).await?;
        all_logs.extend(logs);

        current_from = current_to + 1;
    }

    Ok(all_logs)
}

/// Event source backed by an Aave v3 style pool contract.
pub struct RpcEventSource<P> {
    provider: P,
    pool_address: Address,
    asset: Address,
}

impl<P: Provider> RpcEventSource<P> {
    pub fn new(provider: P, pool_address: Address, asset: Address) -> Self {
        Self { provider, pool_address, asset }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// All four pool events, restricted to the target asset. The reserve is
    /// the first indexed argument of each of them.
    fn filter(&self) -> Filter {
        Filter::new()
            .address(self.pool_address)
            .event_signature(
                EventKind::ALL.iter().map(|kind| kind.signature_hash()).collect::<Vec<_>>(),
            )
            .topic1(self.asset.into_word())
    }
}

#[async_trait]
impl<P: Provider> LendingEventSource for RpcEventSource<P> {
    async fn current_block(&self) -> anyhow::Result<u64> {
        self.provider.get_block_number().await.context("Failed to get current block")
    }

    async fn fetch_events(
        &self,
        from_block: u64,
        to_block: u64,
    ) -> anyhow::Result<EventBatches> {
        let logs = query_logs_chunked(&self.provider, self.filter(), from_block, to_block)
            .await
            .with_context(|| format!("Failed to get pool logs for {from_block}..={to_block}"))?;

        let mut batches = EventBatches::default();
        for log in &logs {
            let (kind, event) = decode_pool_log(log)?;
            batches.push(kind, event);
        }

        tracing::debug!(
            "Fetched {} events ({} supply, {} withdraw, {} borrow, {} repay) in blocks {}..={}",
            batches.len(),
            batches.supply.len(),
            batches.withdraw.len(),
            batches.borrow.len(),
            batches.repay.len(),
            from_block,
            to_block
        );
        Ok(batches)
    }

    async fn block_timestamp(&self, block_number: u64) -> anyhow::Result<Option<u64>> {
        let block = self
            .provider
            .get_block_by_number(BlockNumberOrTag::Number(block_number))
            .await
            .with_context(|| format!("Failed to get block {block_number}"))?;
        Ok(block.map(|block| block.header.timestamp))
    }

    async fn block_timestamps(&self, blocks: &BTreeSet<u64>) -> anyhow::Result<HashMap<u64, u64>> {
        let mut cache = HashMap::with_capacity(blocks.len());
        build_block_timestamp_cache(&self.provider, blocks, &mut cache).await?;
        Ok(cache)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contracts::IPool;
    use alloy::{
        consensus::Header as ConsensusHeader,
        primitives::{address, B256, U256},
        providers::ProviderBuilder,
        rpc::types::{Block, BlockTransactions, Header},
        sol_types::SolEvent,
    };
    use serde_json::{json, Value};
    use tracing_test::traced_test;
    use wiremock::{matchers::method, Mock, MockServer, Request, Respond, ResponseTemplate};

    const POOL: Address = address!("a238dd80c259a72e81d7e4664a9801593f98d1c5");
    const USDC: Address = address!("833589fcd6edb6e08f4c7c32d4f71b54bda02913");
    const ALICE: Address = address!("00000000000000000000000000000000000a11ce");
    const BOB: Address = address!("0000000000000000000000000000000000000b0b");

    struct FixedChain(HashMap<u64, u64>);

    #[async_trait]
    impl LendingEventSource for FixedChain {
        async fn current_block(&self) -> anyhow::Result<u64> {
            Ok(self.0.keys().copied().max().unwrap_or_default())
        }

        async fn fetch_events(&self, _: u64, _: u64) -> anyhow::Result<EventBatches> {
            Ok(EventBatches::default())
        }

        async fn block_timestamp(&self, block_number: u64) -> anyhow::Result<Option<u64>> {
            Ok(self.0.get(&block_number).copied())
        }
    }

    /// JSON-RPC node answering from fixed logs and block timestamps.
    struct JsonRpcNode {
        logs: Vec<Log>,
        timestamps: HashMap<u64, u64>,
    }

    fn quantity(value: &Value) -> u64 {
        let hex = value.as_str().unwrap().trim_start_matches("0x");
        u64::from_str_radix(hex, 16).unwrap()
    }

    fn block(number: u64, timestamp: u64) -> Block {
        Block {
            header: Header {
                hash: B256::with_last_byte(number as u8),
                inner: ConsensusHeader { number, timestamp, ..Default::default() },
                total_difficulty: None,
                size: None,
            },
            uncles: vec![],
            transactions: BlockTransactions::Hashes(vec![]),
            withdrawals: None,
        }
    }

    impl Respond for JsonRpcNode {
        fn respond(&self, request: &Request) -> ResponseTemplate {
            let body: Value = serde_json::from_slice(&request.body).unwrap();
            let params = &body["params"];
            let result = match body["method"].as_str().unwrap() {
                "eth_blockNumber" => {
                    json!(format!("{:#x}", self.timestamps.keys().max().copied().unwrap_or(0)))
                }
                "eth_getLogs" => {
                    let range = quantity(&params[0]["fromBlock"])..=quantity(&params[0]["toBlock"]);
                    let logs: Vec<&Log> = self
                        .logs
                        .iter()
                        .filter(|log| range.contains(&log.block_number.unwrap()))
                        .collect();
                    serde_json::to_value(logs).unwrap()
                }
                "eth_getBlockByNumber" => {
                    let number = quantity(&params[0]);
                    match self.timestamps.get(&number) {
                        Some(timestamp) => serde_json::to_value(block(number, *timestamp)).unwrap(),
                        None => Value::Null,
                    }
                }
                other => panic!("unexpected RPC method {other}"),
            };
            ResponseTemplate::new(200)
                .set_body_json(json!({ "jsonrpc": "2.0", "id": body["id"], "result": result }))
        }
    }

    async fn start_node(node: JsonRpcNode) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("POST")).respond_with(node).mount(&server).await;
        server
    }

    fn rpc_source(server: &MockServer) -> RpcEventSource<impl Provider> {
        let url: url::Url = server.uri().parse().unwrap();
        let provider = ProviderBuilder::new().disable_recommended_fillers().connect_http(url);
        RpcEventSource::new(provider, POOL, USDC)
    }

    async fn requests_for(server: &MockServer, rpc_method: &str) -> Vec<Value> {
        server
            .received_requests()
            .await
            .unwrap()
            .iter()
            .map(|request| serde_json::from_slice::<Value>(&request.body).unwrap())
            .filter(|body| body["method"] == rpc_method)
            .collect()
    }

    fn pool_log(data: alloy::primitives::LogData, block_number: u64, log_index: u64) -> Log {
        Log {
            inner: alloy::primitives::Log { address: POOL, data },
            block_number: Some(block_number),
            log_index: Some(log_index),
            ..Default::default()
        }
    }

    /// A filter entry is either a single value or a list of alternatives.
    fn filter_values(entry: &Value) -> Vec<String> {
        match entry {
            Value::Array(values) => {
                values.iter().map(|v| v.as_str().unwrap().to_lowercase()).collect()
            }
            Value::String(value) => vec![value.to_lowercase()],
            other => panic!("unexpected filter entry {other}"),
        }
    }

    #[tokio::test]
    async fn unknown_blocks_are_left_out() {
        let chain = Arc::new(FixedChain(HashMap::from([(1, 100), (2, 112)])));

        let timestamps = chain.block_timestamps(&BTreeSet::from([1, 2, 3])).await.unwrap();
        assert_eq!(timestamps, HashMap::from([(1, 100), (2, 112)]));
        assert_eq!(chain.current_block().await.unwrap(), 2);
        assert_eq!(chain.block_timestamp(3).await.unwrap(), None);
    }

    #[tokio::test]
    async fn log_queries_are_split_at_chunk_edges() {
        let borrow = IPool::Borrow {
            reserve: USDC,
            user: ALICE,
            onBehalfOf: BOB,
            amount: U256::from(500),
            interestRateMode: 2,
            borrowRate: U256::ZERO,
            referralCode: 0,
        };
        let repay = IPool::Repay {
            reserve: USDC,
            user: BOB,
            repayer: ALICE,
            amount: U256::from(200),
            useATokens: false,
        };
        let server = start_node(JsonRpcNode {
            logs: vec![
                pool_log(borrow.encode_log_data(), LOG_QUERY_CHUNK_SIZE - 1, 4),
                pool_log(repay.encode_log_data(), LOG_QUERY_CHUNK_SIZE, 0),
            ],
            timestamps: HashMap::new(),
        })
        .await;
        let source = rpc_source(&server);

        let batches = source.fetch_events(0, 2 * LOG_QUERY_CHUNK_SIZE).await.unwrap();

        let bounds: Vec<(u64, u64)> = requests_for(&server, "eth_getLogs")
            .await
            .iter()
            .map(|body| {
                let filter = &body["params"][0];
                (quantity(&filter["fromBlock"]), quantity(&filter["toBlock"]))
            })
            .collect();
        assert_eq!(
            bounds,
            vec![
                (0, LOG_QUERY_CHUNK_SIZE - 1),
                (LOG_QUERY_CHUNK_SIZE, 2 * LOG_QUERY_CHUNK_SIZE - 1),
                (2 * LOG_QUERY_CHUNK_SIZE, 2 * LOG_QUERY_CHUNK_SIZE),
            ]
        );

        assert_eq!(batches.len(), 2);
        assert_eq!(batches.borrow[0].entity(), BOB);
        assert_eq!(batches.borrow[0].amount, U256::from(500));
        assert_eq!(batches.borrow[0].block_number, LOG_QUERY_CHUNK_SIZE - 1);
        assert_eq!(batches.repay[0].entity(), BOB);
        assert_eq!(batches.repay[0].block_number, LOG_QUERY_CHUNK_SIZE);
    }

    #[tokio::test]
    async fn log_filter_targets_pool_events_for_the_asset() {
        let server = start_node(JsonRpcNode { logs: vec![], timestamps: HashMap::new() }).await;
        let source = rpc_source(&server);

        let batches = source.fetch_events(10, 20).await.unwrap();
        assert!(batches.is_empty());

        let requests = requests_for(&server, "eth_getLogs").await;
        assert_eq!(requests.len(), 1);
        let filter = &requests[0]["params"][0];
        assert_eq!(filter_values(&filter["address"]), vec![format!("{POOL:#x}")]);

        let mut signatures = filter_values(&filter["topics"][0]);
        signatures.sort();
        let mut expected: Vec<String> =
            EventKind::ALL.iter().map(|kind| format!("{:#x}", kind.signature_hash())).collect();
        expected.sort();
        assert_eq!(signatures, expected);
        assert_eq!(filter_values(&filter["topics"][1]), vec![format!("{:#x}", USDC.into_word())]);
    }

    #[tokio::test]
    #[traced_test]
    async fn missing_blocks_are_left_out_of_the_timestamp_map() {
        let server = start_node(JsonRpcNode {
            logs: vec![],
            timestamps: HashMap::from([(1, 1_700_000_002), (2, 1_700_000_004)]),
        })
        .await;
        let source = rpc_source(&server);

        let timestamps = source.block_timestamps(&BTreeSet::from([1, 2, 3])).await.unwrap();
        assert_eq!(timestamps, HashMap::from([(1, 1_700_000_002), (2, 1_700_000_004)]));
        assert!(logs_contain("Block 3 not found"));
        assert_eq!(requests_for(&server, "eth_getBlockByNumber").await.len(), 3);

        assert_eq!(source.block_timestamp(2).await.unwrap(), Some(1_700_000_004));
        assert_eq!(source.block_timestamp(3).await.unwrap(), None);
        assert_eq!(source.current_block().await.unwrap(), 2);
    }
}
