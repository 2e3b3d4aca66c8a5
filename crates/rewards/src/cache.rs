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

//! Block timestamp caching for event processing.

use alloy::{providers::Provider, rpc::types::BlockNumberOrTag};
use futures_util::future::try_join_all;
use std::collections::{BTreeSet, HashMap};

use crate::events::TaggedEvent;

/// Number of concurrent block lookups issued per round.
pub const TIMESTAMP_FETCH_CHUNK_SIZE: usize = 50;

/// Seed the cache with timestamps carried by the events themselves.
pub fn cache_embedded_timestamps(events: &[TaggedEvent], cache: &mut HashMap<u64, u64>) {
    for event in events {
        if let Some(timestamp) = event.block_timestamp {
            cache.entry(event.block_number).or_insert(timestamp);
        }
    }
}

/// Fetch timestamps for the given blocks that are not already cached.
///
/// Blocks the provider does not know about are left out of the cache; callers
/// treat them as a data gap.
pub async fn build_block_timestamp_cache<P: Provider>(
    provider: &P,
    blocks: &BTreeSet<u64>,
    cache: &mut HashMap<u64, u64>,
) -> anyhow::Result<()> {
    let block_numbers: Vec<u64> =
        blocks.iter().copied().filter(|block| !cache.contains_key(block)).collect();

    if block_numbers.is_empty() {
        return Ok(());
    }

    tracing::debug!(
        "Fetching timestamps for {} blocks using concurrent requests",
        block_numbers.len()
    );

    for chunk in block_numbers.chunks(TIMESTAMP_FETCH_CHUNK_SIZE) {
        let futures: Vec<_> = chunk
            .iter()
            .map(|&block_num| async move {
                let block =
                    provider.get_block_by_number(BlockNumberOrTag::Number(block_num)).await?;
                Ok::<_, anyhow::Error>((block_num, block))
            })
            .collect();

        let results = try_join_all(futures).await?;

        for (block_num, block) in results {
            match block {
                Some(block) => {
                    cache.insert(block_num, block.header.timestamp);
                }
                None => {
                    tracing::warn!("Block {} not found while resolving timestamps", block_num);
                }
            }
        }
    }

    Ok(())
}

/// Lookup closure over a timestamp cache. `None` means the block is unknown.
pub fn create_block_lookup(cache: &HashMap<u64, u64>) -> impl Fn(u64) -> Option<u64> + '_ {
    move |block_number| cache.get(&block_number).copied()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventKind;
    use alloy::primitives::{address, U256};

    #[test]
    fn embedded_timestamps_do_not_overwrite_cached_ones() {
        let event = |block_number, block_timestamp| TaggedEvent {
            kind: EventKind::Borrow,
            entity: address!("00000000000000000000000000000000000a11ce"),
            amount: U256::from(1),
            block_number,
            log_index: 0,
            block_timestamp,
        };
        let mut cache = HashMap::from([(10, 1_000)]);

        cache_embedded_timestamps(
            &[event(10, Some(9_999)), event(11, Some(1_002)), event(12, None)],
            &mut cache,
        );

        let lookup = create_block_lookup(&cache);
        assert_eq!(lookup(10), Some(1_000));
        assert_eq!(lookup(11), Some(1_002));
        assert_eq!(lookup(12), None);
    }
}
