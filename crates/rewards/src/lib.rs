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

//! Position accounting and reward allocation for lending incentive campaigns.
//!
//! Pool events are normalized into a single ordered sequence, folded into
//! per-address positions that carry time-weighted balance integrals, and the
//! net borrow integral is used to split each campaign's budget.

pub mod allocation;
pub mod cache;
pub mod contracts;
pub mod events;
pub mod positions;
pub mod source;

pub use allocation::{
    accumulate_rewards, allocate, budget_for_period, Allocation, AllocationError, Campaign,
    CampaignCheckpoint, CampaignStatus, UserReward, SECONDS_PER_DAY,
};
pub use cache::{build_block_timestamp_cache, cache_embedded_timestamps, create_block_lookup};
pub use events::{
    decode_pool_log, normalize, referenced_blocks, EventBatches, EventError, EventKind, RawEvent,
    TaggedEvent,
};
pub use positions::{apply_events, AccumulatorError, ApplySummary, Position, PositionBook};
pub use source::{query_logs_chunked, LendingEventSource, RpcEventSource, LOG_QUERY_CHUNK_SIZE};
