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

//! Lending pool events and their normalization into one ordered stream.

use std::{collections::BTreeSet, fmt, str::FromStr};

use alloy::{
    primitives::{Address, B256, U256},
    rpc::types::Log,
    sol_types::SolEvent,
};
use thiserror::Error;

use crate::contracts::IPool;

#[derive(Error, Debug)]
pub enum EventError {
    #[error("Unrecognized event type: {0}")]
    UnrecognizedEvent(String),

    #[error("Log has no event signature")]
    MissingSignature,

    #[error("Log is missing its {0}")]
    MissingMetadata(&'static str),

    #[error("Failed to decode {kind} event: {source}")]
    Decode {
        kind: EventKind,
        #[source]
        source: alloy::sol_types::Error,
    },
}

/// The four balance-changing pool actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EventKind {
    Supply,
    Withdraw,
    Borrow,
    Repay,
}

impl EventKind {
    pub const ALL: [EventKind; 4] =
        [EventKind::Supply, EventKind::Withdraw, EventKind::Borrow, EventKind::Repay];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Supply => "Supply",
            EventKind::Withdraw => "Withdraw",
            EventKind::Borrow => "Borrow",
            EventKind::Repay => "Repay",
        }
    }

    pub fn signature_hash(&self) -> B256 {
        match self {
            EventKind::Supply => IPool::Supply::SIGNATURE_HASH,
            EventKind::Withdraw => IPool::Withdraw::SIGNATURE_HASH,
            EventKind::Borrow => IPool::Borrow::SIGNATURE_HASH,
            EventKind::Repay => IPool::Repay::SIGNATURE_HASH,
        }
    }

    pub fn from_signature_hash(hash: &B256) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.signature_hash() == *hash)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = EventError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| EventError::UnrecognizedEvent(s.to_string()))
    }
}

/// A pool event as emitted on chain, before it is tagged and ordered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    pub user: Address,
    /// Set when the action was performed on behalf of another address.
    pub on_behalf_of: Option<Address>,
    pub amount: U256,
    pub block_number: u64,
    pub log_index: u64,
    /// Block timestamp, when the RPC node includes it in the log.
    pub block_timestamp: Option<u64>,
}

impl RawEvent {
    /// The address whose position this event changes.
    pub fn entity(&self) -> Address {
        self.on_behalf_of.unwrap_or(self.user)
    }
}

/// Per-type batches for one asset over one inclusive block range.
#[derive(Debug, Clone, Default)]
pub struct EventBatches {
    pub supply: Vec<RawEvent>,
    pub withdraw: Vec<RawEvent>,
    pub borrow: Vec<RawEvent>,
    pub repay: Vec<RawEvent>,
}

impl EventBatches {
    pub fn push(&mut self, kind: EventKind, event: RawEvent) {
        self.batch_mut(kind).push(event);
    }

    pub fn batch(&self, kind: EventKind) -> &[RawEvent] {
        match kind {
            EventKind::Supply => &self.supply,
            EventKind::Withdraw => &self.withdraw,
            EventKind::Borrow => &self.borrow,
            EventKind::Repay => &self.repay,
        }
    }

    fn batch_mut(&mut self, kind: EventKind) -> &mut Vec<RawEvent> {
        match kind {
            EventKind::Supply => &mut self.supply,
            EventKind::Withdraw => &mut self.withdraw,
            EventKind::Borrow => &mut self.borrow,
            EventKind::Repay => &mut self.repay,
        }
    }

    pub fn len(&self) -> usize {
        EventKind::ALL.iter().map(|kind| self.batch(*kind).len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A normalized event: typed, routed to its entity and ready to be applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaggedEvent {
    pub kind: EventKind,
    pub entity: Address,
    pub amount: U256,
    pub block_number: u64,
    pub log_index: u64,
    pub block_timestamp: Option<u64>,
}

impl TaggedEvent {
    pub fn new(kind: EventKind, raw: &RawEvent) -> Self {
        Self {
            kind,
            entity: raw.entity(),
            amount: raw.amount,
            block_number: raw.block_number,
            log_index: raw.log_index,
            block_timestamp: raw.block_timestamp,
        }
    }
}

/// Merge the per-type batches into one sequence ordered by
/// `(block_number, log_index)`.
///
/// Log index is unique within a block, so the kind only breaks ties for
/// malformed input. The result never depends on the order of the batches.
pub fn normalize(batches: &EventBatches) -> Vec<TaggedEvent> {
    let mut events: Vec<TaggedEvent> = EventKind::ALL
        .into_iter()
        .flat_map(|kind| batches.batch(kind).iter().map(move |raw| TaggedEvent::new(kind, raw)))
        .collect();

    events.sort_by_key(|e| (e.block_number, e.log_index, e.kind));
    events
}

/// Unique block numbers referenced by a normalized sequence, ascending.
pub fn referenced_blocks(events: &[TaggedEvent]) -> BTreeSet<u64> {
    events.iter().map(|e| e.block_number).collect()
}

/// Decode a pool log into its kind and raw event.
pub fn decode_pool_log(log: &Log) -> Result<(EventKind, RawEvent), EventError> {
    let signature = log.topics().first().ok_or(EventError::MissingSignature)?;
    let kind = EventKind::from_signature_hash(signature)
        .ok_or_else(|| EventError::UnrecognizedEvent(format!("{signature:#x}")))?;

    let block_number = log.block_number.ok_or(EventError::MissingMetadata("block number"))?;
    let log_index = log.log_index.ok_or(EventError::MissingMetadata("log index"))?;
    let decode_err = |source| EventError::Decode { kind, source };

    let (user, on_behalf_of, amount) = match kind {
        EventKind::Supply => {
            let decoded = log.log_decode::<IPool::Supply>().map_err(decode_err)?;
            let data = decoded.inner.data;
            (data.user, Some(data.onBehalfOf), data.amount)
        }
        EventKind::Withdraw => {
            let decoded = log.log_decode::<IPool::Withdraw>().map_err(decode_err)?;
            (decoded.inner.data.user, None, decoded.inner.data.amount)
        }
        EventKind::Borrow => {
            let decoded = log.log_decode::<IPool::Borrow>().map_err(decode_err)?;
            let data = decoded.inner.data;
            (data.user, Some(data.onBehalfOf), data.amount)
        }
        // `user` is the borrower whose debt is repaid, not the payer.
        EventKind::Repay => {
            let decoded = log.log_decode::<IPool::Repay>().map_err(decode_err)?;
            (decoded.inner.data.user, None, decoded.inner.data.amount)
        }
    };

    Ok((
        kind,
        RawEvent {
            user,
            on_behalf_of,
            amount,
            block_number,
            log_index,
            block_timestamp: log.block_timestamp,
        },
    ))
}
