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

//! Per-address lending positions and their time-weighted balance integrals.
//!
//! Each integral is a step-function Riemann sum: between two events touching an
//! address, the balance held since the previous event is multiplied by the
//! elapsed seconds and added to the running total, before the new event's
//! delta is applied.

use std::collections::{BTreeSet, HashMap};

use alloy::primitives::{Address, I256, U256};
use thiserror::Error;

use crate::events::{EventKind, TaggedEvent};

/// Positions keyed by address. Callers seed it with every persisted
/// position before applying a new batch.
pub type PositionBook = HashMap<Address, Position>;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum AccumulatorError {
    #[error(
        "Ordering violation for {address:#x}: event at block {event_block} (t={event_timestamp}) \
         precedes watermark at block {watermark_block} (t={watermark_timestamp})"
    )]
    OrderingViolation {
        address: Address,
        event_block: u64,
        event_timestamp: u64,
        watermark_block: u64,
        watermark_timestamp: u64,
    },

    #[error("Arithmetic overflow while accumulating {field} for {address:#x}")]
    Overflow { address: Address, field: &'static str },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Position {
    pub address: Address,
    pub supply_balance: I256,
    pub debt_balance: I256,
    pub supply_balance_time: I256,
    pub debt_balance_time: I256,
    pub net_borrow_balance_time: U256,
    pub last_updated_block: u64,
    pub last_updated_timestamp: u64,
}

impl Position {
    /// An empty position whose watermark is its first event, so that event
    /// contributes nothing to the integrals.
    pub fn new(address: Address, block_number: u64, timestamp: u64) -> Self {
        Self {
            address,
            supply_balance: I256::ZERO,
            debt_balance: I256::ZERO,
            supply_balance_time: I256::ZERO,
            debt_balance_time: I256::ZERO,
            net_borrow_balance_time: U256::ZERO,
            last_updated_block: block_number,
            last_updated_timestamp: timestamp,
        }
    }

    /// `supply_balance - debt_balance`; negative for a net borrower.
    ///
    /// Saturates at the `I256` bounds, which base-unit token balances cannot reach.
    pub fn net_lending(&self) -> I256 {
        self.supply_balance.saturating_sub(self.debt_balance)
    }

    /// `max(0, -net_lending)`.
    pub fn net_borrowing(&self) -> U256 {
        let net = self.net_lending();
        if net.is_negative() {
            net.unsigned_abs()
        } else {
            U256::ZERO
        }
    }

    pub fn is_net_borrower(&self) -> bool {
        self.net_lending().is_negative()
    }

    /// Bring the integrals up to `timestamp` using the balances held since the
    /// current watermark. Does not move the watermark.
    fn accrue(&mut self, block_number: u64, timestamp: u64) -> Result<(), AccumulatorError> {
        if block_number < self.last_updated_block || timestamp < self.last_updated_timestamp {
            return Err(AccumulatorError::OrderingViolation {
                address: self.address,
                event_block: block_number,
                event_timestamp: timestamp,
                watermark_block: self.last_updated_block,
                watermark_timestamp: self.last_updated_timestamp,
            });
        }

        let dt = timestamp - self.last_updated_timestamp;
        if dt == 0 {
            return Ok(());
        }
        let dt_unsigned = U256::from(dt);
        let dt_signed = I256::from_raw(dt_unsigned);
        let address = self.address;
        let overflow = |field| AccumulatorError::Overflow { address, field };

        let supply_step =
            self.supply_balance.checked_mul(dt_signed).ok_or(overflow("supply_balance_time"))?;
        let debt_step =
            self.debt_balance.checked_mul(dt_signed).ok_or(overflow("debt_balance_time"))?;
        let net_borrow_step = self
            .net_borrowing()
            .checked_mul(dt_unsigned)
            .ok_or(overflow("net_borrow_balance_time"))?;

        self.supply_balance_time =
            self.supply_balance_time.checked_add(supply_step).ok_or(overflow("supply_balance_time"))?;
        self.debt_balance_time =
            self.debt_balance_time.checked_add(debt_step).ok_or(overflow("debt_balance_time"))?;
        self.net_borrow_balance_time = self
            .net_borrow_balance_time
            .checked_add(net_borrow_step)
            .ok_or(overflow("net_borrow_balance_time"))?;
        Ok(())
    }

    fn apply_delta(&mut self, kind: EventKind, amount: U256) -> Result<(), AccumulatorError> {
        let address = self.address;
        let overflow = |field| AccumulatorError::Overflow { address, field };
        let amount = I256::try_from(amount).map_err(|_| overflow("amount"))?;

        match kind {
            EventKind::Supply => {
                self.supply_balance =
                    self.supply_balance.checked_add(amount).ok_or(overflow("supply_balance"))?
            }
            EventKind::Withdraw => {
                self.supply_balance =
                    self.supply_balance.checked_sub(amount).ok_or(overflow("supply_balance"))?
            }
            EventKind::Borrow => {
                self.debt_balance =
                    self.debt_balance.checked_add(amount).ok_or(overflow("debt_balance"))?
            }
            EventKind::Repay => {
                self.debt_balance =
                    self.debt_balance.checked_sub(amount).ok_or(overflow("debt_balance"))?
            }
        }
        Ok(())
    }

    /// Apply a single event observed at `timestamp`.
    pub fn apply(&mut self, event: &TaggedEvent, timestamp: u64) -> Result<(), AccumulatorError> {
        self.accrue(event.block_number, timestamp)?;
        self.apply_delta(event.kind, event.amount)?;
        self.last_updated_block = event.block_number;
        self.last_updated_timestamp = timestamp;
        Ok(())
    }
}

/// Outcome of one [apply_events] invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplySummary {
    pub applied: usize,
    /// Events skipped because their block timestamp could not be resolved.
    pub skipped: usize,
    /// Addresses whose position changed and must be persisted.
    pub touched: BTreeSet<Address>,
}

/// Replay an ordered event sequence onto `book`.
///
/// Positions for new addresses are created on first sight. An event whose
/// block timestamp is unknown is skipped with a warning and leaves the
/// position untouched. Any ordering violation aborts the whole invocation;
/// the caller must then discard `book`.
pub fn apply_events(
    book: &mut PositionBook,
    events: &[TaggedEvent],
    timestamp_of: impl Fn(u64) -> Option<u64>,
) -> Result<ApplySummary, AccumulatorError> {
    let mut summary = ApplySummary::default();

    for event in events {
        let Some(timestamp) = event.block_timestamp.or_else(|| timestamp_of(event.block_number))
        else {
            tracing::warn!(
                "Skipping {} event for {:#x} at block {} (log {}): block timestamp not found",
                event.kind,
                event.entity,
                event.block_number,
                event.log_index
            );
            summary.skipped += 1;
            continue;
        };

        let position = book
            .entry(event.entity)
            .or_insert_with(|| Position::new(event.entity, event.block_number, timestamp));
        position.apply(event, timestamp)?;

        tracing::trace!(
            "Applied {} of {} to {:#x} at block {}: net lending {}",
            event.kind,
            event.amount,
            event.entity,
            event.block_number,
            position.net_lending()
        );
        summary.applied += 1;
        summary.touched.insert(event.entity);
    }

    Ok(summary)
}
