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

//! Checkpointed reward allocation for incentive campaigns.
//!
//! Every cycle pays out `daily_reward_budget` pro rata to the time elapsed since
//! the campaign's checkpoint, split between net borrowers in proportion to their
//! net borrow balance-time integral. All arithmetic is integer; shares are
//! floored and the undistributed remainder (dust) is not carried over.

use std::{
    collections::{BTreeMap, HashMap},
    fmt,
    str::FromStr,
};

use alloy::primitives::{Address, U256};
use thiserror::Error;

use crate::positions::Position;

pub const SECONDS_PER_DAY: u64 = 24 * 60 * 60;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum AllocationError {
    #[error(
        "Position for {address:#x} is at block {position_block}, ahead of allocation block {current_block}"
    )]
    PositionAhead { address: Address, position_block: u64, current_block: u64 },

    #[error(
        "Campaign {campaign_id}: period starts at {period_start}, after current timestamp {current_timestamp}"
    )]
    PeriodStartAhead { campaign_id: String, period_start: u64, current_timestamp: u64 },

    #[error("Campaign {campaign_id}: arithmetic overflow computing {what}")]
    Overflow { campaign_id: String, what: &'static str },

    #[error("Invalid campaign status: {0}")]
    InvalidStatus(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CampaignStatus {
    Active,
    Paused,
    Ended,
}

impl CampaignStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CampaignStatus::Active => "active",
            CampaignStatus::Paused => "paused",
            CampaignStatus::Ended => "ended",
        }
    }
}

impl fmt::Display for CampaignStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CampaignStatus {
    type Err = AllocationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(CampaignStatus::Active),
            "paused" => Ok(CampaignStatus::Paused),
            "ended" => Ok(CampaignStatus::Ended),
            other => Err(AllocationError::InvalidStatus(other.to_string())),
        }
    }
}

/// An incentive campaign. Immutable once created, except for its status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Campaign {
    pub id: String,
    pub reward_token: Address,
    pub target_token: Address,
    pub start_timestamp: u64,
    pub end_timestamp: u64,
    pub total_reward_budget: U256,
    pub daily_reward_budget: U256,
    pub status: CampaignStatus,
}

impl Campaign {
    /// Net borrowers are eligible. Evaluated from current balances on every cycle.
    pub fn is_eligible(&self, position: &Position) -> bool {
        position.is_net_borrower()
    }
}

/// Watermark up to which a campaign's rewards have been allocated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CampaignCheckpoint {
    pub campaign_id: String,
    /// Block the positions were read at.
    pub last_calculated_block: u64,
    /// End of the last allocated period. Capped at the campaign's end, so it
    /// can lie before the timestamp of `last_calculated_block`.
    pub last_calculated_timestamp: u64,
}

/// Stored reward row for one `(address, campaign_id)` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserReward {
    pub address: Address,
    pub campaign_id: String,
    pub reward_token: Address,
    /// Amount allocated by the most recent cycle that included this address.
    pub period_reward: U256,
    /// Running total over every cycle.
    pub cumulative_reward: U256,
    pub last_calculated_block: u64,
    pub last_calculated_timestamp: u64,
}

/// Result of one allocation cycle for one campaign.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Allocation {
    pub campaign_id: String,
    /// Non-zero shares of eligible addresses.
    pub rewards: BTreeMap<Address, U256>,
    pub budget_for_period: U256,
    pub total_balance_time: U256,
    /// The checkpoint after this cycle. Unchanged from the input on a no-op cycle.
    pub checkpoint: Option<CampaignCheckpoint>,
}

impl Allocation {
    pub fn distributed(&self) -> U256 {
        self.rewards.values().fold(U256::ZERO, |acc, amount| acc + *amount)
    }

    pub fn dust(&self) -> U256 {
        self.budget_for_period.saturating_sub(self.distributed())
    }

    /// Whether this cycle advances the checkpoint.
    pub fn is_noop(&self) -> bool {
        self.total_balance_time.is_zero()
    }
}

/// `floor(daily_reward_budget * elapsed_seconds / SECONDS_PER_DAY)`.
pub fn budget_for_period(
    campaign: &Campaign,
    elapsed_seconds: u64,
) -> Result<U256, AllocationError> {
    campaign
        .daily_reward_budget
        .checked_mul(U256::from(elapsed_seconds))
        .map(|scaled| scaled / U256::from(SECONDS_PER_DAY))
        .ok_or_else(|| AllocationError::Overflow {
            campaign_id: campaign.id.clone(),
            what: "budget for period",
        })
}

/// Allocate the campaign's budget for the period since its checkpoint.
///
/// Pure: the same inputs always produce the same allocation. Persisting the
/// rewards and the new checkpoint is up to the caller.
pub fn allocate<'a>(
    campaign: &Campaign,
    positions: impl IntoIterator<Item = &'a Position>,
    checkpoint: Option<&CampaignCheckpoint>,
    current_block: u64,
    current_timestamp: u64,
) -> Result<Allocation, AllocationError> {
    let positions: Vec<&Position> = positions.into_iter().collect();

    if let Some(ahead) = positions.iter().find(|p| p.last_updated_block > current_block) {
        return Err(AllocationError::PositionAhead {
            address: ahead.address,
            position_block: ahead.last_updated_block,
            current_block,
        });
    }

    let period_start =
        checkpoint.map(|c| c.last_calculated_timestamp).unwrap_or(campaign.start_timestamp);
    let elapsed_seconds = current_timestamp.checked_sub(period_start).ok_or_else(|| {
        AllocationError::PeriodStartAhead {
            campaign_id: campaign.id.clone(),
            period_start,
            current_timestamp,
        }
    })?;
    let budget_for_period = budget_for_period(campaign, elapsed_seconds)?;

    let overflow = |what| AllocationError::Overflow { campaign_id: campaign.id.clone(), what };

    let eligible: Vec<&Position> =
        positions.into_iter().filter(|p| campaign.is_eligible(p)).collect();
    let total_balance_time = eligible
        .iter()
        .try_fold(U256::ZERO, |acc, p| acc.checked_add(p.net_borrow_balance_time))
        .ok_or_else(|| overflow("total balance time"))?;

    if total_balance_time.is_zero() {
        tracing::info!("No eligible balance time for campaign {}", campaign.id);
        return Ok(Allocation {
            campaign_id: campaign.id.clone(),
            rewards: BTreeMap::new(),
            budget_for_period,
            total_balance_time,
            checkpoint: checkpoint.cloned(),
        });
    }

    let mut rewards = BTreeMap::new();
    for position in eligible {
        let share = position
            .net_borrow_balance_time
            .checked_mul(budget_for_period)
            .ok_or_else(|| overflow("user share"))?
            / total_balance_time;
        if !share.is_zero() {
            rewards.insert(position.address, share);
        }
    }

    tracing::debug!(
        "Campaign {}: {}s elapsed, budget {}, total balance time {}, {} recipients",
        campaign.id,
        elapsed_seconds,
        budget_for_period,
        total_balance_time,
        rewards.len()
    );

    Ok(Allocation {
        campaign_id: campaign.id.clone(),
        rewards,
        budget_for_period,
        total_balance_time,
        checkpoint: Some(CampaignCheckpoint {
            campaign_id: campaign.id.clone(),
            last_calculated_block: current_block,
            last_calculated_timestamp: current_timestamp,
        }),
    })
}

/// Build the reward rows to persist for an allocation, adding each period
/// reward onto the address's prior cumulative total.
pub fn accumulate_rewards(
    campaign: &Campaign,
    allocation: &Allocation,
    prior: &HashMap<Address, UserReward>,
) -> Result<Vec<UserReward>, AllocationError> {
    let Some(checkpoint) = &allocation.checkpoint else {
        return Ok(Vec::new());
    };

    allocation
        .rewards
        .iter()
        .map(|(address, period_reward)| {
            let previous = prior.get(address).map(|r| r.cumulative_reward).unwrap_or(U256::ZERO);
            let cumulative_reward = previous.checked_add(*period_reward).ok_or_else(|| {
                AllocationError::Overflow {
                    campaign_id: campaign.id.clone(),
                    what: "cumulative reward",
                }
            })?;
            Ok(UserReward {
                address: *address,
                campaign_id: campaign.id.clone(),
                reward_token: campaign.reward_token,
                period_reward: *period_reward,
                cumulative_reward,
                last_calculated_block: checkpoint.last_calculated_block,
                last_calculated_timestamp: checkpoint.last_calculated_timestamp,
            })
        })
        .collect()
}
