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

use std::{collections::HashMap, sync::Arc};

use alloy::primitives::{Address, U256};
use futures_util::future::join_all;
use minimerkl_rewards::{
    accumulate_rewards, allocate, Campaign, CampaignStatus, LendingEventSource, Position,
    UserReward,
};
use tokio::{
    sync::{Mutex, OwnedMutexGuard},
    time::Duration,
};

use crate::{
    db::{CampaignStore, DbObj, IndexerStateStore, PositionStore, RewardStore},
    DbResultExt, ServiceError,
};

#[derive(Clone, Debug)]
pub struct RewardsServiceConfig {
    pub interval: Duration,
    pub retries: u32,
    /// Asset whose positions are indexed. Campaigns targeting another asset are skipped.
    pub target_token: Option<Address>,
}

impl Default for RewardsServiceConfig {
    fn default() -> Self {
        Self { interval: Duration::from_secs(3600), retries: 5, target_token: None }
    }
}

/// One lock per campaign id. Holding it serializes checkpoint reads and
/// allocation writes for that campaign.
#[derive(Clone, Default)]
pub struct CampaignLocks {
    locks: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl CampaignLocks {
    pub async fn acquire(&self, campaign_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            locks.entry(campaign_id.to_string()).or_default().clone()
        };
        lock.lock_owned().await
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CampaignOutcome {
    Allocated { recipients: usize, distributed: U256, dust: U256 },
    /// No eligible balance time. The checkpoint is left where it was.
    NoEligibleBalance,
    /// Already allocated up to the current timestamp.
    UpToDate,
    NotStarted,
    /// Targets an asset other than the indexed one.
    OtherAsset,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub processed: usize,
    pub skipped: usize,
    pub failed: usize,
    /// Campaigns marked ended during this cycle.
    pub ended: Vec<String>,
}

/// Periodically allocates each active campaign's budget over the stored positions.
pub struct RewardsService<S> {
    source: S,
    db: DbObj,
    config: RewardsServiceConfig,
    locks: CampaignLocks,
}

impl<S: LendingEventSource> RewardsService<S> {
    pub fn new(source: S, db: DbObj, config: RewardsServiceConfig) -> Self {
        Self { source, db, config, locks: CampaignLocks::default() }
    }

    /// Share the campaign locks with another service instance in this process.
    pub fn with_locks(mut self, locks: CampaignLocks) -> Self {
        self.locks = locks;
        self
    }

    pub async fn run(&self) -> Result<(), ServiceError> {
        let mut interval = tokio::time::interval(self.config.interval);
        tracing::info!("Starting rewards calculator, interval {:?}", self.config.interval);

        let mut attempt = 0;
        loop {
            interval.tick().await;

            match self.run_cycle().await {
                Ok(report) => {
                    attempt = 0;
                    tracing::info!(
                        "Rewards cycle done: {} processed, {} skipped, {} failed",
                        report.processed,
                        report.skipped,
                        report.failed
                    );
                }
                Err(e) if e.is_recoverable() => {
                    attempt += 1;
                    if attempt > self.config.retries {
                        tracing::error!("Aborting after {} consecutive attempts: {:?}", attempt, e);
                        return Err(ServiceError::MaxRetries);
                    }
                    // exponential backoff with a maximum delay of 120 seconds
                    let delay = Duration::from_secs(2u64.pow(attempt - 1).min(120));
                    tracing::warn!(
                        "Rewards cycle failed: {:?}, attempt number {}, retrying in {}s",
                        e,
                        attempt,
                        delay.as_secs()
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    tracing::error!("Rewards cycle failed with irrecoverable error: {:?}", e);
                    return Err(e);
                }
            }
        }
    }

    /// Allocate every active campaign once, up to the current chain head.
    pub async fn run_cycle(&self) -> Result<CycleReport, ServiceError> {
        if self.db.get_indexer_state().await.with_db_context("get_indexer_state")?.is_none() {
            tracing::warn!("Positions have not been indexed yet, skipping rewards cycle");
            return Ok(CycleReport::default());
        }

        let head = self.source.current_block().await.map_err(ServiceError::from_source)?;
        let head_timestamp = self
            .source
            .block_timestamp(head)
            .await
            .map_err(ServiceError::from_source)?
            .ok_or(ServiceError::MissingBlockTimestamp(head))?;

        let campaigns =
            self.db.list_active_campaigns().await.with_db_context("list_active_campaigns")?;
        if campaigns.is_empty() {
            tracing::info!("No active campaigns");
            return Ok(CycleReport::default());
        }

        let positions = self.db.load_all_positions().await.with_db_context("load_all_positions")?;
        if positions.is_empty() {
            tracing::info!("No positions to reward");
            return Ok(CycleReport::default());
        }

        tracing::info!(
            "Calculating rewards for {} campaigns over {} positions at block {} ({})",
            campaigns.len(),
            positions.len(),
            head,
            head_timestamp
        );

        let results = join_all(
            campaigns
                .iter()
                .map(|campaign| self.process_campaign(campaign, &positions, head, head_timestamp)),
        )
        .await;

        let mut report = CycleReport::default();
        for (campaign, result) in campaigns.iter().zip(results) {
            match result {
                Ok((outcome, ended)) => {
                    match outcome {
                        CampaignOutcome::Allocated { .. } | CampaignOutcome::NoEligibleBalance => {
                            report.processed += 1
                        }
                        CampaignOutcome::UpToDate
                        | CampaignOutcome::NotStarted
                        | CampaignOutcome::OtherAsset => {
                            report.skipped += 1
                        }
                    }
                    if ended {
                        report.ended.push(campaign.id.clone());
                    }
                }
                Err(e) => {
                    tracing::error!("Failed to process campaign {}: {:?}", campaign.id, e);
                    report.failed += 1;
                }
            }
        }
        Ok(report)
    }

    /// Allocate one campaign. Also returns whether the campaign was marked ended.
    pub async fn process_campaign(
        &self,
        campaign: &Campaign,
        positions: &[Position],
        head: u64,
        head_timestamp: u64,
    ) -> Result<(CampaignOutcome, bool), ServiceError> {
        if let Some(asset) = self.config.target_token {
            if campaign.target_token != asset {
                tracing::warn!(
                    "Skipping campaign {}: targets {:#x} but positions are indexed for {:#x}",
                    campaign.id,
                    campaign.target_token,
                    asset
                );
                return Ok((CampaignOutcome::OtherAsset, false));
            }
        }

        if head_timestamp < campaign.start_timestamp {
            tracing::debug!("Campaign {} has not started yet", campaign.id);
            return Ok((CampaignOutcome::NotStarted, false));
        }

        let _guard = self.locks.acquire(&campaign.id).await;

        // No accrual past the end of the campaign. The checkpoint block stays at
        // the head: positions are read as of the head even when accrual stops earlier.
        let finished = head_timestamp >= campaign.end_timestamp;
        let current_timestamp = head_timestamp.min(campaign.end_timestamp);

        let checkpoint =
            self.db.get_checkpoint(&campaign.id).await.with_db_context("get_checkpoint")?;

        let outcome = match &checkpoint {
            Some(checkpoint) if checkpoint.last_calculated_timestamp >= current_timestamp => {
                CampaignOutcome::UpToDate
            }
            _ => {
                let allocation =
                    allocate(campaign, positions, checkpoint.as_ref(), head, current_timestamp)?;

                match &allocation.checkpoint {
                    Some(new_checkpoint) if !allocation.is_noop() => {
                        let prior: HashMap<Address, UserReward> = self
                            .db
                            .get_campaign_rewards(&campaign.id)
                            .await
                            .with_db_context("get_campaign_rewards")?
                            .into_iter()
                            .map(|reward| (reward.address, reward))
                            .collect();
                        let rows = accumulate_rewards(campaign, &allocation, &prior)?;
                        self.db
                            .commit_allocation(new_checkpoint, &rows)
                            .await
                            .with_db_context("commit_allocation")?;

                        tracing::info!(
                            "Campaign {}: allocated {} of {} to {} addresses (dust {})",
                            campaign.id,
                            allocation.distributed(),
                            allocation.budget_for_period,
                            rows.len(),
                            allocation.dust()
                        );
                        CampaignOutcome::Allocated {
                            recipients: rows.len(),
                            distributed: allocation.distributed(),
                            dust: allocation.dust(),
                        }
                    }
                    _ => CampaignOutcome::NoEligibleBalance,
                }
            }
        };

        if finished {
            self.db
                .set_campaign_status(&campaign.id, CampaignStatus::Ended)
                .await
                .with_db_context("set_campaign_status")?;
            tracing::info!("Campaign {} reached its end timestamp, marked ended", campaign.id);
        }

        Ok((outcome, finished))
    }
}
