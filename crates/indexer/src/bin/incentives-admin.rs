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

//! Operator commands for campaigns, rewards and positions.

use alloy::primitives::{Address, U256};
use anyhow::{bail, ensure, Result};
use clap::{Parser, Subcommand};
use minimerkl_indexer::db::{
    CampaignStore, IncentivesDb, IndexerStateStore, PositionStore, RewardStore,
};
use minimerkl_rewards::{Campaign, CampaignStatus};

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct MainArgs {
    /// DB connection string.
    #[clap(long, env = "DATABASE_URL")]
    db: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Register a new campaign.
    CreateCampaign {
        /// Unique campaign id, e.g. base-aavev3-weth-rewards.
        #[clap(long)]
        id: String,
        /// Token paid out as the reward.
        #[clap(long)]
        reward_token: Address,
        /// Asset whose net borrowers are rewarded.
        #[clap(long)]
        target_token: Address,
        /// Unix timestamp at which rewards start accruing.
        #[clap(long)]
        start: u64,
        /// Unix timestamp after which nothing accrues.
        #[clap(long)]
        end: u64,
        /// Total budget, in the reward token's smallest unit.
        #[clap(long)]
        total_budget: U256,
        /// Budget per day, in the reward token's smallest unit.
        #[clap(long)]
        daily_budget: U256,
    },
    /// Change the status of a campaign.
    SetStatus {
        id: String,
        /// active, paused or ended
        status: CampaignStatus,
    },
    /// List campaigns and their checkpoints.
    Campaigns,
    /// Show accumulated rewards of an address across campaigns.
    Rewards { address: Address },
    /// Show the indexed position of an address.
    Position { address: Address },
}

#[tokio::main]
async fn main() -> Result<()> {
    let dotenv = dotenvy::dotenv();
    let args = MainArgs::parse();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    match dotenv {
        Ok(path) => tracing::debug!("Loaded environment variables from {:?}", path),
        Err(e) if e.not_found() => tracing::debug!("No .env file found"),
        Err(e) => bail!("failed to load .env file: {}", e),
    }

    let db = IncentivesDb::new(&args.db).await?;
    run(&db, args.command).await
}

async fn run(db: &IncentivesDb, command: Command) -> Result<()> {
    match command {
        Command::CreateCampaign {
            id,
            reward_token,
            target_token,
            start,
            end,
            total_budget,
            daily_budget,
        } => {
            ensure!(end > start, "end timestamp {end} must be after start timestamp {start}");
            ensure!(!daily_budget.is_zero(), "daily budget must be non-zero");

            let campaign = Campaign {
                id,
                reward_token,
                target_token,
                start_timestamp: start,
                end_timestamp: end,
                total_reward_budget: total_budget,
                daily_reward_budget: daily_budget,
                status: CampaignStatus::Active,
            };
            db.add_campaign(&campaign).await?;
            tracing::info!("Created campaign {}", campaign.id);
            println!("{:#?}", campaign);
        }
        Command::SetStatus { id, status } => {
            db.set_campaign_status(&id, status).await?;
            tracing::info!("Campaign {} is now {}", id, status);
        }
        Command::Campaigns => {
            let state = db.get_indexer_state().await?;
            match state {
                Some(state) => println!(
                    "indexed through block {} ({})",
                    state.last_indexed_block, state.last_indexed_timestamp
                ),
                None => println!("nothing indexed yet"),
            }
            for campaign in db.list_campaigns().await? {
                let checkpoint = db.get_checkpoint(&campaign.id).await?;
                println!(
                    "{} [{}] reward {:#x} target {:#x} {}..{} daily {} total {} checkpoint {}",
                    campaign.id,
                    campaign.status,
                    campaign.reward_token,
                    campaign.target_token,
                    campaign.start_timestamp,
                    campaign.end_timestamp,
                    campaign.daily_reward_budget,
                    campaign.total_reward_budget,
                    checkpoint
                        .map(|c| format!(
                            "block {} ({})",
                            c.last_calculated_block, c.last_calculated_timestamp
                        ))
                        .unwrap_or_else(|| "none".to_string())
                );
            }
        }
        Command::Rewards { address } => {
            let rewards = db.get_rewards_for_address(address).await?;
            if rewards.is_empty() {
                println!("no rewards for {:#x}", address);
            }
            for reward in rewards {
                println!(
                    "{} token {:#x} cumulative {} last period {} at block {}",
                    reward.campaign_id,
                    reward.reward_token,
                    reward.cumulative_reward,
                    reward.period_reward,
                    reward.last_calculated_block
                );
            }
        }
        Command::Position { address } => match db.get_position(address).await? {
            Some(position) => {
                println!("{:#x}", position.address);
                println!("  supply balance:          {}", position.supply_balance);
                println!("  debt balance:            {}", position.debt_balance);
                println!("  net lending:             {}", position.net_lending());
                println!("  net borrowing:           {}", position.net_borrowing());
                println!("  supply balance time:     {}", position.supply_balance_time);
                println!("  debt balance time:       {}", position.debt_balance_time);
                println!("  net borrow balance time: {}", position.net_borrow_balance_time);
                println!(
                    "  last updated:            block {} ({})",
                    position.last_updated_block, position.last_updated_timestamp
                );
            }
            None => println!("no position for {:#x}", address),
        },
    }
    Ok(())
}
