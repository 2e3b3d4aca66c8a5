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

use alloy::primitives::Address;
use async_trait::async_trait;
use minimerkl_rewards::{CampaignCheckpoint, UserReward};
use sqlx::{any::AnyRow, Row};

use super::{pad_u256, parse_address, parse_block, unpad_u256, DbError, IncentivesDb};

#[async_trait]
pub trait RewardStore {
    /// All reward rows of a campaign, largest cumulative reward first.
    async fn get_campaign_rewards(&self, campaign_id: &str) -> Result<Vec<UserReward>, DbError>;

    async fn get_rewards_for_address(&self, address: Address) -> Result<Vec<UserReward>, DbError>;

    /// Upsert the reward rows and advance the campaign checkpoint atomically.
    async fn commit_allocation(
        &self,
        checkpoint: &CampaignCheckpoint,
        rewards: &[UserReward],
    ) -> Result<(), DbError>;
}

const REWARD_COLUMNS: &str = "address, campaign_id, reward_token, period_reward, \
    cumulative_reward, last_calculated_block, last_calculated_timestamp";

fn reward_from_row(row: &AnyRow) -> Result<UserReward, DbError> {
    Ok(UserReward {
        address: parse_address("address", &row.get::<String, _>("address"))?,
        campaign_id: row.get("campaign_id"),
        reward_token: parse_address("reward_token", &row.get::<String, _>("reward_token"))?,
        period_reward: unpad_u256("period_reward", &row.get::<String, _>("period_reward"))?,
        cumulative_reward: unpad_u256(
            "cumulative_reward",
            &row.get::<String, _>("cumulative_reward"),
        )?,
        last_calculated_block: parse_block(row.get::<i64, _>("last_calculated_block"))?,
        last_calculated_timestamp: parse_block(row.get::<i64, _>("last_calculated_timestamp"))?,
    })
}

#[async_trait]
impl RewardStore for IncentivesDb {
    async fn get_campaign_rewards(&self, campaign_id: &str) -> Result<Vec<UserReward>, DbError> {
        let query = format!(
            "SELECT {REWARD_COLUMNS} FROM user_rewards WHERE campaign_id = $1 \
             ORDER BY cumulative_reward DESC, address"
        );
        let rows = sqlx::query(&query).bind(campaign_id).fetch_all(self.pool()).await?;
        rows.iter().map(reward_from_row).collect()
    }

    async fn get_rewards_for_address(&self, address: Address) -> Result<Vec<UserReward>, DbError> {
        let query =
            format!("SELECT {REWARD_COLUMNS} FROM user_rewards WHERE address = $1 ORDER BY campaign_id");
        let rows =
            sqlx::query(&query).bind(format!("{:#x}", address)).fetch_all(self.pool()).await?;
        rows.iter().map(reward_from_row).collect()
    }

    async fn commit_allocation(
        &self,
        checkpoint: &CampaignCheckpoint,
        rewards: &[UserReward],
    ) -> Result<(), DbError> {
        let mut tx = self.pool().begin().await?;

        for reward in rewards {
            let query = r#"
                INSERT INTO user_rewards
                (address, campaign_id, reward_token, period_reward, cumulative_reward,
                 last_calculated_block, last_calculated_timestamp, updated_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, CURRENT_TIMESTAMP)
                ON CONFLICT (address, campaign_id)
                DO UPDATE SET
                    reward_token = $3,
                    period_reward = $4,
                    cumulative_reward = $5,
                    last_calculated_block = $6,
                    last_calculated_timestamp = $7,
                    updated_at = CURRENT_TIMESTAMP
            "#;

            sqlx::query(query)
                .bind(format!("{:#x}", reward.address))
                .bind(&reward.campaign_id)
                .bind(format!("{:#x}", reward.reward_token))
                .bind(pad_u256(reward.period_reward))
                .bind(pad_u256(reward.cumulative_reward))
                .bind(reward.last_calculated_block as i64)
                .bind(reward.last_calculated_timestamp as i64)
                .execute(&mut *tx)
                .await?;
        }

        let query = r#"
            INSERT INTO campaign_checkpoints
            (campaign_id, last_calculated_block, last_calculated_timestamp, updated_at)
            VALUES ($1, $2, $3, CURRENT_TIMESTAMP)
            ON CONFLICT (campaign_id)
            DO UPDATE SET
                last_calculated_block = $2,
                last_calculated_timestamp = $3,
                updated_at = CURRENT_TIMESTAMP
        "#;
        sqlx::query(query)
            .bind(&checkpoint.campaign_id)
            .bind(checkpoint.last_calculated_block as i64)
            .bind(checkpoint.last_calculated_timestamp as i64)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }
}
