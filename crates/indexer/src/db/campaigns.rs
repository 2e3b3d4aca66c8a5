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

use async_trait::async_trait;
use minimerkl_rewards::{Campaign, CampaignCheckpoint, CampaignStatus};
use sqlx::{any::AnyRow, Row};

use super::{pad_u256, parse_address, parse_block, unpad_u256, DbError, IncentivesDb};

#[async_trait]
pub trait CampaignStore {
    /// Fails with [DbError::CampaignExists] if the id is taken.
    async fn add_campaign(&self, campaign: &Campaign) -> Result<(), DbError>;

    async fn get_campaign(&self, campaign_id: &str) -> Result<Option<Campaign>, DbError>;

    async fn list_campaigns(&self) -> Result<Vec<Campaign>, DbError>;

    async fn list_active_campaigns(&self) -> Result<Vec<Campaign>, DbError>;

    async fn set_campaign_status(
        &self,
        campaign_id: &str,
        status: CampaignStatus,
    ) -> Result<(), DbError>;

    async fn get_checkpoint(
        &self,
        campaign_id: &str,
    ) -> Result<Option<CampaignCheckpoint>, DbError>;
}

const CAMPAIGN_COLUMNS: &str = "id, reward_token, target_token, start_timestamp, end_timestamp, \
    total_reward_budget, daily_reward_budget, status";

fn campaign_from_row(row: &AnyRow) -> Result<Campaign, DbError> {
    let status: String = row.get("status");
    Ok(Campaign {
        id: row.get("id"),
        reward_token: parse_address("reward_token", &row.get::<String, _>("reward_token"))?,
        target_token: parse_address("target_token", &row.get::<String, _>("target_token"))?,
        start_timestamp: parse_block(row.get::<i64, _>("start_timestamp"))?,
        end_timestamp: parse_block(row.get::<i64, _>("end_timestamp"))?,
        total_reward_budget: unpad_u256(
            "total_reward_budget",
            &row.get::<String, _>("total_reward_budget"),
        )?,
        daily_reward_budget: unpad_u256(
            "daily_reward_budget",
            &row.get::<String, _>("daily_reward_budget"),
        )?,
        status: status
            .parse()
            .map_err(|_| DbError::BadValue { column: "status", value: status.clone() })?,
    })
}

#[async_trait]
impl CampaignStore for IncentivesDb {
    async fn add_campaign(&self, campaign: &Campaign) -> Result<(), DbError> {
        let query = r#"
            INSERT INTO campaigns
            (id, reward_token, target_token, start_timestamp, end_timestamp,
             total_reward_budget, daily_reward_budget, status)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (id) DO NOTHING
        "#;

        let result = sqlx::query(query)
            .bind(&campaign.id)
            .bind(format!("{:#x}", campaign.reward_token))
            .bind(format!("{:#x}", campaign.target_token))
            .bind(campaign.start_timestamp as i64)
            .bind(campaign.end_timestamp as i64)
            .bind(pad_u256(campaign.total_reward_budget))
            .bind(pad_u256(campaign.daily_reward_budget))
            .bind(campaign.status.as_str())
            .execute(self.pool())
            .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::CampaignExists(campaign.id.clone()));
        }
        Ok(())
    }

    async fn get_campaign(&self, campaign_id: &str) -> Result<Option<Campaign>, DbError> {
        let query = format!("SELECT {CAMPAIGN_COLUMNS} FROM campaigns WHERE id = $1");
        let row = sqlx::query(&query).bind(campaign_id).fetch_optional(self.pool()).await?;
        row.as_ref().map(campaign_from_row).transpose()
    }

    async fn list_campaigns(&self) -> Result<Vec<Campaign>, DbError> {
        let query = format!("SELECT {CAMPAIGN_COLUMNS} FROM campaigns ORDER BY id");
        let rows = sqlx::query(&query).fetch_all(self.pool()).await?;
        rows.iter().map(campaign_from_row).collect()
    }

    async fn list_active_campaigns(&self) -> Result<Vec<Campaign>, DbError> {
        let query = format!("SELECT {CAMPAIGN_COLUMNS} FROM campaigns WHERE status = $1 ORDER BY id");
        let rows = sqlx::query(&query)
            .bind(CampaignStatus::Active.as_str())
            .fetch_all(self.pool())
            .await?;
        rows.iter().map(campaign_from_row).collect()
    }

    async fn set_campaign_status(
        &self,
        campaign_id: &str,
        status: CampaignStatus,
    ) -> Result<(), DbError> {
        let result = sqlx::query("UPDATE campaigns SET status = $1 WHERE id = $2")
            .bind(status.as_str())
            .bind(campaign_id)
            .execute(self.pool())
            .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::CampaignNotFound(campaign_id.to_string()));
        }
        Ok(())
    }

    async fn get_checkpoint(
        &self,
        campaign_id: &str,
    ) -> Result<Option<CampaignCheckpoint>, DbError> {
        let query = r#"
            SELECT campaign_id, last_calculated_block, last_calculated_timestamp
            FROM campaign_checkpoints
            WHERE campaign_id = $1
        "#;
        let result = sqlx::query(query).bind(campaign_id).fetch_optional(self.pool()).await?;

        match result {
            Some(row) => Ok(Some(CampaignCheckpoint {
                campaign_id: row.get("campaign_id"),
                last_calculated_block: parse_block(row.get::<i64, _>("last_calculated_block"))?,
                last_calculated_timestamp: parse_block(
                    row.get::<i64, _>("last_calculated_timestamp"),
                )?,
            })),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{db::DbObj, test_utils::TestDb};
    use alloy::primitives::{address, U256};

    fn campaign(id: &str) -> Campaign {
        Campaign {
            id: id.to_string(),
            reward_token: address!("4200000000000000000000000000000000000006"),
            target_token: address!("833589fcd6edb6e08f4c7c32d4f71b54bda02913"),
            start_timestamp: 1_700_000_000,
            end_timestamp: 1_700_864_000,
            total_reward_budget: U256::from(10).pow(U256::from(19)),
            daily_reward_budget: U256::from(10).pow(U256::from(18)),
            status: CampaignStatus::Active,
        }
    }

    #[tokio::test]
    async fn add_and_get_campaign() {
        let test_db = TestDb::new().await.unwrap();
        let db: DbObj = test_db.db;

        let weth = campaign("base-aavev3-weth-rewards");
        db.add_campaign(&weth).await.unwrap();

        assert_eq!(db.get_campaign(&weth.id).await.unwrap(), Some(weth.clone()));
        assert_eq!(db.get_campaign("missing").await.unwrap(), None);
        assert_eq!(db.list_campaigns().await.unwrap(), vec![weth]);
    }

    #[tokio::test]
    async fn duplicate_campaign_is_rejected() {
        let test_db = TestDb::new().await.unwrap();
        let db: DbObj = test_db.db;

        let original = campaign("dup");
        db.add_campaign(&original).await.unwrap();

        let mut changed = campaign("dup");
        changed.daily_reward_budget = U256::from(1);
        let err = db.add_campaign(&changed).await.unwrap_err();
        assert!(matches!(err, DbError::CampaignExists(id) if id == "dup"));
        assert_eq!(db.get_campaign("dup").await.unwrap(), Some(original));
    }

    #[tokio::test]
    async fn status_filters_active_campaigns() {
        let test_db = TestDb::new().await.unwrap();
        let db: DbObj = test_db.db;

        db.add_campaign(&campaign("a")).await.unwrap();
        db.add_campaign(&campaign("b")).await.unwrap();
        db.add_campaign(&campaign("c")).await.unwrap();

        db.set_campaign_status("b", CampaignStatus::Paused).await.unwrap();
        db.set_campaign_status("c", CampaignStatus::Ended).await.unwrap();

        let active: Vec<String> =
            db.list_active_campaigns().await.unwrap().into_iter().map(|c| c.id).collect();
        assert_eq!(active, vec!["a".to_string()]);
        assert_eq!(
            db.get_campaign("b").await.unwrap().map(|c| c.status),
            Some(CampaignStatus::Paused)
        );

        let err = db.set_campaign_status("missing", CampaignStatus::Paused).await.unwrap_err();
        assert!(matches!(err, DbError::CampaignNotFound(_)));
    }

    #[tokio::test]
    async fn missing_checkpoint_is_none() {
        let test_db = TestDb::new().await.unwrap();
        let db: DbObj = test_db.db;

        db.add_campaign(&campaign("a")).await.unwrap();
        assert_eq!(db.get_checkpoint("a").await.unwrap(), None);
    }
}
