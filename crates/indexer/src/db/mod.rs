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

pub mod campaigns;
pub mod positions;
pub mod rewards;

use std::{str::FromStr, sync::Arc};

use alloy::primitives::{Address, I256, U256};
use sqlx::{any::AnyPoolOptions, AnyPool};
use thiserror::Error;

pub use campaigns::CampaignStore;
pub use positions::{IndexerState, IndexerStateStore, PositionStore};
pub use rewards::RewardStore;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQL error {0:?}")]
    SqlErr(#[from] sqlx::Error),

    #[error("SQL Migration error {0:?}")]
    MigrateErr(#[from] sqlx::migrate::MigrateError),

    #[error("Invalid block number: {0}")]
    BadBlockNumb(String),

    #[error("Invalid stored value in {column}: {value}")]
    BadValue { column: &'static str, value: String },

    #[error("Campaign already exists: {0}")]
    CampaignExists(String),

    #[error("Campaign not found: {0}")]
    CampaignNotFound(String),
}

/// Every store the services need, behind one handle.
pub trait IncentivesStore: PositionStore + IndexerStateStore + CampaignStore + RewardStore {}

impl<T> IncentivesStore for T where T: PositionStore + IndexerStateStore + CampaignStore + RewardStore
{}

pub type DbObj = Arc<dyn IncentivesStore + Send + Sync>;

/// SQLite or PostgreSQL database, selected by URL.
#[derive(Debug, Clone)]
pub struct IncentivesDb {
    pool: AnyPool,
}

impl IncentivesDb {
    pub async fn new(database_url: &str) -> Result<Self, DbError> {
        sqlx::any::install_default_drivers();
        let pool = AnyPoolOptions::new().max_connections(5).connect(database_url).await?;

        // Run migrations
        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &AnyPool {
        &self.pool
    }
}

/// Convert a U256 to a zero-padded string for proper database sorting
/// U256 max value has 78 decimal digits (2^256 ≈ 1.15 * 10^77)
pub(crate) fn pad_u256(value: U256) -> String {
    format!("{:0>78}", value)
}

/// Convert a zero-padded string back to U256
pub(crate) fn unpad_u256(column: &'static str, s: &str) -> Result<U256, DbError> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return Err(DbError::BadValue { column, value: s.to_string() });
    }
    let trimmed = s.trim_start_matches('0');
    if trimmed.is_empty() {
        return Ok(U256::ZERO);
    }
    U256::from_str_radix(trimmed, 10)
        .map_err(|_| DbError::BadValue { column, value: s.to_string() })
}

pub(crate) fn parse_i256(column: &'static str, s: &str) -> Result<I256, DbError> {
    I256::from_dec_str(s).map_err(|_| DbError::BadValue { column, value: s.to_string() })
}

pub(crate) fn parse_address(column: &'static str, s: &str) -> Result<Address, DbError> {
    Address::from_str(s).map_err(|_| DbError::BadValue { column, value: s.to_string() })
}

pub(crate) fn parse_block(value: i64) -> Result<u64, DbError> {
    u64::try_from(value).map_err(|_| DbError::BadBlockNumb(value.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn padded_u256_sorts_numerically() {
        let small = pad_u256(U256::from(9));
        let large = pad_u256(U256::from(10));
        assert_eq!(small.len(), 78);
        assert!(small < large);
        assert_eq!(unpad_u256("amount", &small).unwrap(), U256::from(9));
        assert_eq!(unpad_u256("amount", &pad_u256(U256::ZERO)).unwrap(), U256::ZERO);
        assert_eq!(unpad_u256("amount", &pad_u256(U256::MAX)).unwrap(), U256::MAX);
        assert!(unpad_u256("amount", "12x").is_err());
        assert!(unpad_u256("amount", "").is_err());
    }

    #[test]
    fn signed_values_keep_their_sign() {
        let negative = I256::try_from(-1234i64).unwrap();
        assert_eq!(parse_i256("debt_balance", &negative.to_string()).unwrap(), negative);
        assert!(parse_i256("debt_balance", "1.5").is_err());
    }
}
