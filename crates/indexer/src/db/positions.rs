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
use minimerkl_rewards::Position;
use sqlx::{any::AnyRow, AnyConnection, Row};

use super::{
    pad_u256, parse_address, parse_block, parse_i256, unpad_u256, DbError, IncentivesDb,
};

/// Ingest watermark: every event at or below this block has been applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexerState {
    pub last_indexed_block: u64,
    pub last_indexed_timestamp: u64,
}

#[async_trait]
pub trait PositionStore {
    async fn load_all_positions(&self) -> Result<Vec<Position>, DbError>;

    async fn get_position(&self, address: Address) -> Result<Option<Position>, DbError>;

    /// Upsert full position records in one transaction.
    async fn save_positions(&self, positions: &[Position]) -> Result<(), DbError>;
}

#[async_trait]
pub trait IndexerStateStore {
    async fn get_indexer_state(&self) -> Result<Option<IndexerState>, DbError>;

    /// Write the touched positions and advance the ingest watermark atomically.
    async fn commit_index_window(
        &self,
        positions: &[Position],
        state: IndexerState,
    ) -> Result<(), DbError>;
}

const POSITION_COLUMNS: &str = "address, supply_balance, debt_balance, supply_balance_time, \
    debt_balance_time, net_borrow_balance_time, last_updated_block, last_updated_timestamp";

fn position_from_row(row: &AnyRow) -> Result<Position, DbError> {
    Ok(Position {
        address: parse_address("address", &row.get::<String, _>("address"))?,
        supply_balance: parse_i256("supply_balance", &row.get::<String, _>("supply_balance"))?,
        debt_balance: parse_i256("debt_balance", &row.get::<String, _>("debt_balance"))?,
        supply_balance_time: parse_i256(
            "supply_balance_time",
            &row.get::<String, _>("supply_balance_time"),
        )?,
        debt_balance_time: parse_i256(
            "debt_balance_time",
            &row.get::<String, _>("debt_balance_time"),
        )?,
        net_borrow_balance_time: unpad_u256(
            "net_borrow_balance_time",
            &row.get::<String, _>("net_borrow_balance_time"),
        )?,
        last_updated_block: parse_block(row.get::<i64, _>("last_updated_block"))?,
        last_updated_timestamp: parse_block(row.get::<i64, _>("last_updated_timestamp"))?,
    })
}

async fn upsert_position(conn: &mut AnyConnection, position: &Position) -> Result<(), DbError> {
    let query = r#"
        INSERT INTO positions
        (address, supply_balance, debt_balance, net_lending, net_borrowing, supply_balance_time,
         debt_balance_time, net_borrow_balance_time, last_updated_block, last_updated_timestamp)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        ON CONFLICT (address)
        DO UPDATE SET
            supply_balance = $2,
            debt_balance = $3,
            net_lending = $4,
            net_borrowing = $5,
            supply_balance_time = $6,
            debt_balance_time = $7,
            net_borrow_balance_time = $8,
            last_updated_block = $9,
            last_updated_timestamp = $10
    "#;

    sqlx::query(query)
        .bind(format!("{:#x}", position.address))
        .bind(position.supply_balance.to_string())
        .bind(position.debt_balance.to_string())
        .bind(position.net_lending().to_string())
        .bind(pad_u256(position.net_borrowing()))
        .bind(position.supply_balance_time.to_string())
        .bind(position.debt_balance_time.to_string())
        .bind(pad_u256(position.net_borrow_balance_time))
        .bind(position.last_updated_block as i64)
        .bind(position.last_updated_timestamp as i64)
        .execute(&mut *conn)
        .await?;

    Ok(())
}

#[async_trait]
impl PositionStore for IncentivesDb {
    async fn load_all_positions(&self) -> Result<Vec<Position>, DbError> {
        let query = format!("SELECT {POSITION_COLUMNS} FROM positions ORDER BY address");
        let rows = sqlx::query(&query).fetch_all(self.pool()).await?;
        rows.iter().map(position_from_row).collect()
    }

    async fn get_position(&self, address: Address) -> Result<Option<Position>, DbError> {
        let query = format!("SELECT {POSITION_COLUMNS} FROM positions WHERE address = $1");
        let row = sqlx::query(&query)
            .bind(format!("{:#x}", address))
            .fetch_optional(self.pool())
            .await?;
        row.as_ref().map(position_from_row).transpose()
    }

    async fn save_positions(&self, positions: &[Position]) -> Result<(), DbError> {
        let mut tx = self.pool().begin().await?;
        for position in positions {
            upsert_position(&mut tx, position).await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl IndexerStateStore for IncentivesDb {
    async fn get_indexer_state(&self) -> Result<Option<IndexerState>, DbError> {
        let query =
            "SELECT last_indexed_block, last_indexed_timestamp FROM indexer_state WHERE id = 1";
        let result = sqlx::query(query).fetch_optional(self.pool()).await?;

        match result {
            Some(row) => Ok(Some(IndexerState {
                last_indexed_block: parse_block(row.get::<i64, _>("last_indexed_block"))?,
                last_indexed_timestamp: parse_block(row.get::<i64, _>("last_indexed_timestamp"))?,
            })),
            None => Ok(None),
        }
    }

    async fn commit_index_window(
        &self,
        positions: &[Position],
        state: IndexerState,
    ) -> Result<(), DbError> {
        let mut tx = self.pool().begin().await?;

        for position in positions {
            upsert_position(&mut tx, position).await?;
        }

        let query = r#"
            INSERT INTO indexer_state (id, last_indexed_block, last_indexed_timestamp, updated_at)
            VALUES (1, $1, $2, CURRENT_TIMESTAMP)
            ON CONFLICT (id)
            DO UPDATE SET
                last_indexed_block = $1,
                last_indexed_timestamp = $2,
                updated_at = CURRENT_TIMESTAMP
        "#;
        sqlx::query(query)
            .bind(state.last_indexed_block as i64)
            .bind(state.last_indexed_timestamp as i64)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{db::DbObj, test_utils::TestDb};
    use alloy::primitives::{address, I256, U256};

    const ALICE: Address = address!("00000000000000000000000000000000000a11ce");
    const BOB: Address = address!("0000000000000000000000000000000000000b0b");

    fn position(address: Address, supply: i64, debt: i64, block: u64) -> Position {
        Position {
            address,
            supply_balance: I256::try_from(supply).unwrap(),
            debt_balance: I256::try_from(debt).unwrap(),
            supply_balance_time: I256::try_from(supply * 10).unwrap(),
            debt_balance_time: I256::try_from(debt * 10).unwrap(),
            net_borrow_balance_time: U256::from(12_345u64),
            last_updated_block: block,
            last_updated_timestamp: 1_700_000_000 + block * 2,
        }
    }

    #[tokio::test]
    async fn positions_round_trip() {
        let test_db = TestDb::new().await.unwrap();
        let db: DbObj = test_db.db;

        assert!(db.load_all_positions().await.unwrap().is_empty());
        assert_eq!(db.get_position(ALICE).await.unwrap(), None);

        let alice = position(ALICE, 100, 400, 10);
        let bob = position(BOB, 50, -25, 12);
        db.save_positions(&[alice.clone(), bob.clone()]).await.unwrap();

        assert_eq!(db.get_position(ALICE).await.unwrap(), Some(alice.clone()));
        assert_eq!(db.get_position(BOB).await.unwrap(), Some(bob.clone()));
        let all = db.load_all_positions().await.unwrap();
        assert_eq!(all.len(), 2);
        assert!(all.contains(&alice));
        assert!(all.contains(&bob));
    }

    #[tokio::test]
    async fn save_overwrites_full_record() {
        let test_db = TestDb::new().await.unwrap();
        let db: DbObj = test_db.db;

        db.save_positions(&[position(ALICE, 100, 400, 10)]).await.unwrap();
        let updated = position(ALICE, 0, 0, 20);
        db.save_positions(&[updated.clone()]).await.unwrap();

        assert_eq!(db.get_position(ALICE).await.unwrap(), Some(updated));
        assert_eq!(db.load_all_positions().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn stores_derived_columns() {
        let test_db = TestDb::new().await.unwrap();
        let db: DbObj = test_db.db;

        db.save_positions(&[position(ALICE, 100, 400, 10)]).await.unwrap();

        let row = sqlx::query("SELECT net_lending, net_borrowing FROM positions WHERE address = $1")
            .bind(format!("{:#x}", ALICE))
            .fetch_one(&test_db.pool)
            .await
            .unwrap();
        assert_eq!(row.get::<String, _>("net_lending"), "-300");
        assert_eq!(unpad_u256("net_borrowing", &row.get::<String, _>("net_borrowing")).unwrap(), U256::from(300));
    }

    #[tokio::test]
    async fn index_window_commits_positions_and_state() {
        let test_db = TestDb::new().await.unwrap();
        let db: DbObj = test_db.db;

        assert_eq!(db.get_indexer_state().await.unwrap(), None);

        let state = IndexerState { last_indexed_block: 42, last_indexed_timestamp: 1_700_000_084 };
        db.commit_index_window(&[position(ALICE, 1, 2, 42)], state).await.unwrap();
        assert_eq!(db.get_indexer_state().await.unwrap(), Some(state));
        assert!(db.get_position(ALICE).await.unwrap().is_some());

        let next = IndexerState { last_indexed_block: 43, last_indexed_timestamp: 1_700_000_086 };
        db.commit_index_window(&[], next).await.unwrap();
        assert_eq!(db.get_indexer_state().await.unwrap(), Some(next));
    }
}
