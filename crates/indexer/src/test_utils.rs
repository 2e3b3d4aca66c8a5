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

use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
};

use alloy::primitives::Address;
use async_trait::async_trait;
use minimerkl_rewards::{EventBatches, EventKind, LendingEventSource, RawEvent};
use sqlx::any::install_default_drivers;
use sqlx::AnyPool;
use tempfile::NamedTempFile;

use crate::db::{DbError, DbObj, IncentivesDb};

pub struct TestDb {
    pub db: Arc<IncentivesDb>,
    pub db_url: String,
    pub pool: AnyPool,
    pub _temp_file: Option<NamedTempFile>,
}

impl TestDb {
    pub async fn new() -> Result<Self, DbError> {
        install_default_drivers();

        // Lets you run the DB tests against PostgreSQL, via setting INCENTIVES_DATABASE_URL
        // This is only supported for testing with --test-threads=1
        if let Ok(db_url) = std::env::var("INCENTIVES_DATABASE_URL") {
            if db_url.starts_with("postgres") {
                let pool = AnyPool::connect(&db_url).await?;
                let db = Arc::new(IncentivesDb::new(&db_url).await?);
                let test_db = Self { db, db_url, pool, _temp_file: None };
                // Clean up any leftover data from previous test runs
                test_db.cleanup().await?;
                tracing::info!("Testing with Postgres. Must only run with --test-threads=1");
                return Ok(test_db);
            }
        }

        // Default: SQLite with temp file
        let temp_file = NamedTempFile::new().map_err(|e| DbError::SqlErr(sqlx::Error::Io(e)))?;
        let db_url = format!("sqlite:{}", temp_file.path().display());
        let pool = AnyPool::connect(&db_url).await?;
        let db = Arc::new(IncentivesDb::new(&db_url).await?);

        Ok(Self { db, db_url, pool, _temp_file: Some(temp_file) })
    }

    pub fn get_db(&self) -> DbObj {
        self.db.clone()
    }

    pub async fn cleanup(&self) -> Result<(), DbError> {
        // Only needed for PostgreSQL (SQLite uses temp files that are auto-cleaned)
        if self.db_url.starts_with("postgres") {
            for table in
                ["user_rewards", "campaign_checkpoints", "campaigns", "positions", "indexer_state"]
            {
                // Ignore errors if table doesn't exist (may not have run migrations yet)
                let _ = sqlx::query(&format!("TRUNCATE TABLE {} CASCADE", table))
                    .execute(&self.pool)
                    .await;
            }
        }
        Ok(())
    }
}

/// In-memory chain: events and block timestamps are added by the test.
#[derive(Default)]
pub struct MockEventSource {
    head: AtomicU64,
    events: Mutex<BTreeMap<u64, Vec<(EventKind, RawEvent)>>>,
    timestamps: Mutex<HashMap<u64, u64>>,
    failures: AtomicU64,
}

impl MockEventSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mine blocks `0..=head`, one every `block_time` seconds from `genesis_timestamp`.
    pub fn mine_until(&self, head: u64, genesis_timestamp: u64, block_time: u64) {
        let mut timestamps = self.timestamps.lock().unwrap();
        for block in 0..=head {
            timestamps.entry(block).or_insert(genesis_timestamp + block * block_time);
        }
        self.head.fetch_max(head, Ordering::SeqCst);
    }

    /// Forget a block's timestamp, as if the node could not find it.
    pub fn forget_block(&self, block: u64) {
        self.timestamps.lock().unwrap().remove(&block);
    }

    pub fn timestamp_of(&self, block: u64) -> Option<u64> {
        self.timestamps.lock().unwrap().get(&block).copied()
    }

    /// Emit an event for `user` at the next free log index of `block`.
    pub fn emit(
        &self,
        kind: EventKind,
        user: Address,
        on_behalf_of: Option<Address>,
        amount: u64,
        block: u64,
    ) {
        let mut events = self.events.lock().unwrap();
        let block_events = events.entry(block).or_default();
        let log_index = block_events.len() as u64;
        block_events.push((
            kind,
            RawEvent {
                user,
                on_behalf_of,
                amount: alloy::primitives::U256::from(amount),
                block_number: block,
                log_index,
                block_timestamp: None,
            },
        ));
    }

    /// Fail the next `count` calls with a transport error.
    pub fn fail_next(&self, count: u64) {
        self.failures.store(count, Ordering::SeqCst);
    }

    fn maybe_fail(&self) -> anyhow::Result<()> {
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            anyhow::bail!("connection reset by peer");
        }
        Ok(())
    }
}

#[async_trait]
impl LendingEventSource for MockEventSource {
    async fn current_block(&self) -> anyhow::Result<u64> {
        self.maybe_fail()?;
        Ok(self.head.load(Ordering::SeqCst))
    }

    async fn fetch_events(
        &self,
        from_block: u64,
        to_block: u64,
    ) -> anyhow::Result<EventBatches> {
        self.maybe_fail()?;
        let mut batches = EventBatches::default();
        let events = self.events.lock().unwrap();
        for (_, block_events) in events.range(from_block..=to_block) {
            for (kind, event) in block_events {
                batches.push(*kind, event.clone());
            }
        }
        Ok(batches)
    }

    async fn block_timestamp(&self, block_number: u64) -> anyhow::Result<Option<u64>> {
        self.maybe_fail()?;
        Ok(self.timestamp_of(block_number))
    }

    async fn block_timestamps(
        &self,
        blocks: &BTreeSet<u64>,
    ) -> anyhow::Result<HashMap<u64, u64>> {
        self.maybe_fail()?;
        let timestamps = self.timestamps.lock().unwrap();
        Ok(blocks.iter().filter_map(|b| timestamps.get(b).map(|t| (*b, *t))).collect())
    }
}
