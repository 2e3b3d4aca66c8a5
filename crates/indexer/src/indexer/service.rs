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

use std::{cmp::min, collections::HashMap};

use minimerkl_rewards::{
    apply_events, cache_embedded_timestamps, create_block_lookup, normalize, referenced_blocks,
    LendingEventSource, Position, PositionBook,
};
use tokio::time::Duration;

use crate::{
    db::{DbObj, IndexerState, IndexerStateStore, PositionStore},
    DbResultExt, ServiceError,
};

#[derive(Clone, Debug)]
pub struct IndexerServiceConfig {
    pub interval: Duration,
    pub retries: u32,
    /// Maximum number of blocks per cycle.
    pub batch_size: u64,
    /// First block to index when nothing has been indexed yet.
    pub start_block: Option<u64>,
    /// Without a start block, how far behind the head the first run begins.
    pub initial_lookback: u64,
}

impl Default for IndexerServiceConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(12),
            retries: 10,
            batch_size: 1000,
            start_block: None,
            initial_lookback: 10_000,
        }
    }
}

/// Inclusive block range processed by one ingest cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexWindow {
    pub from_block: u64,
    pub to_block: u64,
}

impl IndexWindow {
    pub fn num_blocks(&self) -> u64 {
        self.to_block - self.from_block + 1
    }
}

/// Folds pool events into persisted positions, one block window per cycle.
pub struct IndexerService<S> {
    source: S,
    db: DbObj,
    config: IndexerServiceConfig,
}

impl<S: LendingEventSource> IndexerService<S> {
    pub fn new(source: S, db: DbObj, config: IndexerServiceConfig) -> Self {
        Self { source, db, config }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Index until `end_block` has been processed, or forever without one.
    pub async fn run(&self, end_block: Option<u64>) -> Result<(), ServiceError> {
        let mut interval = tokio::time::interval(self.config.interval);

        match end_block {
            Some(end) => tracing::info!("Starting incentives indexer (will stop at block {})", end),
            None => tracing::info!("Starting incentives indexer"),
        }

        let mut attempt = 0;
        loop {
            interval.tick().await;

            match self.run_once(end_block).await {
                Ok(last_indexed) => {
                    attempt = 0;
                    if let (Some(end), Some(last)) = (end_block, last_indexed) {
                        if last >= end {
                            tracing::info!("Reached end block {}, exiting", end);
                            return Ok(());
                        }
                    }
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
                        "Indexing cycle failed: {:?}, attempt number {}, retrying in {}s",
                        e,
                        attempt,
                        delay.as_secs()
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    tracing::error!("Indexing cycle failed with irrecoverable error: {:?}", e);
                    return Err(e);
                }
            }
        }
    }

    /// Run a single cycle. Returns the last indexed block afterwards, if any.
    pub async fn run_once(&self, end_block: Option<u64>) -> Result<Option<u64>, ServiceError> {
        let state = self.db.get_indexer_state().await.with_db_context("get_indexer_state")?;
        let head = self.source.current_block().await.map_err(ServiceError::from_source)?;
        let max_block = end_block.map_or(head, |end| min(head, end));

        let Some(window) = self.next_window(state.map(|s| s.last_indexed_block), max_block) else {
            tracing::debug!("No new blocks to index (head {})", head);
            return Ok(state.map(|s| s.last_indexed_block));
        };

        let start = std::time::Instant::now();
        self.process_window(window).await?;
        tracing::info!(
            "process_window completed in {:?} [num_blocks={}]",
            start.elapsed(),
            window.num_blocks()
        );
        Ok(Some(window.to_block))
    }

    /// Next window to process given the last indexed block and the highest
    /// block that may be processed. `None` when there is nothing to do.
    pub fn next_window(&self, last_indexed: Option<u64>, max_block: u64) -> Option<IndexWindow> {
        let from_block = match last_indexed {
            Some(last) => last + 1,
            None => self
                .config
                .start_block
                .unwrap_or_else(|| max_block.saturating_sub(self.config.initial_lookback)),
        };
        let batch_end = from_block.saturating_add(self.config.batch_size.max(1) - 1);
        let to_block = min(max_block, batch_end);

        (to_block >= from_block).then_some(IndexWindow { from_block, to_block })
    }

    /// Apply every event in `window` to the stored positions and advance the
    /// ingest watermark to the end of the window.
    pub async fn process_window(&self, window: IndexWindow) -> Result<(), ServiceError> {
        let IndexWindow { from_block, to_block } = window;
        tracing::info!("=== Processing blocks from {} to {} ===", from_block, to_block);

        let batches = self
            .source
            .fetch_events(from_block, to_block)
            .await
            .map_err(ServiceError::from_source)?;
        let events = normalize(&batches);

        let mut timestamps = HashMap::new();
        cache_embedded_timestamps(&events, &mut timestamps);
        let mut blocks = referenced_blocks(&events);
        blocks.insert(to_block);
        blocks.retain(|block| !timestamps.contains_key(block));
        let fetched =
            self.source.block_timestamps(&blocks).await.map_err(ServiceError::from_source)?;
        timestamps.extend(fetched);

        let window_end_timestamp =
            *timestamps.get(&to_block).ok_or(ServiceError::MissingBlockTimestamp(to_block))?;

        let touched: Vec<Position> = if events.is_empty() {
            Vec::new()
        } else {
            let mut book: PositionBook = self
                .db
                .load_all_positions()
                .await
                .with_db_context("load_all_positions")?
                .into_iter()
                .map(|position| (position.address, position))
                .collect();

            let summary = apply_events(&mut book, &events, create_block_lookup(&timestamps))?;
            if summary.skipped > 0 {
                tracing::warn!(
                    "Skipped {} of {} events in blocks {}..={} with unknown timestamps",
                    summary.skipped,
                    events.len(),
                    from_block,
                    to_block
                );
            }
            tracing::debug!(
                "Applied {} events touching {} positions",
                summary.applied,
                summary.touched.len()
            );

            summary.touched.iter().filter_map(|address| book.remove(address)).collect()
        };

        let state =
            IndexerState { last_indexed_block: to_block, last_indexed_timestamp: window_end_timestamp };
        self.db
            .commit_index_window(&touched, state)
            .await
            .with_db_context("commit_index_window")?;

        tracing::info!(
            "Indexed {} events across blocks {}..={}, {} positions updated",
            events.len(),
            from_block,
            to_block,
            touched.len()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{MockEventSource, TestDb};
    use alloy::primitives::{address, Address, U256};
    use minimerkl_rewards::EventKind;

    const ALICE: Address = address!("00000000000000000000000000000000000a11ce");
    const BOB: Address = address!("0000000000000000000000000000000000000b0b");
    const GENESIS: u64 = 1_700_000_000;

    fn config(batch_size: u64) -> IndexerServiceConfig {
        IndexerServiceConfig {
            interval: Duration::from_millis(10),
            retries: 2,
            batch_size,
            start_block: Some(0),
            initial_lookback: 0,
        }
    }

    #[tokio::test]
    async fn window_bounds() {
        let test_db = TestDb::new().await.unwrap();
        let mut cfg = config(100);
        cfg.start_block = None;
        cfg.initial_lookback = 50;
        let service = IndexerService::new(MockEventSource::new(), test_db.get_db(), cfg);

        assert_eq!(
            service.next_window(None, 1_000),
            Some(IndexWindow { from_block: 950, to_block: 1_000 })
        );
        assert_eq!(
            service.next_window(Some(500), 1_000),
            Some(IndexWindow { from_block: 501, to_block: 600 })
        );
        assert_eq!(service.next_window(Some(1_000), 1_000), None);
        assert_eq!(
            service.next_window(None, 10),
            Some(IndexWindow { from_block: 0, to_block: 10 })
        );
    }

    #[tokio::test]
    async fn cycles_advance_watermark_and_positions() {
        let test_db = TestDb::new().await.unwrap();
        let source = MockEventSource::new();
        source.mine_until(300, GENESIS, 2);
        source.emit(EventKind::Supply, ALICE, None, 1_000, 10);
        source.emit(EventKind::Borrow, ALICE, None, 400, 10);
        source.emit(EventKind::Borrow, BOB, None, 50, 150);
        source.emit(EventKind::Repay, ALICE, None, 400, 250);

        let service = IndexerService::new(source, test_db.get_db(), config(100));
        let db = test_db.get_db();

        assert_eq!(service.run_once(None).await.unwrap(), Some(99));
        let alice = db.get_position(ALICE).await.unwrap().unwrap();
        assert_eq!(alice.last_updated_block, 10);
        assert_eq!(alice.net_lending(), alloy::primitives::I256::try_from(600).unwrap());
        assert_eq!(db.get_position(BOB).await.unwrap(), None);
        assert_eq!(
            db.get_indexer_state().await.unwrap(),
            Some(IndexerState { last_indexed_block: 99, last_indexed_timestamp: GENESIS + 198 })
        );

        assert_eq!(service.run_once(None).await.unwrap(), Some(199));
        assert_eq!(service.run_once(None).await.unwrap(), Some(299));
        assert_eq!(service.run_once(None).await.unwrap(), Some(300));
        assert_eq!(service.run_once(None).await.unwrap(), Some(300));

        // Borrowed 400 against 1000 supplied from block 10 to block 250: never a net borrower.
        let alice = db.get_position(ALICE).await.unwrap().unwrap();
        assert_eq!(alice.last_updated_block, 250);
        assert_eq!(alice.net_borrow_balance_time, U256::ZERO);
        assert_eq!(
            alice.debt_balance_time,
            alloy::primitives::I256::try_from(400 * 480).unwrap()
        );
        let bob = db.get_position(BOB).await.unwrap().unwrap();
        assert_eq!(bob.net_borrowing(), U256::from(50));
    }

    #[tokio::test]
    async fn integrals_survive_across_windows() {
        let test_db = TestDb::new().await.unwrap();
        let source = MockEventSource::new();
        source.mine_until(200, GENESIS, 2);
        source.emit(EventKind::Borrow, BOB, None, 10, 50);
        source.emit(EventKind::Borrow, BOB, None, 10, 150);

        let service = IndexerService::new(source, test_db.get_db(), config(100));
        service.run_once(None).await.unwrap();
        service.run_once(None).await.unwrap();

        let bob = test_db.get_db().get_position(BOB).await.unwrap().unwrap();
        // 10 borrowed for 100 blocks of 2 seconds
        assert_eq!(bob.net_borrow_balance_time, U256::from(2_000));
        assert_eq!(bob.net_borrowing(), U256::from(20));
    }

    #[tokio::test]
    async fn missing_window_end_timestamp_is_retryable() {
        let test_db = TestDb::new().await.unwrap();
        let source = MockEventSource::new();
        source.mine_until(50, GENESIS, 2);
        source.forget_block(50);

        let service = IndexerService::new(source, test_db.get_db(), config(100));
        let err = service.run_once(None).await.unwrap_err();
        assert!(matches!(err, ServiceError::MissingBlockTimestamp(50)));
        assert!(err.is_recoverable());
        assert_eq!(test_db.get_db().get_indexer_state().await.unwrap(), None);
    }

    #[tokio::test]
    async fn ordering_violation_is_fatal_and_commits_nothing() {
        let test_db = TestDb::new().await.unwrap();
        let db = test_db.get_db();

        // A stored position already ahead of the window being indexed.
        let mut ahead = Position::new(ALICE, 80, GENESIS + 160);
        ahead.debt_balance = alloy::primitives::I256::try_from(5).unwrap();
        db.save_positions(&[ahead.clone()]).await.unwrap();

        let source = MockEventSource::new();
        source.mine_until(100, GENESIS, 2);
        source.emit(EventKind::Borrow, ALICE, None, 1, 20);

        let service = IndexerService::new(source, db.clone(), config(100));
        let err = service.run(None).await.unwrap_err();
        assert!(matches!(err, ServiceError::AccumulatorError(_)));
        assert_eq!(db.get_indexer_state().await.unwrap(), None);
        assert_eq!(db.get_position(ALICE).await.unwrap(), Some(ahead));
    }

    #[tokio::test]
    async fn run_retries_transient_failures_and_stops_at_end_block() {
        let test_db = TestDb::new().await.unwrap();
        let source = MockEventSource::new();
        source.mine_until(250, GENESIS, 2);
        source.emit(EventKind::Supply, ALICE, None, 5, 120);
        source.fail_next(2);

        let service = IndexerService::new(source, test_db.get_db(), config(100));
        service.run(Some(220)).await.unwrap();

        let state = test_db.get_db().get_indexer_state().await.unwrap().unwrap();
        assert_eq!(state.last_indexed_block, 220);
        assert!(test_db.get_db().get_position(ALICE).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn run_gives_up_after_max_retries() {
        let test_db = TestDb::new().await.unwrap();
        let source = MockEventSource::new();
        source.mine_until(10, GENESIS, 2);
        source.fail_next(100);

        let mut cfg = config(100);
        cfg.retries = 1;
        let service = IndexerService::new(source, test_db.get_db(), cfg);
        let err = service.run(None).await.unwrap_err();
        assert!(matches!(err, ServiceError::MaxRetries));
    }
}
