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

use alloy::{
    providers::{
        fillers::{ChainIdFiller, FillProvider, JoinFill},
        Identity, ProviderBuilder, RootProvider,
    },
    rpc::client::RpcClient,
    transports::layers::RetryBackoffLayer,
};
use minimerkl_rewards::{AccumulatorError, AllocationError, EventError};
use thiserror::Error;
use url::Url;

pub mod db;
pub mod indexer;
pub mod rewards;
pub mod test_utils;

pub use db::{DbError, DbObj, IncentivesDb};
pub use indexer::{IndexerService, IndexerServiceConfig};
pub use rewards::{CampaignLocks, CycleReport, RewardsService, RewardsServiceConfig};

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] DbError),

    #[error("Database query error in {1}: {0}")]
    DatabaseQueryError(DbError, String),

    #[error("Event source error: {0:#}")]
    SourceError(anyhow::Error),

    #[error("Event decoding error: {0}")]
    EventError(#[from] EventError),

    #[error("Position accounting error: {0}")]
    AccumulatorError(#[from] AccumulatorError),

    #[error("Allocation error: {0}")]
    AllocationError(#[from] AllocationError),

    #[error("Timestamp for block {0} not found")]
    MissingBlockTimestamp(u64),

    #[error("Maximum retries reached")]
    MaxRetries,
}

impl ServiceError {
    /// Wrap an event source error. Decoding failures surface as [ServiceError::EventError].
    pub fn from_source(err: anyhow::Error) -> Self {
        match err.downcast::<EventError>() {
            Ok(err) => ServiceError::EventError(err),
            Err(err) => ServiceError::SourceError(err),
        }
    }

    /// Transient chain or network failures that a later attempt may get past.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, ServiceError::SourceError(_) | ServiceError::MissingBlockTimestamp(_))
    }
}

pub trait DbResultExt<T> {
    fn with_db_context(self, context: &str) -> Result<T, ServiceError>;
}

impl<T> DbResultExt<T> for Result<T, DbError> {
    fn with_db_context(self, context: &str) -> Result<T, ServiceError> {
        self.map_err(|e| ServiceError::DatabaseQueryError(e, context.to_string()))
    }
}

pub type ProviderType = FillProvider<JoinFill<Identity, ChainIdFiller>, RootProvider>;

/// HTTP provider with retry and backoff on rate limiting.
pub fn connect_provider(rpc_url: Url) -> ProviderType {
    ProviderBuilder::new()
        .disable_recommended_fillers()
        .filler(ChainIdFiller::default())
        .connect_client(RpcClient::builder().layer(RetryBackoffLayer::new(3, 1000, 200)).http(rpc_url))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decoding_errors_are_not_retried() {
        let err = ServiceError::from_source(anyhow::Error::new(EventError::MissingSignature));
        assert!(matches!(err, ServiceError::EventError(EventError::MissingSignature)));
        assert!(!err.is_recoverable());

        let err = ServiceError::from_source(anyhow::anyhow!("connection reset by peer"));
        assert!(matches!(err, ServiceError::SourceError(_)));
        assert!(err.is_recoverable());
    }
}
