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

use std::time::Duration;

use alloy::primitives::Address;
use anyhow::{bail, Result};
use clap::Parser;
use minimerkl_indexer::{connect_provider, IncentivesDb, IndexerService, IndexerServiceConfig};
use minimerkl_rewards::RpcEventSource;
use url::Url;

/// Arguments of the incentives indexer.
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct MainArgs {
    /// URL of the Ethereum RPC endpoint.
    #[clap(short, long, env)]
    rpc_url: Url,
    /// Address of the lending pool contract.
    #[clap(long, env)]
    pool_address: Address,
    /// Address of the asset whose supply and borrow events are indexed.
    #[clap(long, env)]
    asset_address: Address,
    /// DB connection string.
    #[clap(long, env = "DATABASE_URL")]
    db: String,
    /// Starting block number, used when nothing has been indexed yet.
    #[clap(long)]
    start_block: Option<u64>,
    /// Ending block number (if set, indexer will process up to this block and exit).
    #[clap(long)]
    end_block: Option<u64>,
    /// Without a starting block, how many blocks behind the head to begin.
    #[clap(long, default_value = "10000")]
    initial_lookback: u64,
    /// Interval in seconds between checking for new events.
    #[clap(long, default_value = "12")]
    interval: u64,
    /// Number of retries before quitting after an error.
    #[clap(long, default_value = "10")]
    retries: u32,
    /// Number of blocks to process in each batch.
    #[clap(long, default_value = "1000")]
    batch_size: u64,
    /// Whether to log in JSON format.
    #[clap(long, env, default_value_t = false)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env before parsing so it can supply env-backed arguments.
    let dotenv = dotenvy::dotenv();
    let args = MainArgs::parse();

    if args.log_json {
        tracing_subscriber::fmt()
            .with_ansi(false)
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .init();
    }

    match dotenv {
        Ok(path) => tracing::debug!("Loaded environment variables from {:?}", path),
        Err(e) if e.not_found() => tracing::debug!("No .env file found"),
        Err(e) => bail!("failed to load .env file: {}", e),
    }

    let config = IndexerServiceConfig {
        interval: Duration::from_secs(args.interval),
        retries: args.retries,
        batch_size: args.batch_size,
        start_block: args.start_block,
        initial_lookback: args.initial_lookback,
    };

    let db = IncentivesDb::new(&args.db).await?;
    let source =
        RpcEventSource::new(connect_provider(args.rpc_url), args.pool_address, args.asset_address);
    tracing::info!(
        "Indexing pool {:#x} for asset {:#x}",
        args.pool_address,
        args.asset_address
    );

    let service = IndexerService::new(source, std::sync::Arc::new(db), config);
    if let Err(err) = service.run(args.end_block).await {
        bail!("Error running the incentives indexer: {err}");
    }

    Ok(())
}
