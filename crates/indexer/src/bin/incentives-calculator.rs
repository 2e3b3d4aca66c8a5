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

use std::{sync::Arc, time::Duration};

use alloy::primitives::Address;
use anyhow::{bail, Result};
use clap::Parser;
use minimerkl_indexer::{connect_provider, IncentivesDb, RewardsService, RewardsServiceConfig};
use minimerkl_rewards::RpcEventSource;
use url::Url;

/// Arguments of the rewards calculator.
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct MainArgs {
    /// URL of the Ethereum RPC endpoint.
    #[clap(short, long, env)]
    rpc_url: Url,
    /// Address of the lending pool contract.
    #[clap(long, env)]
    pool_address: Address,
    /// Address of the incentivized asset.
    #[clap(long, env)]
    asset_address: Address,
    /// DB connection string.
    #[clap(long, env = "DATABASE_URL")]
    db: String,
    /// Interval in seconds between allocation cycles.
    #[clap(long, default_value = "3600")]
    interval: u64,
    /// Number of retries before quitting after an error.
    #[clap(long, default_value = "5")]
    retries: u32,
    /// Run a single cycle and exit.
    #[clap(long, default_value_t = false)]
    once: bool,
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

    let config = RewardsServiceConfig {
        interval: Duration::from_secs(args.interval),
        retries: args.retries,
        target_token: Some(args.asset_address),
    };

    let db = IncentivesDb::new(&args.db).await?;
    let source =
        RpcEventSource::new(connect_provider(args.rpc_url), args.pool_address, args.asset_address);
    let service = RewardsService::new(source, Arc::new(db), config);

    if args.once {
        let report = service.run_cycle().await?;
        tracing::info!(
            "Rewards cycle done: {} processed, {} skipped, {} failed, ended {:?}",
            report.processed,
            report.skipped,
            report.failed,
            report.ended
        );
        if report.failed > 0 {
            bail!("{} campaigns failed", report.failed);
        }
        return Ok(());
    }

    if let Err(err) = service.run().await {
        bail!("Error running the rewards calculator: {err}");
    }

    Ok(())
}
