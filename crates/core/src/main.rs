// Staywatch is an open source short-term rental demand crawler.
// Copyright (C) 2026 Staywatch contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as
// published by the Free Software Foundation, either version 3 of the
// License, or (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use staywatch::config::StaywatchConfig;
use staywatch::crawler::credentials::{CredentialStore, Extractor};
use staywatch::crawler::scheduler::{JobContext, Scheduler};
use staywatch::db::{load_station_seed, Db};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[clap(author, version, about = "Airbnb demand crawler for Seoul subway stations")]
struct Args {
    /// Load the station seed into the store, print status, and exit.
    #[clap(long)]
    init: bool,

    /// Print crawler status and exit.
    #[clap(long)]
    status: bool,

    /// Run the named job(s) one time, then exit.
    #[clap(long, value_parser = ["search", "calendar", "detail", "all"])]
    once: Option<String>,

    /// Run the credential extractor and exit.
    #[clap(long)]
    extract_key: bool,

    /// Use a visible browser window for the extractor fallback.
    #[clap(long)]
    visible: bool,

    /// Path to a TOML configuration file.
    #[clap(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = StaywatchConfig::load(args.config.as_deref())?;
    let context = JobContext::new(config)?;
    tracing::info!("staywatch starting (tier {})", context.tier);

    if args.init {
        let seed = load_station_seed(std::path::Path::new(&context.config.paths.stations_file))?;
        let mut db = Db::open(&context.config.db_path())?;
        let inserted = db.seed_stations(&seed)?;
        tracing::info!("loaded {inserted} new stations from seed");
        print_status(&context)?;
        return Ok(());
    }

    if args.status {
        print_status(&context)?;
        return Ok(());
    }

    if args.extract_key {
        let store = CredentialStore::new(&context.config.paths.credentials_file);
        let extractor = Extractor::new(&context.config)?;
        let credentials = extractor.ensure(&store, true, args.visible).await;

        println!("{:=<50}", "");
        println!(
            "  API key: {}",
            if credentials.api_key.is_empty() {
                "NOT FOUND".to_string()
            } else {
                credentials.api_key.clone()
            }
        );
        println!("  Operation hashes:");
        for (operation, hash) in &credentials.hashes {
            println!("    {operation}: {}…", &hash[..hash.len().min(32)]);
        }
        println!("{:=<50}", "");
        return Ok(());
    }

    if let Some(mode) = args.once.as_deref() {
        run_once(&context, mode).await?;
        print_status(&context)?;
        return Ok(());
    }

    run_scheduler(context).await
}

async fn run_once(context: &JobContext, mode: &str) -> Result<()> {
    if matches!(mode, "search" | "all") {
        context.run_search().await?;
    }
    if matches!(mode, "calendar" | "all") {
        context.run_calendar().await?;
    }
    if matches!(mode, "detail" | "all") {
        context.run_detail().await?;
    }
    Ok(())
}

async fn run_scheduler(context: JobContext) -> Result<()> {
    let scheduler = Scheduler::start(context);

    shutdown_signal().await;

    scheduler.shutdown();
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term = signal(SignalKind::terminate()).expect("install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = term.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.ok();
    }

    tracing::info!("received shutdown signal");
}

fn print_status(context: &JobContext) -> Result<()> {
    let db = Db::open(&context.config.db_path())?;
    let counts = db.status_counts()?;
    let last = db.last_crawl_log()?;

    println!("{:=<50}", "");
    println!("  Staywatch - status");
    println!("{:=<50}", "");
    println!("  Tier: {}", context.tier);
    println!("  Station priorities: {:?}", context.budget.station_priorities);
    println!("  Proxy required: {}", context.budget.proxy_required);
    println!("  Max requests/hour: {}", context.budget.max_requests_per_hour);
    println!();
    println!("  Stations in store: {}", counts.stations);
    println!("  Listings discovered: {}", counts.listings);
    println!("  Search snapshots: {}", counts.search_snapshots);

    if let Some(last) = last {
        println!();
        println!("  Last crawl:");
        println!("    Type: {}", last.job_type);
        println!("    Time: {}", last.started_at);
        println!("    Status: {}", last.status.as_deref().unwrap_or("-"));
        println!(
            "    Success/Total: {}/{}",
            last.successful_requests, last.total_requests
        );
        if last.blocked_requests > 0 {
            println!("    Blocked: {}", last.blocked_requests);
        }
    }
    println!("{:=<50}", "");

    Ok(())
}
