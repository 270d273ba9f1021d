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

//! Recurring crawl schedule.
//!
//! Three loops, all derived from the active tier: search every N
//! minutes (with one immediate run at startup), calendar daily at the
//! tier's hour, detail weekly on Monday mornings. Each job type runs
//! inline in its own loop, so at most one instance of a job is ever in
//! flight; overlapping job types still share one limiter and one proxy
//! pool per process-wide budget, because every run constructs its
//! client from the same tier budget.

use std::sync::Arc;
use std::time::Duration;

use chrono::{Datelike, Local, NaiveDateTime, Weekday};

use crate::config::{StaywatchConfig, Tier, TierBudget};
use crate::crawler::client::UpstreamClient;
use crate::crawler::credentials::{CredentialStore, Credentials, Extractor};
use crate::crawler::jobs::{calendar::CalendarJob, detail::DetailJob, search::SearchJob};
use crate::db::Db;

const DETAIL_WEEKDAY: Weekday = Weekday::Mon;
const DETAIL_HOUR: u32 = 5;

/// Everything a job run needs: config, the materialized budget, and
/// credential bootstrapping.
pub struct JobContext {
    pub config: StaywatchConfig,
    pub tier: Tier,
    pub budget: TierBudget,
}

impl JobContext {
    pub fn new(config: StaywatchConfig) -> crate::Result<Self> {
        let tier = config.tier()?;
        let budget = TierBudget::for_tier(tier);
        Ok(Self {
            config,
            tier,
            budget,
        })
    }

    /// Loads cached credentials, invoking the extractor when the store
    /// is empty or expired. Jobs refuse to run without a usable key.
    pub async fn credentials(&self) -> crate::Result<Credentials> {
        let store = CredentialStore::new(&self.config.paths.credentials_file);

        let mut credentials = match store.load() {
            Some(credentials) => credentials,
            None => match Extractor::new(&self.config) {
                Ok(extractor) => extractor.ensure(&store, false, false).await,
                Err(err) => {
                    tracing::error!("failed to build extractor: {err:#}");
                    Credentials::default()
                }
            },
        };

        if !self.config.upstream.api_key.is_empty() {
            credentials.api_key = self.config.upstream.api_key.clone();
        }

        if !credentials.is_usable() {
            return Err(crate::Error::MissingCredentials);
        }
        Ok(credentials)
    }

    async fn client(&self) -> crate::Result<UpstreamClient> {
        let credentials = self.credentials().await?;
        Ok(UpstreamClient::new(&self.config, &self.budget, credentials)?)
    }

    pub async fn run_search(&self) -> crate::Result<()> {
        let mut db = Db::open(&self.config.db_path())?;
        let mut client = self.client().await?;

        SearchJob::new(&mut client, &mut db, self.config.crawl.max_search_pages)
            .run(&self.budget)
            .await?;

        log_client_stats(&mut client);
        Ok(())
    }

    pub async fn run_calendar(&self) -> crate::Result<()> {
        if !self.budget.calendar_enabled {
            tracing::info!("calendar crawling disabled for tier {}", self.tier);
            return Ok(());
        }

        let mut db = Db::open(&self.config.db_path())?;
        let mut client = self.client().await?;

        CalendarJob::new(&mut client, &mut db, self.config.crawl.calendar_months)
            .run()
            .await?;

        log_client_stats(&mut client);

        // Fold yesterday's observations into the daily stats while the
        // store is warm.
        let yesterday = Local::now().date_naive() - chrono::Days::new(1);
        if let Err(err) = crate::stats::run_daily_aggregation(&mut db, yesterday) {
            tracing::error!("daily aggregation failed: {err}");
        }
        Ok(())
    }

    pub async fn run_detail(&self) -> crate::Result<()> {
        if !self.budget.detail_enabled {
            tracing::info!("listing detail crawling disabled for tier {}", self.tier);
            return Ok(());
        }

        let mut db = Db::open(&self.config.db_path())?;
        let mut client = self.client().await?;

        DetailJob::new(&mut client, &mut db).run().await?;

        log_client_stats(&mut client);
        Ok(())
    }
}

fn log_client_stats(client: &mut UpstreamClient) {
    let stats = client.stats();
    tracing::info!(
        "requests: total={} success={} failed={} blocked={} multiplier={:.1}x",
        stats.requests.total,
        stats.requests.success,
        stats.requests.failed,
        stats.requests.blocked,
        stats.delay_multiplier,
    );
    if stats.proxies.total > 0 {
        tracing::info!(
            "proxies: {}/{} available, {} blocks seen",
            stats.proxies.available,
            stats.proxies.total,
            stats.proxies.blocked_total,
        );
    }
}

/// Seconds until the next local occurrence of `hour:00`.
pub(crate) fn until_next_daily(now: NaiveDateTime, hour: u32) -> Duration {
    let today = now
        .date()
        .and_hms_opt(hour, 0, 0)
        .expect("hour is validated by the tier table");
    let target = if now < today {
        today
    } else {
        today + chrono::Days::new(1)
    };
    (target - now).to_std().unwrap_or_default()
}

/// Seconds until the next local occurrence of `weekday` at `hour:00`.
pub(crate) fn until_next_weekly(now: NaiveDateTime, weekday: Weekday, hour: u32) -> Duration {
    let days_ahead =
        (7 + weekday.num_days_from_monday() - now.weekday().num_days_from_monday()) % 7;
    let candidate = (now.date() + chrono::Days::new(days_ahead as u64))
        .and_hms_opt(hour, 0, 0)
        .expect("hour is validated by the tier table");
    let target = if now < candidate {
        candidate
    } else {
        candidate + chrono::Days::new(7)
    };
    (target - now).to_std().unwrap_or_default()
}

pub struct Scheduler {
    handles: Vec<tokio::task::JoinHandle<()>>,
}

impl Scheduler {
    /// Registers the tier's recurring jobs and fires the first search
    /// immediately.
    pub fn start(context: JobContext) -> Self {
        let context = Arc::new(context);
        let mut handles = Vec::new();

        let search_context = Arc::clone(&context);
        let search_minutes = context.budget.search_interval_minutes;
        handles.push(tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(Duration::from_secs(search_minutes * 60));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                if let Err(err) = search_context.run_search().await {
                    tracing::error!("search job failed: {err}");
                }
            }
        }));

        if context.budget.calendar_enabled {
            let calendar_context = Arc::clone(&context);
            let hour = context.budget.calendar_hour;
            handles.push(tokio::spawn(async move {
                loop {
                    let wait = until_next_daily(Local::now().naive_local(), hour);
                    tracing::info!(
                        "next calendar run in {:.1}h",
                        wait.as_secs_f64() / 3600.0
                    );
                    tokio::time::sleep(wait).await;
                    if let Err(err) = calendar_context.run_calendar().await {
                        tracing::error!("calendar job failed: {err}");
                    }
                }
            }));
        }

        if context.budget.detail_enabled {
            let detail_context = Arc::clone(&context);
            handles.push(tokio::spawn(async move {
                loop {
                    let wait = until_next_weekly(
                        Local::now().naive_local(),
                        DETAIL_WEEKDAY,
                        DETAIL_HOUR,
                    );
                    tracing::info!(
                        "next detail run in {:.1}h",
                        wait.as_secs_f64() / 3600.0
                    );
                    tokio::time::sleep(wait).await;
                    if let Err(err) = detail_context.run_detail().await {
                        tracing::error!("detail job failed: {err}");
                    }
                }
            }));
        }

        tracing::info!(
            "scheduler started (tier {}): search every {}min, calendar {}, detail {}",
            context.tier,
            context.budget.search_interval_minutes,
            if context.budget.calendar_enabled {
                format!("daily@{:02}:00", context.budget.calendar_hour)
            } else {
                "disabled".to_string()
            },
            if context.budget.detail_enabled {
                "weekly"
            } else {
                "disabled"
            },
        );

        Self { handles }
    }

    /// Stops firing new instances; running work is abandoned at its
    /// next await point.
    pub fn shutdown(self) {
        for handle in self.handles {
            handle.abort();
        }
        tracing::info!("scheduler stopped");
    }
}
