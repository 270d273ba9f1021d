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

//! Crawl jobs: search snapshots, calendars, and listing details.
//!
//! Jobs iterate their units (stations or listings) in stable order,
//! tally per-unit failures without aborting, and leave a crawl-log row
//! behind. A job is `success` with zero failed units, `partial`
//! otherwise; `failed` is reserved for job-wide setup errors.

pub mod calendar;
pub mod detail;
pub mod search;

use chrono::Utc;

use crate::crawler::client::UpstreamClient;
use crate::db::{Db, NewCrawlLog};

/// Per-run bookkeeping shared by the three jobs.
pub(crate) struct JobRun {
    job_type: &'static str,
    started_at: chrono::DateTime<Utc>,
    total: i64,
    succeeded: i64,
    failed: i64,
    blocked_at_start: u64,
}

impl JobRun {
    pub(crate) fn start(job_type: &'static str, client: &mut UpstreamClient) -> Self {
        tracing::info!("=== {job_type} job started ===");
        Self {
            job_type,
            started_at: Utc::now(),
            total: 0,
            succeeded: 0,
            failed: 0,
            blocked_at_start: client.stats().requests.blocked,
        }
    }

    pub(crate) fn unit_succeeded(&mut self) {
        self.total += 1;
        self.succeeded += 1;
    }

    pub(crate) fn unit_failed(&mut self) {
        self.total += 1;
        self.failed += 1;
    }

    pub(crate) fn succeeded(&self) -> i64 {
        self.succeeded
    }

    /// Writes the crawl log. The job-wide `error` forces a `failed`
    /// status regardless of unit counts.
    pub(crate) fn finish(
        self,
        client: &mut UpstreamClient,
        db: &mut Db,
        error: Option<String>,
    ) -> crate::Result<()> {
        let status = match (&error, self.failed) {
            (Some(_), _) => "failed",
            (None, 0) => "success",
            (None, _) => "partial",
        };

        let blocked = client
            .stats()
            .requests
            .blocked
            .saturating_sub(self.blocked_at_start);

        tracing::info!(
            "{} job complete: {}/{} units, status={status}",
            self.job_type,
            self.succeeded,
            self.total
        );

        db.insert_crawl_log(&NewCrawlLog {
            job_type: self.job_type.to_string(),
            started_at: self.started_at,
            finished_at: Utc::now(),
            status: status.to_string(),
            total_requests: self.total,
            successful_requests: self.succeeded,
            failed_requests: self.failed,
            blocked_requests: blocked as i64,
            error_message: error,
        })
    }
}

/// Digits of a localized price string, e.g. `"₩119,824"` → `119824.0`.
pub(crate) fn parse_price_digits(raw: &str) -> Option<f64> {
    let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
    if digits.is_empty() {
        return None;
    }
    digits.parse().ok()
}

/// Leading float of a localized rating string, e.g. `"4.93 (121)"`.
pub(crate) fn parse_rating(raw: &str) -> Option<f64> {
    let prefix: String = raw
        .trim()
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    if prefix.is_empty() {
        return None;
    }
    prefix.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn won_prices_reduce_to_digits() {
        assert_eq!(parse_price_digits("₩119,824"), Some(119824.0));
        assert_eq!(parse_price_digits("₩50,000"), Some(50000.0));
        assert_eq!(parse_price_digits("가격 없음"), None);
        assert_eq!(parse_price_digits(""), None);
    }

    #[test]
    fn ratings_parse_their_leading_float() {
        assert_eq!(parse_rating("4.93"), Some(4.93));
        assert_eq!(parse_rating("4.93 (121)"), Some(4.93));
        assert_eq!(parse_rating("별점 없음"), None);
    }
}
