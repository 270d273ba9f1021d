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

//! Adaptive rate limiter and circuit breaker.
//!
//! Every outbound request suspends in [`RateLimiter::wait`] before it
//! is allowed out. The delay is `(base + jitter) * m`, where the
//! multiplier `m` escalates multiplicatively on recognized blocks and
//! decays by 0.9 on success: rate-limit responses are transient, while
//! captcha responses require much longer off-times, so the escalation
//! factor depends on the block kind. A run of consecutive failures
//! opens the circuit outright.

use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;

use crate::config::TierBudget;
use crate::crawler::block::BlockType;

const CIRCUIT_FAILURE_THRESHOLD: u32 = 5;
const CIRCUIT_OPEN_SECS: u64 = 300;
const CIRCUIT_HALF_OPEN_PROBES: u32 = 2;

const HOUR_SECS: u64 = 3600;
const DAY_SECS: u64 = 86400;

const MULTIPLIER_CEIL: f64 = 10.0;
const MULTIPLIER_DECAY: f64 = 0.9;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CircuitState {
    Closed,
    OpenUntil(Instant),
    HalfOpen { remaining: u32 },
}

/// Lifetime and windowed request counters. Monotonically updated by
/// the limiter; exposed read-only for the status surface.
#[derive(Debug, Clone, Copy)]
pub struct RequestStats {
    pub total: u64,
    pub success: u64,
    pub failed: u64,
    pub blocked: u64,
    pub consecutive_failures: u32,
    pub hourly_count: u64,
    pub daily_count: u64,
    hour_start: Instant,
    day_start: Instant,
}

impl RequestStats {
    fn new() -> Self {
        let now = Instant::now();
        Self {
            total: 0,
            success: 0,
            failed: 0,
            blocked: 0,
            consecutive_failures: 0,
            hourly_count: 0,
            daily_count: 0,
            hour_start: now,
            day_start: now,
        }
    }

    fn reset_hourly(&mut self) {
        self.hourly_count = 0;
        self.hour_start = Instant::now();
    }

    fn reset_daily(&mut self) {
        self.daily_count = 0;
        self.day_start = Instant::now();
    }
}

pub struct RateLimiter {
    base_delay: f64,
    jitter: (f64, f64),
    max_per_hour: u64,
    daily_limit: u64,
    multiplier: f64,
    stats: RequestStats,
    circuit: CircuitState,
}

impl RateLimiter {
    pub fn new(budget: &TierBudget) -> Self {
        Self {
            base_delay: budget.base_delay_secs,
            jitter: budget.jitter_secs,
            max_per_hour: budget.max_requests_per_hour,
            daily_limit: budget.daily_limit_per_ip,
            multiplier: 1.0,
            stats: RequestStats::new(),
            circuit: CircuitState::Closed,
        }
    }

    /// Suspends until the next request is admissible, then books it
    /// against the hourly and daily windows.
    pub async fn wait(&mut self) {
        if let CircuitState::OpenUntil(until) = self.circuit {
            let now = Instant::now();
            if until > now {
                let remaining = until - now;
                tracing::warn!("circuit open; waiting {:.0}s", remaining.as_secs_f64());
                tokio::time::sleep(remaining).await;
            }
            self.circuit = CircuitState::HalfOpen {
                remaining: CIRCUIT_HALF_OPEN_PROBES,
            };
            tracing::info!(
                "circuit half-open; probing with {} requests",
                CIRCUIT_HALF_OPEN_PROBES
            );
        }

        let now = Instant::now();
        if now - self.stats.hour_start >= Duration::from_secs(HOUR_SECS) {
            self.stats.reset_hourly();
        }
        if now - self.stats.day_start >= Duration::from_secs(DAY_SECS) {
            self.stats.reset_daily();
        }

        if self.stats.hourly_count >= self.max_per_hour {
            let elapsed = Instant::now() - self.stats.hour_start;
            if let Some(remainder) = Duration::from_secs(HOUR_SECS).checked_sub(elapsed) {
                tracing::warn!(
                    "hourly limit reached ({}); waiting {:.0}s",
                    self.max_per_hour,
                    remainder.as_secs_f64()
                );
                tokio::time::sleep(remainder).await;
            }
            self.stats.reset_hourly();
        }

        if self.stats.daily_count >= self.daily_limit {
            let elapsed = Instant::now() - self.stats.day_start;
            if let Some(remainder) = Duration::from_secs(DAY_SECS).checked_sub(elapsed) {
                tracing::warn!(
                    "daily limit reached ({}); waiting {:.0}s",
                    self.daily_limit,
                    remainder.as_secs_f64()
                );
                tokio::time::sleep(remainder).await;
            }
            self.stats.reset_daily();
        }

        let jitter = rand::thread_rng().gen_range(self.jitter.0..=self.jitter.1);
        let delay = (self.base_delay + jitter) * self.multiplier;
        tokio::time::sleep(Duration::from_secs_f64(delay)).await;

        self.stats.total += 1;
        self.stats.hourly_count += 1;
        self.stats.daily_count += 1;
    }

    pub fn report_success(&mut self) {
        self.stats.success += 1;
        self.stats.consecutive_failures = 0;

        if self.multiplier > 1.0 {
            self.multiplier = (self.multiplier * MULTIPLIER_DECAY).max(1.0);
        }

        if let CircuitState::HalfOpen { remaining } = self.circuit {
            let remaining = remaining.saturating_sub(1);
            if remaining == 0 {
                tracing::info!("circuit closed; recovery confirmed");
                self.circuit = CircuitState::Closed;
            } else {
                self.circuit = CircuitState::HalfOpen { remaining };
            }
        }
    }

    pub fn report_failure(&mut self, block: BlockType) {
        self.stats.failed += 1;
        self.stats.consecutive_failures += 1;

        if block.is_block() {
            self.stats.blocked += 1;
            let factor = match block {
                BlockType::RateLimit => 2.0,
                BlockType::Forbidden => 3.0,
                BlockType::Captcha => 4.0,
                _ => 1.5,
            };
            self.multiplier = (self.multiplier * factor).min(MULTIPLIER_CEIL);
            tracing::warn!(
                "block detected ({}); delay multiplier now {:.1}x",
                block.as_str(),
                self.multiplier
            );
        }

        if self.stats.consecutive_failures >= CIRCUIT_FAILURE_THRESHOLD {
            self.circuit =
                CircuitState::OpenUntil(Instant::now() + Duration::from_secs(CIRCUIT_OPEN_SECS));
            self.stats.consecutive_failures = 0;
            tracing::error!(
                "circuit opened after {} consecutive failures; pausing {}s",
                CIRCUIT_FAILURE_THRESHOLD,
                CIRCUIT_OPEN_SECS
            );
        }
    }

    pub fn stats(&self) -> RequestStats {
        self.stats
    }

    pub fn multiplier(&self) -> f64 {
        self.multiplier
    }

    pub fn circuit(&self) -> CircuitState {
        self.circuit
    }
}
