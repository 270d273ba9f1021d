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

pub mod defaults;

use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::{Error, Result};

/// Named operating point. Each tier bundles request budgets, pacing and
/// proxy policy; `CRAWL_TIER` selects one at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Tier {
    A,
    B,
    C,
}

impl FromStr for Tier {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "A" => Ok(Tier::A),
            "B" => Ok(Tier::B),
            "C" => Ok(Tier::C),
            other => Err(Error::UnknownTier(other.to_string())),
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Tier::A => write!(f, "A"),
            Tier::B => write!(f, "B"),
            Tier::C => write!(f, "C"),
        }
    }
}

/// The budget vector materialized from a tier. Immutable for the
/// lifetime of the process.
#[derive(Debug, Clone, PartialEq)]
pub struct TierBudget {
    /// Station priorities this tier crawls (subset of {1, 2, 3}).
    pub station_priorities: Vec<u8>,
    /// Minutes between search snapshot runs.
    pub search_interval_minutes: u64,
    pub calendar_enabled: bool,
    /// Local hour-of-day at which the daily calendar crawl fires.
    pub calendar_hour: u32,
    pub detail_enabled: bool,
    pub max_concurrent_requests: usize,
    /// Base delay between requests, before jitter and the adaptive
    /// multiplier.
    pub base_delay_secs: f64,
    pub jitter_secs: (f64, f64),
    pub proxy_required: bool,
    pub requests_per_ip_before_rotate: u64,
    pub max_requests_per_hour: u64,
    pub daily_limit_per_ip: u64,
}

impl TierBudget {
    pub fn for_tier(tier: Tier) -> Self {
        match tier {
            Tier::A => Self {
                station_priorities: vec![1],
                search_interval_minutes: 60,
                calendar_enabled: true,
                calendar_hour: 3,
                detail_enabled: false,
                max_concurrent_requests: 1,
                base_delay_secs: 7.0,
                jitter_secs: (2.0, 8.0),
                proxy_required: false,
                requests_per_ip_before_rotate: 500,
                max_requests_per_hour: 500,
                daily_limit_per_ip: 8000,
            },
            Tier::B => Self {
                station_priorities: vec![1, 2],
                search_interval_minutes: 60,
                calendar_enabled: true,
                calendar_hour: 2,
                detail_enabled: true,
                max_concurrent_requests: 2,
                base_delay_secs: 5.0,
                jitter_secs: (1.0, 5.0),
                proxy_required: true,
                requests_per_ip_before_rotate: 30,
                max_requests_per_hour: 80,
                daily_limit_per_ip: 600,
            },
            Tier::C => Self {
                station_priorities: vec![1, 2, 3],
                search_interval_minutes: 60,
                calendar_enabled: true,
                calendar_hour: 1,
                detail_enabled: true,
                max_concurrent_requests: 3,
                base_delay_secs: 4.0,
                jitter_secs: (1.0, 4.0),
                proxy_required: true,
                requests_per_ip_before_rotate: 25,
                max_requests_per_hour: 100,
                daily_limit_per_ip: 500,
            },
        }
    }
}

#[derive(Debug, serde::Deserialize, Clone)]
pub struct UpstreamConfig {
    #[serde(default = "defaults::Upstream::base_url")]
    pub base_url: String,

    #[serde(default = "defaults::Upstream::currency")]
    pub currency: String,

    #[serde(default = "defaults::Upstream::locale")]
    pub locale: String,

    #[serde(default = "defaults::Upstream::timeout_seconds")]
    pub timeout_seconds: u64,

    /// Overrides the extracted API key when set (or via `AIRBNB_API_KEY`).
    #[serde(default)]
    pub api_key: String,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: defaults::Upstream::base_url(),
            currency: defaults::Upstream::currency(),
            locale: defaults::Upstream::locale(),
            timeout_seconds: defaults::Upstream::timeout_seconds(),
            api_key: String::new(),
        }
    }
}

#[derive(Debug, serde::Deserialize, Clone)]
pub struct CrawlTuning {
    #[serde(default = "defaults::Crawl::search_radius_km")]
    pub search_radius_km: f64,

    #[serde(default = "defaults::Crawl::default_guests")]
    pub default_guests: u32,

    #[serde(default = "defaults::Crawl::calendar_months")]
    pub calendar_months: u32,

    #[serde(default = "defaults::Crawl::max_search_pages")]
    pub max_search_pages: u32,

    #[serde(default = "defaults::Extractor::webdriver_url")]
    pub webdriver_url: String,
}

impl Default for CrawlTuning {
    fn default() -> Self {
        Self {
            search_radius_km: defaults::Crawl::search_radius_km(),
            default_guests: defaults::Crawl::default_guests(),
            calendar_months: defaults::Crawl::calendar_months(),
            max_search_pages: defaults::Crawl::max_search_pages(),
            webdriver_url: defaults::Extractor::webdriver_url(),
        }
    }
}

#[derive(Debug, serde::Deserialize, Clone)]
pub struct PathsConfig {
    #[serde(default = "defaults::Paths::data_dir")]
    pub data_dir: String,

    #[serde(default = "defaults::Paths::db_file")]
    pub db_file: String,

    #[serde(default = "defaults::Paths::credentials_file")]
    pub credentials_file: String,

    #[serde(default = "defaults::Paths::proxies_file")]
    pub proxies_file: String,

    #[serde(default = "defaults::Paths::stations_file")]
    pub stations_file: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data_dir: defaults::Paths::data_dir(),
            db_file: defaults::Paths::db_file(),
            credentials_file: defaults::Paths::credentials_file(),
            proxies_file: defaults::Paths::proxies_file(),
            stations_file: defaults::Paths::stations_file(),
        }
    }
}

/// Process-wide configuration. Loaded from an optional TOML file, then
/// patched by environment variables (`CRAWL_TIER`, `AIRBNB_API_KEY`,
/// `PROXY_LIST`, `STAYWATCH_DB`).
#[derive(Debug, serde::Deserialize, Clone, Default)]
pub struct StaywatchConfig {
    #[serde(default)]
    pub tier: Option<String>,

    #[serde(default)]
    pub upstream: UpstreamConfig,

    #[serde(default)]
    pub crawl: CrawlTuning,

    #[serde(default)]
    pub paths: PathsConfig,

    /// Comma-separated proxy URLs, merged with the proxies file.
    #[serde(default)]
    pub proxy_list: String,
}

impl StaywatchConfig {
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut config: StaywatchConfig = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)?;
                toml::from_str(&raw)?
            }
            None => StaywatchConfig::default(),
        };

        if let Ok(tier) = std::env::var("CRAWL_TIER") {
            config.tier = Some(tier);
        }
        if let Ok(key) = std::env::var("AIRBNB_API_KEY") {
            config.upstream.api_key = key;
        }
        if let Ok(proxies) = std::env::var("PROXY_LIST") {
            config.proxy_list = proxies;
        }
        if let Ok(db) = std::env::var("STAYWATCH_DB") {
            config.paths.db_file = db;
        }

        Ok(config)
    }

    /// Resolves the active tier, defaulting to the conservative tier A.
    pub fn tier(&self) -> Result<Tier> {
        match &self.tier {
            Some(raw) => raw.parse(),
            None => Ok(Tier::A),
        }
    }

    pub fn db_path(&self) -> PathBuf {
        PathBuf::from(&self.paths.db_file)
    }
}
