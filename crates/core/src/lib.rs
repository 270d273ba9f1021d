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

//! Main library for Staywatch.
//!
//! Staywatch continuously observes Airbnb supply and availability in the
//! neighborhoods of Seoul subway stations and derives per-station,
//! per-room-type demand metrics over time. The upstream is hostile to
//! automation, so every outbound request flows through an adaptive rate
//! limiter, a proxy pool, and a block classifier before any data reaches
//! the persistence layer.

use thiserror::Error;

pub mod config;
pub mod crawler;
pub mod db;
pub mod stats;

#[derive(Error, Debug)]
pub enum Error {
    #[error("unknown crawl tier: {0} (must be A, B, or C)")]
    UnknownTier(String),

    #[error("station seed file missing or malformed: {0}")]
    MissingStationSeed(String),

    #[error("no usable API credentials; run with --extract-key first")]
    MissingCredentials,

    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
