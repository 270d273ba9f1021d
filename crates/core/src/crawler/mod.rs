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

//! Acquisition and pacing subsystem.
//!
//! Everything that talks to the upstream lives here. Jobs compose the
//! [`client::UpstreamClient`] with response parsing and persistence;
//! the client consults the [`limiter::RateLimiter`] for pacing and the
//! [`proxy::ProxyPool`] for egress selection, classifies every response
//! through [`block`], and reports the outcome back. Job-level code never
//! touches timing, proxies, or block detection directly.

pub mod block;
pub mod client;
pub mod credentials;
pub mod jobs;
pub mod limiter;
pub mod proxy;
pub mod scheduler;

type Result<T, E = anyhow::Error> = std::result::Result<T, E>;
