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

//! Demand metrics over the calendar observation history.
//!
//! The crawler only records what it saw; interpretation happens here.
//! A date whose latest observation is unavailable *after* having been
//! seen available is an actual booking. A date dark from first sight
//! could as easily be a host block, so it stays unknown. This
//! heuristic is sensitive to crawl cadence: polls sparser than typical
//! booking lead times will miss some real bookings.

use chrono::NaiveDate;

use crate::db::{DailyStatRow, Db, Observation, RoomType};
use crate::Result;

/// What the observation history says about one (listing, date).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookingClass {
    /// Latest observation available.
    Open,
    /// Seen available earlier, unavailable now.
    Booked,
    /// Unavailable from first sight; host block or booking, unknowable.
    Unknown,
}

/// Classifies a time-ordered observation history.
pub fn classify_history(history: &[Observation]) -> BookingClass {
    let Some(latest) = history.last() else {
        return BookingClass::Unknown;
    };
    if latest.available {
        return BookingClass::Open;
    }
    if history[..history.len() - 1].iter().any(|obs| obs.available) {
        BookingClass::Booked
    } else {
        BookingClass::Unknown
    }
}

/// Share of observed dates in `[start, end]` whose latest observation
/// is unavailable. 0.0 without data.
pub fn booking_rate(db: &Db, listing_id: i64, start: NaiveDate, end: NaiveDate) -> Result<f64> {
    let mut observed = 0usize;
    let mut booked = 0usize;

    let mut date = start;
    while date <= end {
        let history = db.observation_history(listing_id, date)?;
        if let Some(latest) = history.last() {
            observed += 1;
            if !latest.available {
                booked += 1;
            }
        }
        date = date + chrono::Days::new(1);
    }

    if observed == 0 {
        return Ok(0.0);
    }
    Ok(booked as f64 / observed as f64)
}

const AGGREGATED_ROOM_TYPES: [Option<RoomType>; 5] = [
    Some(RoomType::EntireHome),
    Some(RoomType::PrivateRoom),
    Some(RoomType::SharedRoom),
    Some(RoomType::Hotel),
    None,
];

/// Aggregates one date into `daily_stats`: per station, per room type
/// (plus an overall row), over the latest observation per listing.
/// Returns the number of rows written.
pub fn run_daily_aggregation(db: &mut Db, date: NaiveDate) -> Result<usize> {
    let mut written = 0;

    for station_id in db.station_ids()? {
        for room_type in AGGREGATED_ROOM_TYPES {
            let listing_ids = db.station_listing_ids(station_id, room_type)?;
            if listing_ids.is_empty() {
                continue;
            }

            let latest = db.latest_observations_for_date(&listing_ids, date)?;
            if latest.is_empty() {
                continue;
            }

            let booked: Vec<&Observation> = latest
                .iter()
                .map(|(_, obs)| obs)
                .filter(|obs| !obs.available)
                .collect();

            // Price statistics are over the booked population only, the
            // same population the revenue sums.
            let booked_prices: Vec<f64> = booked.iter().filter_map(|obs| obs.price).collect();
            let estimated_revenue: f64 = booked_prices.iter().sum();
            let avg_daily_price = if booked_prices.is_empty() {
                0.0
            } else {
                estimated_revenue / booked_prices.len() as f64
            };

            db.upsert_daily_stat(&DailyStatRow {
                station_id,
                date,
                room_type,
                total_listings: listing_ids.len() as i64,
                booked_count: booked.len() as i64,
                booking_rate: booked.len() as f64 / listing_ids.len() as f64,
                avg_daily_price,
                estimated_revenue,
            })?;
            written += 1;
        }
    }

    tracing::info!("aggregated {written} daily stat rows for {date}");
    Ok(written)
}
