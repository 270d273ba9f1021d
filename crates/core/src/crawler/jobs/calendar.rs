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

//! Calendar observation job.
//!
//! Fetches a few months of availability for every known listing and
//! appends one observation row per day. The history per (listing, date)
//! is what downstream aggregation interprets: a `true → false` flip is
//! an actual booking, a date dark from first sight is indistinguishable
//! from a host block.

use chrono::{Datelike, Local, Utc};
use serde_json::Value;

use super::JobRun;
use crate::crawler::client::UpstreamClient;
use crate::db::{CalendarDay, Db, Listing};

const FALLBACK_WALK_DEPTH: usize = 10;

pub struct CalendarJob<'a> {
    client: &'a mut UpstreamClient,
    db: &'a mut Db,
    months: u32,
}

impl<'a> CalendarJob<'a> {
    pub fn new(client: &'a mut UpstreamClient, db: &'a mut Db, months: u32) -> Self {
        Self { client, db, months }
    }

    pub async fn run(mut self) -> crate::Result<i64> {
        let listings = self.db.all_listings()?;
        if listings.is_empty() {
            tracing::warn!("no listings in store; run a search job first");
            return Ok(0);
        }

        let mut run = JobRun::start("calendar", self.client);
        for listing in &listings {
            match self.crawl_listing(listing).await {
                Some(days) if days > 0 => run.unit_succeeded(),
                _ => run.unit_failed(),
            }
        }

        let succeeded = run.succeeded();
        run.finish(self.client, self.db, None)?;
        Ok(succeeded)
    }

    /// One unit: fetch the calendar and commit all of its day rows
    /// together.
    async fn crawl_listing(&mut self, listing: &Listing) -> Option<usize> {
        let today = Local::now().date_naive();
        tracing::debug!("fetching calendar for listing {}", listing.airbnb_id);

        let data = self
            .client
            .calendar(&listing.airbnb_id, today.month(), today.year(), self.months)
            .await?;

        let days = parse_calendar_days(&data);
        if days.is_empty() {
            return Some(0);
        }

        if let Err(err) = self
            .db
            .record_calendar_days(listing.id, Utc::now(), &days)
        {
            tracing::error!(
                "failed to persist calendar for {}: {err}",
                listing.airbnb_id
            );
            return None;
        }

        tracing::debug!("saved {} calendar days for {}", days.len(), listing.airbnb_id);
        Some(days.len())
    }
}

/// The documented path `data.merlin.pdpAvailabilityCalendar.
/// calendarMonths[].days[]`, with the recursive walk as the drift
/// fallback.
pub(crate) fn parse_calendar_days(data: &Value) -> Vec<CalendarDay> {
    let months = data
        .pointer("/data/merlin/pdpAvailabilityCalendar/calendarMonths")
        .and_then(Value::as_array);

    match months {
        Some(months) => months
            .iter()
            .flat_map(|month| {
                month
                    .get("days")
                    .and_then(Value::as_array)
                    .map(|days| days.iter().filter_map(parse_day).collect())
                    .unwrap_or_else(Vec::new)
            })
            .collect(),
        None => fallback_walk(data),
    }
}

fn parse_day(day: &Value) -> Option<CalendarDay> {
    let date = day
        .get("calendarDate")
        .and_then(Value::as_str)
        .and_then(|raw| raw.parse().ok())?;

    Some(CalendarDay {
        date,
        available: day.get("available").and_then(Value::as_bool).unwrap_or(false),
        price: parse_day_price(day.get("price")),
        min_nights: day.get("minNights").and_then(Value::as_i64),
    })
}

/// `amount` when present, otherwise the digits of
/// `localPriceFormatted` (`"₩50,000"`).
fn parse_day_price(price: Option<&Value>) -> Option<f64> {
    let price = price?.as_object()?;

    if let Some(amount) = price.get("amount") {
        if let Some(value) = amount.as_f64() {
            return Some(value);
        }
        if let Some(raw) = amount.as_str() {
            if let Ok(value) = raw.parse() {
                return Some(value);
            }
        }
    }

    price
        .get("localPriceFormatted")
        .and_then(Value::as_str)
        .and_then(super::parse_price_digits)
}

/// Depth-bounded walk recognizing any `calendarDate` + `available`
/// object. Never fails.
pub(crate) fn fallback_walk(data: &Value) -> Vec<CalendarDay> {
    let mut found = Vec::new();
    walk(data, 0, &mut found);
    found
}

fn walk(value: &Value, depth: usize, found: &mut Vec<CalendarDay>) {
    if depth > FALLBACK_WALK_DEPTH {
        return;
    }
    match value {
        Value::Object(map) => {
            if map.contains_key("calendarDate") && map.contains_key("available") {
                if let Some(day) = parse_day(value) {
                    found.push(day);
                }
            } else {
                for child in map.values() {
                    walk(child, depth + 1, found);
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                walk(item, depth + 1, found);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use serde_json::json;

    fn calendar_response() -> Value {
        json!({
            "data": {"merlin": {"pdpAvailabilityCalendar": {"calendarMonths": [
                {"month": 2, "year": 2026, "days": [
                    {"calendarDate": "2026-02-18", "available": true, "bookable": true,
                     "minNights": 1, "price": {"localPriceFormatted": "₩50,000"}},
                    {"calendarDate": "2026-02-19", "available": false,
                     "minNights": 2, "price": null},
                    {"calendarDate": "not-a-date", "available": true}
                ]},
                {"month": 3, "year": 2026, "days": [
                    {"calendarDate": "2026-03-01", "available": true,
                     "price": {"amount": 62000}}
                ]}
            ]}}}
        })
    }

    #[test]
    fn primary_path_parses_months_and_days() {
        let days = parse_calendar_days(&calendar_response());
        // The malformed date is skipped, not fatal.
        assert_eq!(days.len(), 3);

        assert_eq!(days[0].date, NaiveDate::from_ymd_opt(2026, 2, 18).unwrap());
        assert!(days[0].available);
        assert_eq!(days[0].price, Some(50000.0));
        assert_eq!(days[0].min_nights, Some(1));

        assert!(!days[1].available);
        assert_eq!(days[1].price, None);

        // `amount` wins over the formatted string.
        assert_eq!(days[2].price, Some(62000.0));
    }

    #[test]
    fn amount_is_preferred_over_formatted_price() {
        let day = json!({
            "calendarDate": "2026-02-20",
            "available": true,
            "price": {"amount": 70000, "localPriceFormatted": "₩99,999"}
        });
        assert_eq!(parse_day(&day).unwrap().price, Some(70000.0));
    }

    #[test]
    fn drifted_structure_falls_back_to_the_walk() {
        let drifted = json!({
            "unexpected": {"deeply": [{"calendarDate": "2026-05-05", "available": false,
                                        "price": {"localPriceFormatted": "₩80,000"}}]}
        });
        let days = parse_calendar_days(&drifted);
        assert_eq!(days.len(), 1);
        assert_eq!(days[0].date, NaiveDate::from_ymd_opt(2026, 5, 5).unwrap());
        assert_eq!(days[0].price, Some(80000.0));
    }

    #[test]
    fn walk_respects_the_depth_cap() {
        let mut value = json!({"calendarDate": "2026-05-05", "available": true});
        for _ in 0..(FALLBACK_WALK_DEPTH + 3) {
            value = json!([value]);
        }
        assert!(fallback_walk(&value).is_empty());
    }

    #[test]
    fn missing_availability_defaults_to_unavailable() {
        let day = json!({"calendarDate": "2026-02-21"});
        assert!(!parse_day(&day).unwrap().available);
    }
}
