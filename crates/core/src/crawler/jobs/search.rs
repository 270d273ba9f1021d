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

//! Search snapshot job.
//!
//! For every target station, pages through the search operation over
//! the station's bounding box and writes one price-statistics snapshot
//! plus a listing upsert per result. Two parsing layers: the documented
//! result path, and a bounded recursive walk that survives upstream
//! structural drift.

use base64::Engine;
use chrono::{Local, NaiveDate, Utc};
use serde_json::Value;

use super::{parse_price_digits, parse_rating, JobRun};
use crate::config::TierBudget;
use crate::crawler::client::{response_digest, UpstreamClient};
use crate::db::{Db, ListingUpsert, NewSearchSnapshot, RoomType, Station};

const FALLBACK_WALK_DEPTH: usize = 10;

pub struct SearchJob<'a> {
    client: &'a mut UpstreamClient,
    db: &'a mut Db,
    max_pages: u32,
}

impl<'a> SearchJob<'a> {
    pub fn new(client: &'a mut UpstreamClient, db: &'a mut Db, max_pages: u32) -> Self {
        Self {
            client,
            db,
            max_pages,
        }
    }

    /// Crawls every station in the tier's priority set. Per-station
    /// failures are tallied, never fatal.
    pub async fn run(mut self, budget: &TierBudget) -> crate::Result<i64> {
        let stations = self.db.target_stations(&budget.station_priorities)?;
        if stations.is_empty() {
            tracing::warn!("no target stations in store; run --init first");
            return Ok(0);
        }

        let mut run = JobRun::start("search", self.client);
        for station in &stations {
            match self.crawl_station(station).await {
                Some(count) => {
                    tracing::info!(
                        "saved snapshot: {} ({}) with {count} listings",
                        station.name,
                        station.line
                    );
                    run.unit_succeeded();
                }
                None => {
                    tracing::warn!("no data for station {} ({})", station.name, station.line);
                    run.unit_failed();
                }
            }
        }

        let succeeded = run.succeeded();
        run.finish(self.client, self.db, None)?;
        Ok(succeeded)
    }

    /// One unit: search around a station, following the page cursor up
    /// to the page budget, and commit snapshot + upserts together.
    async fn crawl_station(&mut self, station: &Station) -> Option<usize> {
        let checkin = Local::now().date_naive() + chrono::Days::new(1);
        let checkout = checkin + chrono::Days::new(1);

        let mut listings = Vec::new();
        let mut digest = String::new();
        let mut cursor: Option<String> = None;
        let mut pages = 0;

        loop {
            let data = self
                .client
                .search_stays(
                    station.latitude,
                    station.longitude,
                    Some(checkin),
                    Some(checkout),
                    cursor.as_deref(),
                )
                .await;

            let Some(data) = data else {
                if pages == 0 {
                    return None;
                }
                break;
            };

            if pages == 0 {
                digest = response_digest(&data);
            }
            pages += 1;

            let page = parse_search_results(&data);
            if page.is_empty() {
                break;
            }
            listings.extend(page);

            cursor = next_page_cursor(&data);
            if cursor.is_none() || pages >= self.max_pages {
                break;
            }
        }

        let snapshot = build_snapshot(station.id, &listings, checkin, checkout, digest);
        if let Err(err) = self.db.record_search_results(&snapshot, &listings) {
            tracing::error!("failed to persist snapshot for {}: {err}", station.name);
            return None;
        }

        Some(listings.len())
    }
}

fn build_snapshot(
    station_id: i64,
    listings: &[ListingUpsert],
    checkin: NaiveDate,
    checkout: NaiveDate,
    raw_response_hash: String,
) -> NewSearchSnapshot {
    let mut prices: Vec<f64> = listings.iter().filter_map(|l| l.price).collect();
    prices.sort_by(|a, b| a.total_cmp(b));

    let (avg, min, max, median) = if prices.is_empty() {
        (0.0, 0.0, 0.0, 0.0)
    } else {
        let sum: f64 = prices.iter().sum();
        let mid = prices.len() / 2;
        let median = if prices.len() % 2 == 0 {
            (prices[mid - 1] + prices[mid]) / 2.0
        } else {
            prices[mid]
        };
        (
            sum / prices.len() as f64,
            prices[0],
            prices[prices.len() - 1],
            median,
        )
    };

    NewSearchSnapshot {
        station_id,
        crawled_at: Utc::now(),
        total_listings: listings.len() as i64,
        avg_price: avg,
        min_price: min,
        max_price: max,
        median_price: median,
        available_count: listings.len() as i64,
        checkin_date: checkin,
        checkout_date: checkout,
        raw_response_hash,
    }
}

/// The documented result path; falls back to the recursive walk when
/// the structure has drifted.
pub(crate) fn parse_search_results(data: &Value) -> Vec<ListingUpsert> {
    let results = data
        .pointer("/data/presentation/staysSearch/results/searchResults")
        .and_then(Value::as_array);

    match results {
        Some(entries) => {
            let parsed: Vec<ListingUpsert> =
                entries.iter().filter_map(parse_search_entry).collect();
            if parsed.is_empty() && !entries.is_empty() {
                // The path exists but no entry yielded an id; the entry
                // shape itself has likely drifted.
                fallback_walk(data)
            } else {
                parsed
            }
        }
        None => fallback_walk(data),
    }
}

fn parse_search_entry(entry: &Value) -> Option<ListingUpsert> {
    // Newer payloads flatten the listing into the entry; older ones
    // nest it.
    let listing = entry.get("listing").unwrap_or(entry);

    let airbnb_id = entry_upstream_id(entry, listing)?;

    let (latitude, longitude) = coordinates(listing);

    Some(ListingUpsert {
        airbnb_id,
        name: listing
            .get("name")
            .and_then(Value::as_str)
            .map(str::to_string),
        room_type: listing
            .get("roomTypeCategory")
            .and_then(Value::as_str)
            .map(RoomType::parse),
        latitude,
        longitude,
        price: entry_price(entry),
        rating: listing
            .get("avgRatingLocalized")
            .and_then(Value::as_str)
            .and_then(parse_rating)
            .or_else(|| listing.get("avgRating").and_then(Value::as_f64)),
        review_count: listing.get("reviewsCount").and_then(Value::as_i64),
    })
}

/// Numeric upstream id from `propertyId`, or from the base64
/// `demandStayListing.id` token of the form `DemandStayListing:<N>`.
fn entry_upstream_id(entry: &Value, listing: &Value) -> Option<String> {
    for source in [entry, listing] {
        if let Some(id) = source.get("propertyId") {
            match id {
                Value::String(s) if !s.is_empty() => return Some(s.clone()),
                Value::Number(n) => return Some(n.to_string()),
                _ => {}
            }
        }
    }

    let token = entry
        .pointer("/demandStayListing/id")
        .or_else(|| listing.pointer("/demandStayListing/id"))
        .and_then(Value::as_str)?;
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(token)
        .ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    decoded
        .strip_prefix("DemandStayListing:")
        .map(str::to_string)
}

/// Price from `structuredDisplayPrice.primaryLine`, preferring the
/// discounted figure.
fn entry_price(entry: &Value) -> Option<f64> {
    let line = entry.pointer("/structuredDisplayPrice/primaryLine")?;
    for key in ["discountedPrice", "price"] {
        if let Some(raw) = line.get(key).and_then(Value::as_str) {
            if let Some(price) = parse_price_digits(raw) {
                return Some(price);
            }
        }
    }
    None
}

fn coordinates(listing: &Value) -> (Option<f64>, Option<f64>) {
    if let Some(coordinate) = listing.get("coordinate") {
        return (
            coordinate.get("latitude").and_then(Value::as_f64),
            coordinate.get("longitude").and_then(Value::as_f64),
        );
    }
    (
        listing.get("lat").and_then(Value::as_f64),
        listing.get("lng").and_then(Value::as_f64),
    )
}

/// Depth-bounded recursive walk recognizing anything listing-shaped:
/// an object carrying `id` and `name` plus either a `coordinate`
/// sub-object or bare `lat`/`lng` fields. Never fails; returns an
/// empty set at exhausted depth.
pub(crate) fn fallback_walk(data: &Value) -> Vec<ListingUpsert> {
    let mut found = Vec::new();
    walk(data, 0, &mut found);
    if !found.is_empty() {
        tracing::info!("fallback parser found {} listings", found.len());
    }
    found
}

fn walk(value: &Value, depth: usize, found: &mut Vec<ListingUpsert>) {
    if depth > FALLBACK_WALK_DEPTH {
        return;
    }
    match value {
        Value::Object(map) => {
            let listing_shaped = map.contains_key("id")
                && map.contains_key("name")
                && (map.contains_key("coordinate") || map.contains_key("lat"));
            if listing_shaped {
                let id = match map.get("id") {
                    Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
                    Some(Value::Number(n)) => Some(n.to_string()),
                    _ => None,
                };
                if let Some(airbnb_id) = id {
                    let (latitude, longitude) = match map.get("coordinate") {
                        Some(coordinate) => (
                            coordinate.get("latitude").and_then(Value::as_f64),
                            coordinate.get("longitude").and_then(Value::as_f64),
                        ),
                        None => (
                            map.get("lat").and_then(Value::as_f64),
                            map.get("lng").and_then(Value::as_f64),
                        ),
                    };
                    found.push(ListingUpsert {
                        airbnb_id,
                        name: map.get("name").and_then(Value::as_str).map(str::to_string),
                        room_type: map
                            .get("roomTypeCategory")
                            .or_else(|| map.get("room_type"))
                            .and_then(Value::as_str)
                            .map(RoomType::parse),
                        latitude,
                        longitude,
                        price: match map.get("price") {
                            Some(Value::Number(n)) => n.as_f64(),
                            Some(Value::Object(price)) => {
                                price.get("amount").and_then(Value::as_f64)
                            }
                            _ => None,
                        },
                        rating: map.get("avgRating").and_then(Value::as_f64),
                        review_count: map.get("reviewsCount").and_then(Value::as_i64),
                    });
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

pub(crate) fn next_page_cursor(data: &Value) -> Option<String> {
    data.pointer("/data/presentation/staysSearch/results/paginationInfo/nextPageCursor")
        .and_then(Value::as_str)
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn search_response(cursor: Option<&str>) -> Value {
        json!({
            "data": {"presentation": {"staysSearch": {"results": {
                "searchResults": [
                    {
                        "propertyId": "1029384756",
                        "name": "한강뷰 아파트",
                        "roomTypeCategory": "entire_home",
                        "coordinate": {"latitude": 37.52, "longitude": 127.01},
                        "avgRatingLocalized": "4.87 (203)",
                        "reviewsCount": 203,
                        "structuredDisplayPrice": {"primaryLine": {
                            "discountedPrice": "₩119,824",
                            "price": "₩150,000"
                        }}
                    },
                    {
                        "demandStayListing": {
                            // base64("DemandStayListing:1234567890")
                            "id": "RGVtYW5kU3RheUxpc3Rpbmc6MTIzNDU2Nzg5MA=="
                        },
                        "name": "옥탑방",
                        "structuredDisplayPrice": {"primaryLine": {"price": "₩55,000"}}
                    }
                ],
                "paginationInfo": {"nextPageCursor": cursor}
            }}}}
        })
    }

    #[test]
    fn primary_path_parses_both_id_forms() {
        let listings = parse_search_results(&search_response(None));
        assert_eq!(listings.len(), 2);

        assert_eq!(listings[0].airbnb_id, "1029384756");
        assert_eq!(listings[0].name.as_deref(), Some("한강뷰 아파트"));
        assert_eq!(listings[0].room_type, Some(RoomType::EntireHome));
        assert_eq!(listings[0].latitude, Some(37.52));
        // The discounted figure wins over the list price.
        assert_eq!(listings[0].price, Some(119824.0));
        assert_eq!(listings[0].rating, Some(4.87));

        assert_eq!(listings[1].airbnb_id, "1234567890");
        assert_eq!(listings[1].price, Some(55000.0));
    }

    #[test]
    fn pagination_cursor_round_trips() {
        assert_eq!(
            next_page_cursor(&search_response(Some("eyJvZmZzZXQiOjE4fQ=="))).as_deref(),
            Some("eyJvZmZzZXQiOjE4fQ==")
        );
        assert_eq!(next_page_cursor(&search_response(None)), None);
        assert_eq!(next_page_cursor(&json!({})), None);
    }

    #[test]
    fn drifted_structure_falls_back_to_the_walk() {
        let drifted = json!({
            "data": {"somewhere": {"else": [
                {"id": 555, "name": "숨은 숙소", "lat": 37.5, "lng": 127.0,
                 "price": {"amount": 90000.0}, "reviewsCount": 4}
            ]}}
        });

        let listings = parse_search_results(&drifted);
        assert_eq!(listings.len(), 1);
        assert_eq!(listings[0].airbnb_id, "555");
        assert_eq!(listings[0].price, Some(90000.0));
    }

    #[test]
    fn walk_respects_the_depth_cap() {
        let mut value = json!({"id": 1, "name": "deep", "lat": 1.0, "lng": 2.0});
        for _ in 0..(FALLBACK_WALK_DEPTH + 5) {
            value = json!({"wrap": value});
        }
        assert!(fallback_walk(&value).is_empty());

        let mut shallow = json!({"id": 1, "name": "near", "lat": 1.0, "lng": 2.0});
        for _ in 0..3 {
            shallow = json!({"wrap": shallow});
        }
        assert_eq!(fallback_walk(&shallow).len(), 1);
    }

    #[test]
    fn snapshot_statistics_cover_the_price_distribution() {
        let listing = |id: &str, price: Option<f64>| ListingUpsert {
            airbnb_id: id.to_string(),
            price,
            ..Default::default()
        };
        let listings = vec![
            listing("1", Some(30000.0)),
            listing("2", Some(50000.0)),
            listing("3", Some(100000.0)),
            listing("4", None),
        ];

        let checkin = NaiveDate::from_ymd_opt(2026, 7, 2).unwrap();
        let snapshot = build_snapshot(1, &listings, checkin, checkin, "digest".to_string());

        assert_eq!(snapshot.total_listings, 4);
        assert_eq!(snapshot.min_price, 30000.0);
        assert_eq!(snapshot.max_price, 100000.0);
        assert_eq!(snapshot.median_price, 50000.0);
        assert!((snapshot.avg_price - 60000.0).abs() < 1e-9);
    }

    #[test]
    fn empty_results_yield_a_zeroed_snapshot() {
        let checkin = NaiveDate::from_ymd_opt(2026, 7, 2).unwrap();
        let snapshot = build_snapshot(1, &[], checkin, checkin, String::new());
        assert_eq!(snapshot.total_listings, 0);
        assert_eq!(snapshot.avg_price, 0.0);
        assert_eq!(snapshot.median_price, 0.0);
    }
}
