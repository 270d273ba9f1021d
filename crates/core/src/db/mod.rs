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

//! Persistent store.
//!
//! Stations are seeded once; listings are upserted by upstream id;
//! search and calendar snapshots are append-only observation rows.
//! Every crawl unit's writes go through one transaction scope: they
//! commit together on normal return or not at all.

use std::path::Path;

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension, Transaction};

use crate::Result;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS stations (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    line TEXT NOT NULL,
    district TEXT,
    latitude REAL NOT NULL,
    longitude REAL NOT NULL,
    priority INTEGER NOT NULL DEFAULT 3
);
CREATE UNIQUE INDEX IF NOT EXISTS ix_station_name_line ON stations(name, line);

CREATE TABLE IF NOT EXISTS listings (
    id INTEGER PRIMARY KEY,
    airbnb_id TEXT NOT NULL UNIQUE,
    name TEXT,
    host_id TEXT,
    room_type TEXT,
    latitude REAL,
    longitude REAL,
    nearest_station_id INTEGER REFERENCES stations(id),
    bedrooms INTEGER,
    bathrooms REAL,
    max_guests INTEGER,
    base_price REAL,
    rating REAL,
    review_count INTEGER,
    first_seen TEXT NOT NULL,
    last_seen TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS ix_listing_station ON listings(nearest_station_id);
CREATE INDEX IF NOT EXISTS ix_listing_room_type ON listings(room_type);

CREATE TABLE IF NOT EXISTS search_snapshots (
    id INTEGER PRIMARY KEY,
    station_id INTEGER NOT NULL REFERENCES stations(id),
    crawled_at TEXT NOT NULL,
    total_listings INTEGER,
    avg_price REAL,
    min_price REAL,
    max_price REAL,
    median_price REAL,
    available_count INTEGER,
    checkin_date TEXT,
    checkout_date TEXT,
    raw_response_hash TEXT
);
CREATE INDEX IF NOT EXISTS ix_snapshot_station_time ON search_snapshots(station_id, crawled_at);

CREATE TABLE IF NOT EXISTS calendar_snapshots (
    id INTEGER PRIMARY KEY,
    listing_id INTEGER NOT NULL REFERENCES listings(id),
    crawled_at TEXT NOT NULL,
    date TEXT NOT NULL,
    available INTEGER,
    price REAL,
    min_nights INTEGER
);
CREATE INDEX IF NOT EXISTS ix_calendar_listing_date ON calendar_snapshots(listing_id, date);
CREATE INDEX IF NOT EXISTS ix_calendar_crawled ON calendar_snapshots(crawled_at);

CREATE TABLE IF NOT EXISTS daily_stats (
    id INTEGER PRIMARY KEY,
    station_id INTEGER NOT NULL REFERENCES stations(id),
    date TEXT NOT NULL,
    room_type TEXT,
    total_listings INTEGER,
    booked_count INTEGER,
    booking_rate REAL,
    avg_daily_price REAL,
    estimated_revenue REAL
);
CREATE INDEX IF NOT EXISTS ix_daily_station_date ON daily_stats(station_id, date);
CREATE UNIQUE INDEX IF NOT EXISTS ix_daily_station_date_type
    ON daily_stats(station_id, date, ifnull(room_type, ''));

CREATE TABLE IF NOT EXISTS crawl_logs (
    id INTEGER PRIMARY KEY,
    job_type TEXT NOT NULL,
    started_at TEXT NOT NULL,
    finished_at TEXT,
    status TEXT,
    total_requests INTEGER NOT NULL DEFAULT 0,
    successful_requests INTEGER NOT NULL DEFAULT 0,
    failed_requests INTEGER NOT NULL DEFAULT 0,
    blocked_requests INTEGER NOT NULL DEFAULT 0,
    error_message TEXT
);
CREATE INDEX IF NOT EXISTS ix_crawllog_type_time ON crawl_logs(job_type, started_at);
";

/// Room type taxonomy. The upstream reports free-form category strings;
/// anything unrecognized degrades to `Unknown` rather than failing the
/// row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoomType {
    EntireHome,
    PrivateRoom,
    SharedRoom,
    Hotel,
    Unknown,
}

impl RoomType {
    pub fn as_str(self) -> &'static str {
        match self {
            RoomType::EntireHome => "entire_home",
            RoomType::PrivateRoom => "private_room",
            RoomType::SharedRoom => "shared_room",
            RoomType::Hotel => "hotel",
            RoomType::Unknown => "unknown",
        }
    }

    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "entire_home" | "entire_home_apt" => RoomType::EntireHome,
            "private_room" => RoomType::PrivateRoom,
            "shared_room" => RoomType::SharedRoom,
            "hotel" | "hotel_room" => RoomType::Hotel,
            _ => RoomType::Unknown,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Station {
    pub id: i64,
    pub name: String,
    pub line: String,
    pub district: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
    pub priority: u8,
}

#[derive(Debug, Clone)]
pub struct Listing {
    pub id: i64,
    pub airbnb_id: String,
    pub name: Option<String>,
    pub room_type: RoomType,
    pub base_price: Option<f64>,
}

/// One parsed search result, ready for upsert.
#[derive(Debug, Clone, Default)]
pub struct ListingUpsert {
    pub airbnb_id: String,
    pub name: Option<String>,
    pub room_type: Option<RoomType>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub price: Option<f64>,
    pub rating: Option<f64>,
    pub review_count: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct NewSearchSnapshot {
    pub station_id: i64,
    pub crawled_at: DateTime<Utc>,
    pub total_listings: i64,
    pub avg_price: f64,
    pub min_price: f64,
    pub max_price: f64,
    pub median_price: f64,
    pub available_count: i64,
    pub checkin_date: NaiveDate,
    pub checkout_date: NaiveDate,
    pub raw_response_hash: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CalendarDay {
    pub date: NaiveDate,
    pub available: bool,
    pub price: Option<f64>,
    pub min_nights: Option<i64>,
}

/// Partial listing update from the detail job. `None` fields are left
/// untouched.
#[derive(Debug, Clone, Default)]
pub struct ListingPatch {
    pub room_type: Option<RoomType>,
    pub bedrooms: Option<i64>,
    pub bathrooms: Option<f64>,
    pub max_guests: Option<i64>,
    pub host_id: Option<String>,
    pub rating: Option<f64>,
    pub review_count: Option<i64>,
}

impl ListingPatch {
    pub fn is_empty(&self) -> bool {
        self.room_type.is_none()
            && self.bedrooms.is_none()
            && self.bathrooms.is_none()
            && self.max_guests.is_none()
            && self.host_id.is_none()
            && self.rating.is_none()
            && self.review_count.is_none()
    }
}

#[derive(Debug, Clone)]
pub struct NewCrawlLog {
    pub job_type: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub status: String,
    pub total_requests: i64,
    pub successful_requests: i64,
    pub failed_requests: i64,
    pub blocked_requests: i64,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CrawlLogRow {
    pub job_type: String,
    pub started_at: DateTime<Utc>,
    pub status: Option<String>,
    pub total_requests: i64,
    pub successful_requests: i64,
    pub blocked_requests: i64,
}

#[derive(Debug, Clone, Default)]
pub struct StatusCounts {
    pub stations: i64,
    pub listings: i64,
    pub search_snapshots: i64,
}

/// One calendar observation, in crawl order.
#[derive(Debug, Clone)]
pub struct Observation {
    pub crawled_at: DateTime<Utc>,
    pub available: bool,
    pub price: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct DailyStatRow {
    pub station_id: i64,
    pub date: NaiveDate,
    pub room_type: Option<RoomType>,
    pub total_listings: i64,
    pub booked_count: i64,
    pub booking_rate: f64,
    pub avg_daily_price: f64,
    pub estimated_revenue: f64,
}

/// Station seed document: `{"stations": [...]}`.
#[derive(Debug, serde::Deserialize)]
pub struct StationSeedFile {
    pub stations: Vec<StationSeed>,
}

#[derive(Debug, serde::Deserialize)]
pub struct StationSeed {
    pub name: String,
    pub line: String,
    #[serde(default)]
    pub district: Option<String>,
    pub lat: f64,
    pub lng: f64,
    pub priority: u8,
}

pub struct Db {
    pub(crate) conn: Connection,
}

impl Db {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    /// Runs `f` inside a transaction that commits on `Ok` and rolls
    /// back on `Err` or panic.
    pub fn with_tx<T>(
        &mut self,
        f: impl FnOnce(&Transaction<'_>) -> rusqlite::Result<T>,
    ) -> Result<T> {
        let tx = self.conn.transaction()?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }

    /// Loads the station seed, skipping duplicates by (name, line).
    /// Returns the number of newly inserted stations.
    pub fn seed_stations(&mut self, seed: &[StationSeed]) -> Result<usize> {
        self.with_tx(|tx| {
            let mut inserted = 0;
            for station in seed {
                let changed = tx.execute(
                    "INSERT OR IGNORE INTO stations (name, line, district, latitude, longitude, priority)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![
                        station.name,
                        station.line,
                        station.district,
                        station.lat,
                        station.lng,
                        station.priority
                    ],
                )?;
                inserted += changed;
            }
            Ok(inserted)
        })
    }

    /// Stations in the given priority set, in stable (priority, id)
    /// order.
    pub fn target_stations(&self, priorities: &[u8]) -> Result<Vec<Station>> {
        let placeholders = vec!["?"; priorities.len()].join(",");
        let sql = format!(
            "SELECT id, name, line, district, latitude, longitude, priority
             FROM stations WHERE priority IN ({placeholders})
             ORDER BY priority, id"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(
            rusqlite::params_from_iter(priorities.iter()),
            |row| {
                Ok(Station {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    line: row.get(2)?,
                    district: row.get(3)?,
                    latitude: row.get(4)?,
                    longitude: row.get(5)?,
                    priority: row.get(6)?,
                })
            },
        )?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }

    /// Every known listing, in stable id order.
    pub fn all_listings(&self) -> Result<Vec<Listing>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, airbnb_id, name, room_type, base_price FROM listings ORDER BY id",
        )?;
        let rows = stmt.query_map([], |row| {
            let room_type: Option<String> = row.get(3)?;
            Ok(Listing {
                id: row.get(0)?,
                airbnb_id: row.get(1)?,
                name: row.get(2)?,
                room_type: room_type
                    .map(|raw| RoomType::parse(&raw))
                    .unwrap_or(RoomType::Unknown),
                base_price: row.get(4)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }

    /// One search unit's output: the snapshot row plus every listing
    /// upsert, committed together.
    pub fn record_search_results(
        &mut self,
        snapshot: &NewSearchSnapshot,
        listings: &[ListingUpsert],
    ) -> Result<()> {
        let station_id = snapshot.station_id;
        self.with_tx(|tx| {
            tx.execute(
                "INSERT INTO search_snapshots
                 (station_id, crawled_at, total_listings, avg_price, min_price, max_price,
                  median_price, available_count, checkin_date, checkout_date, raw_response_hash)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    snapshot.station_id,
                    snapshot.crawled_at,
                    snapshot.total_listings,
                    snapshot.avg_price,
                    snapshot.min_price,
                    snapshot.max_price,
                    snapshot.median_price,
                    snapshot.available_count,
                    snapshot.checkin_date,
                    snapshot.checkout_date,
                    snapshot.raw_response_hash,
                ],
            )?;

            for listing in listings {
                upsert_listing(tx, station_id, snapshot.crawled_at, listing)?;
            }
            Ok(())
        })
    }

    /// One calendar unit's output: all day rows for one listing,
    /// committed together. Append-only.
    pub fn record_calendar_days(
        &mut self,
        listing_id: i64,
        crawled_at: DateTime<Utc>,
        days: &[CalendarDay],
    ) -> Result<()> {
        self.with_tx(|tx| {
            let mut stmt = tx.prepare(
                "INSERT INTO calendar_snapshots
                 (listing_id, crawled_at, date, available, price, min_nights)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for day in days {
                stmt.execute(params![
                    listing_id,
                    crawled_at,
                    day.date,
                    day.available,
                    day.price,
                    day.min_nights,
                ])?;
            }
            Ok(())
        })
    }

    /// Applies a partial detail update; empty patches only stamp
    /// `last_seen`.
    pub fn patch_listing(&mut self, listing_id: i64, patch: &ListingPatch) -> Result<()> {
        let now = Utc::now();
        self.with_tx(|tx| {
            tx.execute(
                "UPDATE listings SET
                     room_type = coalesce(?2, room_type),
                     bedrooms = coalesce(?3, bedrooms),
                     bathrooms = coalesce(?4, bathrooms),
                     max_guests = coalesce(?5, max_guests),
                     host_id = coalesce(?6, host_id),
                     rating = coalesce(?7, rating),
                     review_count = coalesce(?8, review_count),
                     last_seen = ?9
                 WHERE id = ?1",
                params![
                    listing_id,
                    patch.room_type.map(RoomType::as_str),
                    patch.bedrooms,
                    patch.bathrooms,
                    patch.max_guests,
                    patch.host_id,
                    patch.rating,
                    patch.review_count,
                    now,
                ],
            )?;
            Ok(())
        })
    }

    pub fn insert_crawl_log(&mut self, log: &NewCrawlLog) -> Result<()> {
        self.with_tx(|tx| {
            tx.execute(
                "INSERT INTO crawl_logs
                 (job_type, started_at, finished_at, status, total_requests,
                  successful_requests, failed_requests, blocked_requests, error_message)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    log.job_type,
                    log.started_at,
                    log.finished_at,
                    log.status,
                    log.total_requests,
                    log.successful_requests,
                    log.failed_requests,
                    log.blocked_requests,
                    log.error_message,
                ],
            )?;
            Ok(())
        })
    }

    pub fn last_crawl_log(&self) -> Result<Option<CrawlLogRow>> {
        let row = self
            .conn
            .query_row(
                "SELECT job_type, started_at, status, total_requests, successful_requests,
                        blocked_requests
                 FROM crawl_logs ORDER BY started_at DESC LIMIT 1",
                [],
                |row| {
                    Ok(CrawlLogRow {
                        job_type: row.get(0)?,
                        started_at: row.get(1)?,
                        status: row.get(2)?,
                        total_requests: row.get(3)?,
                        successful_requests: row.get(4)?,
                        blocked_requests: row.get(5)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    pub fn status_counts(&self) -> Result<StatusCounts> {
        let count = |sql: &str| -> rusqlite::Result<i64> {
            self.conn.query_row(sql, [], |row| row.get(0))
        };
        Ok(StatusCounts {
            stations: count("SELECT count(*) FROM stations")?,
            listings: count("SELECT count(*) FROM listings")?,
            search_snapshots: count("SELECT count(*) FROM search_snapshots")?,
        })
    }

    /// Listing ids near a station, optionally narrowed to a room type.
    pub fn station_listing_ids(
        &self,
        station_id: i64,
        room_type: Option<RoomType>,
    ) -> Result<Vec<i64>> {
        let mut stmt = self.conn.prepare(
            "SELECT id FROM listings
             WHERE nearest_station_id = ?1
               AND (?2 IS NULL OR room_type = ?2)
             ORDER BY id",
        )?;
        let rows = stmt.query_map(
            params![station_id, room_type.map(RoomType::as_str)],
            |row| row.get(0),
        )?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }

    /// The latest observation per listing for one date, across the
    /// given listings.
    pub fn latest_observations_for_date(
        &self,
        listing_ids: &[i64],
        date: NaiveDate,
    ) -> Result<Vec<(i64, Observation)>> {
        if listing_ids.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; listing_ids.len()].join(",");
        let sql = format!(
            "SELECT cs.listing_id, cs.crawled_at, cs.available, cs.price
             FROM calendar_snapshots cs
             JOIN (
                 SELECT listing_id, max(crawled_at) AS latest
                 FROM calendar_snapshots
                 WHERE date = ?1 AND listing_id IN ({placeholders})
                 GROUP BY listing_id
             ) last ON last.listing_id = cs.listing_id AND last.latest = cs.crawled_at
             WHERE cs.date = ?1"
        );

        let mut stmt = self.conn.prepare(&sql)?;
        let mut values: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(date)];
        for id in listing_ids {
            values.push(Box::new(*id));
        }
        let rows = stmt.query_map(
            rusqlite::params_from_iter(values.iter().map(|v| v.as_ref())),
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    Observation {
                        crawled_at: row.get(1)?,
                        available: row.get(2)?,
                        price: row.get(3)?,
                    },
                ))
            },
        )?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }

    /// Full observation history for one (listing, date), oldest first.
    pub fn observation_history(
        &self,
        listing_id: i64,
        date: NaiveDate,
    ) -> Result<Vec<Observation>> {
        let mut stmt = self.conn.prepare(
            "SELECT crawled_at, available, price FROM calendar_snapshots
             WHERE listing_id = ?1 AND date = ?2
             ORDER BY crawled_at",
        )?;
        let rows = stmt.query_map(params![listing_id, date], |row| {
            Ok(Observation {
                crawled_at: row.get(0)?,
                available: row.get(1)?,
                price: row.get(2)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }

    pub fn upsert_daily_stat(&mut self, stat: &DailyStatRow) -> Result<()> {
        self.with_tx(|tx| {
            tx.execute(
                "INSERT INTO daily_stats
                 (station_id, date, room_type, total_listings, booked_count, booking_rate,
                  avg_daily_price, estimated_revenue)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT (station_id, date, ifnull(room_type, '')) DO UPDATE SET
                     total_listings = excluded.total_listings,
                     booked_count = excluded.booked_count,
                     booking_rate = excluded.booking_rate,
                     avg_daily_price = excluded.avg_daily_price,
                     estimated_revenue = excluded.estimated_revenue",
                params![
                    stat.station_id,
                    stat.date,
                    stat.room_type.map(RoomType::as_str),
                    stat.total_listings,
                    stat.booked_count,
                    stat.booking_rate,
                    stat.avg_daily_price,
                    stat.estimated_revenue,
                ],
            )?;
            Ok(())
        })
    }

    pub fn station_ids(&self) -> Result<Vec<i64>> {
        let mut stmt = self.conn.prepare("SELECT id FROM stations ORDER BY id")?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }
}

/// Upsert by upstream id: an existing row gets `last_seen` and any
/// fresh price; a new row records first sight. Idempotent.
fn upsert_listing(
    tx: &Transaction<'_>,
    station_id: i64,
    seen_at: DateTime<Utc>,
    listing: &ListingUpsert,
) -> rusqlite::Result<()> {
    let existing: Option<i64> = tx
        .query_row(
            "SELECT id FROM listings WHERE airbnb_id = ?1",
            params![listing.airbnb_id],
            |row| row.get(0),
        )
        .optional()?;

    match existing {
        Some(id) => {
            tx.execute(
                "UPDATE listings SET last_seen = ?2, base_price = coalesce(?3, base_price)
                 WHERE id = ?1",
                params![id, seen_at, listing.price],
            )?;
        }
        None => {
            tx.execute(
                "INSERT INTO listings
                 (airbnb_id, name, room_type, latitude, longitude, nearest_station_id,
                  base_price, rating, review_count, first_seen, last_seen)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)",
                params![
                    listing.airbnb_id,
                    listing.name,
                    listing.room_type.map(RoomType::as_str),
                    listing.latitude,
                    listing.longitude,
                    station_id,
                    listing.price,
                    listing.rating,
                    listing.review_count,
                    seen_at,
                ],
            )?;
        }
    }
    Ok(())
}

/// Reads and parses the station seed document.
pub fn load_station_seed(path: &Path) -> Result<Vec<StationSeed>> {
    let raw = std::fs::read_to_string(path)
        .map_err(|_| crate::Error::MissingStationSeed(path.display().to_string()))?;
    let file: StationSeedFile = serde_json::from_str(&raw)
        .map_err(|_| crate::Error::MissingStationSeed(path.display().to_string()))?;
    Ok(file.stations)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn seeded_db() -> Db {
        let mut db = Db::open_in_memory().unwrap();
        db.seed_stations(&[
            StationSeed {
                name: "강남".to_string(),
                line: "2호선".to_string(),
                district: Some("강남구".to_string()),
                lat: 37.4979,
                lng: 127.0276,
                priority: 1,
            },
            StationSeed {
                name: "홍대입구".to_string(),
                line: "2호선".to_string(),
                district: Some("마포구".to_string()),
                lat: 37.5572,
                lng: 126.9245,
                priority: 2,
            },
        ])
        .unwrap();
        db
    }

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 7, 1, hour, 0, 0).unwrap()
    }

    fn snapshot(station_id: i64) -> NewSearchSnapshot {
        NewSearchSnapshot {
            station_id,
            crawled_at: at(6),
            total_listings: 1,
            avg_price: 100000.0,
            min_price: 100000.0,
            max_price: 100000.0,
            median_price: 100000.0,
            available_count: 1,
            checkin_date: NaiveDate::from_ymd_opt(2026, 7, 2).unwrap(),
            checkout_date: NaiveDate::from_ymd_opt(2026, 7, 3).unwrap(),
            raw_response_hash: "0123456789abcdef".to_string(),
        }
    }

    #[test]
    fn seeding_skips_duplicates_by_name_and_line() {
        let mut db = seeded_db();
        let inserted = db
            .seed_stations(&[StationSeed {
                name: "강남".to_string(),
                line: "2호선".to_string(),
                district: None,
                lat: 0.0,
                lng: 0.0,
                priority: 1,
            }])
            .unwrap();
        assert_eq!(inserted, 0);
        assert_eq!(db.status_counts().unwrap().stations, 2);
    }

    #[test]
    fn target_stations_filter_by_priority_in_stable_order() {
        let db = seeded_db();
        let tier_a = db.target_stations(&[1]).unwrap();
        assert_eq!(tier_a.len(), 1);
        assert_eq!(tier_a[0].name, "강남");

        let tier_c = db.target_stations(&[1, 2, 3]).unwrap();
        assert_eq!(tier_c.len(), 2);
        assert!(tier_c[0].priority <= tier_c[1].priority);
    }

    #[test]
    fn listing_upsert_is_idempotent() {
        let mut db = seeded_db();
        let station = db.target_stations(&[1]).unwrap().remove(0);

        let listing = ListingUpsert {
            airbnb_id: "12345".to_string(),
            name: Some("Cozy studio".to_string()),
            room_type: Some(RoomType::EntireHome),
            latitude: Some(37.5),
            longitude: Some(127.0),
            price: Some(119824.0),
            rating: Some(4.9),
            review_count: Some(12),
        };

        db.record_search_results(&snapshot(station.id), std::slice::from_ref(&listing))
            .unwrap();
        db.record_search_results(&snapshot(station.id), &[listing])
            .unwrap();

        let listings = db.all_listings().unwrap();
        assert_eq!(listings.len(), 1);
        assert_eq!(listings[0].airbnb_id, "12345");
        assert_eq!(listings[0].base_price, Some(119824.0));
        assert_eq!(db.status_counts().unwrap().search_snapshots, 2);
    }

    #[test]
    fn upsert_keeps_the_last_non_empty_price() {
        let mut db = seeded_db();
        let station = db.target_stations(&[1]).unwrap().remove(0);

        let with_price = ListingUpsert {
            airbnb_id: "7".to_string(),
            price: Some(50000.0),
            ..Default::default()
        };
        let without_price = ListingUpsert {
            airbnb_id: "7".to_string(),
            price: None,
            ..Default::default()
        };

        db.record_search_results(&snapshot(station.id), &[with_price])
            .unwrap();
        db.record_search_results(&snapshot(station.id), &[without_price])
            .unwrap();

        assert_eq!(db.all_listings().unwrap()[0].base_price, Some(50000.0));
    }

    #[test]
    fn calendar_history_is_append_only_and_time_ordered() {
        let mut db = seeded_db();
        let station = db.target_stations(&[1]).unwrap().remove(0);
        db.record_search_results(
            &snapshot(station.id),
            &[ListingUpsert {
                airbnb_id: "9".to_string(),
                ..Default::default()
            }],
        )
        .unwrap();
        let listing_id = db.all_listings().unwrap()[0].id;

        let date = NaiveDate::from_ymd_opt(2026, 7, 10).unwrap();
        let day = |available: bool, price: Option<f64>| CalendarDay {
            date,
            available,
            price,
            min_nights: Some(1),
        };

        db.record_calendar_days(listing_id, at(1), &[day(true, Some(80000.0))])
            .unwrap();
        db.record_calendar_days(listing_id, at(2), &[day(false, Some(80000.0))])
            .unwrap();

        let history = db.observation_history(listing_id, date).unwrap();
        assert_eq!(history.len(), 2);
        assert!(history[0].crawled_at < history[1].crawled_at);
        assert!(history[0].available);
        assert!(!history[1].available);

        let latest = db
            .latest_observations_for_date(&[listing_id], date)
            .unwrap();
        assert_eq!(latest.len(), 1);
        assert!(!latest[0].1.available);
    }

    #[test]
    fn listing_patch_is_partial() {
        let mut db = seeded_db();
        let station = db.target_stations(&[1]).unwrap().remove(0);
        db.record_search_results(
            &snapshot(station.id),
            &[ListingUpsert {
                airbnb_id: "11".to_string(),
                room_type: Some(RoomType::Unknown),
                price: Some(70000.0),
                ..Default::default()
            }],
        )
        .unwrap();
        let listing_id = db.all_listings().unwrap()[0].id;

        db.patch_listing(
            listing_id,
            &ListingPatch {
                room_type: Some(RoomType::PrivateRoom),
                bedrooms: Some(2),
                ..Default::default()
            },
        )
        .unwrap();

        let listing = &db.all_listings().unwrap()[0];
        assert_eq!(listing.room_type, RoomType::PrivateRoom);
        // Fields outside the patch are untouched.
        assert_eq!(listing.base_price, Some(70000.0));
    }

    #[test]
    fn crawl_logs_surface_the_most_recent_run() {
        let mut db = seeded_db();
        assert!(db.last_crawl_log().unwrap().is_none());

        for (hour, job) in [(1, "search"), (2, "calendar")] {
            db.insert_crawl_log(&NewCrawlLog {
                job_type: job.to_string(),
                started_at: at(hour),
                finished_at: at(hour),
                status: "success".to_string(),
                total_requests: 5,
                successful_requests: 5,
                failed_requests: 0,
                blocked_requests: 0,
                error_message: None,
            })
            .unwrap();
        }

        let last = db.last_crawl_log().unwrap().unwrap();
        assert_eq!(last.job_type, "calendar");
    }

    #[test]
    fn daily_stats_upsert_by_station_date_and_room_type() {
        let mut db = seeded_db();
        let station_id = db.target_stations(&[1]).unwrap()[0].id;
        let date = NaiveDate::from_ymd_opt(2026, 6, 30).unwrap();

        let stat = |rate: f64, room_type: Option<RoomType>| DailyStatRow {
            station_id,
            date,
            room_type,
            total_listings: 10,
            booked_count: (rate * 10.0) as i64,
            booking_rate: rate,
            avg_daily_price: 90000.0,
            estimated_revenue: 900000.0 * rate,
        };

        db.upsert_daily_stat(&stat(0.3, None)).unwrap();
        db.upsert_daily_stat(&stat(0.5, None)).unwrap();
        db.upsert_daily_stat(&stat(0.7, Some(RoomType::EntireHome)))
            .unwrap();

        let count: i64 = db
            .conn
            .query_row("SELECT count(*) FROM daily_stats", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 2);

        let rate: f64 = db
            .conn
            .query_row(
                "SELECT booking_rate FROM daily_stats WHERE room_type IS NULL",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(rate, 0.5);
    }

    #[test]
    fn room_type_parsing_degrades_to_unknown() {
        assert_eq!(RoomType::parse("entire_home"), RoomType::EntireHome);
        assert_eq!(RoomType::parse("Entire_Home_Apt"), RoomType::EntireHome);
        assert_eq!(RoomType::parse("hotel_room"), RoomType::Hotel);
        assert_eq!(RoomType::parse("castle"), RoomType::Unknown);
    }

    #[test]
    fn station_seed_parses_the_documented_shape() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stations.json");
        std::fs::write(
            &path,
            r#"{"stations":[{"name":"서울역","line":"1호선","district":"중구","lat":37.55,"lng":126.97,"priority":1}]}"#,
        )
        .unwrap();

        let seed = load_station_seed(&path).unwrap();
        assert_eq!(seed.len(), 1);
        assert_eq!(seed[0].name, "서울역");

        assert!(load_station_seed(&dir.path().join("missing.json")).is_err());
    }
}
