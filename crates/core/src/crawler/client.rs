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

//! Upstream API façade.
//!
//! Issues the three GraphQL operations the crawler lives on
//! (`StaysSearch`, `PdpAvailabilityCalendar`, `StaysPdpSections`) as
//! persisted-query GETs. Every request is paced by the rate limiter,
//! routed through the proxy pool, and classified for soft blocks before
//! its body is trusted. Jobs only ever see a decoded JSON value or
//! `None`.

use std::time::Duration;

use base64::Engine;
use chrono::{Local, NaiveDate};
use rand::seq::SliceRandom;
use serde_json::{json, Value};

use crate::config::{StaywatchConfig, TierBudget};
use crate::crawler::block::{self, BlockType};
use crate::crawler::credentials::{Credentials, OP_CALENDAR, OP_PDP_SECTIONS, OP_SEARCH};
use crate::crawler::limiter::{RateLimiter, RequestStats};
use crate::crawler::proxy::{PoolStats, ProxyPool};
use crate::crawler::Result;

const MAX_ATTEMPTS: u32 = 3;

/// Degrees of latitude per kilometer is 1/111; longitude degrees are
/// corrected by cos(latitude), ~0.85 at Seoul.
const KM_PER_DEGREE: f64 = 111.0;
const SEOUL_COS_LAT: f64 = 0.85;

const USER_AGENTS: [&str; 8] = [
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/122.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/122.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:123.0) Gecko/20100101 Firefox/123.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.3.1 Safari/605.1.15",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/122.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:122.0) Gecko/20100101 Firefox/122.0",
];

const TREATMENT_FLAGS: [&str; 7] = [
    "feed_map_decouple_m11_treatment",
    "recommended_amenities_2024_treatment_b",
    "filter_redesign_2024_treatment",
    "filter_reordering_2024_roomtype_treatment",
    "p2_category_bar_removal_treatment",
    "selected_filters_2024_treatment",
    "recommended_filters_2024_treatment_b",
];

/// Latitude/longitude offsets approximating a radius in kilometers.
pub(crate) fn bounding_offsets(radius_km: f64) -> (f64, f64) {
    (
        radius_km / KM_PER_DEGREE,
        radius_km / (KM_PER_DEGREE * SEOUL_COS_LAT),
    )
}

/// 16-hex digest of a response, stable under key reordering. Used by
/// the search snapshot for duplicate detection.
pub fn response_digest(data: &Value) -> String {
    // serde_json maps are sorted, so serialization is canonical.
    let raw = data.to_string();
    let digest = format!("{:x}", md5::compute(raw.as_bytes()));
    digest[..16].to_string()
}

pub struct ClientStats {
    pub requests: RequestStats,
    pub delay_multiplier: f64,
    pub proxies: PoolStats,
}

pub struct UpstreamClient {
    direct: reqwest::Client,
    limiter: RateLimiter,
    proxies: ProxyPool,
    credentials: Credentials,
    base_url: String,
    currency: String,
    locale: String,
    timeout: Duration,
    default_guests: u32,
    radius_km: f64,
}

impl UpstreamClient {
    pub fn new(
        config: &StaywatchConfig,
        budget: &TierBudget,
        credentials: Credentials,
    ) -> Result<Self> {
        let timeout = Duration::from_secs(config.upstream.timeout_seconds);

        let proxies = ProxyPool::load(
            &config.proxy_list,
            std::path::Path::new(&config.paths.proxies_file),
            budget.requests_per_ip_before_rotate,
        );
        if budget.proxy_required && !proxies.has_proxies() {
            tracing::warn!(
                "the active tier requires proxies but none are configured; \
                 set PROXY_LIST or populate {}",
                config.paths.proxies_file
            );
        }

        Ok(Self {
            direct: base_client(timeout, None)?,
            limiter: RateLimiter::new(budget),
            proxies,
            credentials,
            base_url: config.upstream.base_url.clone(),
            currency: config.upstream.currency.clone(),
            locale: config.upstream.locale.clone(),
            timeout,
            default_guests: config.crawl.default_guests,
            radius_km: config.crawl.search_radius_km,
        })
    }

    pub fn stats(&mut self) -> ClientStats {
        ClientStats {
            requests: self.limiter.stats(),
            delay_multiplier: self.limiter.multiplier(),
            proxies: self.proxies.stats(),
        }
    }

    /// Rate-limited, proxied, retried GET against an operation
    /// endpoint. `None` after the attempt budget is exhausted.
    pub async fn request(&mut self, operation: &str, params: &[(&str, String)]) -> Option<Value> {
        let url = format!("{}/api/v3/{operation}", self.base_url);

        for attempt in 1..=MAX_ATTEMPTS {
            self.limiter.wait().await;

            let proxy = self.proxies.get();
            let client = match proxy.as_deref() {
                // reqwest pins the proxy at build time, so proxied
                // attempts get a throwaway client.
                Some(proxy_url) => match base_client(self.timeout, Some(proxy_url)) {
                    Ok(client) => client,
                    Err(err) => {
                        tracing::error!("failed to build proxied client: {err:#}");
                        self.limiter.report_failure(BlockType::None);
                        continue;
                    }
                },
                None => self.direct.clone(),
            };

            let response = client
                .get(&url)
                .headers(self.headers())
                .query(params)
                .send()
                .await;

            let response = match response {
                Ok(response) => response,
                Err(err) => {
                    tracing::error!("request error (attempt {attempt}/{MAX_ATTEMPTS}): {err}");
                    self.limiter.report_failure(BlockType::None);
                    continue;
                }
            };

            let status = response.status().as_u16();
            let text = match response.text().await {
                Ok(text) => text,
                Err(err) => {
                    tracing::error!("failed to read body (status={status}): {err}");
                    self.limiter.report_failure(BlockType::None);
                    continue;
                }
            };

            let block = block::classify(status, &text);
            if block.is_block() {
                self.limiter.report_failure(block);
                if proxy.is_some() {
                    self.proxies.report_blocked();
                }
                tracing::warn!(
                    "request blocked (attempt {attempt}/{MAX_ATTEMPTS}, type={}, status={status})",
                    block.as_str()
                );
                continue;
            }

            match serde_json::from_str::<Value>(&text) {
                Ok(data) => {
                    self.limiter.report_success();
                    if proxy.is_some() {
                        self.proxies.report_success();
                    }
                    return Some(data);
                }
                Err(_) => {
                    tracing::error!("invalid JSON response (status={status})");
                    self.limiter.report_failure(BlockType::None);
                    continue;
                }
            }
        }

        tracing::error!("all {MAX_ATTEMPTS} attempts exhausted for {operation}");
        None
    }

    /// Searches stays around a coordinate. Check-in defaults to
    /// tomorrow, check-out to the day after.
    pub async fn search_stays(
        &mut self,
        lat: f64,
        lng: f64,
        checkin: Option<NaiveDate>,
        checkout: Option<NaiveDate>,
        cursor: Option<&str>,
    ) -> Option<Value> {
        let checkin =
            checkin.unwrap_or_else(|| Local::now().date_naive() + chrono::Days::new(1));
        let checkout = checkout.unwrap_or(checkin + chrono::Days::new(1));

        let (lat_offset, lng_offset) = bounding_offsets(self.radius_km);

        let mut base_params = vec![
            json!({"filterName": "adults", "filterValues": [self.default_guests.to_string()]}),
            json!({"filterName": "cdnCacheSafe", "filterValues": ["false"]}),
            json!({"filterName": "checkin", "filterValues": [checkin.to_string()]}),
            json!({"filterName": "checkout", "filterValues": [checkout.to_string()]}),
            json!({"filterName": "ne_lat", "filterValues": [(lat + lat_offset).to_string()]}),
            json!({"filterName": "ne_lng", "filterValues": [(lng + lng_offset).to_string()]}),
            json!({"filterName": "sw_lat", "filterValues": [(lat - lat_offset).to_string()]}),
            json!({"filterName": "sw_lng", "filterValues": [(lng - lng_offset).to_string()]}),
            json!({"filterName": "refinementPaths", "filterValues": ["/homes"]}),
            json!({"filterName": "screenSize", "filterValues": ["large"]}),
            json!({"filterName": "tabId", "filterValues": ["home_tab"]}),
            json!({"filterName": "version", "filterValues": ["1.8.8"]}),
            json!({"filterName": "search_type", "filterValues": ["filter_change"]}),
        ];
        if let Some(cursor) = cursor {
            base_params.push(json!({"filterName": "cursor", "filterValues": [cursor]}));
        }

        let mut list_params = base_params.clone();
        list_params.push(json!({"filterName": "itemsPerGrid", "filterValues": ["18"]}));

        let variables = json!({
            "aiSearchEnabled": false,
            "isLeanTreatment": false,
            "skipExtendedSearchParams": false,
            "staysMapSearchRequestV2": {
                "metadataOnly": false,
                "rawParams": base_params,
                "requestedPageType": "STAYS_SEARCH",
                "treatmentFlags": TREATMENT_FLAGS,
            },
            "staysSearchRequest": {
                "maxMapItems": 9999,
                "metadataOnly": false,
                "rawParams": list_params,
                "requestedPageType": "STAYS_SEARCH",
                "treatmentFlags": TREATMENT_FLAGS,
            },
        });

        let params = self.operation_params(OP_SEARCH, &variables);
        self.request(OP_SEARCH, &params).await
    }

    /// Availability calendar for a listing, `count` months starting at
    /// (month, year).
    pub async fn calendar(
        &mut self,
        listing_id: &str,
        month: u32,
        year: i32,
        count: u32,
    ) -> Option<Value> {
        let variables = json!({
            "request": {
                "count": count,
                "listingId": listing_id,
                "month": month,
                "year": year,
            },
        });

        let params = self.operation_params(OP_CALENDAR, &variables);
        self.request(OP_CALENDAR, &params).await
    }

    /// Listing detail via the PDP sections operation.
    pub async fn pdp_sections(&mut self, listing_id: &str) -> Option<Value> {
        let b64 = base64::engine::general_purpose::STANDARD;
        let stay_id = b64.encode(format!("StayListing:{listing_id}"));
        let demand_id = b64.encode(format!("DemandStayListing:{listing_id}"));
        let impression_id = format!(
            "p3_{}_crawl",
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0)
        );

        let variables = json!({
            "categoryTag": null,
            "demandStayListingId": demand_id,
            "federatedSearchId": null,
            "id": stay_id,
            "includeGpDescriptionFragment": true,
            "includeGpHighlightsFragment": true,
            "includeGpNavFragment": true,
            "includeGpNavMobileFragment": true,
            "includeGpReportToAirbnbFragment": true,
            "includeGpReviewsEmptyFragment": true,
            "includeGpReviewsFragment": true,
            "includeGpTitleFragment": true,
            "includeHotelFragments": true,
            "p3ImpressionId": impression_id,
            "pdpSectionsRequest": {
                "adults": self.default_guests.to_string(),
                "bypassTargetings": false,
                "categoryTag": null,
                "checkIn": null,
                "checkOut": null,
                "children": null,
                "hostPreview": false,
                "infants": null,
                "layouts": ["SIDEBAR", "SINGLE_COLUMN"],
                "p3ImpressionId": impression_id,
                "pets": 0,
                "photoId": null,
                "preview": false,
                "previousStateCheckIn": null,
                "previousStateCheckOut": null,
                "privateBooking": false,
                "sectionIds": null,
                "splitStays": null,
                "staysBookingMigrationEnabled": false,
                "translateUgc": null,
                "useNewSectionWrapperApi": false,
            },
            "photoId": null,
        });

        let params = self.operation_params(OP_PDP_SECTIONS, &variables);
        self.request(OP_PDP_SECTIONS, &params).await
    }

    fn operation_params(&self, operation: &str, variables: &Value) -> Vec<(&'static str, String)> {
        let extensions = json!({
            "persistedQuery": {
                "version": 1,
                "sha256Hash": self.credentials.hash_for(operation).unwrap_or(""),
            },
        });

        vec![
            ("operationName", operation.to_string()),
            ("locale", self.locale.clone()),
            ("currency", self.currency.clone()),
            ("variables", variables.to_string()),
            ("extensions", extensions.to_string()),
        ]
    }

    fn headers(&self) -> reqwest::header::HeaderMap {
        use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

        let ua = USER_AGENTS
            .choose(&mut rand::thread_rng())
            .copied()
            .unwrap_or(USER_AGENTS[0]);

        let mut headers = HeaderMap::new();
        let mut insert = |name: &'static str, value: String| {
            if let Ok(value) = HeaderValue::from_str(&value) {
                headers.insert(HeaderName::from_static(name), value);
            }
        };

        insert("user-agent", ua.to_string());
        insert("accept", "application/json".to_string());
        insert("accept-language", "ko-KR,ko;q=0.9,en;q=0.8".to_string());
        insert("content-type", "application/json".to_string());
        insert("x-airbnb-api-key", self.credentials.api_key.clone());
        insert("x-airbnb-currency", self.currency.clone());
        insert("x-airbnb-locale", self.locale.clone());
        insert("referer", format!("{}/s/Seoul/homes", self.base_url));
        insert("origin", self.base_url.clone());
        insert("sec-fetch-dest", "empty".to_string());
        insert("sec-fetch-mode", "cors".to_string());
        insert("sec-fetch-site", "same-origin".to_string());
        insert("sec-ch-ua-platform", "\"Windows\"".to_string());

        headers
    }
}

/// Standard HTTP/2 transport. A TLS-fingerprint-impersonating client
/// can be swapped in here; everything above this seam is agnostic to
/// the transport.
fn base_client(timeout: Duration, proxy: Option<&str>) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder()
        .timeout(timeout)
        .connect_timeout(timeout);

    if let Some(proxy) = proxy {
        builder = builder.proxy(reqwest::Proxy::all(proxy)?);
    }

    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_is_stable_under_key_order() {
        let a: Value = serde_json::from_str(r#"{"b": 1, "a": {"y": 2, "x": 3}}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"a": {"x": 3, "y": 2}, "b": 1}"#).unwrap();

        let digest_a = response_digest(&a);
        let digest_b = response_digest(&b);
        assert_eq!(digest_a, digest_b);
        assert_eq!(digest_a.len(), 16);
        assert!(digest_a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn digest_differs_for_different_payloads() {
        let a: Value = serde_json::from_str(r#"{"a": 1}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"a": 2}"#).unwrap();
        assert_ne!(response_digest(&a), response_digest(&b));
    }

    #[test]
    fn bounding_offsets_project_the_radius() {
        let (lat_offset, lng_offset) = bounding_offsets(3.0);
        assert!((lat_offset - 3.0 / 111.0).abs() < 1e-12);
        assert!((lng_offset - 3.0 / (111.0 * 0.85)).abs() < 1e-12);
        // Longitude degrees shrink with latitude, so the offset is wider.
        assert!(lng_offset > lat_offset);
    }
}
