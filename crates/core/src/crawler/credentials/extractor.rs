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

//! Mines the API key and persisted-query hashes from the upstream's
//! rendered HTML and script bundles.
//!
//! The fast path is three orders of magnitude cheaper than driving a
//! browser and succeeds under most conditions; the browser fallback in
//! [`super::browser`] is retained for resilience against HTML layout
//! changes that break the regex mining. The decision boundary between
//! them is whether the fast path produced a non-empty API key. Partial
//! results from earlier scans are carried into later ones, so the whole
//! procedure is idempotent and resumable.

use std::collections::HashMap;
use std::time::Duration;

use base64::Engine;
use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};

use super::{browser, Credentials, CredentialStore, TARGET_OPERATIONS};
use crate::config::{defaults, StaywatchConfig};
use crate::crawler::Result;

const DESKTOP_UA: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/122.0.0.0 Safari/537.36";

/// Known-good listing page used when no listing id can be mined from
/// the search HTML.
const FALLBACK_LISTING_PATH: &str = "/rooms/1394835192052627372";

static API_KEY_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r#""key"\s*:\s*"([a-z0-9]{32,})""#,
        r#""api_key"\s*:\s*"([a-z0-9]{32,})""#,
        r#""AIRBNB_API_KEY"\s*:\s*"([a-z0-9]{32,})""#,
        r#"x-airbnb-api-key["\s:]+([a-z0-9]{32,})"#,
    ]
    .iter()
    .map(|pattern| {
        RegexBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .expect("static regex")
    })
    .collect()
});

/// Per-operation hash patterns, covering the bundler's
/// `name:'Op'…operationId:'…'` form and the JSON
/// `sha256Hash` form in both orders.
static HASH_PATTERNS: Lazy<Vec<(&'static str, Vec<Regex>)>> = Lazy::new(|| {
    TARGET_OPERATIONS
        .iter()
        .map(|op| {
            let patterns = vec![
                Regex::new(&format!(
                    r"name:\s*'{op}'[^}}]{{0,300}}operationId:\s*'([a-f0-9]{{64}})'"
                ))
                .expect("static regex"),
                Regex::new(&format!(
                    r#""{op}"[^}}]{{0,500}}"sha256Hash"\s*:\s*"([a-f0-9]{{64}})""#
                ))
                .expect("static regex"),
                Regex::new(&format!(
                    r#""sha256Hash"\s*:\s*"([a-f0-9]{{64}})"[^}}]{{0,500}}"{op}""#
                ))
                .expect("static regex"),
            ];
            (*op, patterns)
        })
        .collect()
});

static MUSCACHE_JS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"https://a0\.muscache\.com/[^"'\s]+\.js"#).expect("static regex"));
static NEXT_STATIC_JS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""(/_next/static/[^"]+\.js)""#).expect("static regex"));

static ROOMS_LINK: Lazy<Regex> = Lazy::new(|| Regex::new(r"/rooms/(\d{5,})").expect("static regex"));
// "DemandStayListing:" base64-encodes to this prefix.
static DEMAND_STAY_TOKEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"RGVtYW5kU3RheUxpc3Rpbmc6([A-Za-z0-9+/=]+)").expect("static regex")
});
static PROPERTY_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""propertyId"\s*:\s*"?(\d{5,})"#).expect("static regex"));

static LAZY_BUNDLES: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r#"https://a0\.muscache\.com/[^"'\s]*RoomCalendar[^"'\s]*\.js"#,
        r#"https://a0\.muscache\.com/[^"'\s]*AvailabilityCalendar[^"'\s]*\.js"#,
        r#"https://a0\.muscache\.com/[^"'\s]*PdpPlatformRoute[^"'\s]*\.js"#,
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).expect("static regex"))
    .collect()
});
static ASYNC_REQUIRE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"https://a0\.muscache\.com/[^"'\s]*asyncRequire[^"'\s]*\.js"#)
        .expect("static regex")
});

/// First API key found in the text, testing the patterns in order.
pub(crate) fn mine_api_key(text: &str) -> Option<String> {
    API_KEY_PATTERNS
        .iter()
        .find_map(|pattern| pattern.captures(text))
        .map(|captures| captures[1].to_string())
}

/// All target-operation hashes present in the text.
pub(crate) fn mine_hashes(text: &str) -> HashMap<String, String> {
    let mut hashes = HashMap::new();
    for (op, patterns) in HASH_PATTERNS.iter() {
        for pattern in patterns {
            if let Some(captures) = pattern.captures(text) {
                hashes.insert(op.to_string(), captures[1].to_string());
                break;
            }
        }
    }
    hashes
}

/// Script-bundle URLs referenced by the page, in document order,
/// deduplicated.
pub(crate) fn bundle_urls(html: &str, base_url: &str) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut urls = Vec::new();

    for m in MUSCACHE_JS.find_iter(html) {
        if seen.insert(m.as_str().to_string()) {
            urls.push(m.as_str().to_string());
        }
    }
    for captures in NEXT_STATIC_JS.captures_iter(html) {
        let url = format!("{base_url}{}", &captures[1]);
        if seen.insert(url.clone()) {
            urls.push(url);
        }
    }

    urls
}

/// A listing id mined from search HTML: a `/rooms/<id>` link, a base64
/// `DemandStayListing:` token, or a `propertyId` field.
pub(crate) fn mine_listing_id(html: &str) -> Option<String> {
    if let Some(captures) = ROOMS_LINK.captures(html) {
        return Some(captures[1].to_string());
    }

    if let Some(captures) = DEMAND_STAY_TOKEN.captures(html) {
        let token = format!("RGVtYW5kU3RheUxpc3Rpbmc6{}", &captures[1]);
        if let Ok(decoded) = base64::engine::general_purpose::STANDARD.decode(&token) {
            if let Ok(text) = String::from_utf8(decoded) {
                if let Some(id) = text.rsplit(':').next() {
                    if !id.is_empty() {
                        return Some(id.to_string());
                    }
                }
            }
        }
    }

    PROPERTY_ID
        .captures(html)
        .map(|captures| captures[1].to_string())
}

/// Lazy-loaded Calendar/PDP bundle URLs referenced directly in the HTML
/// or via an `asyncRequire` manifest body.
pub(crate) fn lazy_bundle_urls(html: &str, manifest: Option<&str>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut urls = Vec::new();

    for pattern in LAZY_BUNDLES.iter() {
        for m in pattern.find_iter(html) {
            if seen.insert(m.as_str().to_string()) {
                urls.push(m.as_str().to_string());
            }
        }
    }

    if let Some(manifest) = manifest {
        for fragment in ["RoomCalendar", "AvailabilityCalendar", "PdpPlatformRoute"] {
            let pattern = Regex::new(&format!(r#""([^"]*{fragment}[^"]*\.js)""#))
                .expect("fragment is a literal");
            for captures in pattern.captures_iter(manifest) {
                let path = &captures[1];
                let url = if path.starts_with("http") {
                    path.to_string()
                } else {
                    format!("https://a0.muscache.com/airbnb/static/packages/web/{path}")
                };
                if seen.insert(url.clone()) {
                    urls.push(url);
                }
            }
        }
    }

    urls
}

fn merge(credentials: &mut Credentials, key: Option<String>, hashes: HashMap<String, String>) {
    if credentials.api_key.is_empty() {
        if let Some(key) = key {
            tracing::info!("found API key: {}…", &key[..key.len().min(8)]);
            credentials.api_key = key;
        }
    }
    for (op, hash) in hashes {
        if !credentials.hashes.contains_key(&op) {
            tracing::info!("found hash for {op}: {}…", &hash[..hash.len().min(16)]);
            credentials.hashes.insert(op, hash);
        }
    }
}

pub struct Extractor {
    http: reqwest::Client,
    base_url: String,
    webdriver_url: String,
}

impl Extractor {
    pub fn new(config: &StaywatchConfig) -> Result<Self> {
        let mut headers = reqwest::header::HeaderMap::default();
        headers.insert(
            reqwest::header::ACCEPT,
            reqwest::header::HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            ),
        );
        headers.insert(
            reqwest::header::ACCEPT_LANGUAGE,
            reqwest::header::HeaderValue::from_static("ko-KR,ko;q=0.9,en;q=0.8"),
        );

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .default_headers(headers)
            .user_agent(DESKTOP_UA)
            .build()?;

        Ok(Self {
            http,
            base_url: config.upstream.base_url.clone(),
            webdriver_url: config.crawl.webdriver_url.clone(),
        })
    }

    /// Returns fresh credentials, reusing the cache unless forced.
    /// Persists any extraction that produced a non-empty key.
    pub async fn ensure(
        &self,
        store: &CredentialStore,
        force_refresh: bool,
        visible: bool,
    ) -> Credentials {
        if !force_refresh {
            if let Some(cached) = store.load() {
                return cached;
            }
        }

        let mut credentials = self.fast_path().await;

        if !credentials.is_usable() {
            tracing::info!("fast path failed to find an API key; launching browser fallback");
            match browser::extract(&self.webdriver_url, &self.base_url, visible).await {
                Ok(browser_credentials) => credentials = browser_credentials,
                Err(err) => tracing::error!("browser extraction failed: {err:#}"),
            }
        }

        if credentials.is_usable() {
            if let Err(err) = store.save(&mut credentials) {
                tracing::error!("failed to persist credentials: {err}");
            }
            tracing::info!(
                "extraction complete: {} operation hashes",
                credentials.hashes.len()
            );
        } else {
            tracing::error!(
                "failed to extract an API key; set AIRBNB_API_KEY manually or retry with --visible"
            );
        }

        credentials
    }

    /// Plain-HTTP mining: search page, its bundles, then a listing page
    /// and its lazily-loaded bundles for the calendar/PDP hashes.
    async fn fast_path(&self) -> Credentials {
        let mut credentials = Credentials::default();

        let search_url = format!("{}/s/Seoul/homes", self.base_url);
        tracing::info!("fetching search landing page");
        let Some(html) = self.fetch_text(&search_url).await else {
            return credentials;
        };
        tracing::info!("got {} bytes of HTML", html.len());

        merge(&mut credentials, mine_api_key(&html), mine_hashes(&html));
        self.scan_bundles(&html, &mut credentials).await;

        if !credentials.missing_required().is_empty() {
            tracing::info!(
                "missing hashes after search page: {:?}; scanning a listing page",
                credentials.missing_required()
            );
            self.scan_listing_page(&html, &mut credentials).await;
        }

        credentials
    }

    /// Rescans up to the bundle budget of script files referenced by the
    /// page, stopping early once nothing is missing.
    async fn scan_bundles(&self, html: &str, credentials: &mut Credentials) {
        let urls = bundle_urls(html, &self.base_url);
        tracing::info!("found {} script bundles to scan", urls.len());

        for url in urls.iter().take(defaults::Extractor::max_bundle_scans()) {
            let Some(body) = self.fetch_text(url).await else {
                continue;
            };

            merge(credentials, mine_api_key(&body), mine_hashes(&body));

            if credentials.is_complete() {
                break;
            }
        }
    }

    async fn scan_listing_page(&self, search_html: &str, credentials: &mut Credentials) {
        let listing_url = match mine_listing_id(search_html) {
            Some(id) => format!("{}/rooms/{id}", self.base_url),
            None => {
                tracing::info!("no listing id in search HTML; using fallback listing");
                format!("{}{FALLBACK_LISTING_PATH}", self.base_url)
            }
        };

        tracing::info!("fetching listing page: {listing_url}");
        let Some(html) = self.fetch_text(&listing_url).await else {
            return;
        };

        merge(credentials, mine_api_key(&html), mine_hashes(&html));
        self.scan_bundles(&html, credentials).await;

        if !credentials.missing_required().is_empty() {
            self.scan_lazy_bundles(&html, credentials).await;
        }
    }

    /// The calendar hash lives in bundles that only load on interaction;
    /// the `asyncRequire` manifest names them.
    async fn scan_lazy_bundles(&self, html: &str, credentials: &mut Credentials) {
        let manifest = match ASYNC_REQUIRE.find(html) {
            Some(m) => self.fetch_text(m.as_str()).await,
            None => None,
        };

        let urls = lazy_bundle_urls(html, manifest.as_deref());
        tracing::info!("found {} lazy-loaded bundles to scan", urls.len());

        for url in urls
            .iter()
            .take(defaults::Extractor::max_lazy_bundle_scans())
        {
            let Some(body) = self.fetch_text(url).await else {
                continue;
            };

            merge(credentials, None, mine_hashes(&body));

            if credentials.missing_required().is_empty() {
                break;
            }
        }
    }

    async fn fetch_text(&self, url: &str) -> Option<String> {
        match self.http.get(url).send().await {
            Ok(response) if response.status().is_success() => response.text().await.ok(),
            Ok(response) => {
                tracing::debug!("got status {} from {url}", response.status());
                None
            }
            Err(err) => {
                tracing::debug!("error fetching {url}: {err}");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "d306zoyjsyarp7ifhu67rjxn52tv0t20";

    #[test]
    fn api_key_patterns_match_in_order() {
        assert_eq!(
            mine_api_key(&format!(r#"{{"key":"{KEY}"}}"#)).as_deref(),
            Some(KEY)
        );
        assert_eq!(
            mine_api_key(&format!(r#"{{"api_key":"{KEY}"}}"#)).as_deref(),
            Some(KEY)
        );
        assert_eq!(
            mine_api_key(&format!(r#"{{"AIRBNB_API_KEY":"{KEY}"}}"#)).as_deref(),
            Some(KEY)
        );
        assert_eq!(
            mine_api_key(&format!("x-airbnb-api-key: {KEY}")).as_deref(),
            Some(KEY)
        );
        assert_eq!(mine_api_key("nothing to see"), None);
        // Short tokens never match.
        assert_eq!(mine_api_key(r#""key":"abc123""#), None);
    }

    #[test]
    fn hash_patterns_cover_bundle_and_json_forms() {
        let hash = "a".repeat(64);

        let bundler = format!("e.exports={{name:'StaysSearch',operationId:'{hash}'}}");
        assert_eq!(mine_hashes(&bundler).get("StaysSearch"), Some(&hash));

        let forward =
            format!(r#""PdpAvailabilityCalendar","persistedQuery":{{"sha256Hash":"{hash}""#);
        assert_eq!(
            mine_hashes(&forward).get("PdpAvailabilityCalendar"),
            Some(&hash)
        );

        let reverse = format!(r#""sha256Hash":"{hash}","operationName":"StaysPdpSections""#);
        assert_eq!(mine_hashes(&reverse).get("StaysPdpSections"), Some(&hash));
    }

    #[test]
    fn hash_window_is_bounded() {
        let hash = "b".repeat(64);
        let padding = "x".repeat(600);
        let too_far = format!(r#""StaysSearch"{padding}"sha256Hash":"{hash}""#);
        assert!(mine_hashes(&too_far).is_empty());
    }

    #[test]
    fn bundle_urls_are_discovered_and_deduplicated() {
        let html = r#"
            <script src="https://a0.muscache.com/airbnb/static/packages/web/common/frontend/a1b2.js"></script>
            <script src="https://a0.muscache.com/airbnb/static/packages/web/common/frontend/a1b2.js"></script>
            <link href="/_next/static/chunks/main-3c4d.js"> "/_next/static/chunks/pages-5e6f.js"
        "#;
        let urls = bundle_urls(html, "https://www.airbnb.co.kr");
        assert_eq!(
            urls,
            [
                "https://a0.muscache.com/airbnb/static/packages/web/common/frontend/a1b2.js",
                "https://www.airbnb.co.kr/_next/static/chunks/main-3c4d.js",
                "https://www.airbnb.co.kr/_next/static/chunks/pages-5e6f.js",
            ]
        );
    }

    #[test]
    fn listing_id_prefers_rooms_links() {
        let html = r#"<a href="/rooms/12345678">stay</a> "propertyId":"99999999""#;
        assert_eq!(mine_listing_id(html).as_deref(), Some("12345678"));
    }

    #[test]
    fn listing_id_decodes_demand_stay_tokens() {
        // base64("DemandStayListing:1234567890")
        let html = r#"{"id":"RGVtYW5kU3RheUxpc3Rpbmc6MTIzNDU2Nzg5MA=="}"#;
        assert_eq!(mine_listing_id(html).as_deref(), Some("1234567890"));
    }

    #[test]
    fn listing_id_falls_back_to_property_id() {
        let html = r#"{"propertyId": "87654321"}"#;
        assert_eq!(mine_listing_id(html).as_deref(), Some("87654321"));
        assert_eq!(mine_listing_id("no ids here"), None);
    }

    #[test]
    fn lazy_bundles_resolve_manifest_paths() {
        let html =
            r#"src="https://a0.muscache.com/airbnb/static/packages/web/RoomCalendarModal.abc.js""#;
        let manifest = r#"{"PdpPlatformRoute.def.js":"x","chunk":"deep/AvailabilityCalendar.0ff.js"}"#;

        let urls = lazy_bundle_urls(html, Some(manifest));
        assert!(urls.contains(
            &"https://a0.muscache.com/airbnb/static/packages/web/RoomCalendarModal.abc.js"
                .to_string()
        ));
        assert!(urls.contains(
            &"https://a0.muscache.com/airbnb/static/packages/web/deep/AvailabilityCalendar.0ff.js"
                .to_string()
        ));
        assert!(urls
            .iter()
            .any(|url| url.ends_with("PdpPlatformRoute.def.js")));
    }

    #[test]
    fn merge_never_overwrites_earlier_finds() {
        let mut credentials = Credentials {
            api_key: "first".to_string(),
            hashes: HashMap::from([("StaysSearch".to_string(), "kept".to_string())]),
            cached_at: 0.0,
        };
        merge(
            &mut credentials,
            Some("second".to_string()),
            HashMap::from([
                ("StaysSearch".to_string(), "clobbered".to_string()),
                ("ExploreSearch".to_string(), "new".to_string()),
            ]),
        );
        assert_eq!(credentials.api_key, "first");
        assert_eq!(credentials.hashes["StaysSearch"], "kept");
        assert_eq!(credentials.hashes["ExploreSearch"], "new");
    }
}
