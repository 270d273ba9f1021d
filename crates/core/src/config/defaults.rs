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

pub struct Upstream;

impl Upstream {
    pub fn base_url() -> String {
        "https://www.airbnb.co.kr".to_string()
    }

    pub fn currency() -> String {
        "KRW".to_string()
    }

    pub fn locale() -> String {
        "ko".to_string()
    }

    pub fn timeout_seconds() -> u64 {
        30
    }
}

pub struct Crawl;

impl Crawl {
    pub fn search_radius_km() -> f64 {
        3.0
    }

    pub fn default_guests() -> u32 {
        2
    }

    pub fn calendar_months() -> u32 {
        3
    }

    pub fn max_search_pages() -> u32 {
        5
    }
}

pub struct Paths;

impl Paths {
    pub fn data_dir() -> String {
        "data".to_string()
    }

    pub fn db_file() -> String {
        "data/staywatch.db".to_string()
    }

    pub fn credentials_file() -> String {
        "data/.api_credentials.json".to_string()
    }

    pub fn proxies_file() -> String {
        "config/proxies.txt".to_string()
    }

    pub fn stations_file() -> String {
        "config/stations.json".to_string()
    }
}

pub struct Extractor;

impl Extractor {
    pub fn max_bundle_scans() -> usize {
        40
    }

    pub fn max_lazy_bundle_scans() -> usize {
        20
    }

    pub fn webdriver_url() -> String {
        "http://127.0.0.1:9515".to_string()
    }
}
