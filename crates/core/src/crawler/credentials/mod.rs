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

//! API credentials: a mined API key plus the persisted-query hash for
//! each GraphQL operation the crawler issues.
//!
//! The upstream requires a 64-hex `sha256Hash` alongside every named
//! operation. Neither the key nor the hashes are documented anywhere;
//! [`extractor`] mines them from the rendered site and the result is
//! cached on disk for 72 hours.

pub mod browser;
pub mod extractor;

pub use extractor::Extractor;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

pub const OP_SEARCH: &str = "StaysSearch";
pub const OP_CALENDAR: &str = "PdpAvailabilityCalendar";
pub const OP_PDP_SECTIONS: &str = "StaysPdpSections";

/// Operations whose hashes are worth capturing when seen.
pub const TARGET_OPERATIONS: [&str; 5] = [
    OP_SEARCH,
    OP_CALENDAR,
    OP_PDP_SECTIONS,
    "StaysDetailPagePresentation",
    "ExploreSearch",
];

/// The crawler cannot run without these three.
pub const REQUIRED_OPERATIONS: [&str; 3] = [OP_SEARCH, OP_CALENDAR, OP_PDP_SECTIONS];

const MAX_AGE_HOURS: f64 = 72.0;

fn epoch_seconds() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct Credentials {
    #[serde(default)]
    pub api_key: String,

    /// Operation name to 64-hex persisted-query hash. May be partial;
    /// a usable record only guarantees a non-empty key.
    #[serde(default)]
    pub hashes: HashMap<String, String>,

    /// Wall-clock seconds since epoch at which the record was cached.
    #[serde(default)]
    pub cached_at: f64,
}

impl Credentials {
    pub fn is_usable(&self) -> bool {
        !self.api_key.is_empty()
    }

    pub fn hash_for(&self, operation: &str) -> Option<&str> {
        self.hashes.get(operation).map(String::as_str)
    }

    pub fn missing_required(&self) -> Vec<&'static str> {
        REQUIRED_OPERATIONS
            .iter()
            .copied()
            .filter(|op| !self.hashes.contains_key(*op))
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.is_usable() && self.missing_required().is_empty()
    }

    pub fn age_hours(&self) -> f64 {
        (epoch_seconds() - self.cached_at) / 3600.0
    }
}

/// Persists credentials as a single JSON document.
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns `None` when the record is missing, unparseable, keyless,
    /// or older than 72 hours.
    pub fn load(&self) -> Option<Credentials> {
        let raw = std::fs::read_to_string(&self.path).ok()?;
        let credentials: Credentials = serde_json::from_str(&raw).ok()?;

        if !credentials.is_usable() {
            return None;
        }

        let age = credentials.age_hours();
        if age > MAX_AGE_HOURS {
            tracing::info!("credential cache expired ({age:.1} hours old)");
            return None;
        }

        tracing::info!("loaded cached API credentials ({age:.1} hours old)");
        Some(credentials)
    }

    /// Stamps `cached_at` and writes atomically (write-then-rename).
    pub fn save(&self, credentials: &mut Credentials) -> std::io::Result<()> {
        credentials.cached_at = epoch_seconds();

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let tmp = self.path.with_extension("json.tmp");
        let raw = serde_json::to_string_pretty(credentials)?;
        std::fs::write(&tmp, raw)?;
        std::fs::rename(&tmp, &self.path)?;

        tracing::info!("saved API credentials to {}", self.path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, CredentialStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::new(dir.path().join("credentials.json"));
        (dir, store)
    }

    #[test]
    fn round_trips_well_formed_records() {
        let (_dir, store) = store();
        let mut credentials = Credentials {
            api_key: "d306zoyjsyarp7ifhu67rjxn52tv0t20".to_string(),
            hashes: HashMap::from([(OP_SEARCH.to_string(), "ab".repeat(32))]),
            cached_at: 0.0,
        };
        store.save(&mut credentials).unwrap();
        assert!(credentials.cached_at > 0.0);

        let loaded = store.load().unwrap();
        assert_eq!(loaded.api_key, credentials.api_key);
        assert_eq!(loaded.hash_for(OP_SEARCH), Some("ab".repeat(32).as_str()));
    }

    #[test]
    fn missing_file_loads_nothing() {
        let (_dir, store) = store();
        assert!(store.load().is_none());
    }

    #[test]
    fn garbage_loads_nothing() {
        let (_dir, store) = store();
        std::fs::write(store.path(), "not json").unwrap();
        assert!(store.load().is_none());
    }

    #[test]
    fn empty_key_loads_nothing() {
        let (_dir, store) = store();
        std::fs::write(
            store.path(),
            r#"{"api_key":"","hashes":{},"cached_at":9999999999.0}"#,
        )
        .unwrap();
        assert!(store.load().is_none());
    }

    #[test]
    fn stale_records_load_nothing() {
        let (_dir, store) = store();
        let stale = epoch_seconds() - (MAX_AGE_HOURS + 1.0) * 3600.0;
        std::fs::write(
            store.path(),
            format!(r#"{{"api_key":"abc123","hashes":{{}},"cached_at":{stale}}}"#),
        )
        .unwrap();
        assert!(store.load().is_none());
    }

    #[test]
    fn missing_required_tracks_the_hash_map() {
        let mut credentials = Credentials {
            api_key: "key".to_string(),
            ..Default::default()
        };
        assert_eq!(
            credentials.missing_required(),
            vec![OP_SEARCH, OP_CALENDAR, OP_PDP_SECTIONS]
        );

        credentials
            .hashes
            .insert(OP_CALENDAR.to_string(), "cd".repeat(32));
        assert_eq!(credentials.missing_required(), vec![OP_SEARCH, OP_PDP_SECTIONS]);
        assert!(!credentials.is_complete());

        for op in REQUIRED_OPERATIONS {
            credentials.hashes.insert(op.to_string(), "ef".repeat(32));
        }
        assert!(credentials.is_complete());
    }
}
