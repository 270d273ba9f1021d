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

//! Listing detail job (tiers B and C).
//!
//! Walks the PDP sections response and patches listing metadata from
//! whichever sections are present. The interesting fields hide in
//! localized description strings, so room type, bedroom, and bathroom
//! counts are parsed from Korean keywords.

use base64::Engine;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use super::JobRun;
use crate::crawler::client::UpstreamClient;
use crate::db::{Db, Listing, ListingPatch, RoomType};

static BEDROOMS: Lazy<Regex> = Lazy::new(|| Regex::new(r"침실\s*(\d+)").expect("static regex"));
static BEDS: Lazy<Regex> = Lazy::new(|| Regex::new(r"침대\s*(\d+)").expect("static regex"));
static BATHROOMS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"욕실\s*(\d+(?:\.\d+)?)").expect("static regex"));
static GUEST_CAPACITY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"게스트\s*정원\s*(\d+)명").expect("static regex"));

pub struct DetailJob<'a> {
    client: &'a mut UpstreamClient,
    db: &'a mut Db,
}

impl<'a> DetailJob<'a> {
    pub fn new(client: &'a mut UpstreamClient, db: &'a mut Db) -> Self {
        Self { client, db }
    }

    pub async fn run(mut self) -> crate::Result<i64> {
        let listings = self.db.all_listings()?;
        if listings.is_empty() {
            tracing::warn!("no listings in store; run a search job first");
            return Ok(0);
        }

        let mut run = JobRun::start("detail", self.client);
        for listing in &listings {
            match self.crawl_listing(listing).await {
                Some(()) => run.unit_succeeded(),
                None => run.unit_failed(),
            }
        }

        let succeeded = run.succeeded();
        run.finish(self.client, self.db, None)?;
        Ok(succeeded)
    }

    async fn crawl_listing(&mut self, listing: &Listing) -> Option<()> {
        tracing::debug!("fetching detail for listing {}", listing.airbnb_id);

        let data = self.client.pdp_sections(&listing.airbnb_id).await?;
        let patch = parse_detail(&data)?;

        if let Err(err) = self.db.patch_listing(listing.id, &patch) {
            tracing::error!("failed to patch listing {}: {err}", listing.airbnb_id);
            return None;
        }

        tracing::debug!("updated listing {} detail", listing.airbnb_id);
        Some(())
    }
}

/// Walks the PDP sections and accumulates a partial update. `None`
/// when no section yielded anything.
pub(crate) fn parse_detail(data: &Value) -> Option<ListingPatch> {
    let sections = data
        .pointer("/data/presentation/stayProductDetailPage/sections/sections")?
        .as_array()?;

    let mut patch = ListingPatch::default();

    for entry in sections {
        let kind = entry
            .get("sectionComponentType")
            .and_then(Value::as_str)
            .unwrap_or("");
        let section = entry.get("section").unwrap_or(&Value::Null);

        match kind {
            "BOOK_IT_SIDEBAR" => {
                if let Some(guests) = section.get("maxGuestCapacity").and_then(Value::as_i64) {
                    patch.max_guests = Some(guests);
                }
                apply_description_items(section, &mut patch);
            }
            _ if kind.starts_with("AVAILABILITY_CALENDAR") => {
                apply_description_items(section, &mut patch);
            }
            "MEET_YOUR_HOST" => apply_host_card(section, &mut patch),
            "POLICIES_DEFAULT" => {
                if patch.max_guests.is_none() {
                    // The capacity only appears in localized rule text
                    // here, so scan the whole section.
                    if let Some(captures) = GUEST_CAPACITY.captures(&section.to_string()) {
                        patch.max_guests = captures[1].parse().ok();
                    }
                }
            }
            _ if kind.contains("OVERVIEW") => apply_legacy_overview(section, &mut patch),
            _ if kind.contains("HOST_PROFILE") => {
                if patch.host_id.is_none() {
                    patch.host_id = section
                        .pointer("/hostAvatar/userId")
                        .and_then(Value::as_str)
                        .and_then(decode_host_id);
                }
            }
            _ => {}
        }
    }

    if patch.is_empty() {
        None
    } else {
        Some(patch)
    }
}

fn apply_description_items(section: &Value, patch: &mut ListingPatch) {
    let Some(items) = section.get("descriptionItems").and_then(Value::as_array) else {
        return;
    };
    for title in items
        .iter()
        .filter_map(|item| item.get("title").and_then(Value::as_str))
    {
        apply_description_title(title, patch);
    }
}

/// One localized description fragment, e.g. `"집 전체 · 침실 2 · 욕실 1"`.
pub(crate) fn apply_description_title(title: &str, patch: &mut ListingPatch) {
    if patch.room_type.is_none() {
        patch.room_type = room_type_from_korean(title);
    }

    if let Some(captures) = BEDROOMS.captures(title) {
        patch.bedrooms = captures[1].parse().ok();
    } else if patch.bedrooms.is_none() {
        if let Some(captures) = BEDS.captures(title) {
            patch.bedrooms = captures[1].parse().ok();
        }
    }

    if patch.bathrooms.is_none() {
        if let Some(captures) = BATHROOMS.captures(title) {
            patch.bathrooms = captures[1].parse().ok();
        }
    }
}

pub(crate) fn room_type_from_korean(text: &str) -> Option<RoomType> {
    if text.contains("호텔") {
        Some(RoomType::Hotel)
    } else if text.contains("다인실") || text.contains("공유") {
        Some(RoomType::SharedRoom)
    } else if text.contains("개인실") {
        Some(RoomType::PrivateRoom)
    } else if text.contains("전체") {
        Some(RoomType::EntireHome)
    } else {
        None
    }
}

fn apply_host_card(section: &Value, patch: &mut ListingPatch) {
    let card = section.get("cardData").unwrap_or(section);

    if patch.host_id.is_none() {
        patch.host_id = card
            .get("userId")
            .and_then(Value::as_str)
            .and_then(decode_host_id);
    }

    if let Some(rating) = card.get("ratingAverage").and_then(Value::as_f64) {
        patch.rating = Some(rating);
    }

    if let Some(stats) = card.get("stats").and_then(Value::as_array) {
        for stat in stats {
            let label = stat.get("label").and_then(Value::as_str).unwrap_or("");
            let value = match stat.get("value") {
                Some(Value::Number(n)) => n.as_i64(),
                Some(Value::String(s)) => {
                    let digits: String = s.chars().filter(char::is_ascii_digit).collect();
                    digits.parse().ok()
                }
                _ => None,
            };
            if label.contains("후기") || label.to_ascii_lowercase().contains("review") {
                if value.is_some() {
                    patch.review_count = value;
                    break;
                }
            } else if patch.review_count.is_none() {
                patch.review_count = value;
            }
        }
    }
}

/// Host ids travel base64-encoded as `DemandUser:<id>`.
pub(crate) fn decode_host_id(raw: &str) -> Option<String> {
    if let Ok(decoded) = base64::engine::general_purpose::STANDARD.decode(raw) {
        if let Ok(text) = String::from_utf8(decoded) {
            if let Some(id) = text.strip_prefix("DemandUser:") {
                return Some(id.to_string());
            }
        }
    }
    if let Some(id) = raw.strip_prefix("DemandUser:") {
        return Some(id.to_string());
    }
    if raw.is_empty() {
        None
    } else {
        Some(raw.to_string())
    }
}

/// Pre-redesign section shapes, kept for compatibility.
fn apply_legacy_overview(section: &Value, patch: &mut ListingPatch) {
    if patch.room_type.is_none() {
        patch.room_type = section
            .get("roomTypeCategory")
            .and_then(Value::as_str)
            .map(RoomType::parse);
    }
    if patch.bedrooms.is_none() {
        patch.bedrooms = section.get("bedrooms").and_then(Value::as_i64);
    }
    if patch.bathrooms.is_none() {
        patch.bathrooms = section.get("bathrooms").and_then(Value::as_f64);
    }
    if patch.max_guests.is_none() {
        patch.max_guests = section.get("personCapacity").and_then(Value::as_i64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sections_response(sections: Value) -> Value {
        json!({
            "data": {"presentation": {"stayProductDetailPage": {"sections": {
                "sections": sections
            }}}}
        })
    }

    #[test]
    fn description_titles_carry_room_type_and_counts() {
        let mut patch = ListingPatch::default();
        apply_description_title("집 전체 · 침실 2 · 욕실 1", &mut patch);

        assert_eq!(patch.room_type, Some(RoomType::EntireHome));
        assert_eq!(patch.bedrooms, Some(2));
        assert_eq!(patch.bathrooms, Some(1.0));
    }

    #[test]
    fn bed_count_is_only_a_fallback_for_bedrooms() {
        let mut patch = ListingPatch::default();
        apply_description_title("원룸 · 침대 3", &mut patch);
        assert_eq!(patch.bedrooms, Some(3));

        apply_description_title("침실 1 · 침대 3", &mut patch);
        assert_eq!(patch.bedrooms, Some(1));
    }

    #[test]
    fn korean_room_type_keywords_map_to_the_taxonomy() {
        assert_eq!(room_type_from_korean("개인실 숙소"), Some(RoomType::PrivateRoom));
        assert_eq!(room_type_from_korean("다인실 침대"), Some(RoomType::SharedRoom));
        assert_eq!(room_type_from_korean("공유 공간"), Some(RoomType::SharedRoom));
        assert_eq!(room_type_from_korean("호텔 객실"), Some(RoomType::Hotel));
        assert_eq!(room_type_from_korean("아파트 전체"), Some(RoomType::EntireHome));
        assert_eq!(room_type_from_korean("특이한 곳"), None);
    }

    #[test]
    fn host_ids_decode_from_base64_tokens() {
        // base64("DemandUser:987654321")
        assert_eq!(
            decode_host_id("RGVtYW5kVXNlcjo5ODc2NTQzMjE=").as_deref(),
            Some("987654321")
        );
        assert_eq!(decode_host_id("DemandUser:42").as_deref(), Some("42"));
        assert_eq!(decode_host_id("12345").as_deref(), Some("12345"));
        assert_eq!(decode_host_id(""), None);
    }

    #[test]
    fn full_section_walk_builds_one_patch() {
        let data = sections_response(json!([
            {"sectionComponentType": "BOOK_IT_SIDEBAR",
             "section": {"maxGuestCapacity": 4}},
            {"sectionComponentType": "AVAILABILITY_CALENDAR_DEFAULT",
             "section": {"descriptionItems": [
                 {"title": "집 전체 · 침실 2"},
                 {"title": "욕실 1"}
             ]}},
            {"sectionComponentType": "MEET_YOUR_HOST",
             "section": {"cardData": {
                 "userId": "RGVtYW5kVXNlcjo5ODc2NTQzMjE=",
                 "ratingAverage": 4.92,
                 "stats": [{"label": "후기", "value": "312개"}]
             }}}
        ]));

        let patch = parse_detail(&data).unwrap();
        assert_eq!(patch.max_guests, Some(4));
        assert_eq!(patch.room_type, Some(RoomType::EntireHome));
        assert_eq!(patch.bedrooms, Some(2));
        assert_eq!(patch.bathrooms, Some(1.0));
        assert_eq!(patch.host_id.as_deref(), Some("987654321"));
        assert_eq!(patch.rating, Some(4.92));
        assert_eq!(patch.review_count, Some(312));
    }

    #[test]
    fn policies_section_is_a_capacity_fallback() {
        let data = sections_response(json!([
            {"sectionComponentType": "POLICIES_DEFAULT",
             "section": {"houseRules": [{"title": "게스트 정원 6명"}]}}
        ]));
        let patch = parse_detail(&data).unwrap();
        assert_eq!(patch.max_guests, Some(6));
    }

    #[test]
    fn sidebar_capacity_beats_the_policies_fallback() {
        let data = sections_response(json!([
            {"sectionComponentType": "BOOK_IT_SIDEBAR", "section": {"maxGuestCapacity": 2}},
            {"sectionComponentType": "POLICIES_DEFAULT",
             "section": {"houseRules": [{"title": "게스트 정원 6명"}]}}
        ]));
        assert_eq!(parse_detail(&data).unwrap().max_guests, Some(2));
    }

    #[test]
    fn legacy_overview_sections_still_parse() {
        let data = sections_response(json!([
            {"sectionComponentType": "OVERVIEW_DEFAULT",
             "section": {"roomTypeCategory": "private_room", "bedrooms": 1,
                          "bathrooms": 1.5, "personCapacity": 2}},
            {"sectionComponentType": "HOST_PROFILE_DEFAULT",
             "section": {"hostAvatar": {"userId": "55555"}}}
        ]));

        let patch = parse_detail(&data).unwrap();
        assert_eq!(patch.room_type, Some(RoomType::PrivateRoom));
        assert_eq!(patch.bedrooms, Some(1));
        assert_eq!(patch.bathrooms, Some(1.5));
        assert_eq!(patch.max_guests, Some(2));
        assert_eq!(patch.host_id.as_deref(), Some("55555"));
    }

    #[test]
    fn empty_sections_yield_no_patch() {
        assert!(parse_detail(&sections_response(json!([]))).is_none());
        assert!(parse_detail(&json!({"data": {}})).is_none());
    }
}
