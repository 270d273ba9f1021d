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

//! Maps (status, body) to the block taxonomy.
//!
//! The upstream rarely fails honestly: a soft block arrives as a 200
//! with a captcha interstitial or a near-empty skeleton page. The
//! classifier is total and never allocates beyond one lowercased
//! prefix of the body.

/// How many leading bytes of the body are inspected for soft-block
/// markers.
const INSPECT_PREFIX_BYTES: usize = 5000;

/// What the upstream did to us, if anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockType {
    None,
    RateLimit,
    Forbidden,
    Captcha,
    Skeleton,
    ServerError,
}

impl BlockType {
    pub fn is_block(self) -> bool {
        self != BlockType::None
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BlockType::None => "none",
            BlockType::RateLimit => "rate_limit",
            BlockType::Forbidden => "forbidden",
            BlockType::Captcha => "captcha",
            BlockType::Skeleton => "skeleton",
            BlockType::ServerError => "server_error",
        }
    }
}

const CAPTCHA_MARKERS: [&str; 4] = ["captcha", "recaptcha", "hcaptcha", "challenge-platform"];
const DENIAL_MARKERS: [&str; 2] = ["pardon our interruption", "access denied"];

/// Classifies an upstream response. Total over all inputs.
pub fn classify(status: u16, body: &str) -> BlockType {
    match status {
        429 => return BlockType::RateLimit,
        403 => return BlockType::Forbidden,
        503 => return BlockType::ServerError,
        200 => {}
        _ => return BlockType::None,
    }

    let prefix_len = body.len().min(INSPECT_PREFIX_BYTES);
    let head = String::from_utf8_lossy(&body.as_bytes()[..prefix_len]).to_lowercase();

    if CAPTCHA_MARKERS.iter().any(|marker| head.contains(marker)) {
        return BlockType::Captcha;
    }

    if DENIAL_MARKERS.iter().any(|marker| head.contains(marker)) {
        return BlockType::Forbidden;
    }

    // A valid API response is never this short. Anything under 100
    // bytes without an error payload is a skeleton page.
    if body.len() < 100 && !head.contains("error") {
        return BlockType::Skeleton;
    }

    BlockType::None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_map_directly() {
        assert_eq!(classify(429, ""), BlockType::RateLimit);
        assert_eq!(classify(403, ""), BlockType::Forbidden);
        assert_eq!(classify(503, ""), BlockType::ServerError);
        assert_eq!(classify(404, ""), BlockType::None);
        assert_eq!(classify(500, ""), BlockType::None);
    }

    #[test]
    fn captcha_markers_detected_case_insensitively() {
        assert_eq!(
            classify(200, "Please solve the CAPTCHA to continue browsing"),
            BlockType::Captcha
        );
        assert_eq!(
            classify(200, &format!("{}<div class=\"challenge-platform\">", "x".repeat(200))),
            BlockType::Captcha
        );
    }

    #[test]
    fn denial_pages_are_forbidden() {
        let body = format!("<html>{}Pardon Our Interruption...</html>", "x".repeat(100));
        assert_eq!(classify(200, &body), BlockType::Forbidden);
    }

    #[test]
    fn short_bodies_are_skeletons_unless_they_carry_an_error() {
        assert_eq!(classify(200, "{}"), BlockType::Skeleton);
        assert_eq!(classify(200, r#"{"error":"not found"}"#), BlockType::None);
    }

    #[test]
    fn normal_responses_pass() {
        let body = format!(r#"{{"data": {{"presentation": "{}"}}}}"#, "y".repeat(200));
        assert_eq!(classify(200, &body), BlockType::None);
    }

    #[test]
    fn markers_beyond_the_inspected_prefix_are_ignored() {
        let body = format!("{}captcha", "a".repeat(INSPECT_PREFIX_BYTES));
        assert_eq!(classify(200, &body), BlockType::None);
    }

    #[test]
    fn classifier_survives_multibyte_boundaries() {
        // A multibyte char straddling the inspection boundary must not
        // panic the slice.
        let mut body = "a".repeat(INSPECT_PREFIX_BYTES - 1);
        body.push('한');
        body.push_str(&"b".repeat(200));
        let _ = classify(200, &body);
    }

    proptest::proptest! {
        #[test]
        fn classifier_is_total(status in 0u16..1000, body in ".*") {
            let block = classify(status, &body);
            match status {
                429 => proptest::prop_assert_eq!(block, BlockType::RateLimit),
                403 => proptest::prop_assert_eq!(block, BlockType::Forbidden),
                503 => proptest::prop_assert_eq!(block, BlockType::ServerError),
                200 => {}
                _ => proptest::prop_assert_eq!(block, BlockType::None),
            }
        }
    }
}
