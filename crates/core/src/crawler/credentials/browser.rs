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

//! Browser-driven credential extraction, the slow path.
//!
//! Drives a chromedriver session over the plain WebDriver HTTP
//! protocol; no client crate is needed for the four endpoints we use.
//! The protocol has no network interception, so the API key is mined
//! from the page's bootstrapped data and the operation hashes from the
//! `/api/v3/` request URLs recorded in the performance timeline
//! (the `extensions` query parameter carries the hash). Scrolling
//! induces more XHR traffic; a listing page visit triggers the
//! calendar operations.

use std::time::Duration;

use serde_json::{json, Value};

use super::{Credentials, OP_CALENDAR};
use crate::crawler::Result;

const SETTLE: Duration = Duration::from_secs(3);
const SCROLL_PAUSE: Duration = Duration::from_secs(2);

/// Pulls the API key out of `__NEXT_DATA__` or the bootstrap blob from
/// inside the page's JS context.
const KEY_SCRIPT: &str = r#"
    const nextData = document.getElementById('__NEXT_DATA__');
    if (nextData) {
        const match = nextData.textContent.match(/"key":"([a-z0-9]+)"/);
        if (match) return match[1];
    }
    if (window.__airbnb_bootstrapped_data__) {
        const data = JSON.stringify(window.__airbnb_bootstrapped_data__);
        const match = data.match(/"key":"([a-z0-9]+)"/);
        if (match) return match[1];
    }
    return '';
"#;

const API_URLS_SCRIPT: &str = r#"
    return performance.getEntriesByType('resource')
        .map((entry) => entry.name)
        .filter((name) => name.includes('/api/v3/'));
"#;

const LISTING_LINK_SCRIPT: &str = r#"
    const links = document.querySelectorAll('a[href*="/rooms/"]');
    for (const link of links) {
        const href = link.getAttribute('href');
        if (href && href.match(/\/rooms\/\d+/)) return href;
    }
    return '';
"#;

/// Operation name and persisted-query hash carried by an `/api/v3/`
/// request URL, if both are present.
pub(crate) fn mine_api_v3_url(raw: &str) -> Option<(String, String)> {
    let url = url::Url::parse(raw).ok()?;
    if !url.path().contains("/api/v3/") {
        return None;
    }

    let mut operation = None;
    let mut hash = None;
    for (name, value) in url.query_pairs() {
        match name.as_ref() {
            "operationName" => operation = Some(value.to_string()),
            "extensions" => {
                let extensions: Value = serde_json::from_str(&value).ok()?;
                hash = extensions
                    .pointer("/persistedQuery/sha256Hash")
                    .and_then(Value::as_str)
                    .map(str::to_string);
            }
            _ => {}
        }
    }

    match (operation, hash) {
        (Some(op), Some(hash)) if !op.is_empty() && !hash.is_empty() => Some((op, hash)),
        _ => None,
    }
}

struct WebDriverSession {
    http: reqwest::Client,
    base: String,
    session_id: String,
}

impl WebDriverSession {
    async fn start(webdriver_url: &str, visible: bool) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;

        let mut args = vec![
            "--disable-blink-features=AutomationControlled".to_string(),
            "--no-sandbox".to_string(),
            "--window-size=1920,1080".to_string(),
            "--lang=ko-KR".to_string(),
        ];
        if !visible {
            args.push("--headless=new".to_string());
        }

        let body = json!({
            "capabilities": {
                "alwaysMatch": {
                    "browserName": "chrome",
                    "goog:chromeOptions": { "args": args },
                }
            }
        });

        let response: Value = http
            .post(format!("{webdriver_url}/session"))
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let session_id = response
            .pointer("/value/sessionId")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow::anyhow!("webdriver returned no session id"))?
            .to_string();

        Ok(Self {
            http,
            base: webdriver_url.to_string(),
            session_id,
        })
    }

    async fn goto(&self, url: &str) -> Result<()> {
        self.http
            .post(format!("{}/session/{}/url", self.base, self.session_id))
            .json(&json!({ "url": url }))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn execute(&self, script: &str) -> Result<Value> {
        let response: Value = self
            .http
            .post(format!(
                "{}/session/{}/execute/sync",
                self.base, self.session_id
            ))
            .json(&json!({ "script": script, "args": [] }))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(response.get("value").cloned().unwrap_or(Value::Null))
    }

    async fn close(self) {
        let _ = self
            .http
            .delete(format!("{}/session/{}", self.base, self.session_id))
            .send()
            .await;
    }
}

pub async fn extract(webdriver_url: &str, base_url: &str, visible: bool) -> Result<Credentials> {
    let session = WebDriverSession::start(webdriver_url, visible).await?;
    let credentials = drive(&session, base_url).await;
    session.close().await;
    credentials
}

async fn drive(session: &WebDriverSession, base_url: &str) -> Result<Credentials> {
    let mut credentials = Credentials::default();

    tracing::info!("loading search page in browser");
    session.goto(&format!("{base_url}/s/Seoul/homes")).await?;
    tokio::time::sleep(SETTLE).await;

    if let Some(key) = session.execute(KEY_SCRIPT).await?.as_str() {
        if !key.is_empty() {
            tracing::info!("captured API key from page context");
            credentials.api_key = key.to_string();
        }
    }

    harvest_api_urls(session, &mut credentials).await?;

    // Scroll to induce more XHR traffic if the timeline was quiet.
    if credentials.hashes.is_empty() {
        for _ in 0..3 {
            session.execute("window.scrollBy(0, 800); return true;").await?;
            tokio::time::sleep(SCROLL_PAUSE).await;
            harvest_api_urls(session, &mut credentials).await?;
        }
    }

    // Calendar operations only fire from a listing page.
    if !credentials.hashes.contains_key(OP_CALENDAR) {
        if let Some(link) = session.execute(LISTING_LINK_SCRIPT).await?.as_str() {
            if !link.is_empty() {
                let listing_url = if link.starts_with("http") {
                    link.to_string()
                } else {
                    format!("{base_url}{link}")
                };
                tracing::info!("visiting listing page: {listing_url}");
                session.goto(&listing_url).await?;
                tokio::time::sleep(SETTLE).await;
                harvest_api_urls(session, &mut credentials).await?;
            }
        }
    }

    Ok(credentials)
}

async fn harvest_api_urls(
    session: &WebDriverSession,
    credentials: &mut Credentials,
) -> Result<()> {
    let urls = session.execute(API_URLS_SCRIPT).await?;
    if let Some(urls) = urls.as_array() {
        for url in urls.iter().filter_map(Value::as_str) {
            if let Some((operation, hash)) = mine_api_v3_url(url) {
                if !credentials.hashes.contains_key(&operation) {
                    tracing::info!("captured hash for {operation}");
                    credentials.hashes.insert(operation, hash);
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_v3_urls_yield_operation_and_hash() {
        let hash = "f".repeat(64);
        let extensions = format!(r#"{{"persistedQuery":{{"version":1,"sha256Hash":"{hash}"}}}}"#);
        let raw = format!(
            "https://www.airbnb.co.kr/api/v3/StaysSearch?operationName=StaysSearch&extensions={}",
            urlencode(&extensions)
        );

        let (operation, mined) = mine_api_v3_url(&raw).unwrap();
        assert_eq!(operation, "StaysSearch");
        assert_eq!(mined, hash);
    }

    #[test]
    fn non_api_urls_are_ignored() {
        assert!(mine_api_v3_url("https://a0.muscache.com/some/bundle.js").is_none());
        assert!(mine_api_v3_url("not a url at all").is_none());
        assert!(
            mine_api_v3_url("https://www.airbnb.co.kr/api/v3/StaysSearch?operationName=StaysSearch")
                .is_none()
        );
    }

    fn urlencode(raw: &str) -> String {
        let mut out = String::new();
        for byte in raw.bytes() {
            match byte {
                b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                    out.push(byte as char)
                }
                other => out.push_str(&format!("%{other:02X}")),
            }
        }
        out
    }
}
