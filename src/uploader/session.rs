use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, SET_COOKIE};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::errors::AppResult;

/// Cookies of a logged-in host session, kept apart from the HTTP client so
/// the session can outlive the process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionState {
    pub base_url: String,
    pub cookies: BTreeMap<String, String>,
    pub saved_at: DateTime<Utc>,
}

impl SessionState {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.to_string(),
            cookies: BTreeMap::new(),
            saved_at: Utc::now(),
        }
    }

    /// Load a stored session. A missing file is not an error.
    pub async fn load(path: &Path) -> AppResult<Option<Self>> {
        if !tokio::fs::try_exists(path).await? {
            return Ok(None);
        }
        let raw = tokio::fs::read_to_string(path).await?;
        Ok(Some(serde_json::from_str(&raw)?))
    }

    pub async fn save(&mut self, path: &Path) -> AppResult<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        self.saved_at = Utc::now();
        let raw = serde_json::to_string_pretty(self)?;
        tokio::fs::write(path, raw).await?;
        log::debug!("Session for {} saved to {}", self.base_url, path.display());
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }

    /// Value for a `Cookie` request header, or `None` without cookies.
    pub fn cookie_header(&self) -> Option<String> {
        if self.cookies.is_empty() {
            return None;
        }
        Some(
            self.cookies
                .iter()
                .map(|(name, value)| format!("{}={}", name, value))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }

    /// Take every `Set-Cookie` of a response into the session.
    pub fn absorb(&mut self, headers: &HeaderMap) {
        for value in headers.get_all(SET_COOKIE) {
            let Ok(raw) = value.to_str() else {
                continue;
            };
            let pair = raw.split(';').next().unwrap_or_default();
            if let Some((name, value)) = pair.split_once('=') {
                let name = name.trim();
                if name.is_empty() {
                    continue;
                }
                if value.trim().is_empty() || value.trim() == "deleted" {
                    self.cookies.remove(name);
                } else {
                    self.cookies.insert(name.to_string(), value.trim().to_string());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn absorbs_set_cookie_headers() {
        let mut headers = HeaderMap::new();
        headers.append(
            SET_COOKIE,
            HeaderValue::from_static("PHPSESSID=abc123; path=/; HttpOnly"),
        );
        headers.append(SET_COOKIE, HeaderValue::from_static("KEEP_LOGIN=xyz; path=/"));

        let mut session = SessionState::new("https://img.example");
        session.absorb(&headers);

        assert_eq!(
            session.cookie_header().as_deref(),
            Some("KEEP_LOGIN=xyz; PHPSESSID=abc123")
        );
    }

    #[test]
    fn deleted_cookies_are_dropped() {
        let mut session = SessionState::new("https://img.example");
        session
            .cookies
            .insert("PHPSESSID".to_string(), "abc".to_string());

        let mut headers = HeaderMap::new();
        headers.append(SET_COOKIE, HeaderValue::from_static("PHPSESSID=deleted; path=/"));
        session.absorb(&headers);

        assert!(session.is_empty());
        assert!(session.cookie_header().is_none());
    }

    #[tokio::test]
    async fn save_then_load_keeps_cookies() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sessions").join("chevereto.json");

        let mut session = SessionState::new("https://img.example");
        session
            .cookies
            .insert("PHPSESSID".to_string(), "abc".to_string());
        session.save(&path).await.unwrap();

        let loaded = SessionState::load(&path).await.unwrap().unwrap();
        assert_eq!(loaded.cookies, session.cookies);
        assert_eq!(loaded.base_url, "https://img.example");
    }

    #[tokio::test]
    async fn loading_missing_session_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = SessionState::load(&dir.path().join("none.json")).await.unwrap();
        assert!(loaded.is_none());
    }
}
