use chrono::Utc;
use regex::Regex;
use reqwest::header::COOKIE;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use crate::errors::{AppError, AppResult};
use crate::security::InputValidator;
use crate::uploader::backend::{
    parse_chevereto_image, ProgressCallback, UploadOptions, UploadResult, UploadResults,
};
use crate::uploader::batch::{upload_all, Schedule};
use crate::uploader::client::{ClientSettings, HostClient, UploadPayload};
use crate::uploader::session::SessionState;

const MAX_ALBUM_NAME_CHARS: usize = 52;

fn auth_token_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"PF\.obj\.config\.auth_token\s*=\s*"?([^";\s]+)"?\s*;"#)
            .expect("auth token pattern is valid")
    })
}

fn logged_user_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?m)CHV\.obj\.logged_user\s*=(.+);").expect("logged user pattern is valid")
    })
}

/// Session-based Chevereto v3 host: log in, create an album, then upload
/// every file into it.
#[derive(Debug)]
pub struct CheveretoV3Backend {
    base_url: String,
    user: String,
    password: String,
    session_path: Option<PathBuf>,
    client: HostClient,
}

/// Per-call state shared by the uploads of one album.
struct AlbumContext {
    auth_token: String,
    album_id: String,
    cookie: Option<String>,
}

impl CheveretoV3Backend {
    pub fn new(
        base_url: &str,
        user: &str,
        password: &str,
        settings: &ClientSettings,
    ) -> AppResult<Self> {
        Ok(Self {
            base_url: clean_url(base_url),
            user: user.to_string(),
            password: password.to_string(),
            session_path: None,
            client: HostClient::new(settings)?,
        })
    }

    /// Persist login cookies at `path` and reuse them while still valid.
    pub fn with_session_file(mut self, path: PathBuf) -> Self {
        self.session_path = Some(path);
        self
    }

    pub async fn upload(
        &self,
        filepaths: &[PathBuf],
        progress: Option<&ProgressCallback<'_>>,
        options: &UploadOptions,
    ) -> AppResult<UploadResults> {
        InputValidator::require_credential("a username", Some(self.user.as_str()))?;
        InputValidator::require_credential("a password", Some(self.password.as_str()))?;

        if filepaths.is_empty() {
            return Ok(UploadResults::new());
        }

        let mut session = self.restore_session().await;
        let auth_token = match self.probe_session(&mut session).await {
            Some(token) => {
                log::info!("Reusing stored session for {}", self.base_url);
                token
            }
            None => {
                session = SessionState::new(&self.base_url);
                let token = self.login(&mut session).await?;
                self.store_session(&mut session).await;
                token
            }
        };

        let representative = options.album_name.clone().or_else(|| {
            filepaths
                .first()
                .and_then(|p| p.file_stem())
                .map(|s| s.to_string_lossy().to_string())
        });
        let album_name = generate_album_name(representative.as_deref());
        let album_id = self
            .create_album(&mut session, &auth_token, &album_name, &options.album_description)
            .await?;
        log::info!("Created album '{}' ({}) on {}", album_name, album_id, self.base_url);
        self.store_session(&mut session).await;

        let context = AlbumContext {
            auth_token,
            album_id,
            cookie: session.cookie_header(),
        };
        let context = &context;

        Ok(upload_all(
            "Chevereto v3",
            filepaths,
            Schedule::Windowed(options.batch_size),
            progress,
            move |_, path| self.upload_image(context, path),
        )
        .await)
    }

    async fn restore_session(&self) -> SessionState {
        let Some(path) = self.session_path.as_deref() else {
            return SessionState::new(&self.base_url);
        };

        match SessionState::load(path).await {
            Ok(Some(stored)) if stored.base_url == self.base_url => stored,
            Ok(_) => SessionState::new(&self.base_url),
            Err(e) => {
                log::warn!("Ignoring unreadable session file {}: {}", path.display(), e);
                SessionState::new(&self.base_url)
            }
        }
    }

    async fn store_session(&self, session: &mut SessionState) {
        if let Some(path) = self.session_path.as_deref() {
            if let Err(e) = session.save(path).await {
                log::warn!("Failed to save session to {}: {}", path.display(), e);
            }
        }
    }

    /// Check whether stored cookies still log us in; if so, return a fresh
    /// anti-forgery token from the landing page.
    async fn probe_session(&self, session: &mut SessionState) -> Option<String> {
        let cookie = session.cookie_header()?;

        let response = self
            .client
            .http()
            .get(&self.base_url)
            .header(COOKIE, cookie)
            .send()
            .await
            .ok()?;
        session.absorb(response.headers());
        let page = response.text().await.ok()?;

        if !logged_user_pattern().is_match(&page) {
            log::debug!("Stored session for {} is no longer valid", self.base_url);
            return None;
        }
        extract_auth_token(&page)
    }

    async fn login(&self, session: &mut SessionState) -> AppResult<String> {
        let login_url = format!("{}/login", self.base_url);

        let response = self
            .client
            .send_with_retry("login page", |client| Ok(client.get(&login_url)))
            .await
            .map_err(|e| AppError::authentication(format!("Failed to load login page: {}", e)))?;
        session.absorb(response.headers());
        let page = response.text().await?;
        if page.is_empty() {
            return Err(AppError::authentication(
                "Failed to login (could not determine html text)",
            ));
        }

        let auth_token = extract_auth_token(&page)
            .ok_or_else(|| AppError::authentication("Failed to detect authorization code"))?;

        let form = [
            ("login-subject", self.user.as_str()),
            ("password", self.password.as_str()),
            ("auth_token", auth_token.as_str()),
        ];
        let cookie = session.cookie_header();
        let response = self
            .client
            .send_with_retry("login", |client| {
                let mut request = client.post(&login_url).form(&form);
                if let Some(cookie) = &cookie {
                    request = request.header(COOKIE, cookie.as_str());
                }
                Ok(request)
            })
            .await
            .map_err(|e| AppError::authentication(format!("Login request failed: {}", e)))?;
        session.absorb(response.headers());

        let body = response.text().await?;
        if !logged_user_pattern().is_match(&body) {
            return Err(AppError::authentication(
                "Failed to login (invalid credentials)",
            ));
        }

        log::info!("Logged in to {} as {}", self.base_url, self.user);
        Ok(auth_token)
    }

    async fn create_album(
        &self,
        session: &mut SessionState,
        auth_token: &str,
        album_name: &str,
        description: &str,
    ) -> AppResult<String> {
        let url = format!("{}/json", self.base_url);
        let form = [
            ("auth_token", auth_token),
            ("action", "create-album"),
            ("type", "album"),
            ("album[name]", album_name),
            ("album[description]", description),
            ("album[password]", ""),
            ("album[new]", "true"),
        ];
        let cookie = session.cookie_header();

        let response = self
            .client
            .send_with_retry("create album", |client| {
                let mut request = client.post(&url).form(&form);
                if let Some(cookie) = &cookie {
                    request = request.header(COOKIE, cookie.as_str());
                }
                Ok(request)
            })
            .await?;
        session.absorb(response.headers());

        let body: serde_json::Value = response.json().await?;
        body.get("album")
            .and_then(|album| album.get("id_encoded"))
            .and_then(|id| id.as_str())
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .ok_or_else(|| AppError::invalid_response("Failed to determine album id"))
    }

    async fn upload_image(&self, context: &AlbumContext, path: PathBuf) -> AppResult<UploadResult> {
        InputValidator::validate_upload_target(&path)?;

        let mut payload = UploadPayload::new();
        payload.add_file(&path, "source").await?;
        payload.add_text_field("type", "file");
        payload.add_text_field("action", "upload");
        payload.add_text_field("auth_token", &context.auth_token);
        payload.add_text_field("album_id", &context.album_id);
        payload.add_text_field("nsfw", "0");

        let url = format!("{}/json", self.base_url);
        let label = file_label(&path);
        let response = self
            .client
            .send_with_retry(&label, |client| {
                let mut request = client.post(&url).multipart(payload.build_form()?);
                if let Some(cookie) = &context.cookie {
                    request = request.header(COOKIE, cookie.as_str());
                }
                Ok(request)
            })
            .await?;

        let body: serde_json::Value = response.json().await?;
        parse_chevereto_image(&body)
            .ok_or_else(|| AppError::invalid_response("Failed to get response data from client"))
    }
}

fn file_label(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}

fn clean_url(base_url: &str) -> String {
    base_url.trim().trim_end_matches('/').to_string()
}

fn extract_auth_token(page: &str) -> Option<String> {
    auth_token_pattern()
        .captures(page)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .filter(|token| !token.is_empty())
}

/// End offset of the last 4-digit run that is not a resolution (`1080p`).
fn last_year_end(name: &str) -> Option<usize> {
    let bytes = name.as_bytes();
    let mut last = None;
    let mut i = 0;
    while i + 4 <= bytes.len() {
        let digits = bytes[i..i + 4].iter().all(u8::is_ascii_digit);
        let resolution = matches!(bytes.get(i + 4), Some(b'p') | Some(b'P'));
        if digits && !resolution {
            last = Some(i + 4);
            i += 4;
        } else {
            i += 1;
        }
    }
    last
}

/// Album name from a release-like filename: everything up to the last year,
/// dots turned into spaces, capped at 52 characters plus an ellipsis.
/// Without a usable name a UTC timestamp is used.
pub fn generate_album_name(long_str: Option<&str>) -> String {
    let name = match long_str.map(str::trim).filter(|s| !s.is_empty()) {
        Some(source) => match last_year_end(source) {
            Some(end) => source[..end].replace('.', " ").trim().to_string(),
            None => source.to_string(),
        },
        None => Utc::now().format("%Y-%m-%d %H.%M.%S.%m").to_string(),
    };

    if name.chars().count() > MAX_ALBUM_NAME_CHARS {
        let truncated: String = name.chars().take(MAX_ALBUM_NAME_CHARS).collect();
        format!("{}...", truncated)
    } else {
        name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn album_name_cuts_after_last_year() {
        assert_eq!(
            generate_album_name(Some("Some.Movie.2019.1080p.BluRay.x264-GRP")),
            "Some Movie 2019"
        );
    }

    #[test]
    fn album_name_uses_last_year_like_span() {
        assert_eq!(
            generate_album_name(Some("Blade.Runner.2049.2017.2160p.UHD")),
            "Blade Runner 2049 2017"
        );
    }

    #[test]
    fn album_name_without_year_is_kept() {
        assert_eq!(generate_album_name(Some("screenshots")), "screenshots");
    }

    #[test]
    fn resolution_is_not_a_year() {
        assert_eq!(last_year_end("Show.S01E01.1080p"), None);
        assert_eq!(last_year_end("Show.S01E01.2160P"), None);
    }

    #[test]
    fn long_album_names_are_truncated() {
        let long = "A".repeat(80);
        let name = generate_album_name(Some(&long));
        assert_eq!(name.chars().count(), MAX_ALBUM_NAME_CHARS + 3);
        assert!(name.ends_with("..."));
    }

    #[test]
    fn missing_name_falls_back_to_timestamp() {
        let name = generate_album_name(None);
        assert!(name.starts_with(&Utc::now().format("%Y-").to_string()));
        let blank = generate_album_name(Some("   "));
        assert!(!blank.trim().is_empty());
    }

    #[test]
    fn extracts_auth_token_from_markup() {
        let page = r#"<script>PF.obj.config.auth_token = "a1b2c3d4";</script>"#;
        assert_eq!(extract_auth_token(page).as_deref(), Some("a1b2c3d4"));
        assert!(extract_auth_token("<html></html>").is_none());
    }

    #[test]
    fn detects_logged_user_marker() {
        assert!(logged_user_pattern().is_match(r#"CHV.obj.logged_user = {"id":"x"};"#));
        assert!(!logged_user_pattern().is_match("CHV.obj.logged_user"));
    }

    #[test]
    fn trailing_slash_is_removed() {
        assert_eq!(clean_url("https://img.example/ "), "https://img.example");
    }
}
