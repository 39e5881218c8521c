// Authorization-code flow against the upstream accounts service.
use super::{SpotifyError, SpotifyResult};
use crate::config::Config;
use base64::{engine::general_purpose, Engine as _};
use chrono::Utc;
use rand::{distributions::Alphanumeric, Rng};
use reqwest::header::AUTHORIZATION;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use url::Url;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredToken {
    pub access_token: String,
    #[serde(default = "bearer")]
    pub token_type: String,
    pub expires_at: i64, // epoch seconds
    pub refresh_token: Option<String>,
    pub scope: Option<String>,
}

fn bearer() -> String {
    "Bearer".into()
}

impl StoredToken {
    /// Treat the token as expired slightly early so in-flight requests don't race expiry.
    pub fn is_expiring(&self, now: i64) -> bool {
        now + 30 >= self.expires_at
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "bearer")]
    token_type: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    expires_at: Option<i64>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    scope: Option<String>,
}

impl TokenResponse {
    fn into_stored(self, previous_refresh: Option<String>) -> StoredToken {
        let expires_at = self
            .expires_at
            .unwrap_or_else(|| Utc::now().timestamp() + self.expires_in.unwrap_or(3600));
        StoredToken {
            access_token: self.access_token,
            token_type: self.token_type,
            expires_at,
            refresh_token: self.refresh_token.or(previous_refresh),
            scope: self.scope,
        }
    }
}

/// Random value for the `state` parameter; checked again on the callback.
pub fn random_state() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(32)
        .map(char::from)
        .collect()
}

#[derive(Clone)]
pub struct OAuthApp {
    http: Client,
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    pub scopes: Vec<String>,
    pub auth_base: String,
}

impl OAuthApp {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            http: Client::new(),
            client_id: cfg.client_id.clone(),
            client_secret: cfg.client_secret.clone(),
            redirect_uri: cfg.redirect_uri.clone(),
            scopes: cfg.scopes.clone(),
            auth_base: Config::auth_base(),
        }
    }

    pub fn with_auth_base(mut self, base: impl Into<String>) -> Self {
        self.auth_base = base.into();
        self
    }

    pub fn authorize_url(&self, state: &str) -> Result<Url, url::ParseError> {
        let mut url = Url::parse(&format!("{}/authorize", self.auth_base))?;
        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &self.client_id)
            .append_pair("scope", &self.scopes.join(" "))
            .append_pair("redirect_uri", &self.redirect_uri)
            .append_pair("state", state);
        Ok(url)
    }

    fn basic_auth(&self) -> String {
        format!(
            "Basic {}",
            general_purpose::STANDARD.encode(format!("{}:{}", self.client_id, self.client_secret))
        )
    }

    async fn token_request(&self, params: &[(&str, &str)], previous_refresh: Option<String>) -> SpotifyResult<StoredToken> {
        let url = format!("{}/api/token", self.auth_base);
        let resp = self
            .http
            .post(&url)
            .header(AUTHORIZATION, self.basic_auth())
            .form(params)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(SpotifyError::Status { status: status.as_u16(), body });
        }
        let tr: TokenResponse = resp
            .json()
            .await
            .map_err(|e| SpotifyError::Decode(format!("token response: {}", e)))?;
        Ok(tr.into_stored(previous_refresh))
    }

    pub async fn exchange_code(&self, code: &str) -> SpotifyResult<StoredToken> {
        let params = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.redirect_uri.as_str()),
        ];
        self.token_request(&params, None).await
    }

    /// The upstream may omit `refresh_token` on refresh; the old one is kept then.
    pub async fn refresh(&self, current: &StoredToken) -> SpotifyResult<StoredToken> {
        let refresh_token = current.refresh_token.clone().ok_or(SpotifyError::Unauthorized)?;
        let params = [("grant_type", "refresh_token"), ("refresh_token", refresh_token.as_str())];
        self.token_request(&params, Some(refresh_token.clone())).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn app() -> OAuthApp {
        let mut cfg = Config::default();
        cfg.client_id = "cid".into();
        cfg.client_secret = "secret".into();
        cfg.redirect_uri = "http://127.0.0.1:5000/authorize".into();
        OAuthApp::from_config(&cfg).with_auth_base("https://accounts.example")
    }

    #[test]
    fn authorize_url_carries_state_and_scopes() {
        let url = app().authorize_url("xyz").unwrap();
        assert_eq!(url.path(), "/authorize");
        let pairs: std::collections::HashMap<_, _> = url.query_pairs().into_owned().collect();
        assert_eq!(pairs["state"], "xyz");
        assert_eq!(pairs["client_id"], "cid");
        assert_eq!(pairs["response_type"], "code");
        assert!(pairs["scope"].contains("user-library-read"));
    }

    #[test]
    fn token_response_keeps_previous_refresh() {
        let tr: TokenResponse = serde_json::from_str(r#"{"access_token":"a","expires_in":60}"#).unwrap();
        let st = tr.into_stored(Some("old-refresh".into()));
        assert_eq!(st.refresh_token.as_deref(), Some("old-refresh"));
        assert!(st.expires_at > Utc::now().timestamp());
    }

    #[test]
    fn random_state_is_alphanumeric() {
        let s = random_state();
        assert_eq!(s.len(), 32);
        assert!(s.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(s, random_state());
    }

    #[test]
    fn expiring_window() {
        let st = StoredToken { access_token: "a".into(), token_type: "Bearer".into(), expires_at: 100, refresh_token: None, scope: None };
        assert!(st.is_expiring(71));
        assert!(!st.is_expiring(60));
    }
}
