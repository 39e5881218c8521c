use super::oauth::{random_state, OAuthApp};
use super::spotify::SpotifyClient;
use super::LibrarySource;
use crate::config::Config;
use crate::store;
use anyhow::{anyhow, Result};
use tracing::info;
use url::Url;

/// Manual OAuth helper for machines where the callback server can't be reached:
/// 1. Build the authorization URL and print it.
/// 2. User opens it in a browser, approves and gets redirected to the redirect URI (which may fail to load).
/// 3. User copies the full redirect URL and pastes it into this CLI.
/// 4. The CLI checks `state`, extracts the `code` param and exchanges it for tokens.
/// 5. The tokens are stored in the DB credentials table as JSON and the profile is saved.
pub async fn run_interactive_auth(cfg: &Config) -> Result<()> {
    cfg.validate_required()?;
    let oauth = OAuthApp::from_config(cfg);
    let state = random_state();
    let url = oauth.authorize_url(&state)?;

    println!(
        "Open this URL in your browser and authorize the application:\n\n{}\n",
        url
    );
    println!("After authorizing, you'll be redirected to {}. Copy the full redirect URL and paste it here.", cfg.redirect_uri);
    println!("Paste redirect URL:");
    let mut input = String::new();
    std::io::stdin().read_line(&mut input)?;
    let code = code_from_redirect(input.trim(), &state)?;

    let token = oauth.exchange_code(&code).await.map_err(|e| anyhow!("token exchange failed: {}", e))?;

    crate::db::open_or_create(&cfg.db_path)?;
    let client = SpotifyClient::new(cfg);
    client.install_token(token).await?;
    let profile = client.current_user().await?;
    let db_path = cfg.db_path.clone();
    let to_store = profile.clone();
    tokio::task::spawn_blocking(move || -> Result<()> {
        let conn = crate::db::open_or_create(&db_path)?;
        store::store_user(&conn, &to_store)
    })
    .await??;

    info!("Spotify tokens saved to DB for user {}", profile.id);
    println!("Logged in as {}. You can now run `musivault sync`.", profile.id);
    Ok(())
}

/// Pull the authorization code out of a pasted redirect URL, rejecting a
/// mismatched `state` or an `error` response.
pub fn code_from_redirect(redirect: &str, expected_state: &str) -> Result<String> {
    let parsed = Url::parse(redirect).map_err(|e| anyhow!("invalid url pasted: {}", e))?;
    let param = |name: &str| {
        parsed
            .query_pairs()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.into_owned())
    };
    if let Some(err) = param("error") {
        return Err(anyhow!("authorization denied: {}", err));
    }
    match param("state") {
        Some(s) if s == expected_state => {}
        _ => return Err(anyhow!("state mismatch in redirect URL")),
    }
    param("code").ok_or_else(|| anyhow!("no code in redirect URL"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_code_when_state_matches() {
        let code = code_from_redirect("http://127.0.0.1:5000/authorize?code=abc&state=s1", "s1").unwrap();
        assert_eq!(code, "abc");
    }

    #[test]
    fn rejects_state_mismatch() {
        assert!(code_from_redirect("http://127.0.0.1:5000/authorize?code=abc&state=other", "s1").is_err());
    }

    #[test]
    fn surfaces_denied_authorization() {
        let err = code_from_redirect("http://127.0.0.1:5000/authorize?error=access_denied&state=s1", "s1")
            .unwrap_err()
            .to_string();
        assert!(err.contains("access_denied"));
    }
}
