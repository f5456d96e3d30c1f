//! Email/password sign-in and refresh-token grant

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use super::{claims, TokenStore, PASSWORD_ENV};
use crate::config::Config;
use crate::models::AuthContext;

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct AuthErrorBody {
    #[serde(alias = "error_description", alias = "msg")]
    message: Option<String>,
}

/// POST to the token endpoint with the given grant.
async fn token_request(
    config: &Config,
    grant_type: &str,
    body: &serde_json::Value,
) -> Result<TokenResponse> {
    let url = format!(
        "{}/auth/v1/token?grant_type={}",
        config.backend_url()?,
        grant_type
    );
    tracing::debug!("Requesting token ({}) at {}", grant_type, url);

    let resp = reqwest::Client::new()
        .post(&url)
        .header("apikey", config.api_key()?)
        .json(body)
        .send()
        .await
        .with_context(|| format!("Token request to {} failed", url))?;

    let status = resp.status();
    if !status.is_success() {
        let text = resp.text().await.unwrap_or_default();
        let reason = serde_json::from_str::<AuthErrorBody>(&text)
            .ok()
            .and_then(|b| b.message)
            .unwrap_or(text);
        bail!("Authentication failed (HTTP {}): {}", status.as_u16(), reason);
    }

    resp.json()
        .await
        .context("Failed to parse token response")
}

/// Store tokens and the identity carried by the access token.
fn store_tokens(config: &mut Config, tokens: TokenResponse) -> Result<AuthContext> {
    let claims = claims::decode(&tokens.access_token)?;
    let role = claims.role().with_context(|| {
        format!(
            "Account {} has no advertiser/influencer role",
            claims.email.as_deref().unwrap_or(&claims.sub)
        )
    })?;
    let me = AuthContext::new(claims.sub.clone(), role);

    match tokens.expires_in {
        Some(secs) => config.set_access_token(tokens.access_token, Some(secs)),
        None => {
            config.access_token = Some(super::StoredToken::expiring_at(
                tokens.access_token,
                claims.exp,
            ))
        }
    }
    if let Some(refresh_token) = tokens.refresh_token {
        config.set_refresh_token(refresh_token);
    }
    config.set_identity(&me);
    Ok(me)
}

/// The prompt does not hide what is typed.
fn password_label() -> String {
    format!("Password (typing is visible, set {} to skip): ", PASSWORD_ENV)
}

async fn prompt(label: &str) -> Result<String> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(label.as_bytes()).await?;
    stdout.flush().await?;

    let mut line = String::new();
    BufReader::new(tokio::io::stdin())
        .read_line(&mut line)
        .await
        .context("Failed to read from stdin")?;
    let value = line.trim().to_string();
    if value.is_empty() {
        let name = label.split([' ', ':']).next().unwrap_or(label);
        bail!("{} cannot be empty", name);
    }
    Ok(value)
}

/// Refresh tokens using the stored refresh token.
///
/// Returns `Ok(false)` if there is no refresh token.
pub async fn refresh() -> Result<bool> {
    let mut config = Config::load()?;
    let Some(refresh_token) = config.get_refresh_token() else {
        return Ok(false);
    };

    let tokens = token_request(
        &config,
        "refresh_token",
        &serde_json::json!({ "refresh_token": refresh_token }),
    )
    .await
    .context("Token refresh failed")?;
    let me = store_tokens(&mut config, tokens)?;
    config.save()?;

    tracing::info!("Refreshed tokens for {}", me.user_id);
    Ok(true)
}

/// Sign in with email and password.
pub async fn login(email: Option<String>, force: bool) -> Result<()> {
    let config = Config::load()?;

    if !force {
        if let Some(token) = config.get_access_token() {
            if !token.is_expired() {
                println!("Already logged in. Use --force to sign in again.");
                return Ok(());
            }
            tracing::info!("Access token expired, attempting refresh...");
            match refresh().await {
                Ok(true) => {
                    println!("Session refreshed.");
                    return Ok(());
                }
                Ok(false) => {}
                Err(e) => tracing::warn!("Refresh failed: {:#}", e),
            }
        }
    }

    let mut config = Config::load()?;
    let email = match email.or_else(|| config.email.clone()) {
        Some(email) => email,
        None => prompt("Email: ").await?,
    };
    let password = match std::env::var(PASSWORD_ENV) {
        Ok(password) if !password.is_empty() => password,
        _ => prompt(&password_label()).await?,
    };

    tracing::info!("Signing in as {}", email);
    let tokens = token_request(
        &config,
        "password",
        &serde_json::json!({ "email": email, "password": password }),
    )
    .await?;
    let me = store_tokens(&mut config, tokens)?;
    config.email = Some(email.clone());
    config.save()?;

    println!("Logged in as {} ({}).", email, me.role.as_str());
    Ok(())
}

/// Clear stored credentials
pub async fn logout() -> Result<()> {
    let mut config = Config::load()?;
    config.clear_tokens();
    config.save()?;
    println!("Logged out.");
    Ok(())
}

/// Display current auth status
pub async fn status() -> Result<()> {
    let config = Config::load()?;

    match config.backend_url() {
        Ok(url) => println!("Backend:     {}", url),
        Err(_) => println!("Backend:     not configured"),
    }

    match config.get_access_token() {
        Some(token) if !token.is_expired() => {
            println!("Access tok:  valid");
            if let Some(exp) = token.expires_at {
                println!("  expires_at: {}", exp);
            }
        }
        Some(_) => println!("Access tok:  expired"),
        None => println!("Access tok:  none"),
    }

    match config.get_refresh_token() {
        Some(_) => println!("Refresh tok: present"),
        None => println!("Refresh tok: none"),
    }

    match config.auth_context() {
        Ok(me) => println!("User:        {} ({})", me.user_id, me.role.as_str()),
        Err(_) => println!("User:        none"),
    }

    if config.get_access_token().is_none() {
        println!("\nRun 'marketchat login' to authenticate.");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::UserRole;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine;

    fn jwt(payload: &str) -> String {
        format!("h.{}.s", URL_SAFE_NO_PAD.encode(payload))
    }

    #[test]
    fn test_password_label_warns_about_echo() {
        let label = password_label();
        assert!(label.starts_with("Password"));
        assert!(label.contains("visible"));
        assert!(label.contains(PASSWORD_ENV));
    }

    #[test]
    fn test_store_tokens_records_identity() {
        let mut config = Config::default();
        let tokens = TokenResponse {
            access_token: jwt(r#"{"sub":"u-9","exp":4102444800,"user_metadata":{"role":"advertiser"}}"#),
            refresh_token: Some("r-1".to_string()),
            expires_in: None,
        };

        let me = store_tokens(&mut config, tokens).unwrap();
        assert_eq!(me, AuthContext::new("u-9", UserRole::Advertiser));
        assert_eq!(config.auth_context().unwrap(), me);
        assert_eq!(config.get_refresh_token().as_deref(), Some("r-1"));
        assert_eq!(config.get_access_token().unwrap().expires_at, Some(4102444800));
    }

    #[test]
    fn test_store_tokens_requires_role() {
        let mut config = Config::default();
        let tokens = TokenResponse {
            access_token: jwt(r#"{"sub":"u-9","email":"x@example.com"}"#),
            refresh_token: None,
            expires_in: Some(3600),
        };
        let err = store_tokens(&mut config, tokens).unwrap_err();
        assert!(err.to_string().contains("x@example.com"));
        assert!(config.get_access_token().is_none());
    }

    #[test]
    fn test_auth_error_body() {
        let body: AuthErrorBody =
            serde_json::from_str(r#"{"error":"invalid_grant","error_description":"Invalid login credentials"}"#)
                .unwrap();
        assert_eq!(body.message.as_deref(), Some("Invalid login credentials"));
    }
}
