//! Authenticated HTTP client for the backend's REST interface
//!
//! Wraps reqwest::Client with the API key header, the user's bearer token
//! and automatic refresh of an expired token.

use anyhow::{bail, Context, Result};
use serde::Serialize;
use url::Url;

use crate::auth::TokenStore;
use crate::config::{Config, TableNames};
use crate::models::AuthContext;

/// Authenticated REST client for one signed-in user.
#[derive(Clone)]
pub struct BackendClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    access_token: String,
    tables: TableNames,
    me: AuthContext,
}

impl BackendClient {
    /// Load config and build client. Refreshes the access token if expired.
    pub async fn new() -> Result<Self> {
        let mut config = Config::load()?;

        let needs_refresh = config.get_access_token().map_or(true, |t| t.is_expired());
        if needs_refresh {
            if config.get_refresh_token().is_some() {
                tracing::info!("Access token missing or expired, refreshing...");
                match crate::auth::refresh().await {
                    Ok(true) => {
                        config = Config::load()?;
                        tracing::info!("Token refreshed");
                    }
                    Ok(false) => {
                        bail!("No refresh token available. Run 'marketchat login'.");
                    }
                    Err(e) => {
                        bail!("Token refresh failed: {:#}. Run 'marketchat login'.", e);
                    }
                }
            } else {
                bail!("Token expired and no refresh token. Run 'marketchat login'.");
            }
        }

        Self::from_config(&config)
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let access_token = config
            .get_access_token()
            .context("No access token. Run 'marketchat login' first.")?
            .token;

        Ok(Self {
            http: reqwest::Client::new(),
            base_url: config.backend_url()?,
            api_key: config.api_key()?,
            access_token,
            tables: config.tables.clone(),
            me: config.auth_context()?,
        })
    }

    /// The signed-in user.
    pub fn me(&self) -> &AuthContext {
        &self.me
    }

    pub fn tables(&self) -> &TableNames {
        &self.tables
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    fn rest_url(&self, table: &str, params: &[(&str, String)]) -> Result<Url> {
        let mut url = Url::parse(&format!("{}/rest/v1/{}", self.base_url, table))
            .with_context(|| format!("Invalid backend URL {}", self.base_url))?;
        if !params.is_empty() {
            url.query_pairs_mut()
                .extend_pairs(params.iter().map(|(k, v)| (*k, v.as_str())));
        }
        Ok(url)
    }

    fn request(&self, method: reqwest::Method, url: Url) -> reqwest::RequestBuilder {
        self.http
            .request(method, url)
            .header("apikey", &self.api_key)
            .bearer_auth(&self.access_token)
    }

    /// GET rows of `table` matching the filter params.
    pub async fn rest_get(&self, table: &str, params: &[(&str, String)]) -> Result<reqwest::Response> {
        let url = self.rest_url(table, params)?;
        tracing::debug!("REST GET {}", url);

        let resp = self
            .request(reqwest::Method::GET, url.clone())
            .send()
            .await
            .with_context(|| format!("REST GET {} failed", url))?;

        check_response(resp, url.as_str()).await
    }

    /// POST a row to `table`, asking for the stored row back.
    pub async fn rest_post<T: Serialize + ?Sized>(
        &self,
        table: &str,
        body: &T,
    ) -> Result<reqwest::Response> {
        let url = self.rest_url(table, &[])?;
        tracing::debug!("REST POST {}", url);

        let resp = self
            .request(reqwest::Method::POST, url.clone())
            .header("Prefer", "return=representation")
            .json(body)
            .send()
            .await
            .with_context(|| format!("REST POST {} failed", url))?;

        check_response(resp, url.as_str()).await
    }

    /// PATCH rows of `table` matching the filter params.
    pub async fn rest_patch(
        &self,
        table: &str,
        params: &[(&str, String)],
        body: &serde_json::Value,
    ) -> Result<reqwest::Response> {
        let url = self.rest_url(table, params)?;
        tracing::debug!("REST PATCH {}", url);

        let resp = self
            .request(reqwest::Method::PATCH, url.clone())
            .header("Prefer", "return=minimal")
            .json(body)
            .send()
            .await
            .with_context(|| format!("REST PATCH {} failed", url))?;

        check_response(resp, url.as_str()).await
    }
}

/// Equality filter value
pub(crate) fn eq(value: &str) -> String {
    format!("eq.{}", value)
}

/// Check HTTP response status code and return a clear error on failure.
async fn check_response(resp: reqwest::Response, url: &str) -> Result<reqwest::Response> {
    let status = resp.status();
    if status == reqwest::StatusCode::UNAUTHORIZED {
        bail!(
            "401 Unauthorized for {}. Token may be invalid -- run 'marketchat login'.",
            url
        );
    }
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        bail!("HTTP {} for {}: {}", status.as_u16(), url, body);
    }
    Ok(resp)
}
