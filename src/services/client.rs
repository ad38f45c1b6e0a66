//! Shared HTTP plumbing for the analytics backend.
//!
//! All four collaborator clients talk to the same backend, so they share
//! one `reqwest::Client` (connection pool, timeout, user agent) and one
//! optional API key.

use anyhow::{Context, Result};
use reqwest::{Client, RequestBuilder};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::config::ApiConfig;

const USER_AGENT: &str = "PROPLINE/0.1.0 (projection-pipeline)";
const API_KEY_HEADER: &str = "X-API-Key";

/// Cheap-to-clone handle on the backend connection.
#[derive(Clone)]
pub struct BackendClient {
    inner: Arc<Inner>,
}

struct Inner {
    http: Client,
    base_url: String,
    api_key: Option<SecretString>,
}

impl BackendClient {
    pub fn new(base_url: &str, timeout: Duration, api_key: Option<SecretString>) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .context("Failed to build backend HTTP client")?;

        Ok(Self {
            inner: Arc::new(Inner {
                http,
                base_url: base_url.trim_end_matches('/').to_string(),
                api_key,
            }),
        })
    }

    pub fn from_config(cfg: &ApiConfig) -> Result<Self> {
        Self::new(&cfg.base_url, cfg.call_timeout(), cfg.api_key())
    }

    pub fn base_url(&self) -> &str {
        &self.inner.base_url
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.inner.base_url, path)
    }

    /// GET `path` (with query string already encoded) and decode JSON.
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.url(path);
        debug!(url = %url, "GET");
        let req = self.authorise(self.inner.http.get(&url));
        Self::send(req, &url).await
    }

    /// POST a JSON body to `path` and decode the JSON response.
    pub async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = self.url(path);
        debug!(url = %url, "POST");
        let req = self.authorise(self.inner.http.post(&url).json(body));
        Self::send(req, &url).await
    }

    fn authorise(&self, req: RequestBuilder) -> RequestBuilder {
        match &self.inner.api_key {
            Some(key) => req.header(API_KEY_HEADER, key.expose_secret().as_str()),
            None => req,
        }
    }

    async fn send<T: DeserializeOwned>(req: RequestBuilder, url: &str) -> Result<T> {
        let resp = req
            .send()
            .await
            .with_context(|| format!("Backend request failed: {url}"))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Backend error {status} from {url}: {body}");
        }

        resp.json()
            .await
            .with_context(|| format!("Failed to parse backend response from {url}"))
    }
}

/// Pull the record list out of a response that is either a bare array or an
/// object wrapping the array under one of `keys`.
pub(crate) fn unwrap_list(body: Value, keys: &[&str]) -> Result<Vec<Value>> {
    match body {
        Value::Array(items) => Ok(items),
        Value::Object(mut map) => keys
            .iter()
            .find_map(|k| match map.remove(*k) {
                Some(Value::Array(items)) => Some(items),
                _ => None,
            })
            .with_context(|| format!("Response object has none of the list fields {keys:?}")),
        other => anyhow::bail!("Unexpected response shape: {other}"),
    }
}
