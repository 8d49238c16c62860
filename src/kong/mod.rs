//! Kong Admin API client.
//!
//! A thin JSON-over-HTTP wrapper: it builds URLs (with the optional
//! workspace prefix), attaches credentials, and turns non-success responses
//! into [`KongError`]. Entity-specific paths live with the resources that use
//! them.

pub mod entities;
pub mod error;

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, CONTENT_TYPE};
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

pub use error::KongError;

use crate::config::KongConfig;

/// Timeout applied to every Admin API request.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Page size requested when listing collections.
pub const PAGE_SIZE: u32 = 1000;

/// Paths that are global even when a workspace is configured.
const GLOBAL_PREFIXES: &[&str] = &["/workspaces", "/status"];

/// One page of a Kong collection listing.
#[derive(Debug, Deserialize)]
struct Page<T> {
    data: Vec<T>,
    #[serde(default)]
    offset: Option<String>,
}

/// Client for the Kong Admin API.
#[derive(Debug, Clone)]
pub struct KongClient {
    http: reqwest::Client,
    admin_uri: String,
    workspace: Option<String>,
    basic_auth: Option<(String, Option<String>)>,
}

impl KongClient {
    /// Build a client from the resolved provider configuration.
    pub fn new(config: &KongConfig) -> Result<Self, KongError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        if let Some(token) = &config.admin_token {
            headers.insert(
                HeaderName::from_static("kong-admin-token"),
                header_value(token, "kong_admin_token")?,
            );
        }
        if let Some(key) = &config.api_key {
            headers.insert(
                HeaderName::from_static("apikey"),
                header_value(key, "kong_api_key")?,
            );
        }

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(REQUEST_TIMEOUT)
            .danger_accept_invalid_certs(config.tls_skip_verify)
            .user_agent(concat!("kong-provider/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            admin_uri: config.admin_uri.trim_end_matches('/').to_string(),
            workspace: config.workspace.clone(),
            basic_auth: config
                .admin_username
                .clone()
                .map(|user| (user, config.admin_password.clone())),
        })
    }

    /// Base URI of the Admin API.
    pub fn admin_uri(&self) -> &str {
        &self.admin_uri
    }

    /// Workspace prefixed to entity paths, if any.
    pub fn workspace(&self) -> Option<&str> {
        self.workspace.as_deref()
    }

    /// Absolute URL for an Admin API path such as `/services/{id}`.
    pub fn url(&self, path: &str) -> String {
        let global = GLOBAL_PREFIXES.iter().any(|prefix| path.starts_with(prefix));
        match &self.workspace {
            Some(workspace) if !global => {
                format!("{}/{}{}", self.admin_uri, segment(workspace), path)
            }
            _ => format!("{}{}", self.admin_uri, path),
        }
    }

    /// Read the node status (`GET /status`).
    pub async fn status(&self) -> Result<serde_json::Value, KongError> {
        let response = self.send(self.request(Method::GET, "/status")).await?;
        decode(response).await
    }

    /// Fetch a single entity. A 404 yields `Ok(None)`.
    #[instrument(skip(self), level = "debug")]
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>, KongError> {
        match self.send(self.request(Method::GET, path)).await {
            Ok(response) => decode(response).await.map(Some),
            Err(err) if err.is_not_found() => {
                debug!(path, "entity not found");
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    /// Create an entity (`POST`).
    #[instrument(skip(self, body), level = "debug")]
    pub async fn create<B, T>(&self, path: &str, body: &B) -> Result<T, KongError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let response = self
            .send(self.request(Method::POST, path).json(body))
            .await?;
        decode(response).await
    }

    /// Partially update an entity (`PATCH`).
    #[instrument(skip(self, body), level = "debug")]
    pub async fn update<B, T>(&self, path: &str, body: &B) -> Result<T, KongError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let response = self
            .send(self.request(Method::PATCH, path).json(body))
            .await?;
        decode(response).await
    }

    /// Delete an entity. Deleting something that is already gone succeeds.
    #[instrument(skip(self), level = "debug")]
    pub async fn delete(&self, path: &str) -> Result<(), KongError> {
        match self.send(self.request(Method::DELETE, path)).await {
            Ok(_) => Ok(()),
            Err(err) if err.is_not_found() => {
                warn!(path, "entity already deleted");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    /// List a collection, following Kong's offset pagination.
    ///
    /// `filter` is sent as querystring parameters on every page
    /// (e.g. `[("tags", "team-a")]`).
    #[instrument(skip(self), level = "debug")]
    pub async fn list<T: DeserializeOwned>(
        &self,
        path: &str,
        filter: &[(&str, &str)],
    ) -> Result<Vec<T>, KongError> {
        let size = PAGE_SIZE.to_string();
        let mut items = Vec::new();
        let mut offset: Option<String> = None;

        loop {
            let mut request = self
                .request(Method::GET, path)
                .query(filter)
                .query(&[("size", size.as_str())]);
            if let Some(offset) = &offset {
                request = request.query(&[("offset", offset.as_str())]);
            }

            let page: Page<T> = decode(self.send(request).await?).await?;
            items.extend(page.data);

            match page.offset {
                Some(next) if !next.is_empty() => offset = Some(next),
                _ => break,
            }
        }

        debug!(path, count = items.len(), "listed collection");
        Ok(items)
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let request = self.http.request(method, self.url(path));
        match &self.basic_auth {
            Some((user, password)) => request.basic_auth(user, password.as_ref()),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, KongError> {
        let response = request.send().await?;
        let status = response.status();
        debug!(
            path = %response.url().path(),
            status = status.as_u16(),
            "Kong Admin API response"
        );

        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(KongError::from_response(status.as_u16(), &body))
    }
}

/// Percent-encode a value for use as a single path segment, so reserved
/// characters (`?`, `#`, `%`, `/`, spaces) stay part of the segment.
pub fn segment(raw: &str) -> String {
    // form encoding writes spaces as '+' and a literal '+' as %2B.
    url::form_urlencoded::byte_serialize(raw.as_bytes())
        .collect::<String>()
        .replace('+', "%20")
}

fn header_value(value: &str, attribute: &str) -> Result<HeaderValue, KongError> {
    let mut header = HeaderValue::from_str(value)
        .map_err(|e| KongError::InvalidConfig(format!("{}: {}", attribute, e)))?;
    header.set_sensitive(true);
    Ok(header)
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, KongError> {
    // 204 carries no body; decode it as `null`.
    if response.status() == StatusCode::NO_CONTENT {
        return Ok(serde_json::from_slice(b"null")?);
    }
    let bytes = response.bytes().await?;
    Ok(serde_json::from_slice(&bytes)?)
}
