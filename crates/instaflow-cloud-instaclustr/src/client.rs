//! Instaclustr provisioning API client
//!
//! Thin HTTP gateway: every call returns the raw status and body and the
//! per-family gateways decide what a status means. Authenticates with the
//! account's access key and secret key over HTTP basic auth.

use crate::config::ApiConfig;
use instaflow_cloud::{CloudError, GatewayResponse, Result};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Method, RequestBuilder};
use serde::Serialize;

/// Instaclustr provisioning API client
#[derive(Debug, Clone)]
pub struct InstaclustrClient {
    client: reqwest::Client,
    config: ApiConfig,
}

impl InstaclustrClient {
    /// Create a new client. Fails fast on incomplete credentials.
    pub fn new(config: ApiConfig) -> Result<Self> {
        config.validate()?;
        let client = reqwest::Client::builder()
            .user_agent(concat!("instaflow/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| CloudError::Http(e.to_string()))?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &ApiConfig {
        &self.config
    }

    /// Build the URL of a resource below the API base.
    pub fn url(&self, path: &[&str]) -> String {
        let mut url = self.config.url.trim_end_matches('/').to_string();
        for segment in path.iter().filter(|s| !s.is_empty()) {
            url.push('/');
            url.push_str(segment);
        }
        url
    }

    pub(crate) async fn get(&self, path: &[&str]) -> Result<GatewayResponse> {
        self.send(self.request(Method::GET, path)).await
    }

    pub(crate) async fn post<B: Serialize + ?Sized>(
        &self,
        path: &[&str],
        body: &B,
    ) -> Result<GatewayResponse> {
        self.send(self.request(Method::POST, path).json(body)).await
    }

    pub(crate) async fn delete(&self, path: &[&str]) -> Result<GatewayResponse> {
        self.send(self.request(Method::DELETE, path)).await
    }

    /// DELETE carrying a JSON body, used where the API identifies the
    /// target by content rather than by path.
    pub(crate) async fn delete_with_body<B: Serialize + ?Sized>(
        &self,
        path: &[&str],
        body: &B,
    ) -> Result<GatewayResponse> {
        self.send(self.request(Method::DELETE, path).json(body)).await
    }

    fn request(&self, method: Method, path: &[&str]) -> RequestBuilder {
        let url = self.url(path);
        tracing::debug!(%method, %url, "Instaclustr API request");
        self.client
            .request(method, url)
            .basic_auth(&self.config.access_key, Some(&self.config.secret_key))
            .header(ACCEPT, "application/json")
            .header(CONTENT_TYPE, "application/json")
    }

    async fn send(&self, request: RequestBuilder) -> Result<GatewayResponse> {
        let response = request
            .send()
            .await
            .map_err(|e| CloudError::Http(e.to_string()))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| CloudError::Http(e.to_string()))?;
        tracing::debug!(status, "Instaclustr API response");
        Ok(GatewayResponse::new(status, body))
    }
}
