use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, AUTHORIZATION};

use super::error::SegmentationError;

/// Raw HTTP response as seen by the client: status plus body bytes.
#[derive(Debug, Clone)]
pub struct HttpReply {
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpReply {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// The network seam of [`super::SegmentationClient`].
///
/// Implementations only move bytes; status interpretation and the queue
/// protocol live in the client.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn post_json(
        &self,
        url: &str,
        authorization: &str,
        body: &serde_json::Value,
        timeout: Duration,
    ) -> Result<HttpReply, SegmentationError>;

    async fn get(
        &self,
        url: &str,
        authorization: Option<&str>,
        timeout: Duration,
    ) -> Result<HttpReply, SegmentationError>;
}

/// Production transport backed by a shared `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self, SegmentationError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("stickercam/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn post_json(
        &self,
        url: &str,
        authorization: &str,
        body: &serde_json::Value,
        timeout: Duration,
    ) -> Result<HttpReply, SegmentationError> {
        let response = self
            .client
            .post(url)
            .header(AUTHORIZATION, authorization)
            .header(ACCEPT, "application/json")
            .json(body)
            .timeout(timeout)
            .send()
            .await?;

        let status = response.status().as_u16();
        let bytes = response.bytes().await?;
        Ok(HttpReply::new(status, bytes.to_vec()))
    }

    async fn get(
        &self,
        url: &str,
        authorization: Option<&str>,
        timeout: Duration,
    ) -> Result<HttpReply, SegmentationError> {
        let mut request = self.client.get(url).timeout(timeout);
        if let Some(value) = authorization {
            request = request.header(AUTHORIZATION, value);
        }

        let response = request.send().await?;
        let status = response.status().as_u16();
        let bytes = response.bytes().await?;
        Ok(HttpReply::new(status, bytes.to_vec()))
    }
}
