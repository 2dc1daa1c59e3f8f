//! REST client for a PostgREST-style active-session table

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use tracing::{debug, warn};

use super::{PendingRemoteRecord, RemoteAuthority, RemoteError};

/// Connection settings for [`RestAuthority`]
#[derive(Debug, Clone)]
pub struct RestAuthorityConfig {
    /// Base URL of the REST endpoint, e.g. `https://project.example/rest/v1`
    pub base_url: String,
    pub api_key: Option<String>,
    pub table: String,
    pub timeout_secs: u64,
}

impl RestAuthorityConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: None,
            table: "pomodoro_active_sessions".to_string(),
            timeout_secs: 10,
        }
    }
}

/// Remote authority speaking to one row per `user_id`
pub struct RestAuthority {
    client: Client,
    config: RestAuthorityConfig,
}

impl RestAuthority {
    pub fn new(config: RestAuthorityConfig) -> Result<Self, RemoteError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { client, config })
    }

    fn table_url(&self) -> String {
        format!(
            "{}/{}",
            self.config.base_url.trim_end_matches('/'),
            self.config.table
        )
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.config.api_key {
            Some(key) => request
                .header("apikey", key)
                .bearer_auth(key),
            None => request,
        }
    }

    async fn check(response: Response) -> Result<Response, RemoteError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response.text().await.unwrap_or_default();
        warn!("Remote authority returned {}: {}", status, message);
        Err(RemoteError::Http {
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait]
impl RemoteAuthority for RestAuthority {
    async fn upsert(&self, record: &PendingRemoteRecord) -> Result<(), RemoteError> {
        debug!(user = %record.user_id, category = %record.category_id, "Upserting remote session");
        let request = self
            .client
            .post(self.table_url())
            .query(&[("on_conflict", "user_id")])
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(record);
        Self::check(self.authorize(request).send().await?).await?;
        Ok(())
    }

    async fn fetch(&self, user_id: &str) -> Result<Option<PendingRemoteRecord>, RemoteError> {
        let request = self
            .client
            .get(self.table_url())
            .query(&[("user_id", format!("eq.{user_id}")), ("select", "*".to_string())]);
        let response = Self::check(self.authorize(request).send().await?).await?;
        let rows: Vec<PendingRemoteRecord> = response.json().await?;
        Ok(rows.into_iter().next())
    }

    async fn delete(&self, user_id: &str) -> Result<(), RemoteError> {
        debug!(user = %user_id, "Deleting remote session");
        let request = self
            .client
            .delete(self.table_url())
            .query(&[("user_id", format!("eq.{user_id}"))]);
        Self::check(self.authorize(request).send().await?).await?;
        Ok(())
    }
}
