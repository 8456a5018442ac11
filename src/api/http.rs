//! reqwest implementation of the backend contract

use crate::api::{ApiError, BackendApi, SyncedCollections};
use crate::config::BackendConfig;
use crate::whatsapp::contacts::{Collection, RawDeviceContact, UnsyncedContact};
use crate::whatsapp::numbers::{NumberSettings, WhatsAppNumber};
use crate::whatsapp::reconciler::AgentUpdate;
use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use url::Url;

/// Body of a bulk endpoint response
#[derive(Debug, Default, Deserialize)]
struct BatchReport {
    #[serde(default)]
    failed: Vec<serde_json::Value>,
    #[serde(default)]
    total: Option<usize>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PromoteRequest<'a> {
    contact_ids: &'a [String],
    group_ids: &'a [String],
}

#[derive(Serialize)]
struct NewNumber<'a> {
    name: &'a str,
    #[serde(rename = "phoneNumber")]
    phone_number: &'a str,
}

/// REST client for the dashboard backend
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: Url,
    auth_token: Option<String>,
}

fn build_client(timeout: Duration) -> Result<reqwest::Client, ApiError> {
    reqwest::Client::builder()
        .user_agent(concat!("whatsapp-dashboard/", env!("CARGO_PKG_VERSION")))
        .timeout(timeout)
        .build()
        .map_err(|e| ApiError::Network(format!("Failed to build HTTP client: {}", e)))
}

impl HttpBackend {
    pub fn new(config: &BackendConfig) -> Result<Self, ApiError> {
        let mut base_url = Url::parse(&config.base_url)
            .map_err(|e| ApiError::Network(format!("Invalid backend URL {}: {}", config.base_url, e)))?;
        // Url::join drops the last segment unless the path ends with '/'
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        Ok(Self {
            client: build_client(Duration::from_secs(config.timeout_secs))?,
            base_url,
            auth_token: config.auth_token.clone(),
        })
    }

    fn url(&self, segments: &[&str]) -> Result<Url, ApiError> {
        let path = segments
            .iter()
            .map(|s| urlencoding::encode(s).into_owned())
            .collect::<Vec<_>>()
            .join("/");
        self.base_url
            .join(&path)
            .map_err(|e| ApiError::Network(format!("Invalid request path {}: {}", path, e)))
    }

    fn request(&self, method: Method, segments: &[&str]) -> Result<RequestBuilder, ApiError> {
        let url = self.url(segments)?;
        tracing::debug!("{} {}", method, url);
        let builder = self.client.request(method, url);
        Ok(match &self.auth_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        })
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Response, ApiError> {
        let response = builder
            .send()
            .await
            .map_err(|e| ApiError::Network(format!("Request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!("Backend answered {}: {}", status, body);
            return Err(ApiError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    async fn get_json<T: DeserializeOwned>(&self, segments: &[&str]) -> Result<T, ApiError> {
        let response = self.send(self.request(Method::GET, segments)?).await?;
        Ok(response.json().await?)
    }

    async fn send_empty(&self, builder: RequestBuilder) -> Result<(), ApiError> {
        self.send(builder).await.map(|_| ())
    }

    /// Bulk endpoints answer 207 or list failed items when only part of the
    /// batch went through
    async fn send_batch(&self, builder: RequestBuilder, total: usize) -> Result<(), ApiError> {
        let response = self.send(builder).await?;
        let multi_status = response.status() == StatusCode::MULTI_STATUS;
        let text = response.text().await.unwrap_or_default();
        let report: BatchReport = serde_json::from_str(&text).unwrap_or_default();

        if multi_status || !report.failed.is_empty() {
            return Err(ApiError::PartialBatch {
                failed: report.failed.len(),
                total: report.total.unwrap_or(total),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl BackendApi for HttpBackend {
    async fn list_numbers(&self) -> Result<Vec<WhatsAppNumber>, ApiError> {
        self.get_json(&["numbers"]).await
    }

    async fn create_number(&self, name: &str, phone_number: &str) -> Result<WhatsAppNumber, ApiError> {
        let builder = self
            .request(Method::POST, &["numbers"])?
            .json(&NewNumber { name, phone_number });
        self.send(builder)
            .await?
            .json()
            .await
            .map_err(|e| ApiError::Decode(e.to_string()))
    }

    async fn delete_number(&self, number_id: &str) -> Result<(), ApiError> {
        self.send_empty(self.request(Method::DELETE, &["numbers", number_id])?)
            .await
    }

    async fn update_number_settings(
        &self,
        number_id: &str,
        settings: NumberSettings,
    ) -> Result<(), ApiError> {
        let builder = self
            .request(Method::PATCH, &["numbers", number_id])?
            .json(&settings);
        self.send_empty(builder).await
    }

    async fn start_session(&self, number_id: &str) -> Result<(), ApiError> {
        self.send_empty(self.request(Method::POST, &["numbers", number_id, "session"])?)
            .await
    }

    async fn fetch_device_contacts(&self, number_id: &str) -> Result<Vec<RawDeviceContact>, ApiError> {
        self.get_json(&["numbers", number_id, "device-contacts"]).await
    }

    async fn fetch_synced(&self, number_id: &str) -> Result<SyncedCollections, ApiError> {
        self.get_json(&["numbers", number_id, "synced"]).await
    }

    async fn fetch_unsynced(&self, number_id: &str) -> Result<Vec<UnsyncedContact>, ApiError> {
        self.get_json(&["numbers", number_id, "unsynced"]).await
    }

    async fn promote(
        &self,
        number_id: &str,
        contact_ids: &[String],
        group_ids: &[String],
    ) -> Result<(), ApiError> {
        let builder = self
            .request(Method::POST, &["numbers", number_id, "synced"])?
            .json(&PromoteRequest {
                contact_ids,
                group_ids,
            });
        self.send_empty(builder).await
    }

    async fn remove_chat(
        &self,
        number_id: &str,
        id: &str,
        collection: Collection,
    ) -> Result<(), ApiError> {
        let scope = if collection.is_synced() {
            "synced"
        } else {
            "unsynced"
        };
        self.send_empty(self.request(Method::DELETE, &["numbers", number_id, scope, id])?)
            .await
    }

    async fn toggle_agent(&self, number_id: &str, id: &str, enabled: bool) -> Result<(), ApiError> {
        let builder = self
            .request(Method::PATCH, &["numbers", number_id, "synced", id, "agent"])?
            .json(&json!({ "enabled": enabled }));
        self.send_empty(builder).await
    }

    async fn bulk_toggle_agent(&self, number_id: &str, updates: &[AgentUpdate]) -> Result<(), ApiError> {
        let body: Vec<_> = updates
            .iter()
            .map(|u| json!({ "id": u.id, "enabled": u.enabled }))
            .collect();
        let builder = self
            .request(Method::PATCH, &["numbers", number_id, "synced", "agent"])?
            .json(&json!({ "updates": body }));
        self.send_batch(builder, updates.len()).await
    }

    async fn bulk_delete(&self, number_id: &str, ids: &[String]) -> Result<(), ApiError> {
        let builder = self
            .request(Method::POST, &["numbers", number_id, "synced", "bulk-delete"])?
            .json(&json!({ "ids": ids }));
        self.send_batch(builder, ids.len()).await
    }
}
