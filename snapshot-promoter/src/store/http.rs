//! HTTP/JSON client for a snapshot store gateway.
//!
//! Each location is served by its own endpoint. Construction probes the
//! session endpoint so that bad credentials fail before any snapshot work
//! starts.

use super::{CopyRequest, SnapshotStore, StoreError};
use crate::snapshot::SnapshotRecord;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// Error body returned by the gateway on non-2xx responses
#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct SnapshotList {
    snapshots: Vec<SnapshotRecord>,
}

pub struct HttpSnapshotStore {
    location: String,
    endpoint: Url,
    token: Option<String>,
    client: Client,
}

impl HttpSnapshotStore {
    /// Build a client for `location` and verify its credentials.
    pub async fn connect(
        location: &str,
        endpoint: &str,
        token: Option<String>,
        request_timeout: Duration,
    ) -> Result<Self, StoreError> {
        let store = Self::new(location, endpoint, token, request_timeout)?;

        let resp = store
            .authorize(store.client.get(store.url("connect", &["v1", "session"])?))
            .send()
            .await
            .map_err(|e| transport("connect", e))?;

        match resp.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                let body = resp.json::<ApiErrorBody>().await.ok();
                return Err(StoreError::Credentials {
                    location: store.location.clone(),
                    message: body
                        .map(|b| b.message)
                        .filter(|m| !m.is_empty())
                        .unwrap_or_else(|| "no valid credentials found".to_string()),
                });
            }
            status if !status.is_success() => {
                return Err(api_error("connect", resp).await);
            }
            _ => {}
        }

        debug!("Session established for {} at {}", store.location, store.endpoint);
        Ok(store)
    }

    fn new(location: &str, endpoint: &str, token: Option<String>, request_timeout: Duration) -> Result<Self, StoreError> {
        let endpoint = Url::parse(endpoint).map_err(|e| StoreError::Transport {
            operation: "connect".to_string(),
            message: format!("invalid endpoint {}: {}", endpoint, e),
        })?;

        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| StoreError::Transport {
                operation: "connect".to_string(),
                message: e.to_string(),
            })?;

        Ok(Self {
            location: location.to_string(),
            endpoint,
            token,
            client,
        })
    }

    /// Append percent-encoded path segments to the endpoint
    fn url(&self, operation: &str, segments: &[&str]) -> Result<Url, StoreError> {
        let mut url = self.endpoint.clone();
        url.path_segments_mut()
            .map_err(|_| StoreError::Transport {
                operation: operation.to_string(),
                message: format!("endpoint {} cannot carry a path", self.endpoint),
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn authorize(&self, req: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    async fn call<T: DeserializeOwned>(&self, operation: &str, req: RequestBuilder) -> Result<T, StoreError> {
        let resp = self
            .authorize(req)
            .header("x-request-id", uuid::Uuid::new_v4().to_string())
            .send()
            .await
            .map_err(|e| transport(operation, e))?;

        if !resp.status().is_success() {
            return Err(api_error(operation, resp).await);
        }

        resp.json::<T>().await.map_err(|e| StoreError::Decode {
            operation: operation.to_string(),
            message: e.to_string(),
        })
    }
}

fn transport(operation: &str, e: reqwest::Error) -> StoreError {
    StoreError::Transport {
        operation: operation.to_string(),
        message: e.to_string(),
    }
}

async fn api_error(operation: &str, resp: reqwest::Response) -> StoreError {
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();
    match serde_json::from_str::<ApiErrorBody>(&body) {
        Ok(parsed) if !parsed.message.is_empty() => StoreError::Api {
            operation: operation.to_string(),
            code: parsed.code,
            message: parsed.message,
        },
        _ => StoreError::Api {
            operation: operation.to_string(),
            code: status.as_u16().to_string(),
            message: if body.is_empty() { status.to_string() } else { body },
        },
    }
}

#[async_trait]
impl SnapshotStore for HttpSnapshotStore {
    fn location(&self) -> &str {
        &self.location
    }

    async fn list_snapshots(&self, instance_id: &str) -> Result<Vec<SnapshotRecord>, StoreError> {
        let url = self.url("list_snapshots", &["v1", "instances", instance_id, "snapshots"])?;
        let list: SnapshotList = self.call("list_snapshots", self.client.get(url)).await?;
        Ok(list.snapshots)
    }

    async fn copy_snapshot(&self, request: &CopyRequest) -> Result<SnapshotRecord, StoreError> {
        let url = self.url("copy_snapshot", &["v1", "snapshots", "copy"])?;
        self.call("copy_snapshot", self.client.post(url).json(request)).await
    }

    async fn describe_snapshot(&self, snapshot_id: &str) -> Result<SnapshotRecord, StoreError> {
        let url = self.url("describe_snapshot", &["v1", "snapshots", snapshot_id])?;
        self.call("describe_snapshot", self.client.get(url)).await
    }

    async fn delete_snapshot(&self, snapshot_id: &str) -> Result<(), StoreError> {
        let url = self.url("delete_snapshot", &["v1", "snapshots", snapshot_id])?;
        let resp = self
            .authorize(self.client.delete(url))
            .send()
            .await
            .map_err(|e| transport("delete_snapshot", e))?;

        match resp.status() {
            s if s.is_success() => Ok(()),
            StatusCode::NOT_FOUND => Err(StoreError::NotFound {
                operation: "delete_snapshot".to_string(),
                id: snapshot_id.to_string(),
            }),
            _ => Err(api_error("delete_snapshot", resp).await),
        }
    }
}
