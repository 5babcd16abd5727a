use super::client::NodeClient;
use super::protocol::*;
use super::types::NodeId;
use crate::error::{ShardError, ShardResult};

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_millis(500);
const RETRY_ATTEMPTS: usize = 3;

/// Client for a storage node reached over HTTP.
///
/// Transport errors are retried with exponential backoff and jitter; once the attempts
/// are exhausted the call fails with `NodeUnreachable`. `incr_by` is not idempotent and
/// is retried only when the connection could not be opened, so the request never left.
/// Any later failure (a timeout included) is returned at once: the node may or may not
/// have applied the amount, and the caller keeps it for its next attempt.
pub struct RemoteNode {
    id: NodeId,
    base_url: String,
    http_client: reqwest::Client,
    attempts: usize,
}

impl RemoteNode {
    pub fn new(id: NodeId, http_client: reqwest::Client) -> Self {
        let base_url = id.as_str().trim_end_matches('/').to_string();
        Self {
            id,
            base_url,
            http_client,
            attempts: RETRY_ATTEMPTS,
        }
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}{}", self.base_url, endpoint)
    }

    async fn backoff(delay_ms: &mut u64) {
        let jitter = rand::random::<u64>() % 50;
        tokio::time::sleep(Duration::from_millis(*delay_ms + jitter)).await;
        *delay_ms = (*delay_ms * 2).min(1200);
    }

    async fn post_with_retry<T: Serialize + Sync>(
        &self,
        url: String,
        payload: &T,
        idempotent: bool,
    ) -> ShardResult<reqwest::Response> {
        let mut delay_ms = 150u64;

        for attempt in 0..self.attempts {
            let response = self
                .http_client
                .post(url.clone())
                .json(payload)
                .timeout(REQUEST_TIMEOUT)
                .send()
                .await;

            match response {
                Ok(resp) => return Ok(resp),
                Err(e) => {
                    if attempt + 1 == self.attempts || !(idempotent || e.is_connect()) {
                        return Err(ShardError::unreachable(&self.id, e));
                    }
                    tracing::debug!("POST {} failed (attempt {}): {}", url, attempt + 1, e);
                    Self::backoff(&mut delay_ms).await;
                }
            }
        }

        Err(ShardError::unreachable(&self.id, "retry attempts exhausted"))
    }

    async fn get_with_retry(&self, url: String) -> ShardResult<reqwest::Response> {
        let mut delay_ms = 150u64;

        for attempt in 0..self.attempts {
            let response = self
                .http_client
                .get(url.clone())
                .timeout(REQUEST_TIMEOUT)
                .send()
                .await;

            match response {
                Ok(resp) => return Ok(resp),
                Err(e) => {
                    if attempt + 1 == self.attempts {
                        return Err(ShardError::unreachable(&self.id, e));
                    }
                    tracing::debug!("GET {} failed (attempt {}): {}", url, attempt + 1, e);
                    Self::backoff(&mut delay_ms).await;
                }
            }
        }

        Err(ShardError::unreachable(&self.id, "retry attempts exhausted"))
    }

    async fn decode<R: DeserializeOwned>(&self, response: reqwest::Response) -> ShardResult<R> {
        if !response.status().is_success() {
            return Err(ShardError::unreachable(
                &self.id,
                format!("request failed {}", response.status()),
            ));
        }
        response
            .json::<R>()
            .await
            .map_err(|e| ShardError::unreachable(&self.id, e))
    }

    /// Health probe used when the node joins the ring.
    pub async fn ping(&self) -> ShardResult<()> {
        let response = self.get_with_retry(self.url(ENDPOINT_HEALTH)).await?;
        if !response.status().is_success() {
            return Err(ShardError::unreachable(
                &self.id,
                format!("health check failed {}", response.status()),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl NodeClient for RemoteNode {
    async fn get(&self, key: &str) -> ShardResult<Option<i64>> {
        let mut url = reqwest::Url::parse(&self.url(ENDPOINT_GET))
            .map_err(|e| ShardError::unreachable(&self.id, e))?;
        url.path_segments_mut()
            .map_err(|_| ShardError::unreachable(&self.id, "node url cannot carry a path"))?
            .push(key);
        let response = self.get_with_retry(url.to_string()).await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(ShardError::unreachable(
                &self.id,
                format!("request failed {}", response.status()),
            ));
        }
        // A reachable node answering with something other than an integer.
        let body: GetResponse = response.json().await.map_err(|e| ShardError::InvalidValue {
            key: key.to_string(),
            reason: e.to_string(),
        })?;
        Ok(body.value)
    }

    async fn set(&self, key: &str, value: i64) -> ShardResult<()> {
        let payload = SetRequest {
            key: key.to_string(),
            value,
        };
        let response = self
            .post_with_retry(self.url(ENDPOINT_SET), &payload, true)
            .await?;
        let body: SetResponse = self.decode(response).await?;
        if !body.success {
            return Err(ShardError::unreachable(&self.id, "set rejected"));
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> ShardResult<bool> {
        let payload = DeleteRequest {
            key: key.to_string(),
        };
        let response = self
            .post_with_retry(self.url(ENDPOINT_DELETE), &payload, true)
            .await?;
        let body: DeleteResponse = self.decode(response).await?;
        Ok(body.deleted)
    }

    async fn incr_by(&self, key: &str, amount: i64) -> ShardResult<i64> {
        let payload = IncrRequest {
            key: key.to_string(),
            amount,
        };
        let response = self
            .post_with_retry(self.url(ENDPOINT_INCR), &payload, false)
            .await?;
        let body: IncrResponse = self.decode(response).await?;
        Ok(body.value)
    }

    async fn scan_keys(&self, pattern: &str) -> ShardResult<Vec<String>> {
        let mut url = reqwest::Url::parse(&self.url(ENDPOINT_SCAN))
            .map_err(|e| ShardError::unreachable(&self.id, e))?;
        url.query_pairs_mut().append_pair("pattern", pattern);
        // Read-only, so every transport failure may be retried.
        let response = self.get_with_retry(url.to_string()).await?;
        let body: ScanResponse = self.decode(response).await?;
        Ok(body.keys)
    }
}
