use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use super::LockToken;
use super::error::LockError;
use crate::instance::InstanceIdentifier;

/// Header carrying the platform subscription key.
pub const SUBSCRIPTION_KEY_HEADER: &str = "Ocp-Apim-Subscription-Key";

/// Remote TTL lock over one instance.
#[async_trait]
pub trait LockClient: Send + Sync {
    async fn acquire(
        &self,
        instance: InstanceIdentifier,
        ttl: Duration,
        user_token: Option<&str>,
    ) -> Result<LockToken, LockError>;

    async fn release(&self, instance: InstanceIdentifier, token: &LockToken) -> Result<(), LockError>;
}

fn build_http_client() -> Result<Client, LockError> {
    Ok(Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .timeout(Duration::from_secs(30))
        .build()?)
}

// Whole seconds, rounded up: a zero TTL means release on these APIs.
fn ttl_seconds(ttl: Duration) -> u64 {
    ttl.as_secs().saturating_add(u64::from(ttl.subsec_nanos() > 0))
}

fn with_subscription_key(request: RequestBuilder, key: Option<&str>) -> RequestBuilder {
    match key {
        Some(key) => request.header(SUBSCRIPTION_KEY_HEADER, key),
        None => request,
    }
}

fn with_bearer(request: RequestBuilder, token: Option<&str>) -> RequestBuilder {
    match token {
        Some(token) => request.bearer_auth(token),
        None => request,
    }
}

async fn check_status(response: Response) -> Result<Response, LockError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let message = response
        .text()
        .await
        .unwrap_or_else(|_| "unknown error".to_string());
    if status == StatusCode::CONFLICT {
        return Err(LockError::Conflict { message });
    }
    Err(LockError::Api {
        status: status.as_u16(),
        message,
    })
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InstanceLockRequest {
    ttl_seconds: u64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct InstanceLockResponse {
    #[serde(default)]
    lock_token: Option<String>,
}

/// Lock on the instance resource itself.
///
/// `POST {storage}/instances/{party}/{guid}/lock` acquires; `PATCH` on the same
/// path with a zero TTL and the lock token as bearer releases.
pub struct InstanceLockClient {
    client: Client,
    base_url: String,
    subscription_key: Option<String>,
}

impl InstanceLockClient {
    pub fn new(base_url: impl Into<String>, subscription_key: Option<String>) -> Result<Self, LockError> {
        Ok(Self::with_client(build_http_client()?, base_url, subscription_key))
    }

    pub fn with_client(client: Client, base_url: impl Into<String>, subscription_key: Option<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            subscription_key,
        }
    }

    fn url(&self, instance: InstanceIdentifier) -> String {
        format!(
            "{}/instances/{}/{}/lock",
            self.base_url, instance.instance_owner_party_id, instance.instance_guid
        )
    }
}

#[async_trait]
impl LockClient for InstanceLockClient {
    async fn acquire(
        &self,
        instance: InstanceIdentifier,
        ttl: Duration,
        user_token: Option<&str>,
    ) -> Result<LockToken, LockError> {
        let request = self.client.post(self.url(instance)).json(&InstanceLockRequest {
            ttl_seconds: ttl_seconds(ttl),
        });
        let request = with_bearer(with_subscription_key(request, self.subscription_key.as_deref()), user_token);
        let response = check_status(request.send().await?).await?;

        let body = response.json::<InstanceLockResponse>().await?;
        match body.lock_token.filter(|t| !t.is_empty()) {
            Some(token) => {
                debug!(%instance, "Acquired instance lock");
                Ok(LockToken::new(token))
            }
            None => Err(LockError::UnexpectedResponse(
                "lock response did not contain a lock token".to_string(),
            )),
        }
    }

    async fn release(&self, instance: InstanceIdentifier, token: &LockToken) -> Result<(), LockError> {
        let request = self
            .client
            .patch(self.url(instance))
            .json(&InstanceLockRequest { ttl_seconds: 0 });
        let request = with_bearer(
            with_subscription_key(request, self.subscription_key.as_deref()),
            Some(token.as_str()),
        );
        check_status(request.send().await?).await?;
        Ok(())
    }
}

#[derive(Serialize)]
struct ProcessLockRequest {
    expiration: u64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProcessLockResponse {
    #[serde(default)]
    lock_id: Option<Uuid>,
}

/// Lock on the process of an instance, identified by a lock id.
///
/// `POST .../process/lock` acquires; `PATCH .../process/lock/{lockId}` with a
/// zero expiration releases.
pub struct ProcessLockClient {
    client: Client,
    base_url: String,
    subscription_key: Option<String>,
}

impl ProcessLockClient {
    pub fn new(base_url: impl Into<String>, subscription_key: Option<String>) -> Result<Self, LockError> {
        Ok(Self::with_client(build_http_client()?, base_url, subscription_key))
    }

    pub fn with_client(client: Client, base_url: impl Into<String>, subscription_key: Option<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            subscription_key,
        }
    }

    fn url(&self, instance: InstanceIdentifier) -> String {
        format!(
            "{}/instances/{}/{}/process/lock",
            self.base_url, instance.instance_owner_party_id, instance.instance_guid
        )
    }
}

#[async_trait]
impl LockClient for ProcessLockClient {
    async fn acquire(
        &self,
        instance: InstanceIdentifier,
        ttl: Duration,
        user_token: Option<&str>,
    ) -> Result<LockToken, LockError> {
        let request = self.client.post(self.url(instance)).json(&ProcessLockRequest {
            expiration: ttl_seconds(ttl),
        });
        let request = with_bearer(with_subscription_key(request, self.subscription_key.as_deref()), user_token);
        let response = check_status(request.send().await?).await?;

        let body = response.json::<ProcessLockResponse>().await?;
        match body.lock_id {
            Some(id) if !id.is_nil() => {
                debug!(%instance, lock_id = %id, "Acquired process lock");
                Ok(LockToken::new(id.to_string()))
            }
            _ => Err(LockError::UnexpectedResponse(
                "lock response did not contain a lock id".to_string(),
            )),
        }
    }

    async fn release(&self, instance: InstanceIdentifier, token: &LockToken) -> Result<(), LockError> {
        let url = format!("{}/{}", self.url(instance), token.as_str());
        let request = self.client.patch(url).json(&ProcessLockRequest { expiration: 0 });
        let request = with_subscription_key(request, self.subscription_key.as_deref());
        check_status(request.send().await?).await?;
        Ok(())
    }
}
