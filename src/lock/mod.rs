//! Per-instance exclusive lock held for the duration of one transition.
//!
//! [`InstanceLocker`] owns at most one held lock. Acquiring twice is a no-op,
//! releasing is idempotent and never fails the caller, and a locker dropped
//! while still holding a lock releases it in the background. The remote TTL
//! bounds how long a crashed holder can block the instance.

pub mod client;
pub mod error;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, error, warn};

use crate::error::{EngineError, Result};
use crate::instance::InstanceIdentifier;

pub use client::{InstanceLockClient, LockClient, ProcessLockClient};
pub use error::LockError;

/// Default lock lifetime.
pub const DEFAULT_LOCK_TTL: Duration = Duration::from_secs(300);

/// Shortest TTL the storage lock APIs can express.
pub const MIN_LOCK_TTL: Duration = Duration::from_secs(1);

pub const ROUTE_INSTANCE_OWNER_PARTY_ID: &str = "instanceOwnerPartyId";
pub const ROUTE_INSTANCE_GUID: &str = "instanceGuid";

/// Opaque token proving ownership of a remote lock.
#[derive(Clone, PartialEq, Eq)]
pub struct LockToken(String);

impl LockToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// Tokens are credentials; keep them out of logs.
impl fmt::Debug for LockToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("LockToken(..)")
    }
}

/// What the surrounding request knows: route values and the caller's token.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    route_values: HashMap<String, String>,
    user_token: Option<String>,
}

impl RequestContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Context for a request routed to `instance`.
    pub fn for_instance(instance: InstanceIdentifier) -> Self {
        Self::new()
            .with_route_value(ROUTE_INSTANCE_OWNER_PARTY_ID, instance.instance_owner_party_id.to_string())
            .with_route_value(ROUTE_INSTANCE_GUID, instance.instance_guid.to_string())
    }

    pub fn with_route_value(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.route_values.insert(key.into(), value.into());
        self
    }

    pub fn with_user_token(mut self, token: impl Into<String>) -> Self {
        self.user_token = Some(token.into());
        self
    }

    pub fn route_value(&self, key: &str) -> Option<&str> {
        self.route_values.get(key).map(String::as_str)
    }

    pub fn user_token(&self) -> Option<&str> {
        self.user_token.as_deref()
    }

    /// Instance named by the route values, if both are present and parse.
    pub fn instance_identifier(&self) -> Option<InstanceIdentifier> {
        let party = self.route_value(ROUTE_INSTANCE_OWNER_PARTY_ID)?.parse().ok()?;
        let guid = self.route_value(ROUTE_INSTANCE_GUID)?.parse().ok()?;
        Some(InstanceIdentifier::new(party, guid))
    }
}

#[derive(Debug, Clone)]
pub struct HeldLock {
    pub identifier: InstanceIdentifier,
    pub token: LockToken,
    pub acquired_at: DateTime<Utc>,
    pub ttl: Duration,
}

pub struct InstanceLocker {
    client: Arc<dyn LockClient>,
    request: RequestContext,
    default_ttl: Duration,
    held: Option<HeldLock>,
}

impl InstanceLocker {
    pub fn new(client: Arc<dyn LockClient>, request: RequestContext) -> Self {
        Self {
            client,
            request,
            default_ttl: DEFAULT_LOCK_TTL,
            held: None,
        }
    }

    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    pub fn held(&self) -> Option<&HeldLock> {
        self.held.as_ref()
    }

    pub fn is_held(&self) -> bool {
        self.held.is_some()
    }

    pub async fn lock(&mut self) -> Result<()> {
        self.lock_with_ttl(self.default_ttl).await
    }

    /// Acquire the lock for the instance in the request context.
    pub async fn lock_with_ttl(&mut self, ttl: Duration) -> Result<()> {
        if let Some(held) = &self.held {
            debug!(instance = %held.identifier, "Lock already held, not acquiring again");
            return Ok(());
        }
        if ttl < MIN_LOCK_TTL {
            return Err(EngineError::Config(format!(
                "lock TTL must be at least {MIN_LOCK_TTL:?}, got {ttl:?}"
            )));
        }

        let identifier = self
            .request
            .instance_identifier()
            .ok_or(EngineError::InstanceIdentity)?;

        let token = self
            .client
            .acquire(identifier, ttl, self.request.user_token())
            .await?;

        debug!(instance = %identifier, ttl_secs = ttl.as_secs(), "Acquired instance lock");
        self.held = Some(HeldLock {
            identifier,
            token,
            acquired_at: Utc::now(),
            ttl,
        });
        Ok(())
    }

    /// Release the held lock, if any. Failures are logged and swallowed; the
    /// remote TTL reclaims the lock eventually.
    pub async fn release(&mut self) {
        let Some(held) = self.held.take() else {
            return;
        };

        match self.client.release(held.identifier, &held.token).await {
            Ok(()) => debug!(instance = %held.identifier, "Released instance lock"),
            Err(e) => error!(
                instance = %held.identifier,
                error = %e,
                "Failed to release instance lock, relying on TTL expiry"
            ),
        }
    }
}

impl Drop for InstanceLocker {
    fn drop(&mut self) {
        let Some(held) = self.held.take() else {
            return;
        };

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let client = self.client.clone();
                handle.spawn(async move {
                    if let Err(e) = client.release(held.identifier, &held.token).await {
                        error!(
                            instance = %held.identifier,
                            error = %e,
                            "Background lock release failed, relying on TTL expiry"
                        );
                    }
                });
            }
            Err(_) => warn!(
                instance = %held.identifier,
                "Locker dropped outside a runtime, lock will expire by TTL"
            ),
        }
    }
}

impl fmt::Debug for InstanceLocker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstanceLocker")
            .field("default_ttl", &self.default_ttl)
            .field("held", &self.held)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn identifier() -> InstanceIdentifier {
        InstanceIdentifier::new(1000, Uuid::new_v4())
    }

    async fn server_granting_locks() -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "lockToken": "t" })))
            .mount(&server)
            .await;
        server
    }

    fn locker(server: &MockServer, request: RequestContext) -> InstanceLocker {
        let client = InstanceLockClient::new(server.uri(), None).unwrap();
        InstanceLocker::new(Arc::new(client), request)
    }

    #[tokio::test]
    async fn second_lock_does_not_call_remote_again() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "lockToken": "t" })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PATCH"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let mut locker = locker(&server, RequestContext::for_instance(identifier()));
        locker.lock().await.unwrap();
        locker.lock().await.unwrap();
        assert!(locker.is_held());
        assert_eq!(locker.held().unwrap().ttl, DEFAULT_LOCK_TTL);

        locker.release().await;
        locker.release().await;
        assert!(!locker.is_held());
    }

    #[tokio::test]
    async fn release_without_lock_makes_no_call() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let mut locker = locker(&server, RequestContext::for_instance(identifier()));
        locker.release().await;
    }

    #[tokio::test]
    async fn release_failure_is_swallowed() {
        let server = server_granting_locks().await;
        Mock::given(method("PATCH"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&server)
            .await;

        let mut locker = locker(&server, RequestContext::for_instance(identifier()));
        locker.lock().await.unwrap();
        locker.release().await;
        assert!(!locker.is_held());
    }

    #[tokio::test]
    async fn missing_route_values_is_identity_error() {
        let server = server_granting_locks().await;
        let request = RequestContext::new().with_route_value(ROUTE_INSTANCE_OWNER_PARTY_ID, "1000");

        let mut locker = locker(&server, request);
        let err = locker.lock().await.unwrap_err();
        assert!(matches!(err, EngineError::InstanceIdentity));
    }

    #[tokio::test]
    async fn unparsable_guid_is_identity_error() {
        let server = server_granting_locks().await;
        let request = RequestContext::new()
            .with_route_value(ROUTE_INSTANCE_OWNER_PARTY_ID, "1000")
            .with_route_value(ROUTE_INSTANCE_GUID, "not-a-guid");

        let mut locker = locker(&server, request);
        assert!(matches!(locker.lock().await, Err(EngineError::InstanceIdentity)));
    }

    #[tokio::test]
    async fn conflict_surfaces_as_lock_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(409).set_body_string("busy"))
            .mount(&server)
            .await;

        let mut locker = locker(&server, RequestContext::for_instance(identifier()));
        let err = locker.lock().await.unwrap_err();
        assert!(matches!(err, EngineError::Lock(LockError::Conflict { .. })));
        assert!(!locker.is_held());
    }

    #[tokio::test]
    async fn custom_ttl_is_recorded() {
        let server = server_granting_locks().await;
        let mut locker = locker(&server, RequestContext::for_instance(identifier()));
        locker.lock_with_ttl(Duration::from_secs(30)).await.unwrap();
        assert_eq!(locker.held().unwrap().ttl, Duration::from_secs(30));
        locker.release().await;
    }

    #[tokio::test]
    async fn subsecond_ttl_is_rejected_without_a_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "lockToken": "t" })))
            .expect(0)
            .mount(&server)
            .await;

        let mut locker = locker(&server, RequestContext::for_instance(identifier()));
        let err = locker.lock_with_ttl(Duration::from_millis(500)).await.unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
        assert!(!locker.is_held());
    }

    #[test]
    fn request_context_reads_user_token() {
        let request = RequestContext::for_instance(identifier()).with_user_token("jwt");
        assert_eq!(request.user_token(), Some("jwt"));
        assert!(request.instance_identifier().is_some());
    }

    #[test]
    fn lock_token_debug_is_redacted() {
        assert_eq!(format!("{:?}", LockToken::new("secret")), "LockToken(..)");
    }
}
