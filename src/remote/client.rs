use std::future::Future;
use std::time::Duration;

use reqwest::{Client, RequestBuilder, StatusCode};
use tracing::debug;

use super::error::RemoteEngineError;
use super::job::ProcessEngineStatusResponse;
use super::types::ProcessNextRequest;
use crate::instance::InstanceIdentifier;

/// Header carrying the process engine API key.
pub const API_KEY_HEADER: &str = "X-Api-Key";

/// Access to the remote execution tier.
pub trait ProcessEngineClient: Send + Sync {
    /// Enqueue a transition. Success means accepted, not completed.
    fn process_next(
        &self,
        instance: InstanceIdentifier,
        request: &ProcessNextRequest,
    ) -> impl Future<Output = Result<(), RemoteEngineError>> + Send;

    /// Status of the active job, or `None` when the instance has none.
    fn get_active_job_status(
        &self,
        instance: InstanceIdentifier,
    ) -> impl Future<Output = Result<Option<ProcessEngineStatusResponse>, RemoteEngineError>> + Send;
}

pub struct HttpProcessEngineClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpProcessEngineClient {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Result<Self, RemoteEngineError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self::with_client(client, base_url, api_key))
    }

    pub fn with_client(client: Client, base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        }
    }

    fn url(&self, instance: InstanceIdentifier, action: &str) -> String {
        format!(
            "{}/instances/{}/{}/process-engine/{action}",
            self.base_url, instance.instance_owner_party_id, instance.instance_guid
        )
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => request.header(API_KEY_HEADER, key),
            None => request,
        }
    }
}

impl ProcessEngineClient for HttpProcessEngineClient {
    async fn process_next(
        &self,
        instance: InstanceIdentifier,
        request: &ProcessNextRequest,
    ) -> Result<(), RemoteEngineError> {
        let response = self
            .authorize(self.client.post(self.url(instance, "next")))
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(RemoteEngineError::Api {
                status: status.as_u16(),
                message,
            });
        }

        debug!(%instance, tasks = request.tasks.len(), "Process engine accepted transition");
        Ok(())
    }

    async fn get_active_job_status(
        &self,
        instance: InstanceIdentifier,
    ) -> Result<Option<ProcessEngineStatusResponse>, RemoteEngineError> {
        let response = self
            .authorize(self.client.get(self.url(instance, "status")))
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::NO_CONTENT || status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(RemoteEngineError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let body = response.text().await?;
        if body.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_str(&body)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandRequest;
    use crate::remote::job::ProcessEngineItemStatus;
    use crate::remote::types::{InstanceInformation, ProcessEngineActor};
    use uuid::Uuid;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn instance() -> InstanceIdentifier {
        InstanceIdentifier::new(
            77,
            Uuid::parse_str("0b8a5e6f-3a3c-4f8e-9d0b-2c6f3c1e7a11").unwrap(),
        )
    }

    const BASE: &str = "/instances/77/0b8a5e6f-3a3c-4f8e-9d0b-2c6f3c1e7a11/process-engine";

    fn next_request() -> ProcessNextRequest {
        ProcessNextRequest {
            current_element_id: "Task_1".into(),
            desired_element_id: "Task_2".into(),
            instance_information: InstanceInformation {
                org: "ttd".into(),
                app: "case-app".into(),
                instance_owner_party_id: 77,
                instance_guid: instance().instance_guid,
            },
            actor: ProcessEngineActor {
                user_id_or_org_number: "1337".into(),
                language: None,
            },
            tasks: vec![CommandRequest::new("WorkflowTaskEnd")],
        }
    }

    #[tokio::test]
    async fn process_next_posts_request_with_api_key() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(format!("{BASE}/next")))
            .and(header(API_KEY_HEADER, "secret"))
            .and(body_partial_json(serde_json::json!({
                "currentElementId": "Task_1",
                "desiredElementId": "Task_2",
                "tasks": [{ "commandKey": "WorkflowTaskEnd" }]
            })))
            .respond_with(ResponseTemplate::new(202))
            .expect(1)
            .mount(&server)
            .await;

        let client = HttpProcessEngineClient::new(server.uri(), Some("secret".into())).unwrap();
        client.process_next(instance(), &next_request()).await.unwrap();
    }

    #[tokio::test]
    async fn process_next_error_status_is_api_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_string("invalid element"))
            .mount(&server)
            .await;

        let client = HttpProcessEngineClient::new(server.uri(), None).unwrap();
        let err = client.process_next(instance(), &next_request()).await.unwrap_err();
        match err {
            RemoteEngineError::Api { status, message } => {
                assert_eq!(status, 400);
                assert_eq!(message, "invalid element");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn status_parses_active_job() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(format!("{BASE}/status")))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({ "overallStatus": "Processing" })),
            )
            .mount(&server)
            .await;

        let client = HttpProcessEngineClient::new(server.uri(), None).unwrap();
        let status = client.get_active_job_status(instance()).await.unwrap().unwrap();
        assert_eq!(status.overall_status, ProcessEngineItemStatus::Processing);
        assert!(status.tasks.is_empty());
    }

    #[tokio::test]
    async fn no_content_and_not_found_mean_no_job() {
        for code in [204, 404] {
            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .respond_with(ResponseTemplate::new(code))
                .mount(&server)
                .await;

            let client = HttpProcessEngineClient::new(server.uri(), None).unwrap();
            assert!(client.get_active_job_status(instance()).await.unwrap().is_none());
        }
    }

    #[tokio::test]
    async fn empty_body_means_no_job() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let client = HttpProcessEngineClient::new(server.uri(), None).unwrap();
        assert!(client.get_active_job_status(instance()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn malformed_status_is_parse_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{\"overallStatus\": 12"))
            .mount(&server)
            .await;

        let client = HttpProcessEngineClient::new(server.uri(), None).unwrap();
        let err = client.get_active_job_status(instance()).await.unwrap_err();
        assert!(matches!(err, RemoteEngineError::Parse(_)));
    }
}
