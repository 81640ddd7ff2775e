//! Auth-service client used for author attribution on story-ready pushes.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::Deserialize;
use uuid::Uuid;

/// Display name shown when the auth service cannot be reached; attribution
/// failures degrade the push text, never the pipeline.
pub(crate) const FALLBACK_AUTHOR_NAME: &str = "an author";

#[async_trait]
pub(crate) trait AuthorLookup: Send + Sync {
    async fn display_name(&self, user_id: Uuid) -> Result<String>;
}

#[derive(Debug, Clone)]
pub(crate) struct HttpAuthClient {
    client: Client,
    base_url: Url,
    service_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProfileResponse {
    display_name: String,
}

impl HttpAuthClient {
    pub(crate) fn new(
        base_url: impl Into<String>,
        total_timeout: Duration,
        service_token: Option<String>,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(total_timeout)
            .build()
            .context("failed to build auth-service client")?;

        let base_url = Url::parse(&base_url.into()).context("invalid auth-service base URL")?;

        Ok(Self {
            client,
            base_url,
            service_token,
        })
    }

    pub(crate) async fn health_check(&self) -> Result<()> {
        let url = self
            .base_url
            .join("health")
            .context("failed to build auth-service health URL")?;

        self.client
            .get(url)
            .send()
            .await
            .context("auth-service health request failed")?
            .error_for_status()
            .context("auth-service health endpoint returned error status")?;

        Ok(())
    }
}

#[async_trait]
impl AuthorLookup for HttpAuthClient {
    async fn display_name(&self, user_id: Uuid) -> Result<String> {
        let url = self
            .base_url
            .join(&format!("internal/users/{user_id}/profile"))
            .context("failed to build auth-service profile URL")?;

        let mut request = self.client.get(url);
        if let Some(token) = &self.service_token {
            request = request.bearer_auth(token);
        }

        let profile: ProfileResponse = request
            .send()
            .await
            .context("auth-service profile request failed")?
            .error_for_status()
            .context("auth-service profile request was rejected")?
            .json()
            .await
            .context("auth-service profile response is not valid JSON")?;

        Ok(profile.display_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn resolves_display_name() {
        let server = MockServer::start().await;
        let user_id = Uuid::new_v4();

        Mock::given(method("GET"))
            .and(path(format!("/internal/users/{user_id}/profile")))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({
                    "displayName": "Quill Marlowe"
                })),
            )
            .mount(&server)
            .await;

        let client =
            HttpAuthClient::new(server.uri(), Duration::from_secs(5), None).unwrap();
        let name = client.display_name(user_id).await.unwrap();
        assert_eq!(name, "Quill Marlowe");
    }

    #[tokio::test]
    async fn surfaces_http_errors() {
        let server = MockServer::start().await;
        let user_id = Uuid::new_v4();

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client =
            HttpAuthClient::new(server.uri(), Duration::from_secs(5), None).unwrap();
        assert!(client.display_name(user_id).await.is_err());
    }
}
