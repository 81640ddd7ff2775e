//! Outbound message emission.
//!
//! Contracts are traits so handlers can be exercised against recording fakes;
//! the production implementation publishes over AMQP with publisher confirms.
//! Publishing is the only place the orchestrator retries anything: three
//! attempts with linear backoff, then a loud error for the operator.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use lapin::{
    BasicProperties, Channel, options::BasicPublishOptions, publisher_confirm::Confirmation,
};
use serde::Serialize;
use tracing::{debug, warn};

use super::types::{
    ClientUpdate, GenerationTaskPayload, ImageTaskBatchPayload, ImageTaskPayload, PushNotification,
};
use crate::util::retry::RetryPolicy;

/// Follow-on work for the AI workers.
#[async_trait]
pub(crate) trait TaskPublisher: Send + Sync {
    async fn publish_generation_task(&self, task: &GenerationTaskPayload) -> Result<()>;
    async fn publish_image_task(&self, task: &ImageTaskPayload) -> Result<()>;
    async fn publish_image_task_batch(&self, batch: &ImageTaskBatchPayload) -> Result<()>;
}

/// Client-facing emission: real-time updates and push notifications.
#[async_trait]
pub(crate) trait UpdatePublisher: Send + Sync {
    async fn publish_client_update(&self, update: &ClientUpdate) -> Result<()>;
    async fn publish_push_notification(&self, push: &PushNotification) -> Result<()>;
}

/// Queue names the publisher addresses through the default exchange.
#[derive(Debug, Clone)]
pub(crate) struct PublisherRoutes {
    pub(crate) generation_tasks: String,
    pub(crate) image_tasks: String,
    pub(crate) image_task_batches: String,
    pub(crate) client_updates: String,
    pub(crate) push_notifications: String,
}

pub(crate) struct LapinPublisher {
    channel: Channel,
    routes: PublisherRoutes,
    retry: RetryPolicy,
    publish_timeout: Duration,
}

impl LapinPublisher {
    /// The channel must already be in confirm mode (`confirm_select`).
    pub(crate) fn new(channel: Channel, routes: PublisherRoutes, publish_timeout: Duration) -> Self {
        Self {
            channel,
            routes,
            retry: RetryPolicy::default(),
            publish_timeout,
        }
    }

    async fn publish_json<T: Serialize>(
        &self,
        routing_key: &str,
        payload: &T,
        label: &'static str,
    ) -> Result<()> {
        let body = serde_json::to_vec(payload).context("failed to encode outbound payload")?;

        let mut attempt = 0;
        loop {
            match self.try_publish(routing_key, &body).await {
                Ok(()) => {
                    debug!(routing_key, label, attempt, "published message");
                    return Ok(());
                }
                Err(error) => {
                    attempt += 1;
                    if !self.retry.can_retry(attempt) {
                        return Err(error).with_context(|| {
                            format!("giving up publishing {label} to {routing_key} after {attempt} attempts")
                        });
                    }
                    warn!(
                        routing_key,
                        label,
                        attempt,
                        error = %error,
                        "publish attempt failed, retrying"
                    );
                    tokio::time::sleep(self.retry.delay_for_attempt(attempt)).await;
                }
            }
        }
    }

    async fn try_publish(&self, routing_key: &str, body: &[u8]) -> Result<()> {
        let publish = self.channel.basic_publish(
            "",
            routing_key,
            BasicPublishOptions::default(),
            body,
            BasicProperties::default()
                .with_content_type("application/json".into())
                .with_delivery_mode(2),
        );

        let confirmation = tokio::time::timeout(self.publish_timeout, async {
            publish.await?.await
        })
        .await
        .context("publish timed out")??;

        if let Confirmation::Nack(_) = confirmation {
            anyhow::bail!("broker nacked the publish");
        }
        Ok(())
    }
}

#[async_trait]
impl TaskPublisher for LapinPublisher {
    async fn publish_generation_task(&self, task: &GenerationTaskPayload) -> Result<()> {
        self.publish_json(&self.routes.generation_tasks, task, "generation task")
            .await
    }

    async fn publish_image_task(&self, task: &ImageTaskPayload) -> Result<()> {
        self.publish_json(&self.routes.image_tasks, task, "image task")
            .await
    }

    async fn publish_image_task_batch(&self, batch: &ImageTaskBatchPayload) -> Result<()> {
        self.publish_json(
            &self.routes.image_task_batches,
            batch,
            "image task batch",
        )
        .await
    }
}

#[async_trait]
impl UpdatePublisher for LapinPublisher {
    async fn publish_client_update(&self, update: &ClientUpdate) -> Result<()> {
        self.publish_json(&self.routes.client_updates, update, "client update")
            .await
    }

    async fn publish_push_notification(&self, push: &PushNotification) -> Result<()> {
        self.publish_json(
            &self.routes.push_notifications,
            push,
            "push notification",
        )
        .await
    }
}
