//! Bounded-concurrency consumer for the inbound notification queue.
//!
//! The queue is declared with the same durable, lazy, DLX-routed settings the
//! workers use. Each delivery is handled on its own task under a semaphore
//! and a per-message deadline; a nil handler result acknowledges, anything
//! else (including a panic or a timeout) rejects without requeue so the DLX
//! traps permanent failures.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use futures::FutureExt;
use futures::stream::StreamExt;
use lapin::message::Delivery;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicQosOptions, QueueDeclareOptions,
};
use lapin::types::{AMQPValue, FieldTable};
use lapin::Channel;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::observability::metrics::Metrics;
use crate::pipeline::router::Router;

#[derive(Debug, Clone)]
pub(crate) struct ConsumerConfig {
    pub(crate) queue: String,
    pub(crate) dead_letter_exchange: String,
    pub(crate) concurrency: usize,
    pub(crate) handler_timeout: Duration,
}

pub(crate) struct NotificationConsumer {
    channel: Channel,
    config: ConsumerConfig,
    router: Arc<Router>,
    metrics: Arc<Metrics>,
    shutdown: CancellationToken,
}

impl NotificationConsumer {
    pub(crate) fn new(
        channel: Channel,
        config: ConsumerConfig,
        router: Arc<Router>,
        metrics: Arc<Metrics>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            channel,
            config,
            router,
            metrics,
            shutdown,
        }
    }

    /// Pull until shutdown, then drain in-flight handlers.
    pub(crate) async fn run(self) -> Result<()> {
        let mut queue_args = FieldTable::default();
        queue_args.insert(
            "x-queue-mode".into(),
            AMQPValue::LongString("lazy".into()),
        );
        queue_args.insert(
            "x-dead-letter-exchange".into(),
            AMQPValue::LongString(self.config.dead_letter_exchange.clone().into()),
        );

        self.channel
            .queue_declare(
                &self.config.queue,
                QueueDeclareOptions {
                    durable: true,
                    ..QueueDeclareOptions::default()
                },
                queue_args,
            )
            .await
            .context("failed to declare the notification queue")?;

        self.channel
            .basic_qos(
                self.config.concurrency as u16,
                BasicQosOptions::default(),
            )
            .await
            .context("failed to set channel prefetch")?;

        let mut consumer = self
            .channel
            .basic_consume(
                &self.config.queue,
                "story-orchestrator",
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .context("failed to start consuming")?;

        info!(
            queue = %self.config.queue,
            concurrency = self.config.concurrency,
            "notification consumer started"
        );

        let semaphore = Arc::new(Semaphore::new(self.config.concurrency));

        loop {
            let delivery = tokio::select! {
                () = self.shutdown.cancelled() => break,
                delivery = consumer.next() => delivery,
            };

            let Some(delivery) = delivery else {
                warn!("consumer stream closed by the broker");
                break;
            };
            let delivery = match delivery {
                Ok(delivery) => delivery,
                Err(error) => {
                    error!(error = %error, "failed to receive delivery");
                    continue;
                }
            };

            self.metrics.record_consumed();

            let permit = Arc::clone(&semaphore)
                .acquire_owned()
                .await
                .context("consumer semaphore closed")?;
            let router = Arc::clone(&self.router);
            let metrics = Arc::clone(&self.metrics);
            let timeout = self.config.handler_timeout;

            tokio::spawn(async move {
                let _permit = permit;
                handle_delivery(router, metrics, timeout, delivery).await;
            });
        }

        // Drain: every permit back means every in-flight handler finished.
        let _drain = semaphore
            .acquire_many(self.config.concurrency as u32)
            .await
            .context("consumer semaphore closed during drain")?;

        info!("notification consumer drained");
        Ok(())
    }
}

async fn handle_delivery(
    router: Arc<Router>,
    metrics: Arc<Metrics>,
    timeout: Duration,
    delivery: Delivery,
) {
    // Panics must not leak past the message boundary; an uncommitted
    // transaction rolls back when its connection drops with the task.
    let outcome = std::panic::AssertUnwindSafe(tokio::time::timeout(
        timeout,
        router.process(&delivery.data),
    ))
    .catch_unwind()
    .await;

    let ack = match outcome {
        Ok(Ok(Ok(()))) => true,
        Ok(Ok(Err(error))) => {
            error!(error = %format!("{error:#}"), "handler failed, dead-lettering");
            false
        }
        Ok(Err(_elapsed)) => {
            metrics.record_handler_timeout();
            error!("handler exceeded its deadline, dead-lettering");
            false
        }
        Err(_panic) => {
            error!("handler panicked, dead-lettering");
            false
        }
    };

    if ack {
        if let Err(error) = delivery.ack(BasicAckOptions::default()).await {
            error!(error = %error, "failed to ack delivery");
        } else {
            metrics.record_acked();
        }
    } else if let Err(error) = delivery
        .nack(BasicNackOptions {
            requeue: false,
            ..BasicNackOptions::default()
        })
        .await
    {
        error!(error = %error, "failed to nack delivery");
    } else {
        metrics.record_nacked();
    }
}
