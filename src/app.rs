//! Process wiring: database pool, AMQP channels, handler context, consumer,
//! and the axum control plane.

use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use axum::{Router, routing::get};
use lapin::options::ConfirmSelectOptions;
use lapin::{Connection, ConnectionProperties};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::api;
use crate::bus::consumer::{ConsumerConfig, NotificationConsumer};
use crate::bus::publisher::{LapinPublisher, PublisherRoutes};
use crate::clients::HttpAuthClient;
use crate::config::Config;
use crate::observability::Telemetry;
use crate::pipeline::{HandlerContext, router::Router as DispatchRouter};
use crate::store::dao::PgDao;

#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    telemetry: Telemetry,
    pool: PgPool,
    auth: Arc<HttpAuthClient>,
}

impl AppState {
    pub(crate) fn telemetry(&self) -> &Telemetry {
        &self.inner.telemetry
    }

    pub(crate) fn pool(&self) -> &PgPool {
        &self.inner.pool
    }

    pub(crate) fn auth_client(&self) -> &HttpAuthClient {
        &self.inner.auth
    }
}

pub struct ComponentRegistry {
    config: Arc<Config>,
    telemetry: Telemetry,
    pool: PgPool,
    auth: Arc<HttpAuthClient>,
    consumer: Option<NotificationConsumer>,
    shutdown: CancellationToken,
}

impl ComponentRegistry {
    /// Connect to Postgres and the broker and assemble the handler stack.
    pub async fn build(config: Config) -> Result<Self> {
        let config = Arc::new(config);
        let telemetry = Telemetry::new().context("failed to initialize telemetry")?;

        let pool = PgPoolOptions::new()
            .max_connections(config.db_max_connections())
            .min_connections(config.db_min_connections())
            .acquire_timeout(config.db_acquire_timeout())
            .connect(config.database_url())
            .await
            .context("failed to connect to the database")?;

        let connection = Connection::connect(config.amqp_uri(), ConnectionProperties::default())
            .await
            .context("failed to connect to the broker")?;

        let publisher_channel = connection
            .create_channel()
            .await
            .context("failed to open the publisher channel")?;
        publisher_channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .context("failed to enable publisher confirms")?;

        let publisher = Arc::new(LapinPublisher::new(
            publisher_channel,
            PublisherRoutes {
                generation_tasks: config.generation_task_queue().to_string(),
                image_tasks: config.image_task_queue().to_string(),
                image_task_batches: config.image_batch_queue().to_string(),
                client_updates: config.client_update_queue().to_string(),
                push_notifications: config.push_queue().to_string(),
            },
            config.publish_timeout(),
        ));

        let auth = Arc::new(
            HttpAuthClient::new(
                config.auth_service_base_url(),
                config.auth_service_timeout(),
                config.auth_service_token().map(ToString::to_string),
            )
            .context("failed to build the auth-service client")?,
        );

        let dao = Arc::new(PgDao::new(pool.clone()));
        let metrics = telemetry.metrics();

        let dispatch_router = Arc::new(DispatchRouter::new(HandlerContext {
            dao,
            tasks: Arc::clone(&publisher) as _,
            updates: publisher as _,
            auth: Arc::clone(&auth) as _,
            metrics: Arc::clone(&metrics),
            default_language: config.default_language().to_string(),
        }));

        let consumer_channel = connection
            .create_channel()
            .await
            .context("failed to open the consumer channel")?;

        let shutdown = CancellationToken::new();
        let consumer = NotificationConsumer::new(
            consumer_channel,
            ConsumerConfig {
                queue: config.notification_queue().to_string(),
                dead_letter_exchange: config.dead_letter_exchange().to_string(),
                concurrency: config.consumer_concurrency().get(),
                handler_timeout: config.handler_timeout(),
            },
            dispatch_router,
            metrics,
            shutdown.clone(),
        );

        Ok(Self {
            config,
            telemetry,
            pool,
            auth,
            consumer: Some(consumer),
            shutdown,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn telemetry(&self) -> &Telemetry {
        &self.telemetry
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Start the consumer loop; callable once.
    pub fn spawn_consumer(&mut self) -> Result<JoinHandle<Result<()>>> {
        let consumer = self
            .consumer
            .take()
            .ok_or_else(|| anyhow!("consumer already started"))?;
        Ok(tokio::spawn(consumer.run()))
    }

    pub fn app_state(&self) -> AppState {
        AppState {
            inner: Arc::new(AppStateInner {
                telemetry: self.telemetry.clone(),
                pool: self.pool.clone(),
                auth: Arc::clone(&self.auth),
            }),
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health/live", get(api::health::live))
        .route("/health/ready", get(api::health::ready))
        .route("/metrics", get(api::metrics::render))
        .with_state(state)
}
