//! Resource management for infrastructure setup.
//!
//! Centralizes initialization of the pipeline's collaborators - relational
//! store, admission queue, channels, external platform - into a single
//! `ResourceManager`, so the daemon binary and any embedding transport host
//! wire against one struct instead of re-plumbing connections.

use crate::config::Config;
use crate::platform::{DeliveryExecutor, HttpDataPlatform};
use flashdrop_admission::RedisAdmissionQueue;
use flashdrop_core::clock::SystemClock;
use flashdrop_postgres::{PgCampaignStore, PgFailureSink, PgOutboxStore};
use flashdrop_redpanda::{RedpandaDlqChannel, RedpandaIssueChannel, RequestConsumer};
use flashdrop_runtime::{DlqConsumer, IssuanceGate, IssuanceWorker, OutboxRelay, ReliableDelivery};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::info;

/// Central owner of all infrastructure resources.
///
/// Everything is `Arc`-wrapped so gates, workers, and sweeps can share the
/// same connections across tasks.
pub struct ResourceManager {
    /// Application configuration.
    pub config: Arc<Config>,
    /// Campaigns, grants, and the issuance transaction.
    pub campaign_store: Arc<PgCampaignStore>,
    /// The events-to-publish table.
    pub outbox_store: Arc<PgOutboxStore>,
    /// Terminal sink for exhausted dead-letter envelopes.
    pub failure_sink: Arc<PgFailureSink>,
    /// Redis admission queue, quota-sourced from the campaigns table.
    pub admission: Arc<RedisAdmissionQueue>,
    /// Request/result producer.
    pub issue_channel: Arc<RedpandaIssueChannel>,
    /// Dead-letter channel.
    pub dlq_channel: Arc<RedpandaDlqChannel>,
    /// External data platform client.
    pub data_platform: Arc<HttpDataPlatform>,
    /// Guarded delivery path (platform send + dead-letter routing).
    pub reliable_delivery: Arc<ReliableDelivery>,
    /// System clock shared by all components.
    pub clock: Arc<SystemClock>,
}

impl ResourceManager {
    /// Connect every collaborator and run database migrations.
    ///
    /// # Errors
    ///
    /// Returns an error if any connection, migration, or client build
    /// fails.
    pub async fn from_config(config: Arc<Config>) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.postgres.max_connections)
            .acquire_timeout(Duration::from_secs(config.postgres.connect_timeout))
            .connect(&config.postgres.url)
            .await?;
        sqlx::migrate!("../postgres/migrations").run(&pool).await?;
        info!("Database connected and migrated");

        let campaign_store = Arc::new(PgCampaignStore::new(pool.clone()));
        let outbox_store = Arc::new(PgOutboxStore::new(pool.clone()));
        let failure_sink = Arc::new(PgFailureSink::new(pool));

        let admission = Arc::new(
            RedisAdmissionQueue::new(&config.redis.url, campaign_store.clone()).await?,
        );
        info!("Admission queue connected");

        let issue_channel = Arc::new(
            RedpandaIssueChannel::builder()
                .brokers(&config.redpanda.brokers)
                .producer_acks("all")
                .request_topic(&config.redpanda.request_topic)
                .result_topic(&config.redpanda.result_topic)
                .build()?,
        );
        let dlq_channel = Arc::new(RedpandaDlqChannel::new(
            &config.redpanda.brokers,
            &config.redpanda.dlq_topic,
            &config.redpanda.dlq_group,
        )?);
        info!("Channels connected");

        let data_platform = Arc::new(HttpDataPlatform::new(
            &config.platform.endpoint,
            Duration::from_secs(config.platform.request_timeout),
        )?);
        let clock = Arc::new(SystemClock);
        let reliable_delivery = Arc::new(ReliableDelivery::new(
            data_platform.clone(),
            dlq_channel.clone(),
            clock.clone(),
        ));

        Ok(Self {
            config,
            campaign_store,
            outbox_store,
            failure_sink,
            admission,
            issue_channel,
            dlq_channel,
            data_platform,
            reliable_delivery,
            clock,
        })
    }

    /// Build the submission gate the transport layer calls.
    #[must_use]
    pub fn issuance_gate(&self) -> IssuanceGate {
        IssuanceGate::new(
            self.admission.clone(),
            self.issue_channel.clone(),
            self.clock.clone(),
        )
    }

    /// Spawn the background pipeline: issuance worker, outbox relay, and
    /// dead-letter consumer. Returns named join handles for shutdown
    /// coordination.
    #[must_use]
    pub fn spawn_pipeline(
        &self,
        shutdown: &broadcast::Sender<()>,
    ) -> Vec<(&'static str, tokio::task::JoinHandle<()>)> {
        let worker = Arc::new(IssuanceWorker::new(
            self.campaign_store.clone(),
            self.issue_channel.clone(),
            self.clock.clone(),
        ));
        let worker_handle = RequestConsumer::builder()
            .brokers(&self.config.redpanda.brokers)
            .group(&self.config.redpanda.worker_group)
            .topic(&self.config.redpanda.request_topic)
            .handler(worker)
            .shutdown(shutdown.subscribe())
            .build()
            .spawn();

        let relay_handle = OutboxRelay::new(
            self.outbox_store.clone(),
            Arc::new(DeliveryExecutor::new(self.reliable_delivery.clone())),
            self.config.relay_config(),
        )
        .spawn(shutdown.subscribe());

        let dlq_handle = DlqConsumer::new(
            self.dlq_channel.clone(),
            self.data_platform.clone(),
            self.failure_sink.clone(),
            self.clock.clone(),
        )
        .spawn(shutdown.subscribe());

        vec![
            ("issuance-worker", worker_handle),
            ("outbox-relay", relay_handle),
            ("dlq-pipeline", dlq_handle),
        ]
    }
}
