//! Notification dispatch service entry point: wires the sharded store,
//! scheduler, callback dispatcher, and JSON API into one process.

use notifyd_api::{ApiState, AuthState};
use notifyd_bizconf::{BizConfCache, PostgresBizConfStore};
use notifyd_callback::{CallbackDispatcher, StaticServiceRegistry};
use notifyd_common::{Channel, ShardTarget};
use notifyd_config::AppConfig;
use notifyd_concurrency::AdjusterConfig;
use notifyd_lock::LockClient;
use notifyd_provider::{ChannelDispatcher, HttpProvider, Provider, SelectorBuilder, SequentialChannel};
use notifyd_quota::QuotaCache;
use notifyd_scheduler::{Scheduler, SchedulerConfig};
use notifyd_sender::Sender;
use notifyd_sharding::{HashStrategy, IdGenerator};
use notifyd_store::{NotificationStore, PostgresCallbackLogStore, PostgresNotificationStore, ShardedPool};
use notifyd_strategy::{DefaultSendStrategy, ImmediateSendStrategy, StrategyDispatcher};
use notifyd_template::{PostgresTemplateStore, TemplateCache};
use sqlx::postgres::PgPoolOptions;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

async fn build_sharded_pool(config: &notifyd_config::DatabaseConfig, sharding: &notifyd_config::ShardingConfig) -> anyhow::Result<ShardedPool> {
    let mut pools = HashMap::new();
    for db_suffix in 0..sharding.db_count {
        let shard = ShardTarget { db_suffix, table_suffix: 0 };
        let db_name = shard.db_name(&sharding.db_prefix);
        let dsn = config
            .dsn_overrides
            .get(&db_suffix)
            .cloned()
            .unwrap_or_else(|| config.dsn.replace("{db_suffix}", &db_suffix.to_string()));

        let pool = PgPoolOptions::new().max_connections(config.pool_size).connect(&dsn).await?;
        info!(db_name = %db_name, "connected to shard database");
        pools.insert(db_name, pool);
    }
    Ok(ShardedPool::new(pools, sharding.db_prefix.clone(), sharding.table_prefix.clone()))
}

fn build_channel_dispatcher(providers: &notifyd_config::ProvidersConfig) -> ChannelDispatcher {
    let mut dispatcher = ChannelDispatcher::new();

    let register = |dispatcher: &mut ChannelDispatcher, channel: Channel, endpoints: &[notifyd_config::ProviderEndpoint]| {
        if endpoints.is_empty() {
            return;
        }
        let mut builder = SelectorBuilder::new();
        for endpoint in endpoints {
            let provider: Arc<dyn Provider> = Arc::new(HttpProvider::new(endpoint.name.clone(), endpoint.url.clone()));
            builder = builder.add(provider);
        }
        dispatcher.register(channel, Box::new(SequentialChannel::new(builder)));
    };

    register(&mut dispatcher, Channel::Sms, &providers.sms);
    register(&mut dispatcher, Channel::Email, &providers.email);
    register(&mut dispatcher, Channel::InApp, &providers.in_app);
    dispatcher
}

fn scheduler_config(cfg: &notifyd_config::SchedulerConfig) -> SchedulerConfig {
    SchedulerConfig {
        max_locked_shards: cfg.max_locked_shards,
        min_schedule_interval: Duration::from_millis(cfg.min_schedule_interval_ms),
        retry_interval: Duration::from_secs(cfg.retry_interval_secs),
        initial_batch_size: cfg.batch_size,
        adjuster: AdjusterConfig {
            min_size: cfg.adjuster_min_size,
            max_size: cfg.adjuster_max_size,
            step: cfg.adjuster_step,
            ring_size: cfg.adjuster_ring_size,
            ..AdjusterConfig::default()
        },
        bitring_window_size: cfg.bitring_window_size,
        bitring_consecutive_threshold: cfg.bitring_consecutive_threshold,
        bitring_event_rate_threshold: cfg.bitring_event_rate_threshold,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    notifyd_common::logging::init_default_logging();
    info!("starting notifyd-server");

    let config = AppConfig::load()?;
    let strategy = HashStrategy::new(config.sharding.db_count, config.sharding.table_count);
    let id_gen = Arc::new(IdGenerator::new());

    let sharded_pool = build_sharded_pool(&config.database, &config.sharding).await?;
    let notif_store: Arc<dyn NotificationStore> =
        Arc::new(PostgresNotificationStore::new(sharded_pool.clone(), strategy, id_gen.clone()));
    notif_store.init_schema(config.sharding.table_count).await?;
    let callback_log_store = Arc::new(PostgresCallbackLogStore::new(sharded_pool.clone()));

    let admin_pool = sharded_pool.pool_for_db(&ShardTarget { db_suffix: 0, table_suffix: 0 }.db_name(&config.sharding.db_prefix))?.clone();
    let bizconf_store = Arc::new(PostgresBizConfStore::new(admin_pool.clone()));
    bizconf_store.init_schema().await?;

    let template_store = Arc::new(PostgresTemplateStore::new(admin_pool));
    template_store.init_schema().await?;

    let redis_client = redis::Client::open(config.redis.url.clone())?;
    let bizconf_remote = redis::aio::ConnectionManager::new(redis_client.clone()).await.ok();
    let bizconf = Arc::new(BizConfCache::new(bizconf_store, bizconf_remote));

    let template_remote = redis::aio::ConnectionManager::new(redis_client.clone()).await.ok();
    let templates = Arc::new(TemplateCache::new(template_store, template_remote));

    let quota = Arc::new(QuotaCache::connect(&config.redis.url).await?);
    let lock_holder_id = LockClient::connect_with_holder_id();
    let lock_client = LockClient::connect(&config.redis.url, lock_holder_id).await?;

    let channel_dispatcher = Arc::new(build_channel_dispatcher(&config.providers));

    let registry = Arc::new(StaticServiceRegistry::new(config.callback.service_endpoints.clone()));
    let callback_dispatcher = Arc::new(CallbackDispatcher::new(
        callback_log_store.clone(),
        notif_store.clone(),
        bizconf.clone(),
        registry,
        strategy,
        config.callback.batch_size,
    ));

    let sender = Arc::new(Sender::new(channel_dispatcher.clone(), notif_store.clone(), quota.clone(), callback_dispatcher.clone()));

    let default_strategy = Arc::new(DefaultSendStrategy::new(quota.clone(), notif_store.clone()));
    let immediate_strategy = Arc::new(ImmediateSendStrategy::new(quota.clone(), notif_store.clone(), sender.clone()));
    let dispatcher = Arc::new(StrategyDispatcher::new(immediate_strategy, default_strategy, templates));

    let scheduler = Arc::new(Scheduler::new(strategy, lock_client, notif_store.clone(), sender.clone(), scheduler_config(&config.scheduler)));
    tokio::spawn(scheduler.run());

    let callback_poll_interval = Duration::from_millis(config.callback.poll_interval_ms);
    tokio::spawn(async move {
        loop {
            let now_ms = std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).expect("clock before epoch").as_millis() as i64;
            callback_dispatcher.run_once(now_ms).await;
            tokio::time::sleep(callback_poll_interval).await;
        }
    });

    let jwt_public_key = std::fs::read(&config.jwt.public_key_path)
        .map_err(|err| anyhow::anyhow!("failed to read JWT public key at {}: {err}", config.jwt.public_key_path))?;
    let auth_state = AuthState::from_ed25519_pem(&jwt_public_key)?;

    let api_state = ApiState { dispatcher, bizconf };
    let app = notifyd_api::build_router(api_state, auth_state);

    let prometheus_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .map_err(|err| anyhow::anyhow!("failed to install metrics recorder: {err}"))?;
    let metrics_addr = SocketAddr::from(([0, 0, 0, 0], config.http.metrics_port));
    let metrics_app = axum::Router::new().route(
        "/metrics",
        axum::routing::get(move || {
            let handle = prometheus_handle.clone();
            async move { handle.render() }
        }),
    );
    let metrics_listener = tokio::net::TcpListener::bind(metrics_addr).await?;
    info!(%metrics_addr, "metrics server starting");
    tokio::spawn(async move {
        if let Err(err) = axum::serve(metrics_listener, metrics_app).await {
            tracing::error!(error = %err, "metrics server exited");
        }
    });

    let addr = SocketAddr::from(([0, 0, 0, 0], config.http.port));
    info!(?addr, "HTTP server starting");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;

    info!("notifyd-server stopped");
    Ok(())
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    info!("shutdown signal received");
}
