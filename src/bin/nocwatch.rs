use anyhow::Context;
use nocwatch::{
    compute::{PostgresMetricsSource, SlaComputeWorker},
    config::Config,
    delivery::{DeliveryEngine, DeliveryEngineConfig},
    http::{WebContext, build_router},
    runtime::LocalTaskRuntime,
    storage::{
        DeliveryStorage, PostgresDeliveryStorage, PostgresJobStorage, PostgresStorage,
        PostgresWebhookStorage, Storage, WebhookStorage,
    },
    tasks::{DeliverySweeperTask, spawn_cancellable_task, spawn_managed_task},
    tracker::JobTracker,
    trigger::EventTriggerGateway,
};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("nocwatch=info,tower_http=info,sqlx=warn"));

    if std::env::var("JSON_LOGS").is_ok() {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = ?e, "Failed to install ctrl-c handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = ?e, "Failed to install SIGTERM handler");
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if std::env::args().any(|arg| arg == "--version") {
        println!("nocwatch {}", nocwatch::config::version()?);
        return Ok(());
    }

    init_tracing();

    let config = Config::new().context("failed to load configuration")?;
    info!(version = %config.version, "Starting nocwatch");

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await
        .context("failed to connect to database")?;
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("failed to run database migrations")?;

    let job_storage = Arc::new(PostgresJobStorage::new(pool.clone()));
    let webhook_storage: Arc<dyn WebhookStorage> =
        Arc::new(PostgresWebhookStorage::new(pool.clone()));
    let delivery_storage: Arc<dyn DeliveryStorage> =
        Arc::new(PostgresDeliveryStorage::new(pool.clone()));
    let storage: Arc<dyn Storage> = Arc::new(PostgresStorage::new(pool.clone()));

    let runtime = Arc::new(LocalTaskRuntime::new(config.runtime_retry.clone()));
    let tracker = Arc::new(JobTracker::new(job_storage, runtime.clone()));

    let http_client = reqwest::Client::builder()
        .user_agent(config.user_agent.clone())
        .build()
        .context("failed to build HTTP client")?;

    let engine = Arc::new(DeliveryEngine::new(
        webhook_storage.clone(),
        delivery_storage.clone(),
        http_client,
        DeliveryEngineConfig {
            request_timeout: *config.webhook_request_timeout.as_ref(),
            response_body_limit: config.webhook_response_body_limit,
        },
    ));
    let gateway = Arc::new(EventTriggerGateway::new(
        webhook_storage.clone(),
        delivery_storage.clone(),
        engine.clone(),
    ));
    let metrics = Arc::new(PostgresMetricsSource::new(pool.clone()));
    let worker = Arc::new(SlaComputeWorker::new(tracker.clone(), metrics, gateway));
    runtime.set_executor(worker);

    let web_context = WebContext::new(
        config.clone(),
        tracker,
        engine.clone(),
        webhook_storage,
        delivery_storage,
        storage,
    );
    let router = build_router(web_context);

    let task_tracker = TaskTracker::new();
    let cancel_token = CancellationToken::new();

    let sweeper = DeliverySweeperTask::new(engine, *config.sweep_interval.as_ref());
    spawn_cancellable_task(
        &task_tracker,
        cancel_token.clone(),
        "delivery_sweeper",
        move |token| async move { sweeper.run(token).await },
    );

    let http_port = *config.http_port.as_ref();
    let http_token = cancel_token.clone();
    spawn_managed_task(
        &task_tracker,
        cancel_token.clone(),
        "http_server",
        async move {
            let listener = tokio::net::TcpListener::bind(("0.0.0.0", http_port))
                .await
                .context("failed to bind HTTP listener")?;
            info!(port = http_port, "HTTP server listening");
            axum::serve(listener, router)
                .with_graceful_shutdown(http_token.cancelled_owned())
                .await
                .context("HTTP server failed")?;
            Ok(())
        },
    );

    let signal_token = cancel_token.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Shutdown signal received");
        signal_token.cancel();
    });

    cancel_token.cancelled().await;
    info!("Shutting down; waiting for background tasks");
    task_tracker.close();
    task_tracker.wait().await;
    info!("Shutdown complete");

    Ok(())
}
