//! The GiveHub background worker.
//!
//! One process, two pipelines: mail (`mail.send`) and notifications
//! (`notification.create`), each a [`QueueWorker`] over the shared
//! broker connection. Health and metrics are served over HTTP for
//! Kubernetes probes and Prometheus scrapes.

mod config;
mod telemetry;

pub use config::{Environment, WorkerSettings};

use std::sync::Arc;
use std::time::Duration;

use broker::{BrokerManager, HealthServer, QueueWorker};
use eyre::WrapErr;
use mail::{MailConfig, MailHandler, MailTransport, MockTransport, SendGridTransport};
use notifications::{NatsRealtime, NatsStore, NotificationHandler};
use tokio::sync::watch;
use tracing::{error, info};

pub async fn run() -> eyre::Result<()> {
    let settings = WorkerSettings::from_env();
    telemetry::init_tracing(settings.environment);

    info!(
        environment = ?settings.environment,
        broker_url = %settings.connect.url,
        "Starting GiveHub worker"
    );

    let metrics_handle = broker::init_metrics().wrap_err("failed to install metrics recorder")?;

    let manager = Arc::new(BrokerManager::new(settings.connect.clone()));
    // Connect up front; exhausted reconnects are fatal and the process
    // exits non-zero for the orchestrator to restart.
    let jetstream = manager
        .jetstream()
        .await
        .wrap_err("broker unavailable at startup")?;

    let health_server = HealthServer::new(settings.health_port).with_metrics(metrics_handle);
    let health = health_server.state();
    tokio::spawn(async move {
        if let Err(error) = health_server.run().await {
            error!(%error, "Health server exited");
        }
    });
    spawn_broker_watchdog(manager.clone(), health.clone(), settings.connect.heartbeat);

    let mail_transport: Arc<dyn MailTransport> = if settings.environment.is_production() {
        let mail_config = MailConfig::from_env().wrap_err("mail configuration")?;
        Arc::new(SendGridTransport::new(&mail_config).wrap_err("build SendGrid client")?)
    } else {
        info!("Using the in-memory mail transport; set APP_ENV=production for SendGrid");
        Arc::new(MockTransport::new())
    };
    let mail_handler = MailHandler::new(mail_transport, settings.mail_send_timeout);

    let store = NatsStore::new(jetstream);
    store
        .ensure_stream()
        .await
        .wrap_err("create notification persistence stream")?;
    let realtime = NatsRealtime::new(manager.client().await?);
    let notification_handler = NotificationHandler::new(Arc::new(store), Arc::new(realtime));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Shutdown signal received, draining workers");
        let _ = shutdown_tx.send(true);
    });

    let mail_worker = QueueWorker::new(manager.clone(), mail_handler, settings.mail_queue.clone());
    let notification_worker = QueueWorker::new(
        manager.clone(),
        notification_handler,
        settings.notification_queue.clone(),
    );

    let mail_task = tokio::spawn({
        let shutdown_rx = shutdown_rx.clone();
        async move { mail_worker.run(shutdown_rx).await }
    });
    let notification_task = tokio::spawn({
        let shutdown_rx = shutdown_rx.clone();
        async move { notification_worker.run(shutdown_rx).await }
    });

    let (mail_result, notification_result) =
        tokio::try_join!(mail_task, notification_task).wrap_err("worker task panicked")?;

    for (queue, result) in [
        ("mail", &mail_result),
        ("notifications", &notification_result),
    ] {
        if let Err(error) = result {
            health.set_pipelines_healthy(false).await;
            health.set_error(Some(error.to_string())).await;
            error!(queue, %error, "Pipeline stopped with an error");
        }
    }
    mail_result?;
    notification_result?;

    manager.shutdown().await?;
    info!("Worker stopped");
    Ok(())
}

/// Keep the readiness probe in step with the broker connection.
fn spawn_broker_watchdog(
    manager: Arc<BrokerManager>,
    health: broker::HealthState,
    heartbeat: Duration,
) {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(heartbeat);
        loop {
            tick.tick().await;
            health.set_broker_connected(manager.is_connected()).await;
        }
    });
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            error!(%error, "Failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(error) => error!(%error, "Failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
