// Coursewire realtime server entrypoint

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use coursewire_realtime::config::Config;
use coursewire_realtime::server::{RealtimeServer, Stores};
use coursewire_storage::{
    Database, DbChangeLogSource, DbSessionStore, DbTaAssignmentSource, SchemaCapabilities,
};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "coursewire_realtime=debug,coursewire_storage=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("coursewire-realtime starting...");

    let config = Config::from_env();

    // Initialize database
    let database_url =
        std::env::var("DATABASE_URL").context("DATABASE_URL environment variable required")?;
    let db = Database::from_url(&database_url)
        .await
        .context("Failed to connect to database")?;
    tracing::info!("Connected to database");

    // Resolve the deployment's optional schema features once
    let capabilities = SchemaCapabilities::probe(&db)
        .await
        .context("Failed to probe schema capabilities")?;
    tracing::info!(
        payload_column = capabilities.change_log_payload,
        ta_order_key = ?capabilities.ta_order_key,
        "Schema capabilities resolved"
    );

    let stores = Stores {
        sessions: Arc::new(DbSessionStore::new(db.clone())),
        change_log: Arc::new(DbChangeLogSource::new(&db, &capabilities)),
        ta_assignments: Arc::new(DbTaAssignmentSource::new(&db, &capabilities)),
    };

    let server = RealtimeServer::new(config, stores);

    // SIGINT/SIGTERM stop the accept loop and close out live connections
    let shutdown = server.shutdown_handle();
    tokio::spawn(async move {
        wait_for_signal().await;
        tracing::info!("shutdown signal received");
        let _ = shutdown.send(());
    });

    server.run().await
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = terminate.recv() => {}
                }
            }
            Err(_) => {
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
