use std::sync::Arc;

use comments_api::{
    create_router, init_telemetry, init_tracing,
    instrument::Instrumentation,
    store::{create_db_pool, PgCommentStore},
    AppState, Config,
};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    init_tracing(&config.logging);

    info!(
        service = %config.telemetry.service_name,
        version = env!("CARGO_PKG_VERSION"),
        environment = ?config.server.environment,
        "Starting server"
    );

    for issue in config.validate_for_production() {
        warn!(issue = %issue, "Configuration warning");
    }

    info!(
        database_url = %config.database.url.split('@').next_back().unwrap_or("***"),
        max_connections = config.database.max_connections,
        "Connecting to database"
    );

    let store = PgCommentStore::new(create_db_pool(&config.database));

    let telemetry = match init_telemetry(&config.telemetry) {
        Ok(telemetry) => telemetry,
        Err(e) => {
            error!(error = %e, "Failed to initialize telemetry");
            std::process::exit(1);
        }
    };

    let state = AppState::new(Arc::new(store), telemetry.metrics);
    let instrumentation = Instrumentation::new(telemetry.telemetry);
    let app = create_router(state, &instrumentation, &config);

    let http_addr = config.server_addr();
    let listener = tokio::net::TcpListener::bind(&http_addr)
        .await
        .unwrap_or_else(|e| {
            error!(error = %e, address = %http_addr, "Failed to bind HTTP server");
            std::process::exit(1);
        });

    info!(
        http_address = %http_addr,
        docs_url = %format!("http://{}/api-docs/openapi.json", http_addr),
        "HTTP server ready"
    );

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!(error = %e, "HTTP server error");
    }

    info!("Flushing telemetry");
    telemetry.guard.shutdown();

    info!("Server shutdown complete");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install CTRL+C signal handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("Shutdown signal received");
}
