use clap::Parser;
use dotenvy::dotenv;
use nas_upload_gateway::config::UploadConfig;
use nas_upload_gateway::infrastructure::{database, storage};
use nas_upload_gateway::services::janitor::DailySchedule;
use nas_upload_gateway::services::session_cache::SeaOrmSessionStore;
use nas_upload_gateway::{AppState, create_app};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Service type to run (api, janitor, all)
    #[arg(short, long, default_value = "all")]
    mode: String,

    /// Port for the API server
    #[arg(short, long, default_value_t = 3000)]
    port: u16,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Initial Environment & Logging Setup
    dotenv().ok();
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "nas_upload_gateway=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if !matches!(args.mode.as_str(), "api" | "janitor" | "all") {
        anyhow::bail!("unknown mode '{}', expected api, janitor or all", args.mode);
    }

    info!("🚀 Starting NAS Upload Gateway [Mode: {}]...", args.mode);

    // 2. Setup Common Infrastructure
    let config = UploadConfig::from_env();
    info!(
        "⚙️  Upload Config: Chunk={}MB, Staging={}, Backend={}, Reload per request={}",
        config.chunk_size_mb,
        config.staging_root.display(),
        config.destination_backend,
        config.reload_per_request
    );

    let db = database::setup_database().await?;
    let destination = storage::setup_destination(&config).await?;
    let schedule = DailySchedule::new(config.janitor_hour, config.janitor_utc_offset_hours)?;

    let state = AppState::new(
        config.clone(),
        Arc::new(SeaOrmSessionStore::new(db)),
        destination,
    );

    // 3. Clean slate before admitting uploads
    state.staging.ensure_root().await?;
    if config.janitor_on_startup {
        if let Err(e) = state.janitor.sweep().await {
            error!("❌ Startup staging sweep failed: {}", e);
        }
    }
    match state.cache.reload().await {
        Ok(count) => info!("🔑 Loaded {} active upload links", count),
        Err(e) => error!("❌ Initial session cache load failed: {}", e),
    }

    // 4. Setup Graceful Shutdown Channel
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let mut handles = Vec::new();

    // 5. Initialize Janitor
    if args.mode == "janitor" || args.mode == "all" {
        let janitor = state.janitor.clone();
        let janitor_shutdown = shutdown_rx.clone();
        handles.push(tokio::spawn(janitor.run(schedule, janitor_shutdown)));
        info!(
            "🧹 Staging janitor scheduled daily at {:02}:00 (UTC{:+})",
            config.janitor_hour, config.janitor_utc_offset_hours
        );
    }

    // 6. Initialize API Service
    if args.mode == "api" || args.mode == "all" {
        let trace_layer = TraceLayer::new_for_http()
            .make_span_with(|request: &axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get("x-request-id")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("unknown");
                tracing::info_span!(
                    "http_request",
                    method = %request.method(),
                    uri = %request.uri(),
                    request_id = %request_id,
                )
            })
            .on_request(|request: &axum::http::Request<_>, _span: &tracing::Span| {
                info!("📥 {} {}", request.method(), request.uri());
            })
            .on_response(
                |response: &axum::http::Response<_>,
                 latency: std::time::Duration,
                 _span: &tracing::Span| {
                    info!(
                        "📤 Finished in {:?} with status {}",
                        latency,
                        response.status()
                    );
                },
            );

        let app = create_app(state.clone()).layer(trace_layer);
        let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
        let listener = tokio::net::TcpListener::bind(addr).await?;

        info!("✅ API Server listening on: http://0.0.0.0:{}", args.port);
        info!("📖 Swagger UI documentation: http://localhost:{}/swagger-ui", args.port);

        let mut server_shutdown = shutdown_rx.clone();
        handles.push(tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = server_shutdown.changed().await;
                })
                .await
            {
                error!("❌ Server runtime error: {}", e);
            }
        }));
    }

    // 7. Wait for Shutdown Signal
    shutdown_signal().await;
    let _ = shutdown_tx.send(true);

    info!("🛑 Shutting down gateway services...");
    for handle in handles {
        let _ = handle.await;
    }

    info!("👋 Gateway exited cleanly.");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("⌨️  Ctrl+C received, initiating graceful shutdown...");
        },
        _ = terminate => {
            info!("💤 SIGTERM received, initiating graceful shutdown...");
        },
    }
}
