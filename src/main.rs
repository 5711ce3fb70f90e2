use axum::{routing::get, Router};
use clap::Parser;
use stage_service::{routes, AppState, Config, Database};
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "apigateway", version = "0.1.0")]
#[command(about = "Stage management API for the gateway control plane")]
struct Args {
    /// SQLite database URL, overrides DATABASE_URL
    #[arg(long)]
    database_url: Option<String>,

    /// Address to listen on, overrides BIND_ADDRESS
    #[arg(long)]
    bind_address: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if args.json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(false)
                    .flatten_event(true)
                    .with_span_list(false),
            )
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let mut config = Config::init().clone();
    if let Some(url) = args.database_url {
        config.database_url = url;
    }
    if let Some(addr) = args.bind_address {
        config.bind_address = addr;
    }

    info!(
        database = config.database_url.as_str(),
        bind_address = config.bind_address.as_str(),
        max_stage_count = config.max_stage_count_per_gateway,
        "Starting stage service"
    );

    let database = Database::new(&config.database_url, config.database_max_connections).await?;
    let state = AppState::new(database, &config);

    let app = Router::new()
        .nest("/api/v1", routes())
        .route("/health", get(|| async { "OK" }))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    info!(bind_address = config.bind_address.as_str(), "HTTP server listening");

    axum::serve(listener, app).with_graceful_shutdown(signal()).await?;
    Ok(())
}

async fn signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to install CTRL+C signal handler");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received, terminating...");
}
