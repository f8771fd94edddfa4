use clap::Parser;
use graphgate::{create_router, BookmarkManager, MemoryGraph};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "graphgate")]
#[command(about = "HTTP gateway for transactional graph databases", long_about = None)]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value_t = 7474)]
    port: u16,

    /// Database targeted by the default (non-/db/{name}) routes
    #[arg(long, default_value = "neo4j")]
    default_database: String,

    /// Require this user:password pair instead of accepting any principal
    #[arg(long)]
    credentials: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "graphgate=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let driver = match &args.credentials {
        Some(pair) => {
            let (user, password) = pair.split_once(':').ok_or_else(|| {
                anyhow::anyhow!("--credentials must be of the form user:password")
            })?;
            tracing::info!("Accepting only principal '{}'", user);
            MemoryGraph::with_credentials(user, password)
        }
        None => MemoryGraph::new(),
    };

    let app = create_router(
        Arc::new(driver),
        Arc::new(BookmarkManager::new()),
        &args.default_database,
    );

    let addr = format!("0.0.0.0:{}", args.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(
        "Gateway listening on {} (default database: {})",
        addr,
        args.default_database
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
