//! Warden API server binary.
//!
//! Builds every component in dependency order (configuration, directory,
//! auth service, router) and serves the HTTP API.

use std::sync::Arc;

use clap::Parser;
use sqlx::postgres::PgPoolOptions;
use tracing::{info, warn};
use warden_api::config::ApiConfig;
use warden_core::auth::service::AuthService;
use warden_core::clock::SystemClock;
use warden_core::config::AuthConfig;
use warden_core::directory::memory::MemoryDirectory;
use warden_core::directory::postgres::PgDirectory;
use warden_core::directory::{RefreshTokenStore, UserDirectory};

/// CLI arguments for the API server.
#[derive(Parser, Debug)]
#[command(name = "warden_api_server", about = "Warden authentication API server")]
struct Args {
    /// Address to listen on.
    #[arg(long, env = "BIND_ADDR", default_value = "127.0.0.1:3100")]
    bind_addr: String,

    /// PostgreSQL connection URL. The in-memory directory is used when unset.
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Maximum number of database connections in the pool.
    #[arg(long, default_value_t = 5)]
    max_connections: u32,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,warden_api=debug,warden_core=debug".into()),
        )
        .init();

    let args = Args::parse();
    let auth_config = AuthConfig::from_env()?;
    let config = ApiConfig {
        bind_addr: args.bind_addr,
        database_url: args.database_url,
        ..ApiConfig::from_env()
    };

    info!(
        bind_addr = %config.bind_addr,
        policy_cost = auth_config.policy.cost(),
        access_ttl_secs = auth_config.tokens.access_ttl_secs,
        "starting warden_api_server"
    );
    if auth_config.ephemeral_secret {
        warn!("running with an ephemeral signing secret (dev mode)");
    }

    let (directory, refresh_store): (Arc<dyn UserDirectory>, Arc<dyn RefreshTokenStore>) =
        match &config.database_url {
            Some(url) => {
                info!(max_connections = args.max_connections, "configuring connection pool");
                let pool = PgPoolOptions::new()
                    .max_connections(args.max_connections)
                    .acquire_timeout(std::time::Duration::from_secs(30))
                    .connect(url)
                    .await?;

                info!("running database migrations");
                warden_api::migrate(&pool).await?;

                let pg = Arc::new(PgDirectory::new(pool));
                (pg.clone() as Arc<dyn UserDirectory>, pg as Arc<dyn RefreshTokenStore>)
            }
            None => {
                warn!("DATABASE_URL not set, principals are kept in memory");
                let memory = Arc::new(MemoryDirectory::new());
                (
                    memory.clone() as Arc<dyn UserDirectory>,
                    memory as Arc<dyn RefreshTokenStore>,
                )
            }
        };

    let auth = Arc::new(AuthService::new(
        &auth_config,
        directory,
        refresh_store,
        Arc::new(SystemClock),
    ));

    if let Some((email, password)) = config.admin_credentials() {
        let admin = auth.bootstrap_admin(email, password, "Administrator").await?;
        info!(principal_id = %admin.id, "administrator ready");
    }

    let state = warden_api::AppState::new(auth, config.clone());
    let app = warden_api::router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    info!(addr = %listener.local_addr()?, "REST API listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutting down");
        })
        .await?;

    Ok(())
}
