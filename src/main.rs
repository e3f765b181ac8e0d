#![deny(clippy::all, clippy::pedantic)]

mod admin;
mod config;
mod database;
mod error;
mod middleware;
mod models;
mod readings;
mod repository;
mod routes;
mod shortener;

use std::{collections::HashSet, error::Error, net::SocketAddr, sync::Arc};

use axum::{Router, middleware::from_fn_with_state};
use config::Config;
use database::Database;
use middleware::{AccessLog, RateLimiter};
use readings::ReadingService;
use redis::{Client as RedisClient, aio::ConnectionManager};
use routes::Assets;
use shortener::{DnsResolver, UrlShortener};
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

async fn rate_limiter(config: &Config) -> Result<RateLimiter, redis::RedisError> {
    let Some(redis_url) = &config.redis_url else {
        tracing::info!("REDIS_URL not set, rate limiting per process");
        return Ok(RateLimiter::local(
            config.rate_limit_max,
            config.rate_limit_window,
        ));
    };
    let client = RedisClient::open(redis_url.as_str())?;
    let connection = ConnectionManager::new(client).await?;

    Ok(RateLimiter::redis(
        config.rate_limit_max,
        config.rate_limit_window,
        connection,
    ))
}

/// Connects the database, seeds the admin account and assembles the router
/// with its middleware stack.
pub async fn setup(config: &Config) -> Result<Router, Box<dyn Error>> {
    let database = Database::new(&config.mongodb_url, &config.database_name).await?;
    database.ensure_indexes().await?;

    let admin = admin::admin_user(&config.admin_password, &config.admin_email)
        .map_err(|_| "failed to hash the admin password")?;
    if database.seed_admin(&admin).await? {
        tracing::info!(name = %admin.name, "seeded admin user");
    }

    let database = Arc::new(database);
    let shortener = UrlShortener::new(database.clone(), Arc::new(DnsResolver));
    let readings = ReadingService::new(database);
    let assets = Assets {
        public_dir: config.public_dir.clone(),
        access_log: config.access_log_path.clone(),
    };

    let access_log = AccessLog::open(&config.access_log_path).await?;
    let limiter = rate_limiter(config).await?;
    let blocked: Arc<HashSet<_>> = Arc::new(config.blocked_ips.iter().copied().collect());

    let app = routes::router(shortener, readings, &assets)
        .layer(from_fn_with_state(blocked, middleware::block_ips))
        .layer(from_fn_with_state(access_log, middleware::access_log))
        .layer(from_fn_with_state(limiter, middleware::rate_limit))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    Ok(app)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt::init();

    let config =
        Config::from_env().inspect_err(|err| tracing::error!(%err, "invalid configuration"))?;
    let app = setup(&config).await?;

    let listener = TcpListener::bind(("0.0.0.0", config.port)).await?;
    tracing::info!(port = config.port, "listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(err = ?err, "installing ctrl-c handler");
        }
    })
    .await?;

    Ok(())
}
