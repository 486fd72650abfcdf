mod billing;
mod config;
mod db;
mod models;
mod responses;
mod routes;
mod services;
mod state;

use axum::http::header::CONTENT_TYPE;
use axum::http::HeaderValue;
use axum::http::Method;
use axum::{
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use config::Config;
use db::postgres_billing_repository::PostgresBillingRepository;
use db::postgres_event_log_repository::PostgresEventLogRepository;
use responses::JsonResponse;
use routes::stripe::webhook;
use sqlx::PgPool;
use std::{net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use crate::billing::resolver::PriceCatalog;
use crate::db::{billing_repository::BillingRepository, event_log_repository::EventLogRepository};
use crate::services::stripe::{LiveStripeGateway, StripeGateway};
use crate::state::AppState;

#[tokio::main]
async fn main() {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber).unwrap();

    let rate_limit_ms: u64 = std::env::var("RATE_LIMITER_MILLISECONDS")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        // Default: 200ms/token (~5 req/sec)
        .unwrap_or(200);
    let rate_limit_burst: u32 = std::env::var("RATE_LIMITER_BURST")
        .ok()
        .and_then(|v| v.parse::<u32>().ok())
        // Stripe bursts deliveries after an outage; allow headroom
        .unwrap_or(20);
    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_millisecond(rate_limit_ms)
            .burst_size(rate_limit_burst)
            .use_headers()
            .error_handler(|_err| {
                JsonResponse::too_many_requests(
                    "Too many requests. Please wait a moment and try again.",
                )
                .into_response()
            })
            .finish()
            .unwrap(),
    );

    // Background task to cleanup old IPs
    let governor_limiter = governor_conf.limiter().clone();
    std::thread::spawn(move || {
        let interval = std::time::Duration::from_secs(60);
        loop {
            std::thread::sleep(interval);
            governor_limiter.retain_recent();
        }
    });

    let config = Config::from_env();

    let pg_pool = establish_connection(&config.database_url).await;
    let billing_repo = Arc::new(PostgresBillingRepository {
        pool: pg_pool.clone(),
    }) as Arc<dyn BillingRepository>;
    let event_log = Arc::new(PostgresEventLogRepository {
        pool: pg_pool.clone(),
    }) as Arc<dyn EventLogRepository>;

    let stripe_gateway =
        Arc::new(LiveStripeGateway::from_settings(&config.stripe)) as Arc<dyn StripeGateway>;
    let catalog = Arc::new(PriceCatalog::from_config(&config));

    let state = AppState {
        db: billing_repo,
        event_log,
        stripe: stripe_gateway,
        catalog,
        config: Arc::new(config),
    };

    let cors = CorsLayer::new()
        .allow_origin(
            state
                .config
                .frontend_origin
                .parse::<HeaderValue>()
                .unwrap(),
        )
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([CONTENT_TYPE]);

    let app = Router::new()
        .route("/", get(root))
        .route("/api/stripe/webhook", post(webhook))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(GovernorLayer {
            config: governor_conf,
        })
        .layer(cors);

    let make_service = app.into_make_service_with_connect_info::<SocketAddr>();
    let addr = SocketAddr::from(([127, 0, 0, 1], 3000));

    let listener = TcpListener::bind(addr).await.unwrap();
    println!("Running at http://{}", addr);
    axum::serve(listener, make_service).await.unwrap();
}

/// A simple root route.
async fn root() -> Response {
    JsonResponse::success("Hello, Klycs billing!").into_response()
}

/// Establish a connection to the database and verify it.
async fn establish_connection(database_url: &str) -> PgPool {
    let pool = PgPool::connect(database_url)
        .await
        .expect("Failed to connect to the database");

    sqlx::query("SELECT 1")
        .execute(&pool)
        .await
        .expect("Failed to verify database connection");

    info!("Successfully connected to the database");
    pool
}
