mod availability;
mod db;
mod error;
mod handlers;
mod lifecycle;
mod models;
mod provider;
mod rate_limit;
mod reconcile;
mod store;
mod telegram_layer;

use axum::{
    middleware::from_fn_with_state,
    routing::{delete, get, post, put},
    Router,
};
use sqlx::sqlite::SqlitePoolOptions;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use provider::ProviderClient;
use rate_limit::{
    rate_limit_auth, rate_limit_booking, rate_limit_public, RateLimitConfig, RateLimiter,
};
use store::SqliteStore;

/// Shared application state accessible from all handlers.
pub struct AppState {
    pub store: SqliteStore,
    pub provider: ProviderClient,
    pub webhook_secret: String,
    pub fee_percent: f64,
    pub currency: String,
    pub admin_id: String,
    pub bot_token: String,
    pub admin_chat_id: i64,
    pub started_at: Instant,
}

/// Stale pending-booking sweep interval (seconds).
const PENDING_SWEEP_INTERVAL_SECS: u64 = 600;
/// Rate limit cleanup interval (seconds).
const RATE_LIMIT_CLEANUP_SECS: u64 = 300;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let database_url =
        std::env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite:arenda.db?mode=rwc".into());
    let bot_token = std::env::var("BOT_TOKEN").unwrap_or_default();
    let admin_chat_id: i64 = std::env::var("ADMIN_CHAT_ID")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);

    // ── Tracing: console + optional Telegram error notifications ──
    let env_filter = EnvFilter::from_default_env().add_directive("info".parse()?);
    let fmt_layer = tracing_subscriber::fmt::layer();
    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer);

    if !bot_token.is_empty() && admin_chat_id != 0 {
        let tg_layer = telegram_layer::TelegramLayer::new(bot_token.clone(), admin_chat_id);
        registry.with(tg_layer).init();
    } else {
        registry.init();
    }

    let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port = std::env::var("PORT").unwrap_or_else(|_| "3000".into());

    // ── Payment provider ──
    let provider_secret_key = std::env::var("PROVIDER_SECRET_KEY").unwrap_or_default();
    let webhook_secret = std::env::var("PROVIDER_WEBHOOK_SECRET").unwrap_or_default();
    let provider_api_base = std::env::var("PROVIDER_API_BASE")
        .unwrap_or_else(|_| "https://api.stripe.com".into());
    let provider_timeout_secs: u64 = std::env::var("PROVIDER_TIMEOUT_SECS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(15);
    let fee_percent: f64 = std::env::var("SERVICE_FEE_PERCENT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(1.0);
    let currency = std::env::var("CURRENCY").unwrap_or_else(|_| "rub".into());
    let admin_id = std::env::var("ADMIN_ID").unwrap_or_default();
    let webapp_url = std::env::var("WEBAPP_URL").unwrap_or_else(|_| "https://example.com".into());
    let pending_ttl_hours: i64 = std::env::var("PENDING_TTL_HOURS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);

    if provider_secret_key.is_empty() {
        tracing::warn!("PROVIDER_SECRET_KEY not set — card payments will fail");
    }
    if webhook_secret.is_empty() {
        tracing::warn!("PROVIDER_WEBHOOK_SECRET not set — webhooks will be rejected");
    }

    // ── Database ──
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await?;

    db::run_migrations(&pool).await?;

    let store = SqliteStore::new(pool);
    let provider = ProviderClient::new(
        provider_secret_key,
        provider_api_base,
        Duration::from_secs(provider_timeout_secs),
    );

    let state = Arc::new(AppState {
        store,
        provider,
        webhook_secret,
        fee_percent,
        currency,
        admin_id,
        bot_token,
        admin_chat_id,
        started_at: Instant::now(),
    });

    // ── Background task: release stale pending bookings ──
    if pending_ttl_hours > 0 {
        let sweep_store = state.store.clone();
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(Duration::from_secs(PENDING_SWEEP_INTERVAL_SECS));
            loop {
                interval.tick().await;
                lifecycle::expire_stale_pending(&sweep_store, pending_ttl_hours).await;
            }
        });
    }

    // ── Rate limiter ──
    let rate_limiter = RateLimiter::new();
    rate_limiter.add_tier(
        "public",
        RateLimitConfig {
            max_requests: 60,
            window: Duration::from_secs(60),
        },
    );
    rate_limiter.add_tier(
        "booking",
        RateLimitConfig {
            max_requests: 5,
            window: Duration::from_secs(300),
        },
    );
    rate_limiter.add_tier(
        "auth",
        RateLimitConfig {
            max_requests: 30,
            window: Duration::from_secs(60),
        },
    );

    // ── Background task: cleanup stale rate limit entries ──
    let cleanup_limiter = rate_limiter.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(RATE_LIMIT_CLEANUP_SECS));
        loop {
            interval.tick().await;
            cleanup_limiter.cleanup();
        }
    });

    // ── CORS: whitelist WEBAPP_URL when configured, otherwise allow any ──
    let cors = if webapp_url != "https://example.com" {
        let origins: Vec<axum::http::HeaderValue> = vec![
            webapp_url.parse().expect("WEBAPP_URL must be a valid URL"),
            "http://localhost:5173".parse().unwrap(), // Vite dev server
        ];
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    };

    // ── Router (4 groups with per-group rate limits) ──

    // 1. No-limit: health checks + payment webhooks
    let no_limit_routes = Router::new()
        .route("/api/health", get(handlers::health::health))
        .route(
            "/api/payments/webhook",
            post(handlers::payments::payment_webhook),
        );

    // 2. Public: read-only endpoints (60 req/min)
    let public_routes = Router::new()
        .route("/api/apartments", get(handlers::apartments::list_apartments))
        .route(
            "/api/apartments/{id}",
            get(handlers::apartments::get_apartment),
        )
        .route(
            "/api/availability",
            get(handlers::bookings::check_availability),
        )
        .layer(from_fn_with_state(rate_limiter.clone(), rate_limit_public));

    // 3. Booking creation: strictest limit (5 req/5min)
    let booking_routes = Router::new()
        .route("/api/bookings", post(handlers::bookings::create_booking))
        .layer(from_fn_with_state(rate_limiter.clone(), rate_limit_booking));

    // 4. Auth: account-scoped and mutating endpoints (30 req/min)
    let auth_routes = Router::new()
        .route(
            "/api/apartments",
            post(handlers::apartments::create_apartment),
        )
        .route(
            "/api/apartments/{id}",
            put(handlers::apartments::update_apartment),
        )
        .route(
            "/api/apartments/{id}",
            delete(handlers::apartments::delete_apartment),
        )
        .route("/api/bookings", get(handlers::bookings::list_bookings))
        .route("/api/bookings/{id}", get(handlers::bookings::get_booking))
        .route("/api/bookings/{id}", put(handlers::bookings::update_booking))
        .route("/api/payments", get(handlers::payments::list_payments))
        .route("/api/payments", post(handlers::payments::create_payment))
        .route("/api/payments/{id}", get(handlers::payments::get_payment))
        .route(
            "/api/payments/create-payment-intent",
            post(handlers::payments::create_payment_intent),
        )
        .layer(from_fn_with_state(rate_limiter.clone(), rate_limit_auth));

    let app = Router::new()
        .merge(no_limit_routes)
        .merge(public_routes)
        .merge(booking_routes)
        .merge(auth_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state);

    let addr = format!("{}:{}", host, port);
    tracing::info!("Arenda server starting on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
