mod auth;
mod db;
mod error;
mod handlers;
mod lifecycle;
mod mail_layer;
mod mailer;
mod models;
mod rate_limit;
mod review_token;
mod scheduling;

use axum::{
    middleware::from_fn_with_state,
    routing::{delete, get, post, put},
    Router,
};
use chrono::FixedOffset;
use sqlx::sqlite::SqlitePoolOptions;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use mailer::Mailer;
use rate_limit::{rate_limit, RateLimiter, TierConfig};
use scheduling::ScheduleConfig;

/// Shared application state accessible from all handlers.
pub struct AppState {
    pub db: sqlx::SqlitePool,
    pub schedule: ScheduleConfig,
    pub app_secret: String,
    pub mailer: Mailer,
    pub public_url: String,
    pub utc_offset: FixedOffset,
    pub started_at: Instant,
    /// Serializes the read-validate-insert sequence of booking creation.
    pub booking_lock: tokio::sync::Mutex<()>,
}

impl AppState {
    /// Salon-local wall clock.
    pub fn now_local(&self) -> chrono::DateTime<FixedOffset> {
        chrono::Utc::now().with_timezone(&self.utc_offset)
    }

    /// Salon-local calendar date; the engine receives this as a parameter.
    pub fn today(&self) -> chrono::NaiveDate {
        self.now_local().date_naive()
    }

    pub fn now_ts(&self) -> i64 {
        chrono::Utc::now().timestamp()
    }
}

/// Reminder sweep interval (seconds).
const REMINDER_INTERVAL_SECS: u64 = 600;
/// Rate limit cleanup interval (seconds).
const RATE_LIMIT_CLEANUP_SECS: u64 = 300;
/// Salon default timezone offset (hours east of UTC).
const DEFAULT_UTC_OFFSET_HOURS: i32 = 5;

fn env_time(name: &str, default: chrono::NaiveTime) -> chrono::NaiveTime {
    match std::env::var(name) {
        Ok(value) => chrono::NaiveTime::parse_from_str(&value, "%H:%M")
            .unwrap_or_else(|_| panic!("{name} must be HH:MM")),
        Err(_) => default,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // ── Required env vars ──
    let database_url =
        std::env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite:salon.db?mode=rwc".into());
    let app_secret = std::env::var("APP_SECRET").expect("APP_SECRET must be set");

    // ── Optional env vars ──
    let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port = std::env::var("PORT").unwrap_or_else(|_| "3000".into());
    let mail_api_url = std::env::var("MAIL_API_URL").unwrap_or_default();
    let mail_api_token = std::env::var("MAIL_API_TOKEN").unwrap_or_default();
    let mail_from =
        std::env::var("MAIL_FROM").unwrap_or_else(|_| "no-reply@example.com".into());
    let owner_email = std::env::var("OWNER_EMAIL").unwrap_or_default();
    let public_url =
        std::env::var("PUBLIC_URL").unwrap_or_else(|_| "http://localhost:3000".into());

    let defaults = ScheduleConfig::default();
    let schedule = ScheduleConfig {
        open: env_time("OPEN_TIME", defaults.open),
        close: env_time("CLOSE_TIME", defaults.close),
        step_min: std::env::var("SLOT_STEP_MIN")
            .ok()
            .map(|v| v.parse().expect("SLOT_STEP_MIN must be a number"))
            .unwrap_or(defaults.step_min),
    };

    let utc_offset_hours: i32 = std::env::var("UTC_OFFSET_HOURS")
        .ok()
        .map(|v| v.parse().expect("UTC_OFFSET_HOURS must be a number"))
        .unwrap_or(DEFAULT_UTC_OFFSET_HOURS);
    let utc_offset =
        FixedOffset::east_opt(utc_offset_hours * 3600).expect("UTC_OFFSET_HOURS out of range");

    let mailer = Mailer::new(mail_api_url, mail_api_token, mail_from);

    // ── Tracing: console + optional owner error mails ──
    let env_filter = EnvFilter::from_default_env().add_directive("info".parse()?);
    let fmt_layer = tracing_subscriber::fmt::layer();
    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer);

    if !owner_email.is_empty() && mailer.is_configured() {
        let layer = mail_layer::MailLayer::new(mailer.clone(), owner_email);
        registry.with(layer).init();
    } else {
        registry.init();
    }

    if !mailer.is_configured() {
        tracing::warn!("MAIL_API_URL not set — notifications will be dropped");
    }

    // ── Database ──
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await?;

    db::run_migrations(&pool).await?;

    let state = Arc::new(AppState {
        db: pool,
        schedule,
        app_secret,
        mailer,
        public_url: public_url.clone(),
        utc_offset,
        started_at: Instant::now(),
        booking_lock: tokio::sync::Mutex::new(()),
    });

    // ── Background task: same-day booking reminders ──
    let reminder_state = state.clone();
    tokio::spawn(async move {
        let mut interval =
            tokio::time::interval(tokio::time::Duration::from_secs(REMINDER_INTERVAL_SECS));
        loop {
            interval.tick().await;
            let today = reminder_state.today().format("%Y-%m-%d").to_string();
            mailer::send_due_reminders(&reminder_state.db, &reminder_state.mailer, &today).await;
        }
    });

    // ── Rate limiter ──
    let rate_limiter = RateLimiter::new();
    rate_limiter.add_tier(
        "public",
        TierConfig {
            max_requests: 60,
            window: Duration::from_secs(60),
        },
    );
    rate_limiter.add_tier(
        "booking",
        TierConfig {
            max_requests: 5,
            window: Duration::from_secs(300),
        },
    );
    rate_limiter.add_tier(
        "client",
        TierConfig {
            max_requests: 30,
            window: Duration::from_secs(60),
        },
    );
    rate_limiter.add_tier(
        "admin",
        TierConfig {
            max_requests: 120,
            window: Duration::from_secs(60),
        },
    );

    // ── Background task: cleanup stale rate limit entries ──
    let cleanup_limiter = rate_limiter.clone();
    tokio::spawn(async move {
        let mut interval =
            tokio::time::interval(tokio::time::Duration::from_secs(RATE_LIMIT_CLEANUP_SECS));
        loop {
            interval.tick().await;
            cleanup_limiter.cleanup();
        }
    });

    // ── CORS: whitelist PUBLIC_URL when configured, otherwise allow any ──
    let cors = if public_url != "http://localhost:3000" {
        let origins: Vec<axum::http::HeaderValue> = vec![
            public_url.parse().expect("PUBLIC_URL must be a valid URL"),
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

    // ── Router (5 groups with per-group rate limits) ──

    // 1. No-limit: health checks
    let no_limit_routes = Router::new().route("/api/health", get(handlers::health::health));

    // 2. Public: read-only endpoints + tokenized review links (60 req/min)
    let public_routes = Router::new()
        .route("/api/services", get(handlers::client::list_services))
        .route("/api/services/{id}", get(handlers::client::service_detail))
        .route("/api/masters", get(handlers::client::list_masters))
        .route("/api/masters/top", get(handlers::client::top_masters))
        .route("/api/slots", get(handlers::client::available_slots))
        .route(
            "/api/reviews/submit",
            get(handlers::review::submit_review_link),
        )
        .layer(from_fn_with_state(
            (rate_limiter.clone(), "public"),
            rate_limit,
        ));

    // 3. Booking creation: strictest limit (5 req/5min)
    let booking_routes = Router::new()
        .route("/api/bookings", post(handlers::client::create_booking))
        .layer(from_fn_with_state(
            (rate_limiter.clone(), "booking"),
            rate_limit,
        ));

    // 4. Authenticated client endpoints (30 req/min)
    let client_routes = Router::new()
        .route("/api/bookings/my", get(handlers::client::my_bookings))
        .route("/api/bookings/{id}", get(handlers::client::booking_details))
        .route(
            "/api/bookings/{id}",
            delete(handlers::client::cancel_booking),
        )
        .route(
            "/api/bookings/{id}/review",
            post(handlers::review::add_review),
        )
        .layer(from_fn_with_state(
            (rate_limiter.clone(), "client"),
            rate_limit,
        ));

    // 5. Admin: owner endpoints (120 req/min)
    let admin_routes = Router::new()
        .route("/api/admin/bookings", get(handlers::admin::list_bookings))
        .route(
            "/api/admin/bookings/{id}/status",
            put(handlers::admin::update_booking_status),
        )
        .route(
            "/api/admin/bookings/{id}",
            delete(handlers::admin::delete_booking),
        )
        .route(
            "/api/admin/services",
            get(handlers::admin::list_all_services),
        )
        .route("/api/admin/services", post(handlers::admin::create_service))
        .route(
            "/api/admin/services/{id}",
            put(handlers::admin::update_service),
        )
        .route("/api/admin/masters", post(handlers::admin::create_master))
        .route("/api/admin/reviews", get(handlers::admin::list_reviews))
        .layer(from_fn_with_state(
            (rate_limiter.clone(), "admin"),
            rate_limit,
        ));

    let app = Router::new()
        .merge(no_limit_routes)
        .merge(public_routes)
        .merge(booking_routes)
        .merge(client_routes)
        .merge(admin_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state);

    let addr = format!("{}:{}", host, port);
    tracing::info!("Salon booking server starting on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
