use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use serde::Serialize;
use sqlx::postgres::PgPoolOptions;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use healthybites_core::windows::TimeWindowPolicy;

mod clock;
mod config;
mod conversation;
mod delivery;
mod error;
mod extract;
mod lifecycle;
mod locks;
mod middleware;
mod otp;
mod routes;
mod scheduler;
mod state;
mod store;

use clock::{Clock, SystemClock};
use config::{AppConfig, OtpDeliveryMode};
use delivery::{LogDelivery, TextDelivery, TwilioDelivery, WebhookMessenger};
use store::{KeyValueStore, MemoryKeyValueStore, MemoryStore, PgStore, Store};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "HealthyBites Express API",
        version = "0.1.0",
        description = "Conversational meal ordering: chat turns, order intake, subscriptions and menu."
    ),
    paths(
        routes::health::health_check,
        routes::messages::post_message,
        routes::orders::create_order,
        routes::profiles::update_subscription,
        routes::profiles::save_default_order,
        routes::profiles::get_subscription_status,
        routes::menu::get_menu,
    ),
    components(schemas(
        HealthResponse,
        routes::messages::MessagesResponse,
        healthybites_core::error::ApiError,
        healthybites_core::conversation::InboundEvent,
        healthybites_core::conversation::InboundAction,
        healthybites_core::conversation::Outbound,
        healthybites_core::conversation::Card,
        healthybites_core::orders::CreateOrderRequest,
        healthybites_core::orders::Order,
        healthybites_core::orders::OrderStatus,
        healthybites_core::profile::MealType,
        healthybites_core::profile::SubscriptionTier,
        healthybites_core::profile::ConversationAddress,
        healthybites_core::profile::UserProfile,
        healthybites_core::profile::SubscriptionUpdateRequest,
        healthybites_core::profile::DefaultOrderRequest,
        healthybites_core::profile::SubscriptionStatusResponse,
        healthybites_core::menu::Menu,
        healthybites_core::menu::MenuItem,
    ))
)]
struct ApiDoc;

#[derive(Serialize, utoipa::ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[tokio::main]
async fn main() {
    // Load .env if present (dev only)
    let _ = dotenvy::dotenv();

    // Structured JSON logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "healthybites_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    let config = AppConfig::from_env().expect("Invalid configuration");
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let (store, kv): (Arc<dyn Store>, Arc<dyn KeyValueStore>) = match &config.database_url {
        Some(database_url) => {
            let pool = PgPoolOptions::new()
                .max_connections(20)
                .connect(database_url)
                .await
                .expect("Failed to connect to database");

            sqlx::migrate!("../migrations")
                .run(&pool)
                .await
                .expect("Failed to run migrations");

            let pg = Arc::new(PgStore::new(pool, clock.clone()));
            let store: Arc<dyn Store> = pg.clone();
            let kv: Arc<dyn KeyValueStore> = pg;
            (store, kv)
        }
        None => {
            tracing::warn!("DATABASE_URL not set, state is kept in memory only");
            let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
            let kv: Arc<dyn KeyValueStore> = Arc::new(MemoryKeyValueStore::new(clock.clone()));
            (store, kv)
        }
    };

    let policy = TimeWindowPolicy::new(config.timezone);
    let menu = Arc::new(config::load_menu(&config.menu_path));
    let locks = Arc::new(locks::KeyedLocks::new());

    let text_delivery: Arc<dyn TextDelivery> = match config.otp_delivery.clone() {
        OtpDeliveryMode::Twilio {
            account_sid,
            auth_token,
            sms_from,
            whatsapp_from,
        } => Arc::new(TwilioDelivery::new(
            account_sid,
            auth_token,
            sms_from,
            whatsapp_from,
        )),
        OtpDeliveryMode::Log => {
            tracing::warn!("HB_OTP_DELIVERY=log, one-time codes are written to the log");
            Arc::new(LogDelivery)
        }
    };
    let otp_gate = Arc::new(otp::OtpGate::new(
        kv.clone(),
        text_delivery,
        clock.clone(),
        config.otp,
    ));
    let lifecycle = Arc::new(lifecycle::OrderLifecycle::new(
        store.clone(),
        policy,
        clock.clone(),
    ));
    let engine = Arc::new(conversation::ConversationEngine::new(
        store.clone(),
        kv.clone(),
        otp_gate,
        lifecycle.clone(),
        clock.clone(),
        locks.clone(),
        conversation::EngineSettings {
            policy,
            menu: menu.clone(),
            public_base_url: config.public_base_url.clone(),
        },
    ));

    if config.scheduler_enabled {
        let scheduler = Arc::new(scheduler::NotificationScheduler::new(
            store.clone(),
            lifecycle.clone(),
            Arc::new(WebhookMessenger::new(config.transport_push_url.clone())),
            clock.clone(),
            locks.clone(),
            scheduler::SchedulerSettings {
                policy,
                menu: menu.clone(),
                public_base_url: config.public_base_url.clone(),
                proactive_timeout: config.proactive_timeout,
            },
        ));
        let jobs = scheduler.spawn();
        tracing::info!(jobs = jobs.len(), "notification scheduler started");
    } else {
        tracing::info!("notification scheduler disabled");
    }

    let app_state = state::AppState {
        store,
        kv,
        engine,
        lifecycle,
        locks,
        menu,
        clock,
    };

    let cors_layer = middleware::cors::build_cors_layer(&config.cors_origins);

    // Router with per-endpoint rate limiting on the write routes
    let app = Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .merge(routes::health::router())
        .merge(routes::menu::router())
        .merge(routes::profiles::read_router())
        .merge(routes::messages::router().layer(middleware::rate_limit::messages_layer()))
        .merge(routes::orders::router().layer(middleware::rate_limit::orders_layer()))
        .merge(routes::profiles::write_router().layer(middleware::rate_limit::orders_layer()))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors_layer),
        )
        .with_state(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("HealthyBites API listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind listener");
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .expect("Server error");
}
