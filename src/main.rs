use http::{HeaderValue, Method, header};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_governor::{GovernorLayer, governor::GovernorConfigBuilder};
use tower_http::{
    cors::CorsLayer,
    services::ServeDir,
    trace::{DefaultMakeSpan, DefaultOnFailure, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};

use tracing::Level;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod error;
mod routes;
mod state;

mod driver {
    pub mod fixture;
    pub mod portal;
}

mod models {
    pub mod account;
    pub mod date;
    pub mod job;
    pub mod session;
    pub mod transaction;
}

mod services {
    pub mod accounts;
    pub mod filter;
    pub mod normalizer;
    pub mod orchestrator;
    pub mod progress;
    pub mod sessions;
    pub mod store;
    pub mod transactions;
}

mod handlers {
    pub mod accounts;
    pub mod auth;
    pub mod graphql;
    pub mod response;
    pub mod scrape;
    pub mod transactions;
}

mod validation {
    pub mod auth;
}

use config::Config;
use driver::{fixture::FixtureDriver, portal::PortalDriver};
use state::AppState;

/// How often finished jobs and idle rate-limit entries are swept.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    dotenvy::dotenv().ok();

    let config = Config::from_env()?;
    tracing::info!("✅ Configuration loaded successfully");

    let driver: Arc<dyn PortalDriver> = match &config.portal_fixture {
        Some(path) => {
            let fixture = FixtureDriver::from_file(path, config.timezone)?;
            tracing::info!(
                "✅ Portal fixture loaded from {} ({} users)",
                path.display(),
                fixture.user_count()
            );
            Arc::new(fixture)
        }
        None => {
            tracing::warn!("⚠️ PORTAL_FIXTURE not set: the portal has no users, every login will be rejected");
            Arc::new(FixtureDriver::new(config.timezone))
        }
    };

    let state = AppState::new(&config, driver);
    tracing::info!("✅ AppState initialized");

    let cors = CorsLayer::new()
        .allow_origin([
            "http://localhost:4200".parse::<HeaderValue>()?,
            "http://127.0.0.1:4200".parse::<HeaderValue>()?,
        ])
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT])
        .max_age(Duration::from_secs(86400));

    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(config.rate_limit_per_second)
            .burst_size(config.rate_limit_burst)
            .use_headers()
            .finish()
            .ok_or_else(|| anyhow::anyhow!("Invalid rate limit configuration"))?,
    );
    let governor_limiter = governor_conf.limiter().clone();

    let app = routes::router(state.clone())
        .layer(GovernorLayer::new(governor_conf))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::default().include_headers(false))
                .on_request(DefaultOnRequest::default().level(Level::DEBUG))
                .on_response(DefaultOnResponse::default().level(Level::DEBUG))
                .on_failure(DefaultOnFailure::default().level(Level::ERROR)),
        )
        .layer(cors)
        .fallback_service(ServeDir::new(&config.static_dir));

    let orchestrator = state.orchestrator.clone();
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(SWEEP_INTERVAL).await;

            let pruned = orchestrator.prune().await;
            if pruned > 0 {
                tracing::info!("🧹 Pruned {} finished scrape jobs", pruned);
            }

            governor_limiter.retain_recent();
        }
    });

    let addr = SocketAddr::new(config.host, config.port);
    tracing::info!("🚀 Server listening on http://{}", addr);
    tracing::info!("✅ Background sweep started (runs every {:?})", SWEEP_INTERVAL);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
