use std::sync::Arc;

use anyhow::Context;
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::{HeaderValue, Method};
use axum::response::IntoResponse;
use reqwest::Client;
#[cfg(not(feature = "tls"))]
use tokio::net::TcpListener;
use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::EnvFilter;

use workflow_automation::config::Config;
use workflow_automation::db::in_memory_workflow_repository::InMemoryWorkflowRepository;
use workflow_automation::db::pool::{create_pool, run_migrations};
use workflow_automation::db::postgres_workflow_repository::PostgresWorkflowRepository;
use workflow_automation::db::workflow_repository::WorkflowRepository;
use workflow_automation::responses::JsonResponse;
use workflow_automation::routes::app_router;
use workflow_automation::{worker, AppState};

#[cfg(feature = "tls")]
use axum_server::tls_rustls::RustlsConfig;

const DB_MAX_CONNECTIONS: u32 = 10;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env().context("invalid configuration")?;
    init_tracing();

    let workflow_repo: Arc<dyn WorkflowRepository> = match config.database_url.as_deref() {
        Some(url) => {
            let pool = create_pool(url, DB_MAX_CONNECTIONS)
                .await
                .context("failed to connect to the database")?;
            run_migrations(&pool)
                .await
                .context("failed to run database migrations")?;
            Arc::new(PostgresWorkflowRepository { pool })
        }
        None => {
            info!("DATABASE_URL not set; using the in-memory store");
            Arc::new(InMemoryWorkflowRepository::new())
        }
    };

    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_millisecond(config.rate_limit_ms)
            .burst_size(config.rate_limit_burst)
            .use_headers()
            .error_handler(|_err| {
                JsonResponse::too_many_requests(
                    "Too many requests. Please wait a moment and try again.",
                )
                .into_response()
            })
            .finish()
            .context("invalid rate limiter settings")?,
    );

    // Drop rate-limit state for idle clients.
    let governor_limiter = governor_conf.limiter().clone();
    std::thread::spawn(move || loop {
        std::thread::sleep(std::time::Duration::from_secs(60));
        governor_limiter.retain_recent();
    });

    let cors = CorsLayer::new()
        .allow_origin(
            config
                .frontend_origin
                .parse::<HeaderValue>()
                .context("FRONTEND_ORIGIN is not a valid header value")?,
        )
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE]);

    let addr = config.bind_addr;
    let config = Arc::new(config);
    let state = AppState {
        workflow_repo,
        http_client: Arc::new(Client::new()),
        config: config.clone(),
        worker_id: Arc::new(uuid::Uuid::new_v4().to_string()),
    };

    let _worker = worker::start_background_workers(state.clone());

    let app = app_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(GovernorLayer {
            config: governor_conf,
        })
        .layer(cors);
    let make_service = app.into_make_service_with_connect_info::<std::net::SocketAddr>();

    #[cfg(feature = "tls")]
    {
        let cert = std::env::var("DEV_CERT_LOCATION").context("DEV_CERT_LOCATION must be set")?;
        let key = std::env::var("DEV_KEY_LOCATION").context("DEV_KEY_LOCATION must be set")?;
        let tls_config = RustlsConfig::from_pem_file(cert, key)
            .await
            .context("failed to load TLS certs")?;

        info!(%addr, "listening with TLS");
        axum_server::bind_rustls(addr, tls_config)
            .serve(make_service)
            .await?;
    }

    #[cfg(not(feature = "tls"))]
    {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind {addr}"))?;
        info!(%addr, is_production = config.is_production, "listening");
        axum::serve(listener, make_service).await?;
    }

    Ok(())
}
