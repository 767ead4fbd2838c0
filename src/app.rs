use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::extract::Request;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::{AppConfig, ConfigError};
use crate::database::{DbPort, MemoryDb, PgDb};
use crate::env::{AppInfo, Env};
use crate::handlers;
use crate::middleware::auth::{authenticate, AuthSettings};
use crate::notify;
use crate::router::{normalize_incoming, AppService, Router};

/// Bootstrap: configuration, environment, routes and the HTTP stack
pub struct App {
    config: AppConfig,
    router: Router,
}

impl App {
    /// Connects to Postgres when a database url is configured, otherwise
    /// keeps records in memory.
    pub async fn new(config: AppConfig, info: AppInfo) -> anyhow::Result<Self> {
        config.validate()?;
        let db: Arc<dyn DbPort> = if config.database.url.is_some() {
            Arc::new(
                PgDb::connect(&config.database)
                    .await
                    .context("connecting to the database")?,
            )
        } else {
            info!("no database url configured, using in-memory storage");
            Arc::new(MemoryDb::new())
        };
        Ok(Self::with_db(config, info, db)?)
    }

    pub fn with_db(
        config: AppConfig,
        info: AppInfo,
        db: Arc<dyn DbPort>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let notifier = notify::from_config(&config.notifications);
        let env = Arc::new(Env::new(config.profile.as_str(), info, db, notifier));

        let mut router =
            Router::new(env).with_body_limit(config.server.max_request_size_bytes);
        handlers::register_builtin(&mut router);

        Ok(Self { config, router })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn env(&self) -> &Arc<Env> {
        self.router.env()
    }

    /// Where application routes are registered
    pub fn router(&mut self) -> &mut Router {
        &mut self.router
    }

    /// Routes wrapped in authentication and the configured middleware
    pub fn into_service(self) -> AppService {
        let server = &self.config.server;
        let settings = Arc::new(AuthSettings::new(
            self.config.security.jwt_secret.clone(),
            &self.config.security.public_routes,
        ));

        let mut router = self
            .router
            .into_axum()
            .layer(axum::middleware::from_fn_with_state(settings, authenticate));

        if server.enable_response_compression {
            router = router.layer(CompressionLayer::new());
        }
        if server.enable_cors {
            router = router.layer(CorsLayer::permissive());
        }
        if server.enable_request_logging {
            router = router.layer(TraceLayer::new_for_http());
        }
        let router = router
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid));

        normalize_incoming(router)
    }

    pub async fn serve(self) -> anyhow::Result<()> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.config.server.port));
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind {addr}"))?;

        info!(
            "{} {} listening on http://{} ({})",
            self.env().app().name,
            self.env().app().version,
            addr,
            self.config.profile.as_str()
        );

        let service = self.into_service();
        axum::serve(
            listener,
            axum::ServiceExt::<Request>::into_make_service(service),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await?;
        Ok(())
    }
}

/// `RUST_LOG`-style filter, `info` by default
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("shutdown signal received");
    }
}
