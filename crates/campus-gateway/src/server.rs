use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use campus_agents::AssistantRuntime;
use campus_common::{Error, Result};
use campus_config::{AppConfig, RateLimitConfig};
use tower_governor::GovernorLayer;
use tower_governor::governor::GovernorConfigBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::router::build_router;
use crate::state::{AppState, SharedState};

const LIMITER_CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

pub struct GatewayServer {
    state: SharedState,
}

impl GatewayServer {
    pub fn new(config: AppConfig, runtime: Arc<AssistantRuntime>) -> Self {
        Self {
            state: Arc::new(AppState::new(config, runtime)),
        }
    }

    pub fn state(&self) -> &SharedState {
        &self.state
    }

    /// Full middleware stack over [`build_router`].
    pub fn app(&self) -> Result<Router> {
        let config = &self.state.config.gateway;
        let mut app = with_rate_limit(build_router(self.state.clone()), &config.rate_limit)?
            .layer(TraceLayer::new_for_http());
        if config.cors_allow_any {
            app = app.layer(CorsLayer::permissive());
        }
        Ok(app)
    }

    /// Bind and serve until ctrl-c.
    pub async fn run(self) -> Result<()> {
        let addr = format!(
            "{}:{}",
            self.state.config.gateway.host, self.state.config.gateway.port
        );
        let app = self.app()?;
        let sweeper = self.state.runtime.spawn_cache_sweeper();

        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| Error::Config(format!("failed to bind {addr}: {e}")))?;
        info!("campus-assist gateway listening on {addr}");

        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await?;

        sweeper.abort();
        info!("gateway stopped");
        Ok(())
    }
}

/// Per-IP rate limit. Needs connect info on the serving side.
fn with_rate_limit(router: Router, limits: &RateLimitConfig) -> Result<Router> {
    let governor_conf = GovernorConfigBuilder::default()
        .per_second(limits.per_second.max(1))
        .burst_size(limits.burst_size.max(1))
        .finish()
        .ok_or_else(|| Error::Config("invalid rate limit settings".to_string()))?;
    let governor_limiter = governor_conf.limiter().clone();

    tokio::spawn(async move {
        loop {
            tokio::time::sleep(LIMITER_CLEANUP_INTERVAL).await;
            governor_limiter.retain_recent();
        }
    });

    Ok(router.layer(GovernorLayer::new(governor_conf)))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}
