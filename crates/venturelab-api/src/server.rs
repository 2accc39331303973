use crate::{create_router, AppState};
use chrono::Utc;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::{signal, task::JoinHandle};
use tracing::{debug, info, warn};
use venturelab_core::{Result, Settings, VentureLabError};

const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

pub struct Server {
    state: AppState,
    addr: SocketAddr,
}

impl Server {
    pub async fn new(settings: Settings) -> Result<Self> {
        crate::metrics::register_metrics();

        let addr = tokio::net::lookup_host((settings.server.host.as_str(), settings.server.port))
            .await?
            .next()
            .ok_or_else(|| {
                VentureLabError::Config(format!(
                    "server.host '{}' did not resolve",
                    settings.server.host
                ))
            })?;

        let state = AppState::new(settings)?;
        Ok(Self { state, addr })
    }

    /// Drops elapsed rate-limit windows and idle IP buckets so both maps stay
    /// bounded by recent traffic.
    fn spawn_sweeper(&self) -> JoinHandle<()> {
        let state = self.state.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(SWEEP_INTERVAL);
            interval.tick().await;
            loop {
                interval.tick().await;
                let removed = state.limiter.sweep_expired(Utc::now());
                state.ip_guard.sweep();
                debug!(
                    removed,
                    windows = state.limiter.len(),
                    ip_buckets = state.ip_guard.len(),
                    "Swept rate limiter state"
                );
            }
        })
    }

    pub async fn run(self) -> Result<()> {
        let sweeper = self.spawn_sweeper();
        let router = create_router(self.state.clone());

        info!("Starting VentureLab API server on {}", self.addr);

        let listener = {
            let socket = if self.addr.is_ipv6() {
                tokio::net::TcpSocket::new_v6()
            } else {
                tokio::net::TcpSocket::new_v4()
            }?;

            // Reuse addr to improve rebind under restarts
            let _ = socket.set_reuseaddr(true);
            let _ = socket.set_keepalive(true);

            socket.bind(self.addr)?;
            socket.listen(1024)?
        };

        info!("Server listening on http://{}", self.addr);
        info!(
            backend = self.state.backend.backend_name(),
            llm = self.state.llm.model_name(),
            "Routes: GET /health, GET /metrics, GET /api/me, POST /api/coach/chat, \
             POST /api/tank/score, POST /api/missions/{{id}}/progress, \
             POST /api/checkout/quote, POST /api/admin/students/{{id}}/xp"
        );

        let served = axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await;

        sweeper.abort();
        served?;
        info!("Server stopped");
        Ok(())
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down gracefully");
        },
        _ = terminate => {
            info!("Received SIGTERM, shutting down gracefully");
        },
    }
}
