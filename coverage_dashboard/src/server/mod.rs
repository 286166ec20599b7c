//! HTTP surface of the dashboard.
//!
//! Handlers only read the published chart snapshot; they never touch storage,
//! so page loads are not blocked by a refresh in progress.

pub mod figure;
pub mod routes;

use std::{convert::Infallible, future::Future, io, net::SocketAddr, sync::Arc, time::Duration};

use hyper::{
    service::{make_service_fn, service_fn},
    Server,
};
use thiserror::Error;
use tracing::info;

use crate::refresh::{RefreshLoop, SharedCharts};

pub const DEFAULT_TITLE: &str = "Azure SDK for Java - Code Coverage";

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {address}: {source}")]
    Bind {
        address: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("listener error: {0}")]
    Io(#[from] io::Error),
    #[error("http server error: {0}")]
    Hyper(#[from] hyper::Error),
}

/// Read-only view shared by every request.
pub struct DashboardState {
    pub charts: Arc<SharedCharts>,
    pub refresh: Arc<RefreshLoop>,
    pub title: String,
    pub poll_interval: Duration,
}

#[derive(Clone)]
pub struct DashboardServer {
    state: Arc<DashboardState>,
}

impl DashboardServer {
    pub fn new(refresh: Arc<RefreshLoop>, title: impl Into<String>, poll_interval: Duration) -> Self {
        Self {
            state: Arc::new(DashboardState {
                charts: refresh.charts().clone(),
                refresh,
                title: title.into(),
                poll_interval,
            }),
        }
    }

    pub fn state(&self) -> &Arc<DashboardState> {
        &self.state
    }

    pub fn bind(address: SocketAddr) -> Result<std::net::TcpListener, ServerError> {
        std::net::TcpListener::bind(address).map_err(|source| ServerError::Bind { address, source })
    }

    /// Serve on `listener` until `signal` resolves, then drain open connections.
    pub async fn serve_with_shutdown<F>(
        &self,
        listener: std::net::TcpListener,
        signal: F,
    ) -> Result<(), ServerError>
    where
        F: Future<Output = ()>,
    {
        listener.set_nonblocking(true)?;
        let address = listener.local_addr()?;

        let state = self.state.clone();
        let make_svc = make_service_fn(move |_conn| {
            let state = state.clone();
            async move {
                Ok::<_, Infallible>(service_fn(move |req| {
                    let state = state.clone();
                    async move { Ok::<_, Infallible>(routes::handle(&state, req)) }
                }))
            }
        });

        info!(address = %address, "Coverage dashboard listening");

        Server::from_tcp(listener)?
            .serve(make_svc)
            .with_graceful_shutdown(signal)
            .await?;

        info!("Coverage dashboard server stopped");
        Ok(())
    }
}
