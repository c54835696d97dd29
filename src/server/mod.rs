pub mod epg;
pub mod handlers;
pub mod hdhr;
pub mod routes;
pub mod state;

use std::net::SocketAddr;

pub use state::AppState;

/// Server error types for proper error handling
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Failed to bind to address: {0}")]
    BindError(#[from] std::io::Error),

    #[error("Invalid bind host: {0}")]
    InvalidHost(String),

    #[error("Server runtime error: {0}")]
    RuntimeError(String),
}

/// Start the HTTP server and serve until the process ends.
pub async fn start_server(state: AppState) -> Result<(), ServerError> {
    let port = state.get_port();
    let host: std::net::IpAddr = state
        .config
        .bind_host
        .parse()
        .map_err(|_| ServerError::InvalidHost(state.config.bind_host.clone()))?;
    let app = routes::create_router(state);

    let addr = SocketAddr::from((host, port));
    let listener = tokio::net::TcpListener::bind(addr).await?;

    tracing::info!("HTTP server listening on http://{}", addr);
    axum::serve(listener, app)
        .await
        .map_err(|e| ServerError::RuntimeError(e.to_string()))?;

    Ok(())
}
