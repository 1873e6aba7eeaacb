use std::future::Future;
use std::sync::Arc;

use tabpilot_agents::LlmProvider;
use tabpilot_common::Result;
use tabpilot_config::AppConfig;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::bootstrap::{build_state, build_state_with_provider};
use crate::router::build_router;

/// Runs the orchestrator: one HTTP listener carrying the extension websocket.
pub struct GatewayServer {
    config: AppConfig,
    provider: Option<Arc<dyn LlmProvider>>,
}

impl GatewayServer {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            provider: None,
        }
    }

    /// Use `provider` instead of the Anthropic provider built from the config.
    pub fn with_provider(mut self, provider: Arc<dyn LlmProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Bind the configured address and serve until Ctrl-C.
    pub async fn run(self) -> Result<()> {
        let addr = self.config.gateway.bind_addr();
        let listener = TcpListener::bind(&addr).await?;
        self.serve(listener, shutdown_signal()).await
    }

    pub async fn serve(
        self,
        listener: TcpListener,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> Result<()> {
        let state = match self.provider {
            Some(provider) => build_state_with_provider(self.config, provider),
            None => build_state(self.config),
        };
        let app = build_router(state);

        let local = listener.local_addr()?;
        info!("tabpilot listening on ws://{local}/ws");
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await?;
        info!("gateway stopped");
        Ok(())
    }
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("shutdown signal received"),
        Err(e) => {
            warn!("failed to listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    }
}
