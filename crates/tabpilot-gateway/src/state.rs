use std::sync::Arc;
use std::time::Instant;

use tabpilot_agents::{LogManager, SessionManager};
use tabpilot_config::AppConfig;
use tabpilot_skills::WorkspaceManager;

use crate::transport::Transport;

/// Shared gateway state accessible from all handlers.
pub struct AppState {
    pub config: AppConfig,
    pub transport: Arc<Transport>,
    pub sessions: Arc<SessionManager>,
    pub workspace: Arc<WorkspaceManager>,
    pub logs: Arc<LogManager>,
    pub started_at: Instant,
}

pub type SharedState = Arc<AppState>;
