use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use tabpilot_agents::tools::{BashTool, BrowserTool, EditFileTool, ReadFileTool, WriteFileTool};
use tabpilot_agents::{
    AgentContext, AgentSettings, AnthropicProvider, ArtifactStore, FsArtifactStore, LlmProvider,
    LogManager, SessionManager, ToolRegistry,
};
use tabpilot_common::{
    ExtensionHelloPayload, ExtensionLogPayload, Message, MessageType, NamedAsset,
    SessionCreatePayload, SessionMessagePayload, StorageAssetsPayload, StorageGetAssetsPayload,
};
use tabpilot_config::AppConfig;
use tabpilot_skills::{SkillLoader, WorkspaceAsset, WorkspaceManager};
use tracing::{info, warn};

use crate::state::{AppState, SharedState};
use crate::transport::Transport;

/// Build the gateway state with the Anthropic provider configured in `config.agent`.
pub fn build_state(config: AppConfig) -> SharedState {
    let api_key = config.agent.api_key.clone().unwrap_or_else(|| {
        warn!("ANTHROPIC_API_KEY is not set; completion requests will be rejected");
        String::new()
    });
    let mut provider = AnthropicProvider::new(api_key);
    if let Some(base_url) = &config.agent.base_url {
        provider = provider.with_base_url(base_url.clone());
    }
    build_state_with_provider(config, Arc::new(provider))
}

/// Wire transport, tools, sessions and message handlers around `provider`.
pub fn build_state_with_provider(config: AppConfig, provider: Arc<dyn LlmProvider>) -> SharedState {
    let transport = Arc::new(Transport::new(config.gateway.browser_command_timeout()));
    let artifacts: Arc<dyn ArtifactStore> =
        Arc::new(FsArtifactStore::new(&config.paths.artifacts_dir));

    let mut tools = ToolRegistry::new(artifacts.clone());
    tools.register(
        "bash",
        Arc::new(BashTool::new(Duration::from_millis(config.agent.bash_timeout_ms))),
    );
    tools.register("read_file", Arc::new(ReadFileTool));
    tools.register("write_file", Arc::new(WriteFileTool));
    tools.register("edit_file", Arc::new(EditFileTool));
    tools.register(
        "browser",
        Arc::new(BrowserTool::new(transport.clone(), artifacts)),
    );

    let logs = Arc::new(LogManager::new(&config.paths.logs_dir));
    let workspace = Arc::new(WorkspaceManager::new(&config.paths.storage_dir));
    let skills = Arc::new(SkillLoader::new(&config.paths.skills_dir));

    let context = AgentContext {
        provider,
        tools: Arc::new(tools),
        outbound: transport.clone(),
        settings: AgentSettings {
            model: config.agent.model.clone(),
            max_tokens: config.agent.max_tokens,
            max_conversation_chars: config.agent.max_conversation_chars,
        },
    };
    let sessions = Arc::new(SessionManager::new(
        context,
        skills,
        logs.clone(),
        config.agent.max_sessions,
    ));

    let state = Arc::new(AppState {
        config,
        transport,
        sessions,
        workspace,
        logs,
        started_at: Instant::now(),
    });
    register_handlers(&state);
    state
}

fn register_handlers(state: &AppState) {
    let transport = &state.transport;

    let sessions = state.sessions.clone();
    transport.on_message(MessageType::SessionCreate, move |msg| {
        let payload: SessionCreatePayload = msg.parse_payload()?;
        sessions.handle_create(&msg.session_id, &payload);
        Ok(())
    });

    let sessions = state.sessions.clone();
    transport.on_message(MessageType::SessionMessage, move |msg| {
        let payload: SessionMessagePayload = msg.parse_payload()?;
        sessions.handle_message(&msg.session_id, payload.content);
        Ok(())
    });

    let sessions = state.sessions.clone();
    transport.on_message(MessageType::SessionCancel, move |msg| {
        sessions.handle_cancel(&msg.session_id);
        Ok(())
    });

    // The transport owns its handlers, so this one only keeps a weak reference back to it.
    let workspace = state.workspace.clone();
    let reply_to: Weak<Transport> = Arc::downgrade(transport);
    transport.on_message(MessageType::StorageGetAssets, move |msg| {
        let payload: StorageGetAssetsPayload = msg.parse_payload()?;
        let assets = workspace.get_assets(&payload.domain);
        info!(
            "serving {} scripts and {} styles for {}",
            assets.scripts.len(),
            assets.styles.len(),
            payload.domain
        );
        if let Some(transport) = reply_to.upgrade() {
            transport.send(Message::new(
                &msg.session_id,
                &StorageAssetsPayload {
                    domain: payload.domain,
                    scripts: named(assets.scripts),
                    styles: named(assets.styles),
                },
            ));
        }
        Ok(())
    });

    let global = state.logs.global().clone();
    transport.on_message(MessageType::ExtensionHello, move |msg| {
        let hello: ExtensionHelloPayload = msg.parse_payload()?;
        info!(
            "extension hello: version {} build {}",
            hello.manifest_version, hello.build_hash
        );
        global.extension_hello(&hello);
        Ok(())
    });

    let global = state.logs.global().clone();
    transport.on_message(MessageType::ExtensionLog, move |msg| {
        let log: ExtensionLogPayload = msg.parse_payload()?;
        global.extension_log(&log);
        Ok(())
    });

    let global = state.logs.global().clone();
    transport.on_connect(move || {
        global.extension_connected();
        Ok(())
    });

    let global = state.logs.global().clone();
    transport.on_disconnect(move || {
        global.extension_disconnected();
        Ok(())
    });
}

fn named(assets: Vec<WorkspaceAsset>) -> Vec<NamedAsset> {
    assets
        .into_iter()
        .map(|asset| NamedAsset {
            name: asset.file_name(),
            content: asset.content,
        })
        .collect()
}
