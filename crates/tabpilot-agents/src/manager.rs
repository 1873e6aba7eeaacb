use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use tabpilot_common::{Message, SessionCreatePayload, SessionDonePayload, SessionErrorPayload};
use tabpilot_skills::{SkillSource, render_skills};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::logging::LogManager;
use crate::prompt::build_system_prompt;
use crate::session::{AgentContext, Session};

const SESSION_NOT_FOUND_TEXT: &str = "Session not found. Please start a new conversation.";

/// Owns the live sessions and routes session traffic to them.
pub struct SessionManager {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
    context: AgentContext,
    skills: Arc<dyn SkillSource>,
    logs: Arc<LogManager>,
    max_sessions: usize,
}

impl SessionManager {
    pub fn new(
        context: AgentContext,
        skills: Arc<dyn SkillSource>,
        logs: Arc<LogManager>,
        max_sessions: usize,
    ) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            context,
            skills,
            logs,
            max_sessions: max_sessions.max(1),
        }
    }

    pub fn get(&self, session_id: &str) -> Option<Arc<Session>> {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(session_id)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Build a session with the domain's skills in its prompt and acknowledge with an empty
    /// `session.done`. An empty id is replaced by a fresh one.
    pub fn handle_create(&self, session_id: &str, payload: &SessionCreatePayload) -> Arc<Session> {
        let id = if session_id.is_empty() {
            uuid::Uuid::new_v4().to_string()
        } else {
            session_id.to_string()
        };

        let skills = self.skills.resolve(&payload.domain);
        let rendered = render_skills(&skills);
        let system_prompt = build_system_prompt(&payload.domain, rendered.as_deref());

        let logger = self.logs.create(&id);
        logger.session_created(
            &payload.domain,
            &payload.url,
            skills.len(),
            system_prompt.chars().count(),
        );

        let session = Arc::new(Session::new(
            id.clone(),
            payload.domain.clone(),
            payload.url.clone(),
            system_prompt,
            self.context.clone(),
            logger,
        ));

        {
            let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
            match sessions.insert(id.clone(), session.clone()) {
                Some(previous) => {
                    info!("session {id} re-created, cancelling previous instance");
                    previous.cancel();
                }
                None => self.evict_idle(&mut sessions, &id),
            }
        }

        info!(
            "session created {id} for {} ({} skills)",
            payload.domain,
            skills.len()
        );
        self.context.outbound.send(Message::new(
            &id,
            &SessionDonePayload {
                full_text: String::new(),
            },
        ));
        session
    }

    /// Drop least recently active idle sessions until the table fits `max_sessions`.
    fn evict_idle(&self, sessions: &mut HashMap<String, Arc<Session>>, keep: &str) {
        while sessions.len() > self.max_sessions {
            let oldest = sessions
                .iter()
                .filter(|(id, s)| id.as_str() != keep && !s.is_busy())
                .min_by_key(|(_, s)| s.last_active())
                .map(|(id, _)| id.clone());
            match oldest {
                Some(id) => {
                    sessions.remove(&id);
                    info!("evicted idle session {id}");
                }
                None => {
                    warn!(
                        "{} sessions live, all busy; exceeding limit of {}",
                        sessions.len(),
                        self.max_sessions
                    );
                    break;
                }
            }
        }
    }

    /// Start a turn in the background. Unknown sessions get a `SESSION_NOT_FOUND` error.
    pub fn handle_message(&self, session_id: &str, content: String) -> Option<JoinHandle<()>> {
        let Some(session) = self.get(session_id) else {
            warn!("message for unknown session {session_id}");
            self.logs
                .global()
                .session_error(&format!("session not found: {session_id}"), None);
            self.context.outbound.send(Message::new(
                session_id,
                &SessionErrorPayload {
                    error: SESSION_NOT_FOUND_TEXT.to_string(),
                    code: Some(SessionErrorPayload::SESSION_NOT_FOUND.to_string()),
                },
            ));
            return None;
        };

        let turn = session.begin_turn();
        Some(tokio::spawn(async move {
            session.handle_user_message(turn, &content).await;
        }))
    }

    pub fn handle_cancel(&self, session_id: &str) {
        if let Some(session) = self.get(session_id) {
            session.cancel();
        }
    }
}
