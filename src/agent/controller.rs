//! Turn controller: owns one user's agent state and runs the bounded
//! think → act → reflect loop.
//!
//! The turn lock wraps the whole loop, so turns for one user never
//! interleave and `AgentState` is only ever mutated while it is held. A
//! separate status board (read-write lock) is republished after every state
//! change so status reads never wait on a running turn.

use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Instant;

use uuid::Uuid;

use super::engine::{DecisionContext, DecisionEngine};
use super::error::AgentError;
use super::heuristics::normalize_member_id;
use super::reflector::{AuditSink, Reflection, Reflector, StoreAuditSink};
use super::tools::{ToolContext, ToolExecutor};
use super::types::{
    Action, AgentState, AgentStatus, Clarification, ClarificationStatus, ConversationTurn,
    ConversationWindow, ExtractedDataSet, LastSaved, TraceEntry, TurnRequest, TurnResult,
};
use crate::config::AgentConfig;
use crate::db::{DocumentStore, SqliteStore};
use crate::llm::{CompletionService, OllamaClient};

/// External collaborators shared by every controller.
#[derive(Clone)]
pub struct AgentDeps {
    pub completion: Arc<CompletionService>,
    pub store: Arc<dyn DocumentStore>,
    pub audit: Arc<dyn AuditSink>,
}

impl AgentDeps {
    /// Ollama completion service, SQLite store at `config.db_path`, and an
    /// audit sink writing to the same store.
    pub fn connect(config: &AgentConfig) -> Result<Self, AgentError> {
        let client = OllamaClient::new(
            &config.ollama_url,
            config.llm_timeout_secs,
            config.temperature,
        )?;
        let completion = Arc::new(CompletionService::new(
            Box::new(client),
            config.model_name.clone(),
        ));
        let store: Arc<dyn DocumentStore> = Arc::new(SqliteStore::open(&config.db_path)?);
        let audit: Arc<dyn AuditSink> = Arc::new(StoreAuditSink::new(Arc::clone(&store)));
        Ok(Self {
            completion,
            store,
            audit,
        })
    }
}

/// Mutable per-user state, guarded by the turn lock.
#[derive(Default)]
struct AgentCore {
    state: AgentState,
    current_iteration: u32,
    window: ConversationWindow,
    data: ExtractedDataSet,
    clarifications: Vec<Clarification>,
    /// Actions executed in the current turn.
    action_history: Vec<Action>,
    trace: Vec<TraceEntry>,
    last_action: Option<Action>,
    last_observation: Option<String>,
    last_saved: LastSaved,
    total_actions: u64,
}

impl AgentCore {
    fn pending_clarifications(&self) -> Vec<Clarification> {
        self.clarifications
            .iter()
            .filter(|c| c.is_pending())
            .cloned()
            .collect()
    }

    fn has_pending_clarifications(&self) -> bool {
        self.clarifications.iter().any(Clarification::is_pending)
    }

    fn update_window(&mut self, request: &TurnRequest) {
        match request.conversation_history.as_deref() {
            Some(history) if !history.is_empty() => {
                self.window.replace_with(history);
                let is_tail = self
                    .window
                    .tail()
                    .is_some_and(|t| t.content == request.user_message);
                if !request.user_message.is_empty() && !is_tail {
                    self.window.push(ConversationTurn::user(&request.user_message));
                }
            }
            _ => {
                self.window.push(ConversationTurn::user(&request.user_message));
                if !request.assistant_response.is_empty() {
                    self.window
                        .push(ConversationTurn::assistant(&request.assistant_response));
                }
            }
        }
    }
}

/// One user's agent.
pub struct HealthDataAgent {
    user_id: String,
    max_iterations: u32,
    engine: DecisionEngine,
    executor: ToolExecutor,
    reflector: Reflector,
    core: Mutex<AgentCore>,
    status: RwLock<AgentStatus>,
}

impl HealthDataAgent {
    pub fn new(user_id: impl Into<String>, config: &AgentConfig, deps: AgentDeps) -> Self {
        let user_id = user_id.into();
        Self {
            engine: DecisionEngine::new(Arc::clone(&deps.completion), config.min_save_confidence),
            executor: ToolExecutor::new(deps.completion, deps.store, config.min_save_confidence),
            reflector: Reflector::new(user_id.clone(), deps.audit),
            core: Mutex::new(AgentCore::default()),
            status: RwLock::new(AgentStatus::idle(&user_id, config.max_iterations)),
            max_iterations: config.max_iterations,
            user_id,
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    fn lock_core(&self) -> Result<MutexGuard<'_, AgentCore>, AgentError> {
        self.core
            .lock()
            .map_err(|_| AgentError::LockPoisoned(format!("user {}", self.user_id)))
    }

    /// Publish a status snapshot. Called under the turn lock.
    fn publish(&self, core: &AgentCore) {
        let snapshot = AgentStatus {
            user_id: self.user_id.clone(),
            state: core.state,
            agent_active: core.state.is_active(),
            current_iteration: core.current_iteration,
            max_iterations: self.max_iterations,
            pending_clarifications: core.pending_clarifications(),
            extracted_data_summary: core.data.summary(),
            last_action: core.last_action,
            last_observation: core.last_observation.clone(),
            last_saved: core.last_saved.clone(),
            total_actions: core.total_actions,
        };
        if let Ok(mut status) = self.status.write() {
            *status = snapshot;
        }
    }

    /// Latest published status. Never waits on a running turn.
    pub fn status(&self) -> AgentStatus {
        match self.status.read() {
            Ok(status) => status.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Process one conversational turn. Never returns an error: failures
    /// become `success: false` with the accumulated state attached.
    pub fn process_turn(&self, request: TurnRequest) -> TurnResult {
        let mut guard = match self.lock_core() {
            Ok(guard) => guard,
            Err(e) => {
                tracing::error!(user_id = %self.user_id, error = %e, "Turn rejected");
                return TurnResult::failed(e.to_string());
            }
        };
        let core = &mut *guard;

        let member_id = normalize_member_id(request.member_id.as_deref());
        let session_id = Uuid::new_v4().to_string();
        tracing::info!(
            user_id = %self.user_id,
            session_id = %session_id,
            member_scoped = member_id.is_some(),
            "Agent turn started"
        );

        core.current_iteration = 0;
        core.state = AgentState::Thinking;
        core.action_history.clear();
        core.trace.clear();
        core.update_window(&request);
        self.publish(core);

        let mut saved = 0;
        match self.run_loop(core, &session_id, member_id.as_deref(), &mut saved) {
            Ok(()) => self.complete_turn(core, saved),
            Err(e) => self.fail_turn(core, &session_id, saved, e),
        }
    }

    fn run_loop(
        &self,
        core: &mut AgentCore,
        session_id: &str,
        member_id: Option<&str>,
        saved: &mut usize,
    ) -> Result<(), AgentError> {
        while core.current_iteration < self.max_iterations {
            core.current_iteration += 1;
            core.state = AgentState::Thinking;
            self.publish(core);

            let pending = core.clarifications.iter().filter(|c| c.is_pending()).count();
            let (decision, source) = self.engine.decide(&DecisionContext {
                window: &core.window,
                data: &core.data,
                pending_clarifications: pending,
                history: &core.action_history,
            });
            tracing::debug!(
                user_id = %self.user_id,
                iteration = core.current_iteration,
                action = %decision.action,
                source = ?source,
                "Decision made"
            );
            if decision.action == Action::Finish {
                break;
            }

            core.state = AgentState::Acting;
            self.publish(core);
            let started = Instant::now();
            let outcome = self.executor.execute(
                decision.action,
                &decision.action_input,
                &mut ToolContext {
                    user_id: &self.user_id,
                    member_id,
                    window: &core.window,
                    data: &mut core.data,
                    clarifications: &mut core.clarifications,
                    last_saved: &mut core.last_saved,
                },
            )?;
            *saved += outcome.saved;

            core.state = AgentState::Reflecting;
            self.reflector.reflect(
                Reflection {
                    session_id,
                    iteration: core.current_iteration,
                    state: core.state,
                    decision: &decision,
                    observation: &outcome.observation,
                    duration: started.elapsed(),
                },
                &mut core.action_history,
                &mut core.trace,
            );
            core.last_action = Some(decision.action);
            core.last_observation = Some(outcome.observation);
            core.total_actions += 1;
            self.publish(core);

            if decision.action == Action::AskClarification && core.has_pending_clarifications() {
                tracing::debug!(user_id = %self.user_id, "Waiting on user clarification");
                break;
            }
        }
        Ok(())
    }

    fn complete_turn(&self, core: &mut AgentCore, saved: usize) -> TurnResult {
        core.state = AgentState::Completed;
        let extracted_data = core.data.clone();
        let clarifications_needed = core.pending_clarifications();
        if clarifications_needed.is_empty() {
            core.data.clear();
        }
        self.publish(core);

        tracing::info!(
            user_id = %self.user_id,
            iterations = core.current_iteration,
            saved,
            clarifications = clarifications_needed.len(),
            "Agent turn completed"
        );
        TurnResult {
            success: true,
            error: None,
            extracted_data,
            saved_items: saved,
            clarifications_needed,
            trace: core.trace.clone(),
        }
    }

    fn fail_turn(
        &self,
        core: &mut AgentCore,
        session_id: &str,
        saved: usize,
        error: AgentError,
    ) -> TurnResult {
        core.state = AgentState::Error;
        self.reflector
            .record_failure(session_id, core.current_iteration, &error.to_string());
        self.publish(core);

        tracing::error!(
            user_id = %self.user_id,
            iteration = core.current_iteration,
            error = %error,
            "Agent turn failed"
        );
        TurnResult {
            success: false,
            error: Some(error.to_string()),
            extracted_data: core.data.clone(),
            saved_items: saved,
            clarifications_needed: core.pending_clarifications(),
            trace: core.trace.clone(),
        }
    }

    /// Clear working state. A full reset also forgets the conversation.
    pub fn reset(&self, full: bool) -> Result<(), AgentError> {
        let mut core = self.lock_core()?;
        let window = std::mem::take(&mut core.window);
        let total_actions = core.total_actions;
        *core = AgentCore {
            window: if full { ConversationWindow::new() } else { window },
            total_actions,
            ..AgentCore::default()
        };
        self.publish(&core);
        tracing::info!(user_id = %self.user_id, full, "Agent reset");
        Ok(())
    }

    /// Resolve a pending clarification out of band.
    ///
    /// An answer joins the conversation window so the next extraction sees
    /// it. Once nothing is pending, the working set is dropped.
    pub fn answer_clarification(
        &self,
        id: Uuid,
        answer: &str,
        dismiss: bool,
    ) -> Result<Clarification, AgentError> {
        let mut core = self.lock_core()?;
        let index = core
            .clarifications
            .iter()
            .position(|c| c.id == id && c.is_pending())
            .ok_or(AgentError::ClarificationNotFound(id))?;

        let mut clarification = core.clarifications.remove(index);
        if dismiss {
            clarification.status = ClarificationStatus::Dismissed;
        } else {
            clarification.status = ClarificationStatus::Answered;
            clarification.answer = Some(answer.to_string());
            core.window.push(ConversationTurn::user(answer));
        }
        if !core.has_pending_clarifications() {
            core.data.clear();
        }
        self.publish(&core);
        Ok(clarification)
    }
}
