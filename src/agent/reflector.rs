//! Reflector: records each tool call in the turn trace and the execution log.
//!
//! The execution log is best-effort. [`AuditSink`] implementations swallow
//! their own failures so logging can never fail a turn.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::{json, Value};

use super::types::{Action, ActionInput, AgentState, Decision, TraceEntry};
use crate::db::{DocumentStore, Row, Table};

/// One append-only execution-log entry.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionRecord {
    pub user_id: String,
    pub session_id: String,
    pub iteration: u32,
    pub agent_state: AgentState,
    /// Tool name, or `"error"` for a failed turn.
    pub action: String,
    pub action_input: ActionInput,
    pub observation: String,
    pub success: bool,
    pub reasoning: String,
    pub confidence_score: f32,
    pub duration_ms: Option<u64>,
    pub created_at: DateTime<Utc>,
}

impl ExecutionRecord {
    fn to_row(&self) -> Row {
        let value = json!({
            "user_id": self.user_id,
            "session_id": self.session_id,
            "iteration": self.iteration,
            "agent_state": self.agent_state.as_str(),
            "action": self.action,
            "action_input": Value::Object(self.action_input.clone()).to_string(),
            "observation": self.observation,
            "success": self.success,
            "reasoning": self.reasoning,
            "confidence_score": self.confidence_score,
            "metadata": "{}",
            "duration_ms": self.duration_ms,
            "created_at": self.created_at.to_rfc3339(),
        });
        match value {
            Value::Object(map) => map,
            _ => Row::new(),
        }
    }
}

/// Best-effort sink for execution records.
pub trait AuditSink: Send + Sync {
    /// Append a record. Must not panic or surface errors.
    fn append(&self, record: &ExecutionRecord);
}

/// Writes records to the `agent_execution_logs` table.
pub struct StoreAuditSink {
    store: Arc<dyn DocumentStore>,
}

impl StoreAuditSink {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }
}

impl AuditSink for StoreAuditSink {
    fn append(&self, record: &ExecutionRecord) {
        if let Err(e) = self.store.insert(Table::ExecutionLogs, &record.to_row()) {
            tracing::debug!(session_id = %record.session_id, error = %e, "Execution log write dropped");
        }
    }
}

/// Keeps records in memory; useful for embedding and tests.
#[derive(Default)]
pub struct MemoryAuditSink {
    entries: Mutex<Vec<ExecutionRecord>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<ExecutionRecord> {
        self.entries
            .lock()
            .map(|entries| entries.clone())
            .unwrap_or_default()
    }
}

impl AuditSink for MemoryAuditSink {
    fn append(&self, record: &ExecutionRecord) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.push(record.clone());
        }
    }
}

/// Per-call facts handed to [`Reflector::reflect`].
pub struct Reflection<'a> {
    pub session_id: &'a str,
    pub iteration: u32,
    pub state: AgentState,
    pub decision: &'a Decision,
    pub observation: &'a str,
    pub duration: Duration,
}

pub struct Reflector {
    user_id: String,
    sink: Arc<dyn AuditSink>,
}

impl Reflector {
    pub fn new(user_id: impl Into<String>, sink: Arc<dyn AuditSink>) -> Self {
        Self {
            user_id: user_id.into(),
            sink,
        }
    }

    /// Record a completed tool call in the action history, the trace and the
    /// execution log.
    pub fn reflect(
        &self,
        reflection: Reflection<'_>,
        history: &mut Vec<Action>,
        trace: &mut Vec<TraceEntry>,
    ) {
        let decision = reflection.decision;
        history.push(decision.action);
        trace.push(TraceEntry {
            iteration: reflection.iteration,
            state: reflection.state,
            action: decision.action,
            observation: reflection.observation.to_string(),
        });

        self.sink.append(&ExecutionRecord {
            user_id: self.user_id.clone(),
            session_id: reflection.session_id.to_string(),
            iteration: reflection.iteration,
            agent_state: reflection.state,
            action: decision.action.as_str().to_string(),
            action_input: decision.action_input.clone(),
            observation: reflection.observation.to_string(),
            success: true,
            reasoning: decision.reasoning.clone(),
            confidence_score: decision.confidence_score,
            duration_ms: Some(reflection.duration.as_millis() as u64),
            created_at: Utc::now(),
        });
    }

    /// Record a turn that failed at `iteration`.
    pub fn record_failure(&self, session_id: &str, iteration: u32, error: &str) {
        self.sink.append(&ExecutionRecord {
            user_id: self.user_id.clone(),
            session_id: session_id.to_string(),
            iteration,
            agent_state: AgentState::Error,
            action: "error".to_string(),
            action_input: ActionInput::new(),
            observation: error.to_string(),
            success: false,
            reasoning: "Agent failed during processing.".to_string(),
            confidence_score: 0.0,
            duration_ms: None,
            created_at: Utc::now(),
        });
    }
}
