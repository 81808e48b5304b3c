//! Agent error types.
//!
//! Tools degrade on collaborator failures instead of returning these; an
//! `AgentError` that reaches the turn boundary fails the turn.

use thiserror::Error;

use crate::db::DatabaseError;
use crate::llm::LlmError;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("LLM client error: {0}")]
    Llm(#[from] LlmError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Agent lock poisoned for {0}")]
    LockPoisoned(String),

    #[error("Clarification not found: {0}")]
    ClarificationNotFound(uuid::Uuid),
}
