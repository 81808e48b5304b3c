//! Conversational health-data agent.
//!
//! Each turn runs a bounded think → act → reflect loop: the decision engine
//! asks the model for the next tool (corrected by the guard policy, or
//! replaced by the fallback policy when the reply is unusable), the tool
//! executor runs it against the per-user working set, and the reflector
//! records the step. Items move through extract → validate → duplicate
//! check → save; anything uncertain becomes a clarification question.

pub mod controller;
pub mod engine;
pub mod error;
pub mod heuristics;
pub mod json;
pub mod policy;
pub mod prompt;
pub mod reflector;
pub mod registry;
pub mod tools;
pub mod types;

pub use controller::{AgentDeps, HealthDataAgent};
pub use error::AgentError;
pub use reflector::{AuditSink, ExecutionRecord, MemoryAuditSink, StoreAuditSink};
pub use registry::{AgentFactory, AgentRegistry};
pub use types::*;
