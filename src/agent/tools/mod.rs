//! Tool executor: one discrete operation per iteration.
//!
//! Tools mutate the working set and talk to the completion service and the
//! record store. Collaborator failures degrade into observation text; only
//! an [`AgentError`] escapes, and that fails the turn.

pub mod clarify;
pub mod duplicate;
pub mod extract;
pub mod insight;
pub mod save;
pub mod validate;

use std::sync::Arc;

use super::error::AgentError;
use super::types::{Action, ActionInput, Clarification, ConversationWindow, ExtractedDataSet, LastSaved};
use crate::db::{DocumentStore, Query};
use crate::llm::CompletionService;

/// Mutable per-user state a tool may touch.
pub struct ToolContext<'a> {
    pub user_id: &'a str,
    /// Normalised member id; `None` means the user themself.
    pub member_id: Option<&'a str>,
    pub window: &'a ConversationWindow,
    pub data: &'a mut ExtractedDataSet,
    pub clarifications: &'a mut Vec<Clarification>,
    pub last_saved: &'a mut LastSaved,
}

/// Result of one tool call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutcome {
    pub observation: String,
    /// Rows newly written by this call.
    pub saved: usize,
}

impl ToolOutcome {
    pub fn observe(observation: impl Into<String>) -> Self {
        Self {
            observation: observation.into(),
            saved: 0,
        }
    }
}

pub struct ToolExecutor {
    completion: Arc<CompletionService>,
    store: Arc<dyn DocumentStore>,
    min_save_confidence: f32,
}

impl ToolExecutor {
    pub fn new(
        completion: Arc<CompletionService>,
        store: Arc<dyn DocumentStore>,
        min_save_confidence: f32,
    ) -> Self {
        Self {
            completion,
            store,
            min_save_confidence,
        }
    }

    /// Run `action` against the context.
    pub fn execute(
        &self,
        action: Action,
        input: &ActionInput,
        ctx: &mut ToolContext<'_>,
    ) -> Result<ToolOutcome, AgentError> {
        let store = self.store.as_ref();
        let outcome = match action {
            Action::ExtractData => ToolOutcome::observe(extract::run(&self.completion, input, ctx)),
            Action::ValidateData => {
                ToolOutcome::observe(validate::run(ctx.data, self.min_save_confidence))
            }
            Action::CheckDuplicates => ToolOutcome::observe(duplicate::run(store, ctx)),
            Action::SaveToDatabase => save::run(store, ctx, self.min_save_confidence),
            Action::AskClarification => ToolOutcome::observe(clarify::run(ctx)?),
            Action::SearchKnowledge => ToolOutcome::observe(insight::search_knowledge(input)),
            Action::CalculateMetrics => ToolOutcome::observe(insight::calculate_metrics(ctx.data)),
            Action::GetUserHistory => ToolOutcome::observe(insight::user_history(store, ctx)),
            Action::Finish => ToolOutcome::observe("No-op action"),
        };
        tracing::debug!(
            action = %action,
            saved = outcome.saved,
            observation = %outcome.observation,
            "Tool executed"
        );
        Ok(outcome)
    }
}

/// Run a tenancy-scoped select.
///
/// With a member id, the query is first narrowed to that member; if that
/// fails (e.g. a schema without `member_id`) it is retried unscoped. A
/// second failure is reported as `None`.
pub(crate) fn scoped_select(
    store: &dyn DocumentStore,
    query: Query,
    member_id: Option<&str>,
) -> Option<Vec<crate::db::Row>> {
    let Some(member) = member_id else {
        return match store.select(&query) {
            Ok(rows) => Some(rows),
            Err(e) => {
                tracing::warn!(table = %query.table, error = %e, "Store query failed");
                None
            }
        };
    };

    let scoped = query.eq("member_id", member);
    match store.select(&scoped) {
        Ok(rows) => Some(rows),
        Err(e) => {
            tracing::warn!(table = %scoped.table, error = %e, "Member-scoped query failed, retrying unscoped");
            let query = scoped.without("member_id");
            match store.select(&query) {
                Ok(rows) => Some(rows),
                Err(e) => {
                    tracing::warn!(table = %query.table, error = %e, "Store query failed");
                    None
                }
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::db::sqlite::run_migrations_up_to;
    use crate::db::{SqliteStore, Table};
    use crate::llm::MockLlmClient;
    use serde_json::json;

    fn executor(response: &str, store: Arc<dyn DocumentStore>) -> ToolExecutor {
        let completion = CompletionService::new(Box::new(MockLlmClient::new(response)), "m");
        ToolExecutor::new(Arc::new(completion), store, 0.5)
    }

    #[test]
    fn finish_is_a_no_op() {
        let store: Arc<dyn DocumentStore> = Arc::new(SqliteStore::in_memory().unwrap());
        let exec = executor("", store);
        let mut harness = Harness::new("hello");
        let outcome = exec
            .execute(Action::Finish, &ActionInput::new(), &mut harness.ctx())
            .unwrap();
        assert_eq!(outcome, ToolOutcome::observe("No-op action"));
    }

    #[test]
    fn search_knowledge_is_a_stub() {
        let store: Arc<dyn DocumentStore> = Arc::new(SqliteStore::in_memory().unwrap());
        let exec = executor("", store);
        let mut harness = Harness::new("what is hypertension?");
        let outcome = exec
            .execute(Action::SearchKnowledge, &ActionInput::new(), &mut harness.ctx())
            .unwrap();
        assert_eq!(outcome.observation, "Knowledge search not configured.");
    }

    #[test]
    fn scoped_select_retries_without_member() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        run_migrations_up_to(&conn, 1).unwrap();
        let store = SqliteStore::new(conn);
        for user in ["user-1", "user-2"] {
            store
                .insert(
                    Table::HealthRecords,
                    json!({"user_id": user, "metric": "weight", "value": 70, "date": "2026-03-01"})
                        .as_object()
                        .unwrap(),
                )
                .unwrap();
        }

        let rows = scoped_select(
            &store,
            Query::table(Table::HealthRecords).eq("user_id", "user-1"),
            Some("3f2b8c1e-5d4a-4b6c-9e7f-0a1b2c3d4e5f"),
        )
        .unwrap();
        // Only the member predicate is dropped; the user filter still applies
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["user_id"], "user-1");
    }

    #[test]
    fn scoped_select_reports_none_on_repeated_failure() {
        let store = FlakyStore::failing();
        let rows = scoped_select(
            &store,
            Query::table(Table::HealthRecords),
            Some("3f2b8c1e-5d4a-4b6c-9e7f-0a1b2c3d4e5f"),
        );
        assert!(rows.is_none());
        assert_eq!(store.calls(), 2);
    }
}
