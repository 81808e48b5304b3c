//! Decision engine: asks the model for the next action, parses its answer,
//! and runs it through the guard. Unusable answers go to the fallback policy.

use std::sync::Arc;

use serde_json::{Map, Value};

use super::json::parse_object;
use super::policy::{fallback, guard};
use super::prompt::{build_decision_prompt, DECISION_SYSTEM_PROMPT};
use super::types::{Action, ActionInput, ConversationWindow, Decision, ExtractedDataSet};
use crate::llm::CompletionService;

/// Where a decision came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionSource {
    /// Model output, corrected by the guard.
    Model,
    /// Deterministic fallback after an unusable model answer.
    Fallback,
}

/// Read-only inputs for one decision.
pub struct DecisionContext<'a> {
    pub window: &'a ConversationWindow,
    pub data: &'a ExtractedDataSet,
    pub pending_clarifications: usize,
    pub history: &'a [Action],
}

pub struct DecisionEngine {
    completion: Arc<CompletionService>,
    min_save_confidence: f32,
}

impl DecisionEngine {
    pub fn new(completion: Arc<CompletionService>, min_save_confidence: f32) -> Self {
        Self {
            completion,
            min_save_confidence,
        }
    }

    /// Choose the next action.
    pub fn decide(&self, ctx: &DecisionContext<'_>) -> (Decision, DecisionSource) {
        let prompt = build_decision_prompt(
            ctx.window,
            &ctx.data.summary(),
            ctx.pending_clarifications,
            ctx.history,
        );
        let response = self.completion.complete(&prompt, DECISION_SYSTEM_PROMPT);

        match parse_object(&response).and_then(|map| parse_decision(&map)) {
            Some(proposed) => {
                tracing::debug!(proposed = %proposed.action, "Model proposed action");
                let decision = guard(ctx.history, ctx.data, proposed, self.min_save_confidence);
                (decision, DecisionSource::Model)
            }
            None => {
                let decision = fallback(ctx.data, self.min_save_confidence);
                tracing::debug!(action = %decision.action, "Model output unusable, using fallback");
                (decision, DecisionSource::Fallback)
            }
        }
    }
}

/// Build a [`Decision`] from the model's JSON object.
///
/// `None` if `action` is missing or not one of the known tools.
pub fn parse_decision(map: &Map<String, Value>) -> Option<Decision> {
    let action = map
        .get("action")
        .and_then(Value::as_str)
        .and_then(Action::from_str)?;

    let text = |key: &str| {
        map.get(key)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };
    let has_health_data = match map.get("has_health_data") {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => s.eq_ignore_ascii_case("true"),
        Some(Value::Number(n)) => n.as_f64().is_some_and(|v| v != 0.0),
        _ => false,
    };
    let confidence_score = map
        .get("confidence_score")
        .and_then(|v| match v {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        })
        .filter(|v| v.is_finite())
        .map(|v| v.clamp(0.0, 1.0) as f32)
        .unwrap_or(0.0);
    let action_input = match map.get("action_input") {
        Some(Value::Object(input)) => input.clone(),
        _ => ActionInput::new(),
    };

    Some(Decision {
        reasoning: text("reasoning"),
        has_health_data,
        confidence_score,
        action,
        action_input,
        why_this_action: text("why_this_action"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::types::{ConversationTurn, HealthRecord, MetricValue, WorkingItem};
    use crate::llm::MockLlmClient;
    use serde_json::json;

    fn engine(response: &str) -> (DecisionEngine, Arc<MockLlmClient>) {
        let client = Arc::new(MockLlmClient::new(response));
        let completion = CompletionService::new(Box::new(Arc::clone(&client)), "test-model");
        (DecisionEngine::new(Arc::new(completion), 0.5), client)
    }

    fn window() -> ConversationWindow {
        let mut window = ConversationWindow::new();
        window.push(ConversationTurn::user("My blood pressure is 130/85"));
        window
    }

    #[test]
    fn model_decision_is_used_when_guard_allows() {
        let (engine, client) = engine(
            r#"{"reasoning": "bp mentioned", "has_health_data": true, "confidence_score": 0.9,
                "action": "extract_data", "action_input": {}, "why_this_action": "new data"}"#,
        );
        let data = ExtractedDataSet::new();
        let (decision, source) = engine.decide(&DecisionContext {
            window: &window(),
            data: &data,
            pending_clarifications: 0,
            history: &[],
        });

        assert_eq!(source, DecisionSource::Model);
        assert_eq!(decision.action, Action::ExtractData);
        assert_eq!(decision.reasoning, "bp mentioned");

        let prompts = client.prompts();
        assert_eq!(prompts[0].0, DECISION_SYSTEM_PROMPT);
        assert!(prompts[0].1.contains("User: My blood pressure is 130/85"));
    }

    #[test]
    fn model_decision_is_guarded() {
        let (engine, _) = engine(r#"```json
{"action": "finish", "confidence_score": 0.7}
```"#);
        let mut data = ExtractedDataSet::new();
        data.push(WorkingItem::HealthRecord(HealthRecord {
            metric: Some("blood_pressure".into()),
            value: Some(MetricValue::Text("130/85".into())),
            confidence: 0.9,
            ..HealthRecord::default()
        }));

        let (decision, source) = engine.decide(&DecisionContext {
            window: &window(),
            data: &data,
            pending_clarifications: 0,
            history: &[Action::ExtractData],
        });
        assert_eq!(source, DecisionSource::Model);
        assert_eq!(decision.action, Action::ValidateData);
        assert!((decision.confidence_score - 0.7).abs() < 1e-6);
    }

    #[test]
    fn unusable_output_falls_back() {
        for response in ["", "I think you should save it.", r#"{"action": "delete_all"}"#, r#"{"reasoning": "no action"}"#] {
            let (engine, _) = engine(response);
            let data = ExtractedDataSet::new();
            let (decision, source) = engine.decide(&DecisionContext {
                window: &window(),
                data: &data,
                pending_clarifications: 0,
                history: &[Action::ExtractData],
            });
            assert_eq!(source, DecisionSource::Fallback, "response: {response:?}");
            // Fallback bypasses the guard, so an empty set re-extracts
            assert_eq!(decision.action, Action::ExtractData);
        }
    }

    #[test]
    fn parse_decision_normalizes_fields() {
        let map = json!({
            "action": "Save_To_Database",
            "has_health_data": "true",
            "confidence_score": 3.5,
            "action_input": "not an object"
        });
        let decision = parse_decision(map.as_object().unwrap()).unwrap();
        assert_eq!(decision.action, Action::SaveToDatabase);
        assert!(decision.has_health_data);
        assert_eq!(decision.confidence_score, 1.0);
        assert!(decision.action_input.is_empty());
        assert_eq!(decision.reasoning, "");
    }
}
