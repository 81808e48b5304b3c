//! Structured extraction over the conversation window.
//!
//! Every successful call replaces the working set wholesale. Intent hints
//! from the decision's `action_input` then narrow or seed the result, and a
//! symptom heuristic runs over the last user message when no symptom
//! survived.

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use super::ToolContext;
use crate::agent::heuristics::heuristic_symptoms;
use crate::agent::json::parse_object;
use crate::agent::prompt::{build_extraction_prompt, EXTRACTION_SYSTEM_PROMPT};
use crate::agent::types::{
    ActionInput, Category, ExtractedDataSet, Medicine, Symptom, WorkingItem,
};
use crate::llm::CompletionService;

/// Confidence of items seeded from an explicit hint.
const HINTED_CONFIDENCE: f32 = 0.7;
/// Confidence of symptoms recovered from the raw user message.
const HEURISTIC_CONFIDENCE: f32 = 0.6;
/// Confidence of the placeholder symptom; low enough to force clarification.
const PLACEHOLDER_CONFIDENCE: f32 = 0.3;

pub const FAILED_OBSERVATION: &str = "Extraction failed: invalid JSON.";

/// Intent hints the decision model attached to an extract_data action.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IntentHints {
    pub medicine: Option<String>,
    pub symptoms: Vec<String>,
    /// The model said it was after a specific field (e.g. "symptoms").
    pub field: Option<String>,
}

impl IntentHints {
    pub fn from_input(input: &ActionInput) -> Self {
        let text = |key: &str| {
            input
                .get(key)
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };

        let medicine = text("medicine")
            .or_else(|| text("medication"))
            .or_else(|| text("name"));

        let raw_symptoms = input
            .get("symptoms")
            .or_else(|| input.get("symptom"))
            .filter(|v| !v.is_null())
            .or_else(|| {
                (input.get("key").and_then(Value::as_str) == Some("symptoms"))
                    .then(|| input.get("value"))
                    .flatten()
            });
        let symptoms = match raw_symptoms {
            Some(Value::Array(values)) => values
                .iter()
                .map(|v| match v {
                    Value::String(s) => s.trim().to_string(),
                    other => other.to_string(),
                })
                .filter(|s| !s.is_empty())
                .collect(),
            Some(Value::String(s)) if !s.trim().is_empty() => vec![s.trim().to_string()],
            _ => Vec::new(),
        };

        Self {
            medicine,
            symptoms,
            field: text("field"),
        }
    }
}

/// Parse one category array, skipping entries that do not fit the schema.
fn parse_items<T, F>(map: &Map<String, Value>, category: Category, wrap: F) -> Vec<WorkingItem>
where
    T: DeserializeOwned,
    F: Fn(T) -> WorkingItem,
{
    let Some(Value::Array(values)) = map.get(category.as_str()) else {
        return Vec::new();
    };
    values
        .iter()
        .filter_map(|value| match serde_json::from_value::<T>(value.clone()) {
            Ok(item) => Some(wrap(item)),
            Err(e) => {
                tracing::warn!(category = %category, error = %e, "Skipping malformed extracted item");
                None
            }
        })
        .collect()
}

/// Build a fresh working set from the model's JSON object.
pub fn data_set_from_response(map: &Map<String, Value>) -> ExtractedDataSet {
    let mut data = ExtractedDataSet::new();
    let items = parse_items(map, Category::HealthRecords, WorkingItem::HealthRecord)
        .into_iter()
        .chain(parse_items(map, Category::Medicines, WorkingItem::Medicine))
        .chain(parse_items(map, Category::Appointments, WorkingItem::Appointment))
        .chain(parse_items(map, Category::Symptoms, WorkingItem::Symptom));
    for item in items {
        data.push(item);
    }
    data
}

fn symptom_item(name: Option<String>, confidence: f32, source_text: String) -> WorkingItem {
    WorkingItem::Symptom(Symptom {
        symptom: name,
        confidence,
        source_text: Some(source_text),
        ..Symptom::default()
    })
}

fn symptom_name(item: &WorkingItem) -> String {
    match item {
        WorkingItem::Symptom(s) => s.symptom.as_deref().unwrap_or_default().trim().to_lowercase(),
        _ => String::new(),
    }
}

/// Apply hint narrowing/seeding and the symptom fallback chain.
pub fn apply_hints(data: &mut ExtractedDataSet, hints: &IntentHints, last_user_message: &str) {
    if data.is_empty() {
        if let Some(name) = &hints.medicine {
            data.push(WorkingItem::Medicine(Medicine {
                name: Some(name.clone()),
                confidence: HINTED_CONFIDENCE,
                source_text: Some(format!("User mentioned {name}.")),
                ..Medicine::default()
            }));
        }
    }

    if let Some(name) = &hints.medicine {
        let hint = name.to_lowercase();
        data.retain(Category::Medicines, |item| match item {
            WorkingItem::Medicine(m) => {
                m.name.as_deref().unwrap_or_default().trim().to_lowercase() == hint
            }
            _ => false,
        });
    }

    if !hints.symptoms.is_empty() {
        if data.count(Category::Symptoms) == 0 {
            for symptom in &hints.symptoms {
                data.push(symptom_item(
                    Some(symptom.clone()),
                    HINTED_CONFIDENCE,
                    format!("User mentioned {symptom}."),
                ));
            }
        } else {
            let wanted: Vec<String> = hints.symptoms.iter().map(|s| s.to_lowercase()).collect();
            data.retain(Category::Symptoms, |item| wanted.contains(&symptom_name(item)));
        }

        // Symptom intent without a medicine hint: extracted medicines are noise
        if hints.medicine.is_none() {
            data.clear_category(Category::Medicines);
        }
    }

    if data.count(Category::Symptoms) == 0 {
        let guessed = heuristic_symptoms(last_user_message);
        if !guessed.is_empty() {
            for symptom in guessed {
                data.push(symptom_item(
                    Some(symptom),
                    HEURISTIC_CONFIDENCE,
                    last_user_message.to_string(),
                ));
            }
        } else if hints.field.as_deref() == Some("symptoms") {
            data.push(symptom_item(
                None,
                PLACEHOLDER_CONFIDENCE,
                last_user_message.to_string(),
            ));
        }
    }
}

/// "Extracted N health records, N medicines, N appointments, N symptoms."
pub fn summarize(data: &ExtractedDataSet) -> String {
    format!(
        "Extracted {} health records, {} medicines, {} appointments, {} symptoms.",
        data.count(Category::HealthRecords),
        data.count(Category::Medicines),
        data.count(Category::Appointments),
        data.count(Category::Symptoms),
    )
}

pub fn run(completion: &CompletionService, input: &ActionInput, ctx: &mut ToolContext<'_>) -> String {
    let prompt = build_extraction_prompt(ctx.window);
    let response = completion.complete(&prompt, EXTRACTION_SYSTEM_PROMPT);

    let Some(map) = parse_object(&response) else {
        ctx.data.clear();
        tracing::warn!(user_id = ctx.user_id, "Extraction response was not a JSON object");
        return FAILED_OBSERVATION.to_string();
    };

    let mut data = data_set_from_response(&map);
    let hints = IntentHints::from_input(input);
    let last_user = ctx.window.last_user_message().unwrap_or_default();
    apply_hints(&mut data, &hints, last_user);

    *ctx.data = data;
    summarize(ctx.data)
}

#[cfg(test)]
mod tests {
    use super::super::test_support::Harness;
    use super::*;
    use crate::agent::types::MetricValue;
    use crate::llm::MockLlmClient;
    use serde_json::json;

    fn service(response: &str) -> CompletionService {
        CompletionService::new(Box::new(MockLlmClient::new(response)), "m")
    }

    fn input(value: Value) -> ActionInput {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn blood_pressure_statement_extracts_one_record() {
        let completion = service(
            r#"{"health_records": [{"type": "blood_pressure", "value": "130/85", "unit": "mmHg",
                "confidence": 0.9, "source_text": "My blood pressure is 130/85"}],
               "medicines": [], "appointments": [], "symptoms": []}"#,
        );
        let mut harness = Harness::new("My blood pressure is 130/85");
        let observation = run(&completion, &ActionInput::new(), &mut harness.ctx());

        assert_eq!(
            observation,
            "Extracted 1 health records, 0 medicines, 0 appointments, 0 symptoms."
        );
        match &harness.data.items(Category::HealthRecords)[0] {
            WorkingItem::HealthRecord(r) => {
                assert_eq!(r.metric.as_deref(), Some("blood_pressure"));
                assert_eq!(r.value, Some(MetricValue::Text("130/85".into())));
                assert!(!r.status.validated);
            }
            other => panic!("unexpected item {other:?}"),
        }
    }

    #[test]
    fn invalid_json_clears_working_set() {
        let completion = service("Sorry, I cannot help with that.");
        let mut harness = Harness::new("My blood pressure is 130/85");
        harness.data.push(WorkingItem::Medicine(Medicine {
            name: Some("Aspirin".into()),
            confidence: 0.9,
            ..Medicine::default()
        }));

        let observation = run(&completion, &ActionInput::new(), &mut harness.ctx());
        assert_eq!(observation, FAILED_OBSERVATION);
        assert!(harness.data.is_empty());
    }

    #[test]
    fn extraction_replaces_rather_than_accumulates() {
        let completion = service(r#"{"medicines": [{"name": "Metformin", "confidence": 0.8}]}"#);
        let mut harness = Harness::new("I take metformin");
        run(&completion, &ActionInput::new(), &mut harness.ctx());
        run(&completion, &ActionInput::new(), &mut harness.ctx());
        assert_eq!(harness.data.count(Category::Medicines), 1);
    }

    #[test]
    fn malformed_items_are_skipped() {
        let map = json!({
            "health_records": [{"type": "weight", "value": true}, {"type": "weight", "value": 72}],
            "medicines": "not a list",
            "symptoms": [42]
        });
        let data = data_set_from_response(map.as_object().unwrap());
        assert_eq!(data.count(Category::HealthRecords), 1);
        assert_eq!(data.count(Category::Medicines), 0);
        assert_eq!(data.count(Category::Symptoms), 0);
    }

    #[test]
    fn medicine_hint_seeds_when_nothing_extracted() {
        let mut data = ExtractedDataSet::new();
        let hints = IntentHints::from_input(&input(json!({"medication": "Ibuprofen"})));
        apply_hints(&mut data, &hints, "took my pill");

        assert_eq!(data.count(Category::Medicines), 1);
        let item = &data.items(Category::Medicines)[0];
        assert_eq!(item.confidence(), HINTED_CONFIDENCE);
        assert_eq!(item.source_text(), Some("User mentioned Ibuprofen."));
    }

    #[test]
    fn medicine_hint_narrows_to_exact_name() {
        let map = json!({"medicines": [
            {"name": "Aspirin", "confidence": 0.9},
            {"name": "aspirin ", "confidence": 0.9},
            {"name": "Aspirin Plus", "confidence": 0.9}
        ]});
        let mut data = data_set_from_response(map.as_object().unwrap());
        let hints = IntentHints::from_input(&input(json!({"medicine": "ASPIRIN"})));
        apply_hints(&mut data, &hints, "I took aspirin");
        assert_eq!(data.count(Category::Medicines), 2);
    }

    #[test]
    fn symptom_hints_seed_narrow_and_drop_medicines() {
        let map = json!({
            "medicines": [{"name": "Paracetamol", "confidence": 0.6}],
            "symptoms": [
                {"symptom": "Headache", "confidence": 0.8},
                {"symptom": "rash", "confidence": 0.8}
            ]
        });
        let mut data = data_set_from_response(map.as_object().unwrap());
        let hints = IntentHints::from_input(&input(json!({"symptoms": ["headache"]})));
        apply_hints(&mut data, &hints, "I have a headache");

        assert_eq!(data.count(Category::Symptoms), 1);
        assert_eq!(symptom_name(&data.items(Category::Symptoms)[0]), "headache");
        assert_eq!(data.count(Category::Medicines), 0);

        let mut empty = ExtractedDataSet::new();
        let hints = IntentHints::from_input(&input(json!({"key": "symptoms", "value": "nausea"})));
        apply_hints(&mut empty, &hints, "");
        assert_eq!(empty.count(Category::Symptoms), 1);
        assert_eq!(empty.items(Category::Symptoms)[0].confidence(), HINTED_CONFIDENCE);
    }

    #[test]
    fn heuristic_symptoms_fill_the_gap() {
        let completion = service(r#"{"health_records": [], "symptoms": []}"#);
        let mut harness = Harness::new("I feel feverish");
        let observation = run(&completion, &ActionInput::new(), &mut harness.ctx());

        assert!(observation.ends_with("1 symptoms."));
        match &harness.data.items(Category::Symptoms)[0] {
            WorkingItem::Symptom(s) => {
                assert_eq!(s.symptom.as_deref(), Some("feverish"));
                assert_eq!(s.confidence, HEURISTIC_CONFIDENCE);
                assert_eq!(s.source_text.as_deref(), Some("I feel feverish"));
            }
            other => panic!("unexpected item {other:?}"),
        }
    }

    #[test]
    fn symptom_field_hint_seeds_placeholder() {
        let mut data = ExtractedDataSet::new();
        let hints = IntentHints::from_input(&input(json!({"field": "symptoms"})));
        apply_hints(&mut data, &hints, "Not great today");

        assert_eq!(data.count(Category::Symptoms), 1);
        match &data.items(Category::Symptoms)[0] {
            WorkingItem::Symptom(s) => {
                assert!(s.symptom.is_none());
                assert_eq!(s.confidence, PLACEHOLDER_CONFIDENCE);
            }
            other => panic!("unexpected item {other:?}"),
        }
    }

    #[test]
    fn extraction_prompt_uses_extraction_system_prompt() {
        let client = std::sync::Arc::new(MockLlmClient::new("{}"));
        let completion =
            CompletionService::new(Box::new(std::sync::Arc::clone(&client)), "m");
        let mut harness = Harness::new("Dentist on Friday at 3pm");
        run(&completion, &ActionInput::new(), &mut harness.ctx());

        let prompts = client.prompts();
        assert_eq!(prompts.len(), 1);
        assert_eq!(prompts[0].0, EXTRACTION_SYSTEM_PROMPT);
        assert!(prompts[0].1.contains("User: Dentist on Friday at 3pm"));
    }
}
