use super::types::{Action, ConversationWindow};

pub const DECISION_SYSTEM_PROMPT: &str = "You are an autonomous health data agent.";

pub const EXTRACTION_SYSTEM_PROMPT: &str = "You extract structured health data.";

/// Turns shown to the decision model.
pub const DECISION_CONTEXT_TURNS: usize = 5;

/// Turns shown to the extraction model.
pub const EXTRACTION_CONTEXT_TURNS: usize = 10;

/// Actions shown to the decision model as recent history.
pub const RECENT_ACTIONS: usize = 3;

/// Build the per-iteration decision prompt.
pub fn build_decision_prompt(
    window: &ConversationWindow,
    extracted_summary: &std::collections::BTreeMap<String, usize>,
    pending_clarifications: usize,
    history: &[Action],
) -> String {
    let conversation = window.render(DECISION_CONTEXT_TURNS);
    let summary = serde_json::to_string(extracted_summary).unwrap_or_else(|_| "{}".to_string());
    let recent: Vec<&str> = history[history.len().saturating_sub(RECENT_ACTIONS)..]
        .iter()
        .map(Action::as_str)
        .collect();
    let tools: Vec<&str> = Action::all().iter().map(Action::as_str).collect();

    format!(
        "You are an autonomous health data management agent.\n\
Your goal: Extract, validate, and save accurate health data from conversations.\n\n\
CURRENT CONVERSATION:\n\
{conversation}\n\n\
CURRENT STATE:\n\
Extracted Data: {summary}\n\
Pending Clarifications: {pending_clarifications}\n\
Recent Actions: {recent:?}\n\n\
AVAILABLE TOOLS:\n\
{tools:?}\n\n\
Respond ONLY with JSON:\n\
{{\n\
  \"reasoning\": \"...\",\n\
  \"has_health_data\": true,\n\
  \"confidence_score\": 0.85,\n\
  \"action\": \"extract_data\",\n\
  \"action_input\": {{}},\n\
  \"why_this_action\": \"...\"\n\
}}"
    )
}

/// Build the structured-extraction prompt over the conversation window.
pub fn build_extraction_prompt(window: &ConversationWindow) -> String {
    let conversation = window.render(EXTRACTION_CONTEXT_TURNS);
    format!(
        "Extract ALL health-related data from this conversation.\n\n\
Conversation:\n\
{conversation}\n\n\
Return ONLY valid JSON with this structure:\n\
{{\n\
  \"health_records\": [{{\"type\": \"blood_pressure|blood_sugar|weight|height|temperature|heart_rate\",\n\
    \"value\": \"...\",\n\
    \"unit\": \"...\",\n\
    \"recorded_at\": \"...\",\n\
    \"confidence\": 0.85,\n\
    \"source_text\": \"...\"\n\
  }}],\n\
  \"medicines\": [{{\"name\": \"...\", \"dosage\": \"...\", \"frequency\": \"...\", \"duration\": \"...\",\n\
    \"instructions\": \"...\", \"start_date\": \"...\", \"confidence\": 0.8, \"source_text\": \"...\"\n\
  }}],\n\
  \"appointments\": [{{\"doctor_name\": \"...\", \"specialty\": \"...\", \"date\": \"...\", \"time\": \"...\",\n\
    \"reason\": \"...\", \"location\": \"...\", \"confidence\": 0.8, \"source_text\": \"...\"\n\
  }}],\n\
  \"symptoms\": [{{\"symptom\": \"...\", \"severity\": \"...\", \"duration\": \"...\", \"notes\": \"...\",\n\
    \"started_at\": \"...\", \"confidence\": 0.7, \"source_text\": \"...\"\n\
  }}]\n\
}}"
    )
}
