//! Core types for the health-data agent.
//!
//! These types model one turn's lifecycle:
//! Conversation → Decision → Tool call → Working set → Saved rows / Clarifications.

use std::collections::{BTreeMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::Row;

// ═══════════════════════════════════════════
// Agent State
// ═══════════════════════════════════════════

/// Lifecycle state of one controller. Only mutated under the turn lock.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentState {
    #[default]
    Idle,
    Thinking,
    Acting,
    Reflecting,
    Completed,
    Error,
}

impl AgentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::Thinking => "THINKING",
            Self::Acting => "ACTING",
            Self::Reflecting => "REFLECTING",
            Self::Completed => "COMPLETED",
            Self::Error => "ERROR",
        }
    }

    /// True while a turn is in flight.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Thinking | Self::Acting | Self::Reflecting)
    }
}

impl std::fmt::Display for AgentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ═══════════════════════════════════════════
// Actions & Decisions
// ═══════════════════════════════════════════

/// The fixed tool vocabulary, plus `Finish`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    ExtractData,
    ValidateData,
    CheckDuplicates,
    SaveToDatabase,
    AskClarification,
    SearchKnowledge,
    CalculateMetrics,
    GetUserHistory,
    Finish,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ExtractData => "extract_data",
            Self::ValidateData => "validate_data",
            Self::CheckDuplicates => "check_duplicates",
            Self::SaveToDatabase => "save_to_database",
            Self::AskClarification => "ask_clarification",
            Self::SearchKnowledge => "search_knowledge",
            Self::CalculateMetrics => "calculate_metrics",
            Self::GetUserHistory => "get_user_history",
            Self::Finish => "finish",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "extract_data" => Some(Self::ExtractData),
            "validate_data" => Some(Self::ValidateData),
            "check_duplicates" => Some(Self::CheckDuplicates),
            "save_to_database" => Some(Self::SaveToDatabase),
            "ask_clarification" => Some(Self::AskClarification),
            "search_knowledge" => Some(Self::SearchKnowledge),
            "calculate_metrics" => Some(Self::CalculateMetrics),
            "get_user_history" | "get_history" => Some(Self::GetUserHistory),
            "finish" => Some(Self::Finish),
            _ => None,
        }
    }

    pub fn all() -> &'static [Action] {
        &[
            Self::ExtractData,
            Self::ValidateData,
            Self::CheckDuplicates,
            Self::SaveToDatabase,
            Self::AskClarification,
            Self::SearchKnowledge,
            Self::CalculateMetrics,
            Self::GetUserHistory,
            Self::Finish,
        ]
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Free-form arguments the model attached to its chosen action.
pub type ActionInput = serde_json::Map<String, serde_json::Value>;

/// One iteration's choice of action. Produced by the model or the fallback
/// policy, then corrected by the guard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub reasoning: String,
    pub has_health_data: bool,
    pub confidence_score: f32,
    pub action: Action,
    pub action_input: ActionInput,
    pub why_this_action: String,
}

// ═══════════════════════════════════════════
// Item Status
// ═══════════════════════════════════════════

/// Pipeline progress of one working item.
///
/// Boolean flags only move false → true; the setters below are the only
/// writers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    pub validated: bool,
    pub duplicate_checked: bool,
    pub duplicate: bool,
    pub saved: bool,
    pub needs_clarification: bool,
    pub issues: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub save_error: Option<String>,
}

impl Status {
    /// Record a validation pass. `low_confidence` flags the item for
    /// clarification even when no rule produced an issue.
    pub fn record_validation(&mut self, issues: Vec<String>, low_confidence: bool) {
        if issues.is_empty() {
            self.validated = true;
        } else {
            self.needs_clarification = true;
        }
        if low_confidence {
            self.needs_clarification = true;
        }
        self.issues = issues;
    }

    pub fn record_duplicate_check(&mut self, duplicate: bool) {
        if duplicate {
            self.duplicate = true;
        }
        self.duplicate_checked = true;
    }

    pub fn mark_saved(&mut self) {
        self.saved = true;
        self.save_error = None;
    }
}

// ═══════════════════════════════════════════
// Working Items
// ═══════════════════════════════════════════

/// Confidence used when the model omits one.
pub const DEFAULT_CONFIDENCE: f32 = 0.5;

fn default_confidence() -> f32 {
    DEFAULT_CONFIDENCE
}

/// Accept numbers, numeric strings, or null; clamp into [0, 1].
///
/// A numeric `0` is treated as "not reported" and takes the default, while
/// the string `"0"` is an explicit zero.
fn deserialize_confidence<'de, D>(deserializer: D) -> Result<f32, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    let raw = match &value {
        serde_json::Value::Number(n) => n.as_f64().filter(|v| *v != 0.0),
        serde_json::Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    Ok(raw
        .filter(|v| v.is_finite())
        .map(|v| v.clamp(0.0, 1.0) as f32)
        .unwrap_or(DEFAULT_CONFIDENCE))
}

/// A measurement value as the model reported it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricValue {
    Number(f64),
    Text(String),
}

impl MetricValue {
    pub fn as_f64(&self) -> Option<f64> {
        let value = match self {
            Self::Number(n) => Some(*n),
            Self::Text(s) => s.trim().parse::<f64>().ok(),
        };
        value.filter(|v| v.is_finite())
    }

    pub fn is_blank(&self) -> bool {
        matches!(self, Self::Text(s) if s.trim().is_empty())
    }
}

impl std::fmt::Display for MetricValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => write!(f, "{s}"),
        }
    }
}

/// A vital-sign style measurement (blood pressure, weight, ...).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HealthRecord {
    #[serde(alias = "type")]
    pub metric: Option<String>,
    pub value: Option<MetricValue>,
    pub unit: Option<String>,
    pub recorded_at: Option<String>,
    #[serde(
        default = "default_confidence",
        alias = "confidence_score",
        deserialize_with = "deserialize_confidence"
    )]
    pub confidence: f32,
    pub source_text: Option<String>,
    /// Derived during validation (e.g. "High BP").
    #[serde(default)]
    pub category: Option<String>,
    #[serde(skip_deserializing, default)]
    pub status: Status,
}

impl HealthRecord {
    /// Lowercased metric name, or "" when absent.
    pub fn metric_key(&self) -> String {
        self.metric
            .as_deref()
            .map(|m| m.trim().to_lowercase())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Medicine {
    pub name: Option<String>,
    pub dosage: Option<String>,
    pub frequency: Option<String>,
    pub duration: Option<String>,
    pub instructions: Option<String>,
    #[serde(alias = "startDate")]
    pub start_date: Option<String>,
    #[serde(alias = "endDate")]
    pub end_date: Option<String>,
    pub form: Option<String>,
    pub unit: Option<String>,
    #[serde(alias = "doseCount")]
    pub dose_count: Option<u32>,
    #[serde(
        default = "default_confidence",
        alias = "confidence_score",
        deserialize_with = "deserialize_confidence"
    )]
    pub confidence: f32,
    pub source_text: Option<String>,
    #[serde(skip_deserializing, default)]
    pub status: Status,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Appointment {
    pub doctor_name: Option<String>,
    pub doctor_id: Option<String>,
    pub specialty: Option<String>,
    pub date: Option<String>,
    pub time: Option<String>,
    pub reason: Option<String>,
    pub location: Option<String>,
    #[serde(
        default = "default_confidence",
        alias = "confidence_score",
        deserialize_with = "deserialize_confidence"
    )]
    pub confidence: f32,
    pub source_text: Option<String>,
    #[serde(skip_deserializing, default)]
    pub status: Status,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Symptom {
    pub symptom: Option<String>,
    pub severity: Option<String>,
    pub duration: Option<String>,
    pub notes: Option<String>,
    pub started_at: Option<String>,
    #[serde(
        default = "default_confidence",
        alias = "confidence_score",
        deserialize_with = "deserialize_confidence"
    )]
    pub confidence: f32,
    pub source_text: Option<String>,
    #[serde(skip_deserializing, default)]
    pub status: Status,
}

/// The four working-set categories, in their fixed order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    HealthRecords,
    Medicines,
    Appointments,
    Symptoms,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HealthRecords => "health_records",
            Self::Medicines => "medicines",
            Self::Appointments => "appointments",
            Self::Symptoms => "symptoms",
        }
    }

    /// Singular item label used in clarifications and failure keys.
    pub fn item_type(&self) -> &'static str {
        match self {
            Self::HealthRecords => "health_record",
            Self::Medicines => "medicine",
            Self::Appointments => "appointment",
            Self::Symptoms => "symptom",
        }
    }

    pub fn all() -> &'static [Category] {
        &[
            Self::HealthRecords,
            Self::Medicines,
            Self::Appointments,
            Self::Symptoms,
        ]
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One extracted item: category-specific fields plus a shared [`Status`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum WorkingItem {
    HealthRecord(HealthRecord),
    Medicine(Medicine),
    Appointment(Appointment),
    Symptom(Symptom),
}

impl WorkingItem {
    pub fn category(&self) -> Category {
        match self {
            Self::HealthRecord(_) => Category::HealthRecords,
            Self::Medicine(_) => Category::Medicines,
            Self::Appointment(_) => Category::Appointments,
            Self::Symptom(_) => Category::Symptoms,
        }
    }

    pub fn status(&self) -> &Status {
        match self {
            Self::HealthRecord(r) => &r.status,
            Self::Medicine(m) => &m.status,
            Self::Appointment(a) => &a.status,
            Self::Symptom(s) => &s.status,
        }
    }

    pub fn status_mut(&mut self) -> &mut Status {
        match self {
            Self::HealthRecord(r) => &mut r.status,
            Self::Medicine(m) => &mut m.status,
            Self::Appointment(a) => &mut a.status,
            Self::Symptom(s) => &mut s.status,
        }
    }

    pub fn confidence(&self) -> f32 {
        match self {
            Self::HealthRecord(r) => r.confidence,
            Self::Medicine(m) => m.confidence,
            Self::Appointment(a) => a.confidence,
            Self::Symptom(s) => s.confidence,
        }
    }

    pub fn source_text(&self) -> Option<&str> {
        match self {
            Self::HealthRecord(r) => r.source_text.as_deref(),
            Self::Medicine(m) => m.source_text.as_deref(),
            Self::Appointment(a) => a.source_text.as_deref(),
            Self::Symptom(s) => s.source_text.as_deref(),
        }
    }

    /// Validated, not a duplicate, not awaiting clarification, not yet saved,
    /// and confident enough.
    pub fn is_save_eligible(&self, min_confidence: f32) -> bool {
        let status = self.status();
        !status.saved
            && !status.duplicate
            && !status.needs_clarification
            && status.validated
            && self.confidence() >= min_confidence
    }
}

// ═══════════════════════════════════════════
// Extracted Data Set (the working set)
// ═══════════════════════════════════════════

/// Per-turn working set. All four categories are always present.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ExtractedDataSet {
    categories: BTreeMap<Category, Vec<WorkingItem>>,
}

impl Default for ExtractedDataSet {
    fn default() -> Self {
        Self::new()
    }
}

impl ExtractedDataSet {
    pub fn new() -> Self {
        Self {
            categories: Category::all().iter().map(|c| (*c, Vec::new())).collect(),
        }
    }

    /// Append an item to its own category.
    pub fn push(&mut self, item: WorkingItem) {
        self.categories.entry(item.category()).or_default().push(item);
    }

    pub fn items(&self, category: Category) -> &[WorkingItem] {
        self.categories
            .get(&category)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn items_mut(&mut self, category: Category) -> impl Iterator<Item = &mut WorkingItem> {
        self.categories.entry(category).or_default().iter_mut()
    }

    /// Keep only the items of `category` matching `keep`.
    pub fn retain<F>(&mut self, category: Category, keep: F)
    where
        F: FnMut(&WorkingItem) -> bool,
    {
        if let Some(items) = self.categories.get_mut(&category) {
            items.retain(keep);
        }
    }

    pub fn clear_category(&mut self, category: Category) {
        if let Some(items) = self.categories.get_mut(&category) {
            items.clear();
        }
    }

    pub fn clear(&mut self) {
        for items in self.categories.values_mut() {
            items.clear();
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &WorkingItem> {
        self.categories.values().flatten()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut WorkingItem> {
        self.categories.values_mut().flatten()
    }

    pub fn count(&self, category: Category) -> usize {
        self.items(category).len()
    }

    pub fn len(&self) -> usize {
        self.categories.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Item count per category name.
    pub fn summary(&self) -> BTreeMap<String, usize> {
        Category::all()
            .iter()
            .map(|c| (c.as_str().to_string(), self.count(*c)))
            .collect()
    }
}

// ═══════════════════════════════════════════
// Clarifications
// ═══════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClarificationStatus {
    Pending,
    Answered,
    Dismissed,
}

impl ClarificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Answered => "answered",
            Self::Dismissed => "dismissed",
        }
    }
}

/// A question blocking an item from being saved until the user resolves it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Clarification {
    pub id: Uuid,
    pub question: String,
    pub context: String,
    pub status: ClarificationStatus,
    pub priority: u8,
    pub related_item_type: String,
    pub related_item_data: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Clarification {
    pub fn is_pending(&self) -> bool {
        self.status == ClarificationStatus::Pending
    }

    /// Dedup key: identical question asked about identical context.
    pub fn key(&self) -> (&str, &str) {
        (&self.question, &self.context)
    }
}

// ═══════════════════════════════════════════
// Conversation Window
// ═══════════════════════════════════════════

/// Capacity of the per-user conversation window.
pub const CONVERSATION_WINDOW: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    #[serde(default = "default_role")]
    pub role: String,
    #[serde(default)]
    pub content: String,
}

fn default_role() -> String {
    "user".to_string()
}

impl ConversationTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }

    /// "User: ..." style line for prompts.
    pub fn render(&self) -> String {
        let mut chars = self.role.chars();
        let role = match chars.next() {
            Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
            None => String::new(),
        };
        format!("{role}: {}", self.content)
    }
}

/// Bounded conversation history; the oldest turn is evicted first.
#[derive(Debug, Clone, Default)]
pub struct ConversationWindow {
    turns: VecDeque<ConversationTurn>,
}

impl ConversationWindow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, turn: ConversationTurn) {
        if self.turns.len() == CONVERSATION_WINDOW {
            self.turns.pop_front();
        }
        self.turns.push_back(turn);
    }

    /// Replace the window with the last [`CONVERSATION_WINDOW`] turns of `history`.
    pub fn replace_with(&mut self, history: &[ConversationTurn]) {
        self.turns.clear();
        let start = history.len().saturating_sub(CONVERSATION_WINDOW);
        for turn in &history[start..] {
            self.push(turn.clone());
        }
    }

    /// The last `n` turns, oldest first.
    pub fn last(&self, n: usize) -> impl Iterator<Item = &ConversationTurn> {
        self.turns.iter().skip(self.turns.len().saturating_sub(n))
    }

    pub fn tail(&self) -> Option<&ConversationTurn> {
        self.turns.back()
    }

    pub fn last_user_message(&self) -> Option<&str> {
        self.turns
            .iter()
            .rev()
            .find(|t| t.role == "user")
            .map(|t| t.content.as_str())
    }

    /// Render the last `n` turns, one per line.
    pub fn render(&self, n: usize) -> String {
        self.last(n)
            .map(ConversationTurn::render)
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }
}

// ═══════════════════════════════════════════
// Turn API
// ═══════════════════════════════════════════

/// Input for one conversational turn.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TurnRequest {
    pub user_message: String,
    #[serde(default)]
    pub assistant_response: String,
    #[serde(default)]
    pub member_id: Option<String>,
    #[serde(default)]
    pub conversation_history: Option<Vec<ConversationTurn>>,
}

impl TurnRequest {
    pub fn new(user_message: impl Into<String>) -> Self {
        Self {
            user_message: user_message.into(),
            ..Self::default()
        }
    }

    pub fn with_member(mut self, member_id: impl Into<String>) -> Self {
        self.member_id = Some(member_id.into());
        self
    }

    pub fn with_history(mut self, history: Vec<ConversationTurn>) -> Self {
        self.conversation_history = Some(history);
        self
    }
}

/// One reflected tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceEntry {
    pub iteration: u32,
    pub state: AgentState,
    pub action: Action,
    pub observation: String,
}

/// Snapshot of the most recent save call that stored anything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LastSaved {
    pub count: usize,
    pub items: Vec<Row>,
    pub timestamp: Option<DateTime<Utc>>,
}

/// Outcome of one turn. On failure `error` is set and the accumulated
/// working set and clarifications are still returned.
#[derive(Debug, Clone, Serialize)]
pub struct TurnResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub extracted_data: ExtractedDataSet,
    pub saved_items: usize,
    pub clarifications_needed: Vec<Clarification>,
    pub trace: Vec<TraceEntry>,
}

impl TurnResult {
    /// A turn that failed before any work was done.
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            extracted_data: ExtractedDataSet::new(),
            saved_items: 0,
            clarifications_needed: Vec::new(),
            trace: Vec::new(),
        }
    }
}

/// Read-only view of a controller, published after every state change.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentStatus {
    pub user_id: String,
    pub state: AgentState,
    pub agent_active: bool,
    pub current_iteration: u32,
    pub max_iterations: u32,
    pub pending_clarifications: Vec<Clarification>,
    pub extracted_data_summary: BTreeMap<String, usize>,
    pub last_action: Option<Action>,
    pub last_observation: Option<String>,
    pub last_saved: LastSaved,
    pub total_actions: u64,
}

impl AgentStatus {
    pub fn idle(user_id: &str, max_iterations: u32) -> Self {
        Self {
            user_id: user_id.to_string(),
            state: AgentState::Idle,
            agent_active: false,
            current_iteration: 0,
            max_iterations,
            pending_clarifications: Vec::new(),
            extracted_data_summary: ExtractedDataSet::new().summary(),
            last_action: None,
            last_observation: None,
            last_saved: LastSaved::default(),
            total_actions: 0,
        }
    }
}
