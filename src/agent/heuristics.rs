//! Deterministic text helpers shared by the tools: blood-pressure parsing,
//! symptom phrase detection, date and frequency normalisation.

use std::sync::LazyLock;

use regex::Regex;
use uuid::Uuid;

use super::types::MetricValue;

// ═══════════════════════════════════════════
// Blood pressure
// ═══════════════════════════════════════════

static BP_PAIR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d{2,3})\s*/\s*(\d{2,3})").unwrap());

static BP_SINGLE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(\d{2,3})").unwrap());

/// Parse `"130/85"`, `"130"` or a bare number into (systolic, diastolic).
pub fn parse_bp(value: &MetricValue) -> (Option<f64>, Option<f64>) {
    let text = match value {
        MetricValue::Number(n) => return (Some(*n), None),
        MetricValue::Text(s) => s,
    };
    if let Some(caps) = BP_PAIR.captures(text) {
        return (
            caps.get(1).and_then(|m| m.as_str().parse().ok()),
            caps.get(2).and_then(|m| m.as_str().parse().ok()),
        );
    }
    if let Some(caps) = BP_SINGLE.captures(text) {
        return (caps.get(1).and_then(|m| m.as_str().parse().ok()), None);
    }
    (None, None)
}

/// Band a reading as "Normal BP", "Elevated BP" or "High BP".
pub fn categorize_bp(systolic: Option<f64>, diastolic: Option<f64>) -> Option<&'static str> {
    let systolic = systolic?;
    let diastolic_low = diastolic.map_or(true, |d| d < 80.0);

    if systolic < 120.0 && diastolic_low {
        Some("Normal BP")
    } else if (120.0..130.0).contains(&systolic) && diastolic_low {
        Some("Elevated BP")
    } else if systolic >= 130.0 || !diastolic_low {
        Some("High BP")
    } else {
        None
    }
}

// ═══════════════════════════════════════════
// Symptoms
// ═══════════════════════════════════════════

static SYMPTOM_PHRASES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?:i have|i am having|i'm having|i've been having|suffering from|symptoms?:)\s*(.+)",
        r"(?:feeling|feel)\s*(.+)",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

static DURATION_BOUNDARY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+since\s+|\s+for\s+").unwrap());

static SYMPTOM_SEPARATORS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r",| and | & |;").unwrap());

/// Keywords scanned when no symptom phrase matches.
pub const COMMON_SYMPTOMS: &[&str] = &[
    "fever",
    "cold",
    "cough",
    "headache",
    "nausea",
    "vomiting",
    "fatigue",
    "sore throat",
    "body ache",
    "diarrhea",
    "stomach pain",
    "chills",
    "dizziness",
];

/// Split "headache, cough and fever" into discrete symptom names.
pub fn split_symptoms(text: &str) -> Vec<String> {
    SYMPTOM_SEPARATORS
        .split(text)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Symptom names mentioned in a user message, lowercased.
///
/// Phrase patterns ("i have …", "feeling …") win over the keyword scan; the
/// captured phrase is cut at a "since"/"for" duration clause.
pub fn heuristic_symptoms(text: &str) -> Vec<String> {
    if text.trim().is_empty() {
        return Vec::new();
    }
    let lowered = text.to_lowercase();

    for pattern in SYMPTOM_PHRASES.iter() {
        if let Some(segment) = pattern.captures(&lowered).and_then(|c| c.get(1)) {
            let segment = DURATION_BOUNDARY
                .split(segment.as_str())
                .next()
                .unwrap_or_default();
            return split_symptoms(segment);
        }
    }

    COMMON_SYMPTOMS
        .iter()
        .filter(|keyword| lowered.contains(*keyword))
        .map(|keyword| keyword.to_string())
        .collect()
}

// ═══════════════════════════════════════════
// Misc normalisation
// ═══════════════════════════════════════════

/// True if the text mentions at least one digit.
pub fn source_has_number(text: Option<&str>) -> bool {
    text.is_some_and(|t| t.chars().any(|c| c.is_ascii_digit()))
}

/// Accept only hyphenated RFC 4122 UUIDs (versions 1-5) as member ids.
pub fn is_member_uuid(value: &str) -> bool {
    if value.len() != 36 {
        return false;
    }
    match Uuid::parse_str(value) {
        Ok(id) => {
            (1..=5).contains(&id.get_version_num()) && id.get_variant() == uuid::Variant::RFC4122
        }
        Err(_) => false,
    }
}

/// Normalise a member id: anything that is not a UUID means "self".
pub fn normalize_member_id(member_id: Option<&str>) -> Option<String> {
    member_id
        .map(str::trim)
        .filter(|m| is_member_uuid(m))
        .map(str::to_string)
}

/// Date part of an ISO timestamp; today's local date when absent.
pub fn to_date_str(value: Option<&str>) -> String {
    match value.map(str::trim).filter(|v| !v.is_empty()) {
        Some(v) => v.split('T').next().unwrap_or(v).to_string(),
        None => chrono::Local::now().format("%Y-%m-%d").to_string(),
    }
}

/// Map free-form frequencies onto the schedule labels the medicines table uses.
pub fn normalize_frequency(frequency: Option<&str>) -> String {
    let Some(freq) = frequency.filter(|f| !f.trim().is_empty()) else {
        return "Daily".to_string();
    };
    let lower = freq.to_lowercase();
    if lower.contains("alternate") || lower.contains("every other") {
        "Alternate Days".to_string()
    } else if lower.contains("once") || lower.contains("daily") || lower.contains("every day") {
        "Daily".to_string()
    } else {
        freq.to_string()
    }
}
