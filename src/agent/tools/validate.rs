//! Per-item validation rules.

use crate::agent::heuristics::{categorize_bp, parse_bp, source_has_number};
use crate::agent::types::{
    Appointment, ExtractedDataSet, HealthRecord, Medicine, Symptom, WorkingItem,
};

/// Metrics that must be backed by a number in the user's own words.
const NUMERIC_METRICS: &[&str] = &["temperature", "blood_sugar", "weight", "height", "heart_rate"];

const LOW_CONFIDENCE: &str = "Low confidence.";

/// Inclusive range check for a simple numeric metric.
fn check_range(
    issues: &mut Vec<String>,
    value: Option<f64>,
    (min, max): (f64, f64),
    label: &str,
) {
    match value {
        None => issues.push(format!("Invalid {label} value.")),
        Some(v) if v < min || v > max => {
            let mut chars = label.chars();
            let capitalized: String = match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            };
            issues.push(format!("{capitalized} value out of range."));
        }
        Some(_) => {}
    }
}

/// Issues for one health record. Sets the derived BP category as a side effect.
pub fn validate_health_record(record: &mut HealthRecord, min_confidence: f32) -> Vec<String> {
    let mut issues = Vec::new();
    let metric = record.metric_key();
    let numeric = record.value.as_ref().and_then(|v| v.as_f64());

    if metric.is_empty() {
        issues.push("Missing metric type.".to_string());
    }
    if record.value.is_none() {
        issues.push("Missing value.".to_string());
    }

    match metric.as_str() {
        "blood_pressure" => {
            let (systolic, diastolic) = record
                .value
                .as_ref()
                .map(parse_bp)
                .unwrap_or((None, None));
            match systolic {
                None => issues.push("Unable to parse blood pressure.".to_string()),
                Some(sys) => {
                    if !(70.0..=250.0).contains(&sys) {
                        issues.push("Systolic value out of range.".to_string());
                    }
                    if diastolic.is_some_and(|dia| !(40.0..=150.0).contains(&dia)) {
                        issues.push("Diastolic value out of range.".to_string());
                    }
                }
            }
            record.category = categorize_bp(systolic, diastolic).map(str::to_string);
        }
        "blood_sugar" => check_range(&mut issues, numeric, (40.0, 600.0), "blood sugar"),
        "weight" => check_range(&mut issues, numeric, (20.0, 300.0), "weight"),
        "height" => check_range(&mut issues, numeric, (50.0, 250.0), "height"),
        "temperature" => {
            let celsius = record
                .unit
                .as_deref()
                .is_some_and(|u| u.to_lowercase().contains('c'));
            let range = if celsius { (32.0, 43.0) } else { (90.0, 110.0) };
            check_range(&mut issues, numeric, range, "temperature");
        }
        "heart_rate" => check_range(&mut issues, numeric, (30.0, 220.0), "heart rate"),
        _ => {}
    }

    if NUMERIC_METRICS.contains(&metric.as_str())
        && !source_has_number(record.source_text.as_deref())
    {
        issues.push("No numeric value mentioned in source text.".to_string());
    }

    if record.confidence < min_confidence {
        issues.push(LOW_CONFIDENCE.to_string());
    }
    issues
}

fn is_blank(value: &Option<String>) -> bool {
    value.as_deref().map_or(true, |v| v.trim().is_empty())
}

pub fn validate_medicine(medicine: &Medicine, min_confidence: f32) -> Vec<String> {
    let mut issues = Vec::new();
    if is_blank(&medicine.name) {
        issues.push("Missing medicine name.".to_string());
    }
    if medicine.confidence < min_confidence {
        issues.push(LOW_CONFIDENCE.to_string());
    }
    issues
}

pub fn validate_appointment(appointment: &Appointment, min_confidence: f32) -> Vec<String> {
    let mut issues = Vec::new();
    if is_blank(&appointment.date) {
        issues.push("Missing appointment date.".to_string());
    }
    if is_blank(&appointment.time) {
        issues.push("Missing appointment time.".to_string());
    }
    if appointment.confidence < min_confidence {
        issues.push(LOW_CONFIDENCE.to_string());
    }
    issues
}

pub fn validate_symptom(symptom: &Symptom, min_confidence: f32) -> Vec<String> {
    let mut issues = Vec::new();
    if is_blank(&symptom.symptom) {
        issues.push("Missing symptom name.".to_string());
    }
    if symptom.confidence < min_confidence {
        issues.push(LOW_CONFIDENCE.to_string());
    }
    issues
}

/// Validate every item in place and report the total issue count.
pub fn run(data: &mut ExtractedDataSet, min_confidence: f32) -> String {
    let mut total_issues = 0;
    for item in data.iter_mut() {
        let issues = match item {
            WorkingItem::HealthRecord(r) => validate_health_record(r, min_confidence),
            WorkingItem::Medicine(m) => validate_medicine(m, min_confidence),
            WorkingItem::Appointment(a) => validate_appointment(a, min_confidence),
            WorkingItem::Symptom(s) => validate_symptom(s, min_confidence),
        };
        total_issues += issues.len();
        let low_confidence = item.confidence() < min_confidence;
        item.status_mut().record_validation(issues, low_confidence);
    }
    format!("Validation complete. Issues found: {total_issues}")
}
