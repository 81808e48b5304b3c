//! Persist save-eligible items.
//!
//! Health records, medicines and appointments are written one row per item.
//! All eligible symptoms of a turn are merged into a single `symptom` health
//! record. Each insert is retried once without the newer optional columns so
//! an older schema still accepts the row.

use chrono::Utc;
use serde_json::{json, Value};

use super::{ToolContext, ToolOutcome};
use crate::agent::heuristics::{normalize_frequency, parse_bp, to_date_str};
use crate::agent::types::{Appointment, Category, HealthRecord, LastSaved, Medicine, Symptom, WorkingItem};
use crate::db::{DatabaseError, DocumentStore, Row, Table};

/// Columns added after the first schema; dropped on retry.
const OPTIONAL_COLUMNS: &[&str] = &["member_id", "confidence_score", "source"];

/// Provenance tag written on every row this agent creates.
pub const SOURCE_TAG: &str = "chat_agent";

fn into_row(value: Value) -> Row {
    match value {
        Value::Object(map) => map,
        _ => Row::new(),
    }
}

fn with_member(mut row: Row, member_id: Option<&str>) -> Row {
    if let Some(member) = member_id {
        row.insert("member_id".to_string(), Value::String(member.to_string()));
    }
    row
}

/// Insert, then retry once with [`OPTIONAL_COLUMNS`] stripped.
fn insert_with_retry(store: &dyn DocumentStore, table: Table, mut row: Row) -> Result<Row, DatabaseError> {
    match store.insert(table, &row) {
        Ok(stored) => Ok(stored),
        Err(e) => {
            tracing::warn!(table = %table, error = %e, "Insert failed, retrying without optional columns");
            for column in OPTIONAL_COLUMNS {
                row.remove(*column);
            }
            store.insert(table, &row)
        }
    }
}

/// Row for a health record, or `None` when a blood pressure has no systolic.
pub fn health_record_row(record: &HealthRecord, user_id: &str, member_id: Option<&str>) -> Option<Row> {
    let metric = record.metric.clone().unwrap_or_default();
    let is_bp = record.metric_key() == "blood_pressure";
    let mut notes = record.source_text.clone().unwrap_or_default();

    let value = if is_bp {
        let (systolic, diastolic) = record.value.as_ref().map(parse_bp).unwrap_or((None, None));
        let systolic = systolic?;
        if let Some(dia) = diastolic {
            if !notes.is_empty() {
                notes.push_str(" | ");
            }
            notes.push_str(&format!("Diastolic: {}", dia as i64));
        }
        systolic
    } else {
        record.value.as_ref().and_then(|v| v.as_f64()).unwrap_or(0.0)
    };

    let unit = record
        .unit
        .clone()
        .filter(|u| !u.is_empty())
        .unwrap_or_else(|| if is_bp { "mmHg".to_string() } else { String::new() });

    let row = into_row(json!({
        "user_id": user_id,
        "metric": metric,
        "value": value,
        "unit": unit,
        "date": to_date_str(record.recorded_at.as_deref()),
        "status": Value::Null,
        "notes": notes,
        "confidence_score": record.confidence,
        "category": record.category,
        "source": SOURCE_TAG,
        "validated_at": Utc::now().to_rfc3339(),
    }));
    Some(with_member(row, member_id))
}

pub fn medicine_row(medicine: &Medicine, user_id: &str, member_id: Option<&str>) -> Row {
    let row = into_row(json!({
        "user_id": user_id,
        "name": medicine.name,
        "dosage": medicine.dosage,
        "form": medicine.form.clone().unwrap_or_else(|| "tablet".to_string()),
        "frequency": normalize_frequency(medicine.frequency.as_deref()),
        "dose_count": medicine.dose_count.filter(|n| *n > 0).unwrap_or(1),
        "unit": medicine.unit.clone().unwrap_or_else(|| "tablet".to_string()),
        "start_date": medicine.start_date,
        "end_date": medicine.end_date,
        "notes": medicine.instructions,
        "confidence_score": medicine.confidence,
        "source": SOURCE_TAG,
    }));
    with_member(row, member_id)
}

pub fn appointment_row(appointment: &Appointment, user_id: &str, member_id: Option<&str>) -> Row {
    let row = into_row(json!({
        "patient_id": user_id,
        "doctor_id": appointment.doctor_id.clone().unwrap_or_else(|| "unknown".to_string()),
        "doctor_name": appointment.doctor_name,
        "specialization": appointment.specialty,
        "date": appointment.date,
        "time_slot": appointment.time,
        "symptoms": appointment.reason,
        "notes": appointment.location,
        "status": "scheduled",
        "confidence_score": appointment.confidence,
        "source": SOURCE_TAG,
    }));
    with_member(row, member_id)
}

/// One row summarising a group of symptoms.
///
/// Notes read `"name (severity); ... | source text"` using the first
/// non-empty source text; the date is the earliest explicit start date.
pub fn symptom_group_row(symptoms: &[&Symptom], user_id: &str, member_id: Option<&str>) -> Row {
    let parts: Vec<String> = symptoms
        .iter()
        .map(|s| {
            let name = s.symptom.as_deref().filter(|n| !n.is_empty()).unwrap_or("symptom");
            let severity = s.severity.as_deref().filter(|v| !v.is_empty()).unwrap_or("mild");
            format!("{name} ({severity})")
        })
        .collect();
    let source_text = symptoms
        .iter()
        .filter_map(|s| s.source_text.as_deref())
        .find(|t| !t.is_empty());
    let confidence = symptoms.iter().map(|s| s.confidence).fold(0.0_f32, f32::max);
    let date = symptoms
        .iter()
        .filter_map(|s| s.started_at.as_deref().filter(|d| !d.trim().is_empty()))
        .map(|d| to_date_str(Some(d)))
        .min()
        .unwrap_or_else(|| to_date_str(None));

    let mut notes = parts.join("; ");
    if let Some(text) = source_text {
        notes.push_str(" | ");
        notes.push_str(text);
    }

    let row = into_row(json!({
        "user_id": user_id,
        "metric": "symptom",
        "value": 0,
        "unit": "text",
        "date": date,
        "notes": notes,
        "confidence_score": confidence,
        "source": SOURCE_TAG,
        "validated_at": Utc::now().to_rfc3339(),
    }));
    with_member(row, member_id)
}

fn failure_key(item: &WorkingItem) -> String {
    match item {
        WorkingItem::HealthRecord(r) => {
            format!("health_record:{}", r.metric.as_deref().unwrap_or("unknown"))
        }
        WorkingItem::Medicine(m) => {
            let mut key = format!("medicine:{}", m.name.as_deref().unwrap_or("unknown"));
            if let Some(err) = &m.status.save_error {
                key.push(':');
                key.push_str(err);
            }
            key
        }
        WorkingItem::Appointment(_) => "appointment".to_string(),
        WorkingItem::Symptom(_) => "symptom_group".to_string(),
    }
}

pub fn run(store: &dyn DocumentStore, ctx: &mut ToolContext<'_>, min_confidence: f32) -> ToolOutcome {
    let user_id = ctx.user_id;
    let member_id = ctx.member_id;
    let mut saved_rows: Vec<Row> = Vec::new();
    let mut failed: Vec<String> = Vec::new();

    for category in [Category::HealthRecords, Category::Medicines, Category::Appointments] {
        for item in ctx.data.items_mut(category) {
            if !item.is_save_eligible(min_confidence) {
                continue;
            }
            let (table, row) = match &*item {
                WorkingItem::HealthRecord(r) => (Table::HealthRecords, health_record_row(r, user_id, member_id)),
                WorkingItem::Medicine(m) => (Table::Medicines, Some(medicine_row(m, user_id, member_id))),
                WorkingItem::Appointment(a) => (Table::Appointments, Some(appointment_row(a, user_id, member_id))),
                WorkingItem::Symptom(_) => continue,
            };

            let result = match row {
                Some(row) => insert_with_retry(store, table, row).map_err(|e| e.to_string()),
                None => Err("unparseable value".to_string()),
            };
            match result {
                Ok(stored) => {
                    item.status_mut().mark_saved();
                    saved_rows.push(stored);
                }
                Err(err) => {
                    tracing::warn!(user_id, table = %table, error = %err, "Failed to save item");
                    if matches!(item, WorkingItem::Medicine(_)) {
                        item.status_mut().save_error = Some(err);
                    }
                    failed.push(failure_key(item));
                }
            }
        }
    }

    let group_row = {
        let eligible: Vec<&Symptom> = ctx
            .data
            .items(Category::Symptoms)
            .iter()
            .filter(|item| item.is_save_eligible(min_confidence))
            .filter_map(|item| match item {
                WorkingItem::Symptom(s) => Some(s),
                _ => None,
            })
            .collect();
        (!eligible.is_empty()).then(|| symptom_group_row(&eligible, user_id, member_id))
    };
    if let Some(row) = group_row {
        match insert_with_retry(store, Table::HealthRecords, row) {
            Ok(stored) => {
                for item in ctx.data.items_mut(Category::Symptoms) {
                    if item.is_save_eligible(min_confidence) {
                        item.status_mut().mark_saved();
                    }
                }
                saved_rows.push(stored);
            }
            Err(e) => {
                tracing::warn!(user_id, error = %e, "Failed to save symptom group");
                failed.push("symptom_group".to_string());
            }
        }
    }

    let count = saved_rows.len();
    let timestamp = if count > 0 {
        Some(Utc::now())
    } else {
        ctx.last_saved.timestamp
    };
    *ctx.last_saved = LastSaved {
        count,
        items: saved_rows,
        timestamp,
    };

    let mut observation = format!("Saved {count} items to database.");
    if !failed.is_empty() {
        observation.push_str(&format!(" Failed: {}", failed.join(", ")));
    }
    ToolOutcome {
        observation,
        saved: count,
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{FlakyStore, Harness};
    use super::*;
    use crate::agent::types::MetricValue;
    use crate::db::sqlite::run_migrations_up_to;
    use crate::db::{Query, SqliteStore};

    fn ready(mut item: WorkingItem) -> WorkingItem {
        item.status_mut().record_validation(vec![], false);
        item.status_mut().record_duplicate_check(false);
        item
    }

    fn bp_item() -> WorkingItem {
        ready(WorkingItem::HealthRecord(HealthRecord {
            metric: Some("blood_pressure".into()),
            value: Some(MetricValue::Text("130/85".into())),
            recorded_at: Some("2026-03-05T08:00:00Z".into()),
            confidence: 0.9,
            source_text: Some("My blood pressure is 130/85".into()),
            category: Some("High BP".into()),
            ..HealthRecord::default()
        }))
    }

    #[test]
    fn blood_pressure_stores_systolic_and_diastolic_note() {
        let store = SqliteStore::in_memory().unwrap();
        let mut harness = Harness::new("My blood pressure is 130/85");
        harness.data.push(bp_item());

        let outcome = run(&store, &mut harness.ctx(), 0.5);
        assert_eq!(outcome.observation, "Saved 1 items to database.");
        assert_eq!(outcome.saved, 1);

        let rows = store.select(&Query::table(Table::HealthRecords)).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["value"].as_f64(), Some(130.0));
        assert_eq!(rows[0]["unit"], "mmHg");
        assert_eq!(rows[0]["date"], "2026-03-05");
        assert_eq!(rows[0]["notes"], "My blood pressure is 130/85 | Diastolic: 85");
        assert_eq!(rows[0]["category"], "High BP");
        assert_eq!(rows[0]["source"], SOURCE_TAG);
    }

    #[test]
    fn saving_twice_writes_once() {
        let store = SqliteStore::in_memory().unwrap();
        let mut harness = Harness::new("My blood pressure is 130/85");
        harness.data.push(bp_item());

        assert_eq!(run(&store, &mut harness.ctx(), 0.5).saved, 1);
        let first_timestamp = harness.last_saved.timestamp;

        let second = run(&store, &mut harness.ctx(), 0.5);
        assert_eq!(second.saved, 0);
        assert_eq!(second.observation, "Saved 0 items to database.");
        assert_eq!(harness.last_saved.count, 0);
        assert_eq!(harness.last_saved.timestamp, first_timestamp);
        assert!(first_timestamp.is_some());

        let rows = store.select(&Query::table(Table::HealthRecords)).unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn ineligible_items_are_skipped() {
        let store = SqliteStore::in_memory().unwrap();
        let mut harness = Harness::new("I took something");

        let mut flagged = WorkingItem::Medicine(Medicine {
            name: Some("Aspirin".into()),
            confidence: 0.3,
            ..Medicine::default()
        });
        flagged.status_mut().record_validation(vec!["Low confidence.".into()], true);
        harness.data.push(flagged);

        let mut duplicate = bp_item();
        duplicate.status_mut().record_duplicate_check(true);
        harness.data.push(duplicate);

        harness.data.push(WorkingItem::Appointment(Appointment {
            date: Some("2026-04-02".into()),
            time: Some("10:00".into()),
            confidence: 0.9,
            ..Appointment::default()
        }));

        let outcome = run(&store, &mut harness.ctx(), 0.5);
        assert_eq!(outcome.saved, 0);
        assert!(harness.data.iter().all(|i| !i.status().saved));
        assert!(store.select(&Query::table(Table::Medicines)).unwrap().is_empty());
    }

    #[test]
    fn symptoms_merge_into_one_row() {
        let store = SqliteStore::in_memory().unwrap();
        let mut harness = Harness::new("I have a headache and cough");
        for (name, severity, started, conf, source) in [
            ("headache", Some("moderate"), Some("2026-03-06"), 0.6, None),
            ("cough", None, Some("2026-03-04T22:00:00"), 0.8, Some("I have a headache and cough")),
        ] {
            harness.data.push(ready(WorkingItem::Symptom(Symptom {
                symptom: Some(name.into()),
                severity: severity.map(Into::into),
                started_at: started.map(Into::into),
                confidence: conf,
                source_text: source.map(Into::into),
                ..Symptom::default()
            })));
        }

        let outcome = run(&store, &mut harness.ctx(), 0.5);
        assert_eq!(outcome.saved, 1);
        assert!(harness.data.items(Category::Symptoms).iter().all(|i| i.status().saved));

        let rows = store
            .select(&Query::table(Table::HealthRecords).eq("metric", "symptom"))
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(
            rows[0]["notes"],
            "headache (moderate); cough (mild) | I have a headache and cough"
        );
        assert_eq!(rows[0]["date"], "2026-03-04");
        assert_eq!(rows[0]["unit"], "text");
        assert!((rows[0]["confidence_score"].as_f64().unwrap() - 0.8).abs() < 1e-6);
    }

    #[test]
    fn medicine_row_defaults() {
        let row = medicine_row(
            &Medicine {
                name: Some("Metformin".into()),
                dosage: Some("500mg".into()),
                frequency: Some("every other day".into()),
                confidence: 0.8,
                ..Medicine::default()
            },
            "user-1",
            None,
        );
        assert_eq!(row["form"], "tablet");
        assert_eq!(row["unit"], "tablet");
        assert_eq!(row["dose_count"], 1);
        assert_eq!(row["frequency"], "Alternate Days");
        assert!(!row.contains_key("member_id"));
    }

    #[test]
    fn appointment_row_maps_fields() {
        let row = appointment_row(
            &Appointment {
                doctor_name: Some("Dr. Osei".into()),
                specialty: Some("Cardiology".into()),
                date: Some("2026-04-02".into()),
                time: Some("10:00".into()),
                reason: Some("follow-up".into()),
                location: Some("City Clinic".into()),
                confidence: 0.8,
                ..Appointment::default()
            },
            "user-1",
            Some("3f2b8c1e-5d4a-4b6c-9e7f-0a1b2c3d4e5f"),
        );
        assert_eq!(row["patient_id"], "user-1");
        assert_eq!(row["doctor_id"], "unknown");
        assert_eq!(row["specialization"], "Cardiology");
        assert_eq!(row["time_slot"], "10:00");
        assert_eq!(row["symptoms"], "follow-up");
        assert_eq!(row["notes"], "City Clinic");
        assert_eq!(row["status"], "scheduled");
        assert_eq!(row["member_id"], "3f2b8c1e-5d4a-4b6c-9e7f-0a1b2c3d4e5f");
    }

    #[test]
    fn legacy_schema_is_tolerated_by_retry() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        run_migrations_up_to(&conn, 1).unwrap();
        let store = SqliteStore::new(conn);

        let mut harness = Harness::new("My blood pressure is 130/85");
        harness.member_id = Some("3f2b8c1e-5d4a-4b6c-9e7f-0a1b2c3d4e5f".into());
        harness.data.push(bp_item());
        harness.data.push(ready(WorkingItem::Medicine(Medicine {
            name: Some("Lisinopril".into()),
            confidence: 0.8,
            ..Medicine::default()
        })));

        let outcome = run(&store, &mut harness.ctx(), 0.5);
        assert_eq!(outcome.saved, 2);
        let rows = store.select(&Query::table(Table::Medicines)).unwrap();
        assert_eq!(rows[0]["name"], "Lisinopril");
        assert!(!rows[0].contains_key("member_id"));
    }

    #[test]
    fn failures_are_named_in_observation() {
        let store = FlakyStore::failing();
        let mut harness = Harness::new("stuff");
        harness.data.push(bp_item());
        harness.data.push(ready(WorkingItem::Medicine(Medicine {
            name: Some("Aspirin".into()),
            confidence: 0.8,
            ..Medicine::default()
        })));
        harness.data.push(ready(WorkingItem::Symptom(Symptom {
            symptom: Some("cough".into()),
            confidence: 0.8,
            ..Symptom::default()
        })));

        let outcome = run(&store, &mut harness.ctx(), 0.5);
        assert_eq!(outcome.saved, 0);
        assert_eq!(
            outcome.observation,
            "Saved 0 items to database. Failed: health_record:blood_pressure, \
medicine:Aspirin:Store connection lock poisoned, symptom_group"
        );
        assert!(harness.last_saved.timestamp.is_none());
        let medicine = &harness.data.items(Category::Medicines)[0];
        assert!(medicine.status().save_error.is_some());
        assert!(!medicine.status().saved);
    }
}
