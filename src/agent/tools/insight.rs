//! Auxiliary tools: knowledge search stub, derived metrics, user history.

use chrono::Utc;

use super::{scoped_select, ToolContext};
use crate::agent::types::{ActionInput, Category, ExtractedDataSet, HealthRecord, MetricValue, Status, WorkingItem};
use crate::db::{DocumentStore, Query, Table};

/// Records fetched by [`user_history`].
const HISTORY_LIMIT: usize = 10;

pub fn search_knowledge(input: &ActionInput) -> String {
    tracing::debug!(query = ?input.get("query"), "Knowledge search requested");
    "Knowledge search not configured.".to_string()
}

fn first_value(data: &ExtractedDataSet, metric: &str) -> Option<f64> {
    data.items(Category::HealthRecords).iter().find_map(|item| match item {
        WorkingItem::HealthRecord(r) if r.metric_key() == metric => {
            r.value.as_ref().and_then(MetricValue::as_f64)
        }
        _ => None,
    })
}

/// Body-mass index from weight (kg) and height (cm or m), to two decimals.
pub fn bmi(weight_kg: f64, height: f64) -> Option<f64> {
    let height_m = if height > 3.0 { height / 100.0 } else { height };
    if weight_kg <= 0.0 || height_m <= 0.0 {
        return None;
    }
    Some((weight_kg / (height_m * height_m) * 100.0).round() / 100.0)
}

/// Append a derived BMI record when weight and height are both present.
pub fn calculate_metrics(data: &mut ExtractedDataSet) -> String {
    let already = data
        .items(Category::HealthRecords)
        .iter()
        .any(|item| matches!(item, WorkingItem::HealthRecord(r) if r.metric_key() == "bmi"));
    if already {
        return "No metrics calculated.".to_string();
    }

    let value = match (first_value(data, "weight"), first_value(data, "height")) {
        (Some(weight), Some(height)) => bmi(weight, height),
        _ => None,
    };
    let Some(value) = value else {
        return "No metrics calculated.".to_string();
    };

    data.push(WorkingItem::HealthRecord(HealthRecord {
        metric: Some("bmi".to_string()),
        value: Some(MetricValue::Number(value)),
        unit: Some("kg/m2".to_string()),
        recorded_at: Some(Utc::now().to_rfc3339()),
        confidence: 0.9,
        source_text: Some("Derived from weight and height".to_string()),
        category: None,
        status: Status {
            validated: true,
            ..Status::default()
        },
    }));
    "Calculated BMI.".to_string()
}

pub fn user_history(store: &dyn DocumentStore, ctx: &ToolContext<'_>) -> String {
    let query = Query::table(Table::HealthRecords)
        .eq("user_id", ctx.user_id)
        .order_by("created_at", true)
        .limit(HISTORY_LIMIT);
    let count = scoped_select(store, query, ctx.member_id).map_or(0, |rows| rows.len());
    format!("Fetched {count} past health records.")
}
