//! Duplicate detection against previously stored rows.

use super::{scoped_select, ToolContext};
use crate::agent::heuristics::to_date_str;
use crate::agent::types::WorkingItem;
use crate::db::{DocumentStore, Query, Table};

/// Query that finds an existing row for `item`, if one can be built.
///
/// `None` means there is nothing to match on (e.g. a medicine with no name);
/// the second element says whether a member filter may be applied.
fn duplicate_query(item: &WorkingItem, user_id: &str) -> Option<(Query, bool)> {
    match item {
        WorkingItem::HealthRecord(r) => {
            let query = Query::table(Table::HealthRecords)
                .eq("user_id", user_id)
                .eq("metric", r.metric.clone())
                .eq("date", to_date_str(r.recorded_at.as_deref()));
            Some((query, true))
        }
        WorkingItem::Medicine(m) => {
            let name = m.name.as_deref().filter(|n| !n.trim().is_empty())?;
            let query = Query::table(Table::Medicines)
                .eq("user_id", user_id)
                .ilike("name", format!("%{name}%"))
                .eq("is_active", true);
            Some((query, true))
        }
        WorkingItem::Appointment(a) => {
            let query = Query::table(Table::Appointments)
                .eq("patient_id", user_id)
                .eq("date", a.date.clone().unwrap_or_default())
                .eq("time_slot", a.time.clone().unwrap_or_default());
            // Appointments are matched per patient regardless of member
            Some((query, false))
        }
        WorkingItem::Symptom(s) => {
            let name = s.symptom.as_deref().filter(|n| !n.trim().is_empty())?;
            let query = Query::table(Table::HealthRecords)
                .eq("user_id", user_id)
                .eq("metric", "symptom")
                .eq("date", to_date_str(s.started_at.as_deref()))
                .ilike("notes", format!("%{name}%"));
            Some((query, true))
        }
    }
}

pub fn run(store: &dyn DocumentStore, ctx: &mut ToolContext<'_>) -> String {
    let mut duplicates = 0;
    for item in ctx.data.iter_mut() {
        if item.status().duplicate_checked {
            continue;
        }
        let found = match duplicate_query(item, ctx.user_id) {
            Some((query, member_scoped)) => {
                let member = if member_scoped { ctx.member_id } else { None };
                scoped_select(store, query, member).is_some_and(|rows| !rows.is_empty())
            }
            None => false,
        };
        if found {
            duplicates += 1;
        }
        item.status_mut().record_duplicate_check(found);
    }
    format!("Duplicate check complete. Duplicates found: {duplicates}")
}
