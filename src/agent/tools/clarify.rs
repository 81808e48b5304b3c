//! Queue clarification questions for flagged items.

use chrono::Utc;
use uuid::Uuid;

use super::ToolContext;
use crate::agent::error::AgentError;
use crate::agent::types::{Clarification, ClarificationStatus, WorkingItem};

/// Priority assigned to every item clarification.
const ITEM_PRIORITY: u8 = 2;

fn question_for(item: &WorkingItem) -> String {
    match item {
        WorkingItem::HealthRecord(r) => format!(
            "What was the exact {} reading?",
            r.metric.as_deref().filter(|m| !m.is_empty()).unwrap_or("measurement")
        ),
        WorkingItem::Medicine(_) => "Which medication did you take?".to_string(),
        WorkingItem::Appointment(_) => "When is the appointment (date and time)?".to_string(),
        WorkingItem::Symptom(_) => {
            "Can you describe the symptom and how long it has lasted?".to_string()
        }
    }
}

/// Build a pending clarification for one item.
pub fn build_clarification(item: &WorkingItem) -> Result<Clarification, AgentError> {
    Ok(Clarification {
        id: Uuid::new_v4(),
        question: question_for(item),
        context: item.source_text().unwrap_or_default().to_string(),
        status: ClarificationStatus::Pending,
        priority: ITEM_PRIORITY,
        related_item_type: item.category().item_type().to_string(),
        related_item_data: serde_json::to_value(item)?,
        answer: None,
        created_at: Utc::now(),
    })
}

/// Append `candidate` unless a pending clarification with the same
/// (question, context) already exists. Returns whether it was added.
pub fn enqueue(queue: &mut Vec<Clarification>, candidate: Clarification) -> bool {
    let exists = queue
        .iter()
        .any(|c| c.is_pending() && c.key() == candidate.key());
    if !exists {
        queue.push(candidate);
    }
    !exists
}

pub fn run(ctx: &mut ToolContext<'_>) -> Result<String, AgentError> {
    let flagged: Vec<Clarification> = ctx
        .data
        .iter()
        .filter(|item| item.status().needs_clarification)
        .map(build_clarification)
        .collect::<Result<_, _>>()?;

    let total = flagged.len();
    for clarification in flagged {
        enqueue(ctx.clarifications, clarification);
    }
    Ok(format!("Queued {total} clarification(s)."))
}

#[cfg(test)]
mod tests {
    use super::super::test_support::Harness;
    use super::*;
    use crate::agent::types::{HealthRecord, Medicine, Symptom};

    fn flagged(mut item: WorkingItem) -> WorkingItem {
        item.status_mut().record_validation(vec!["Low confidence.".into()], true);
        item
    }

    #[test]
    fn low_confidence_medicine_asks_which_medication() {
        let mut harness = Harness::new("took a pill");
        harness.data.push(flagged(WorkingItem::Medicine(Medicine {
            name: Some("Aspirin".into()),
            confidence: 0.3,
            source_text: Some("took a pill".into()),
            ..Medicine::default()
        })));

        let observation = run(&mut harness.ctx()).unwrap();
        assert_eq!(observation, "Queued 1 clarification(s).");

        let clarification = &harness.clarifications[0];
        assert_eq!(clarification.question, "Which medication did you take?");
        assert_eq!(clarification.context, "took a pill");
        assert_eq!(clarification.priority, 2);
        assert_eq!(clarification.related_item_type, "medicine");
        assert_eq!(clarification.related_item_data["name"], "Aspirin");
        assert!(clarification.is_pending());
    }

    #[test]
    fn identical_questions_are_queued_once() {
        let mut harness = Harness::new("not sure");
        harness.data.push(flagged(WorkingItem::HealthRecord(HealthRecord {
            metric: Some("weight".into()),
            confidence: 0.2,
            source_text: Some("I gained some weight".into()),
            ..HealthRecord::default()
        })));

        run(&mut harness.ctx()).unwrap();
        let observation = run(&mut harness.ctx()).unwrap();

        // The observation counts flagged items; the queue stays deduplicated
        assert_eq!(observation, "Queued 1 clarification(s).");
        assert_eq!(harness.clarifications.len(), 1);
        assert_eq!(
            harness.clarifications[0].question,
            "What was the exact weight reading?"
        );
    }

    #[test]
    fn enqueue_ignores_resolved_entries() {
        let item = WorkingItem::Symptom(Symptom {
            confidence: 0.3,
            ..Symptom::default()
        });
        let mut queue = Vec::new();
        let mut first = build_clarification(&item).unwrap();
        first.status = ClarificationStatus::Answered;
        queue.push(first);

        assert!(enqueue(&mut queue, build_clarification(&item).unwrap()));
        assert!(!enqueue(&mut queue, build_clarification(&item).unwrap()));
        assert_eq!(queue.len(), 2);
        assert_eq!(
            queue[1].question,
            "Can you describe the symptom and how long it has lasted?"
        );
    }

    #[test]
    fn unflagged_items_produce_nothing() {
        let mut harness = Harness::new("fine");
        harness.data.push(WorkingItem::Medicine(Medicine {
            name: Some("Aspirin".into()),
            confidence: 0.9,
            ..Medicine::default()
        }));
        assert_eq!(run(&mut harness.ctx()).unwrap(), "Queued 0 clarification(s).");
        assert!(harness.clarifications.is_empty());
    }
}
