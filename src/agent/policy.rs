//! Deterministic action policy.
//!
//! The model's proposed action is advisory. [`guard`] corrects it against the
//! working set so the pipeline always runs extract → validate →
//! check_duplicates → save, and [`fallback`] picks the next step on its own
//! when the model's output is unusable. Both are pure.

use super::types::{Action, ActionInput, Decision, ExtractedDataSet, WorkingItem};

// ═══════════════════════════════════════════
// Working-set view
// ═══════════════════════════════════════════

/// Item has not been through a validation pass yet.
///
/// Validation always sets either `validated` or `needs_clarification`, so an
/// item with neither flag is still waiting for it.
pub fn awaits_validation(item: &WorkingItem) -> bool {
    let status = item.status();
    !status.validated && !status.needs_clarification
}

pub fn awaits_duplicate_check(item: &WorkingItem) -> bool {
    let status = item.status();
    status.validated && !status.duplicate_checked
}

/// Aggregate flags the policy rules look at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PolicyView {
    pub has_items: bool,
    pub needs_validation: bool,
    pub needs_duplicate_check: bool,
    pub needs_clarification: bool,
    pub has_save_eligible: bool,
}

impl PolicyView {
    pub fn of(data: &ExtractedDataSet, min_save_confidence: f32) -> Self {
        let mut view = Self::default();
        for item in data.iter() {
            view.has_items = true;
            view.needs_validation |= awaits_validation(item);
            view.needs_duplicate_check |= awaits_duplicate_check(item);
            view.needs_clarification |= item.status().needs_clarification;
            view.has_save_eligible |= item.is_save_eligible(min_save_confidence);
        }
        view
    }

    /// First outstanding pipeline step after extraction.
    fn next_pipeline_step(&self) -> Action {
        if self.needs_validation {
            Action::ValidateData
        } else if self.needs_duplicate_check {
            Action::CheckDuplicates
        } else {
            Action::SaveToDatabase
        }
    }
}

// ═══════════════════════════════════════════
// Guard
// ═══════════════════════════════════════════

/// Replacement produced by a guard rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Correction {
    pub action: Action,
    pub has_health_data: bool,
    pub reasoning: &'static str,
    pub why: &'static str,
}

impl Correction {
    const fn to(action: Action, reasoning: &'static str, why: &'static str) -> Self {
        Self {
            action,
            has_health_data: true,
            reasoning,
            why,
        }
    }
}

/// Everything a guard rule may look at.
#[derive(Debug, Clone, Copy)]
pub struct GuardInput<'a> {
    pub history: &'a [Action],
    pub view: PolicyView,
    pub proposed: Action,
}

/// One row of the guard's transition table.
pub struct GuardRule {
    pub name: &'static str,
    pub apply: fn(&GuardInput<'_>) -> Option<Correction>,
}

/// Rules in priority order; the first that returns a correction wins.
pub const GUARD_RULES: &[GuardRule] = &[
    GuardRule {
        name: "after_extract",
        apply: after_extract,
    },
    GuardRule {
        name: "extract_loop",
        apply: extract_loop,
    },
    GuardRule {
        name: "unneeded_clarification",
        apply: unneeded_clarification,
    },
    GuardRule {
        name: "pending_clarification",
        apply: pending_clarification,
    },
    GuardRule {
        name: "enforce_pipeline",
        apply: enforce_pipeline,
    },
];

fn after_extract(input: &GuardInput<'_>) -> Option<Correction> {
    if input.history.last() != Some(&Action::ExtractData) {
        return None;
    }
    if input.view.has_items {
        Some(Correction::to(
            Action::ValidateData,
            "Extraction complete; moving to validation.",
            "Validate extracted data before saving.",
        ))
    } else {
        Some(Correction {
            action: Action::Finish,
            has_health_data: false,
            reasoning: "Extraction found no data; finishing to avoid loops.",
            why: "No extractable data found.",
        })
    }
}

fn extract_loop(input: &GuardInput<'_>) -> Option<Correction> {
    let recent = &input.history[input.history.len().saturating_sub(2)..];
    let looping = recent == [Action::ExtractData, Action::ExtractData];
    (input.proposed == Action::ExtractData && input.view.has_items && looping).then_some(
        Correction::to(
            Action::ValidateData,
            "Already extracted data twice; moving to validation.",
            "Prevent repeated extraction without progress.",
        ),
    )
}

fn unneeded_clarification(input: &GuardInput<'_>) -> Option<Correction> {
    (input.proposed == Action::AskClarification && !input.view.needs_clarification).then(|| {
        Correction::to(
            input.view.next_pipeline_step(),
            "No clarification flags; advancing to next step.",
            "No clarifications needed.",
        )
    })
}

fn pending_clarification(input: &GuardInput<'_>) -> Option<Correction> {
    input.view.needs_clarification.then_some(Correction::to(
        Action::AskClarification,
        "Missing data detected; requesting clarification.",
        "Need user clarification before saving.",
    ))
}

fn enforce_pipeline(input: &GuardInput<'_>) -> Option<Correction> {
    let view = &input.view;
    if !view.has_items {
        return None;
    }
    if view.needs_validation {
        Some(Correction::to(
            Action::ValidateData,
            "Data extracted; must validate before saving.",
            "Validation step required.",
        ))
    } else if view.needs_duplicate_check {
        Some(Correction::to(
            Action::CheckDuplicates,
            "Validation done; check duplicates before saving.",
            "Duplicate check required.",
        ))
    } else if view.has_save_eligible {
        Some(Correction::to(
            Action::SaveToDatabase,
            "Ready to save validated items.",
            "Save extracted data to database.",
        ))
    } else {
        None
    }
}

/// Name of the first rule that fires, if any.
pub fn matching_rule(input: &GuardInput<'_>) -> Option<(&'static str, Correction)> {
    GUARD_RULES
        .iter()
        .find_map(|rule| (rule.apply)(input).map(|c| (rule.name, c)))
}

/// Correct a proposed decision. Identical inputs always yield identical output.
pub fn guard(
    history: &[Action],
    data: &ExtractedDataSet,
    decision: Decision,
    min_save_confidence: f32,
) -> Decision {
    let input = GuardInput {
        history,
        view: PolicyView::of(data, min_save_confidence),
        proposed: decision.action,
    };
    match matching_rule(&input) {
        Some((rule, correction)) => {
            if correction.action != decision.action {
                tracing::debug!(
                    rule,
                    proposed = %decision.action,
                    corrected = %correction.action,
                    "Guard overrode model action"
                );
            }
            Decision {
                reasoning: correction.reasoning.to_string(),
                has_health_data: correction.has_health_data,
                confidence_score: decision.confidence_score,
                action: correction.action,
                action_input: ActionInput::new(),
                why_this_action: correction.why.to_string(),
            }
        }
        None => decision,
    }
}

// ═══════════════════════════════════════════
// Fallback
// ═══════════════════════════════════════════

/// Next step when the model's output cannot be used.
///
/// Priority: extract > validate > ask_clarification > check_duplicates >
/// save > finish.
pub fn fallback(data: &ExtractedDataSet, min_save_confidence: f32) -> Decision {
    let view = PolicyView::of(data, min_save_confidence);
    let action = if !view.has_items {
        Action::ExtractData
    } else if view.needs_validation {
        Action::ValidateData
    } else if view.needs_clarification {
        Action::AskClarification
    } else if view.needs_duplicate_check {
        Action::CheckDuplicates
    } else if view.has_save_eligible {
        Action::SaveToDatabase
    } else {
        Action::Finish
    };

    Decision {
        reasoning: "Fallback decision used due to parsing failure.".to_string(),
        has_health_data: true,
        confidence_score: 0.5,
        action,
        action_input: ActionInput::new(),
        why_this_action: "Fallback strategy".to_string(),
    }
}
