//! Donation lifecycle rules: the transition table, the mark-received
//! affordance and the feedback gate.
//!
//! The stage vocabulary is a strict walk `preparing → ready_for_pickup →
//! in_transit → received → complete`. Transitions outside the table are
//! rejected rather than clamped; display-time clamping of unknown values
//! happens in [`Stage::parse`], never here.

use crate::model::{Donation, Role, Stage};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StageError {
    #[error("transition {from:?} -> {to:?} is not allowed")]
    Forbidden { from: Stage, to: Stage },
}

/// The single allowed successor of a stage, if any. `Complete` is terminal.
pub fn next_stage(from: Stage) -> Option<Stage> {
    match from {
        Stage::Preparing => Some(Stage::ReadyForPickup),
        Stage::ReadyForPickup => Some(Stage::InTransit),
        Stage::InTransit => Some(Stage::Received),
        Stage::Received => Some(Stage::Complete),
        Stage::Complete => None,
    }
}

/// Validate a requested transition against the table. No skipping, no
/// regression, nothing out of `Complete`.
pub fn advance(from: Stage, to: Stage) -> Result<Stage, StageError> {
    match next_stage(from) {
        Some(next) if next == to => Ok(to),
        _ => Err(StageError::Forbidden { from, to }),
    }
}

/// Whether the "mark as received" affordance is shown: only the recipient,
/// and only while the donation is in transit.
pub fn shows_mark_received(stage: Stage, role: Role) -> bool {
    stage == Stage::InTransit && role == Role::Charity
}

/// Whether the feedback affordance is available: the donation has been
/// received and no feedback has been recorded yet. Submitting feedback is
/// what moves `received` to its terminal `complete`.
pub fn can_submit_feedback(donation: &Donation) -> bool {
    donation.stage() == Stage::Received && !donation.feedback_submitted
}
