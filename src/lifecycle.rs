//! Alert lifecycle state machine.
//!
//! An alert moves through a small, one-way state graph:
//!
//! ```text
//! ACTIVE ──respond──> RESPONDED ──verify──> VERIFIED
//!    │
//!    └───cancel────> CANCELLED
//! ```
//!
//! `RESPONDED`, `VERIFIED`, and `CANCELLED` never transition back to
//! `ACTIVE`. The state is not stored as its own column; it is derived from
//! the `active`, `helper_id`, and `verified` fields of the persisted record,
//! and the storage layer enforces transitions with conditional updates. This
//! module is the single place that interprets those fields as a state and
//! says which transitions are legal.

use crate::model::Alert;

/// The lifecycle state of an alert, derived from its persisted flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertState {
    /// Broadcasting, visible to nearby devices, no responder yet.
    Active,
    /// A responder claimed the alert; no longer visible in discovery.
    Responded,
    /// The sender confirmed the responder's help. Terminal.
    Verified,
    /// Withdrawn by the sender before anyone responded. Terminal.
    Cancelled,
}

impl AlertState {
    /// Derive the state from an alert record.
    ///
    /// A record with a responder is RESPONDED (or VERIFIED once confirmed)
    /// regardless of the `active` flag; a record with no responder is ACTIVE
    /// or CANCELLED depending on it.
    pub fn of(alert: &Alert) -> Self {
        match (alert.helper_id, alert.active, alert.verified) {
            (Some(_), _, true) => AlertState::Verified,
            (Some(_), _, false) => AlertState::Responded,
            (None, true, _) => AlertState::Active,
            (None, false, _) => AlertState::Cancelled,
        }
    }

    /// Whether a responder may claim an alert in this state.
    pub fn can_respond(self) -> bool {
        matches!(self, AlertState::Active)
    }

    /// Whether the sender may verify the responder's help.
    ///
    /// Verifying an already-verified alert is permitted as an idempotent
    /// no-op; verifying without a responder is not, since verification is an
    /// annotation on top of RESPONDED.
    pub fn can_verify(self) -> bool {
        matches!(self, AlertState::Responded | AlertState::Verified)
    }

    /// Human-readable label, used in conflict error messages.
    pub fn label(self) -> &'static str {
        match self {
            AlertState::Active => "active",
            AlertState::Responded => "responded",
            AlertState::Verified => "verified",
            AlertState::Cancelled => "cancelled",
        }
    }
}
