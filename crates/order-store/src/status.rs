//! Order status state machine.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The status of an order in its saga lifecycle.
///
/// State transitions:
/// ```text
/// New ──► Reserving ──► Reserved ──► Confirming ──► Completed
///  │          │             │             │
///  └──────────┴─────────────┴─────────────┴──► Declined | Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    /// Order row created, nothing reserved yet.
    #[default]
    New,

    /// Warehouse reservation in progress.
    Reserving,

    /// Basket bound to the order by the warehouse.
    Reserved,

    /// Handed off to delivery/payment, awaiting their verdict.
    Confirming,

    /// Confirmed by the downstream services (terminal state).
    Completed,

    /// Cancelled by the user or by a rollback event (terminal state).
    Declined,

    /// A saga step failed (terminal state).
    Failed,
}

/// How a status change relates to the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Forward move, apply it.
    Apply,
    /// Already in the target status, or moving between the two failure
    /// statuses (the first failure stands).
    Unchanged,
    /// Terminal status replaced by another terminal status (last write wins).
    Override,
    /// Backwards move or leaving a terminal status for a non-terminal one.
    Reject,
}

/// Outcome of applying a status to a stored order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusChange {
    Applied { from: OrderStatus },
    Unchanged,
    Overridden { from: OrderStatus },
}

impl StatusChange {
    /// Returns true if the stored status was modified.
    pub fn is_modified(&self) -> bool {
        !matches!(self, StatusChange::Unchanged)
    }
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 7] = [
        OrderStatus::New,
        OrderStatus::Reserving,
        OrderStatus::Reserved,
        OrderStatus::Confirming,
        OrderStatus::Completed,
        OrderStatus::Declined,
        OrderStatus::Failed,
    ];

    fn rank(&self) -> u8 {
        match self {
            OrderStatus::New => 0,
            OrderStatus::Reserving => 1,
            OrderStatus::Reserved => 2,
            OrderStatus::Confirming => 3,
            OrderStatus::Completed | OrderStatus::Declined | OrderStatus::Failed => 4,
        }
    }

    /// Returns true if this is a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Completed | OrderStatus::Declined | OrderStatus::Failed
        )
    }

    /// Returns true if the status marks a failed or cancelled saga.
    pub fn is_failure(&self) -> bool {
        matches!(self, OrderStatus::Declined | OrderStatus::Failed)
    }

    /// Classifies a move from `self` to `next`.
    ///
    /// `FAILED` and `DECLINED` do not override each other.
    pub fn transition_to(&self, next: OrderStatus) -> Transition {
        if *self == next || (self.is_failure() && next.is_failure()) {
            Transition::Unchanged
        } else if self.is_terminal() {
            if next.is_terminal() {
                Transition::Override
            } else {
                Transition::Reject
            }
        } else if next.rank() > self.rank() {
            Transition::Apply
        } else {
            Transition::Reject
        }
    }

    /// Returns the wire name of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::New => "NEW",
            OrderStatus::Reserving => "RESERVING",
            OrderStatus::Reserved => "RESERVED",
            OrderStatus::Confirming => "CONFIRMING",
            OrderStatus::Completed => "COMPLETED",
            OrderStatus::Declined => "DECLINED",
            OrderStatus::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Error returned when a status string is not recognised.
#[derive(Debug, Clone, Error)]
#[error("Unknown status: {0}")]
pub struct ParseStatusError(pub String);

impl std::str::FromStr for OrderStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OrderStatus::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ParseStatusError(s.to_string()))
    }
}
