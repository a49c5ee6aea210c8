//! Outcome of a compensation run.

use std::fmt;

use common::{CorrelationId, OrderId};

use crate::error::SagaError;

/// A compensating action issued for a failed saga.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompensationAction {
    WarehouseDecline,
    DeliveryDecline,
    PaymentReversal,
}

impl CompensationAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompensationAction::WarehouseDecline => "warehouse_decline",
            CompensationAction::DeliveryDecline => "delivery_decline",
            CompensationAction::PaymentReversal => "payment_reversal",
        }
    }
}

impl fmt::Display for CompensationAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A compensating action that could not be carried out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompensationFailure {
    pub action: CompensationAction,
    pub reason: String,
}

/// What a compensation run did for one order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompensationReport {
    pub order_id: OrderId,
    pub correlation_id: CorrelationId,
    /// Another delivery had already claimed compensation; nothing was issued.
    pub already_compensated: bool,
    /// Actions issued successfully, in issue order.
    pub issued: Vec<CompensationAction>,
    pub failures: Vec<CompensationFailure>,
}

impl CompensationReport {
    pub fn new(order_id: OrderId, correlation_id: CorrelationId) -> Self {
        Self {
            order_id,
            correlation_id,
            already_compensated: false,
            issued: Vec::new(),
            failures: Vec::new(),
        }
    }

    pub fn already_compensated(order_id: OrderId, correlation_id: CorrelationId) -> Self {
        Self {
            already_compensated: true,
            ..Self::new(order_id, correlation_id)
        }
    }

    pub fn record_issued(&mut self, action: CompensationAction) {
        self.issued.push(action);
    }

    pub fn record_failure(&mut self, action: CompensationAction, reason: impl Into<String>) {
        self.failures.push(CompensationFailure {
            action,
            reason: reason.into(),
        });
    }

    pub fn issued(&self, action: CompensationAction) -> bool {
        self.issued.contains(&action)
    }

    /// True when every owed action was issued.
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    /// Converts recorded failures into a `CompensationIncomplete` error.
    pub fn to_error(&self) -> Option<SagaError> {
        if self.is_complete() {
            return None;
        }
        let reason = self
            .failures
            .iter()
            .map(|failure| format!("{}: {}", failure.action, failure.reason))
            .collect::<Vec<_>>()
            .join("; ");
        Some(SagaError::CompensationIncomplete {
            order_id: self.order_id,
            reason,
        })
    }
}
