//! Order entity as stored by the order store.

use chrono::{DateTime, Utc};
use common::{OrderId, ReferenceId, UserId};
use serde::{Deserialize, Serialize};

use crate::status::OrderStatus;

/// A line of the basket bound to an order by the warehouse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItem {
    pub product_id: String,
    pub quantity: u32,
    /// Unit price in minor currency units.
    pub price: i64,
}

impl OrderItem {
    pub fn new(product_id: impl Into<String>, quantity: u32, price: i64) -> Self {
        Self {
            product_id: product_id.into(),
            quantity,
            price,
        }
    }
}

/// Totals and lines reported by the warehouse once the basket is bound.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reservation {
    pub total_amount: i64,
    pub items: Vec<OrderItem>,
}

impl Reservation {
    pub fn new(total_amount: i64, items: Vec<OrderItem>) -> Self {
        Self {
            total_amount,
            items,
        }
    }

    /// Sum of quantities across all lines.
    pub fn items_count(&self) -> u32 {
        self.items.iter().map(|item| item.quantity).sum()
    }
}

/// Saga progress markers kept on the order row.
///
/// Each marker is set at most once, so a compensation can tell which steps
/// actually happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SagaStep {
    Reserved,
    Dispatched,
    Compensated,
}

impl SagaStep {
    /// Column holding the marker timestamp.
    pub fn column(&self) -> &'static str {
        match self {
            SagaStep::Reserved => "reserved_at",
            SagaStep::Dispatched => "dispatched_at",
            SagaStep::Compensated => "compensated_at",
        }
    }
}

/// Outcome of setting a saga progress marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepRecord {
    /// The marker was set by this call.
    Recorded,
    /// The marker was already set.
    AlreadyRecorded,
    /// The marker was set by this call, but compensation had been claimed
    /// before it landed. The caller undoes the step itself.
    RecordedAfterCompensation,
}

impl StepRecord {
    /// Returns true if this call set the marker.
    pub fn is_first(&self) -> bool {
        !matches!(self, StepRecord::AlreadyRecorded)
    }
}

/// An order record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub order_id: OrderId,
    pub user_id: UserId,
    pub reference_id: ReferenceId,
    pub status: OrderStatus,
    pub total_amount: i64,
    pub items_count: u32,
    pub items: Vec<OrderItem>,
    pub reserved_at: Option<DateTime<Utc>>,
    pub dispatched_at: Option<DateTime<Utc>>,
    pub compensated_at: Option<DateTime<Utc>>,
    /// Set when a terminal status was overwritten by another terminal status.
    pub status_overridden: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Creates a fresh order in `NEW` status with a store-generated ID.
    pub fn new(user_id: UserId, reference_id: ReferenceId) -> Self {
        let now = Utc::now();
        Self {
            order_id: OrderId::new(),
            user_id,
            reference_id,
            status: OrderStatus::New,
            total_amount: 0,
            items_count: 0,
            items: Vec::new(),
            reserved_at: None,
            dispatched_at: None,
            compensated_at: None,
            status_overridden: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Returns true if the warehouse reservation step completed.
    pub fn is_reserved(&self) -> bool {
        self.reserved_at.is_some()
    }

    /// Returns true if the delivery hand-off was published.
    pub fn is_dispatched(&self) -> bool {
        self.dispatched_at.is_some()
    }

    /// Returns true if the given progress marker is set.
    pub fn has_step(&self, step: SagaStep) -> bool {
        match step {
            SagaStep::Reserved => self.reserved_at.is_some(),
            SagaStep::Dispatched => self.dispatched_at.is_some(),
            SagaStep::Compensated => self.compensated_at.is_some(),
        }
    }

    /// Returns true if compensation has already been claimed.
    pub fn is_compensated(&self) -> bool {
        self.compensated_at.is_some()
    }

    pub(crate) fn step_marker(&mut self, step: SagaStep) -> &mut Option<DateTime<Utc>> {
        match step {
            SagaStep::Reserved => &mut self.reserved_at,
            SagaStep::Dispatched => &mut self.dispatched_at,
            SagaStep::Compensated => &mut self.compensated_at,
        }
    }

    /// Copies warehouse totals and lines onto the order.
    pub fn apply_reservation(&mut self, reservation: Reservation) {
        self.items_count = reservation.items_count();
        self.total_amount = reservation.total_amount;
        self.items = reservation.items;
    }
}
