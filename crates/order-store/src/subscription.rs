//! Subscription records: a recurring order variant.

use chrono::{DateTime, Utc};
use common::{OrderId, UserId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::status::ParseStatusError;

/// Subscription tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubscriptionLevel {
    Begin,
    Extended,
    Advanced,
    Professional,
}

impl SubscriptionLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionLevel::Begin => "BEGIN",
            SubscriptionLevel::Extended => "EXTENDED",
            SubscriptionLevel::Advanced => "ADVANCED",
            SubscriptionLevel::Professional => "PROFESSIONAL",
        }
    }
}

impl std::fmt::Display for SubscriptionLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SubscriptionLevel {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "BEGIN" => Ok(SubscriptionLevel::Begin),
            "EXTENDED" => Ok(SubscriptionLevel::Extended),
            "ADVANCED" => Ok(SubscriptionLevel::Advanced),
            "PROFESSIONAL" => Ok(SubscriptionLevel::Professional),
            _ => Err(ParseStatusError(s.to_string())),
        }
    }
}

/// Activation state, toggled by events from the billing side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubscriptionStatus {
    Activated,
    #[default]
    Deactivated,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Activated => "ACTIVATED",
            SubscriptionStatus::Deactivated => "DEACTIVATED",
        }
    }
}

impl std::fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SubscriptionStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ACTIVATED" => Ok(SubscriptionStatus::Activated),
            "DEACTIVATED" => Ok(SubscriptionStatus::Deactivated),
            _ => Err(ParseStatusError(s.to_string())),
        }
    }
}

/// Outcome of an activation toggle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionToggle {
    Applied { from: SubscriptionStatus },
    Unchanged,
}

/// Input for creating a subscription row.
#[derive(Debug, Clone)]
pub struct NewSubscription {
    pub user_id: UserId,
    pub order_id: OrderId,
    pub level: SubscriptionLevel,
}

/// A subscription record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    pub subscription_id: Uuid,
    pub user_id: UserId,
    /// The order backing this subscription.
    pub order_id: OrderId,
    pub level: SubscriptionLevel,
    pub status: SubscriptionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Tombstone set by a DELETE request.
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Subscription {
    pub fn new(input: NewSubscription) -> Self {
        let now = Utc::now();
        Self {
            subscription_id: Uuid::new_v4(),
            user_id: input.user_id,
            order_id: input.order_id,
            level: input.level,
            status: SubscriptionStatus::default(),
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    /// Returns true unless the subscription has been tombstoned.
    pub fn is_live(&self) -> bool {
        self.deleted_at.is_none()
    }
}
