//! Subscription endpoints.

use std::str::FromStr;
use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use common::ReferenceId;
use order_store::{OrderStore, Subscription, SubscriptionLevel, SubscriptionStore};
use saga::SagaError;
use serde::{Deserialize, Serialize};

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::state::AppState;

/// What a `POST /subscription` asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionCommand {
    Create,
    Delete,
}

impl FromStr for SubscriptionCommand {
    type Err = SagaError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "CREATE" => Ok(SubscriptionCommand::Create),
            "DELETE" => Ok(SubscriptionCommand::Delete),
            other => Err(SagaError::Unprocessable(format!(
                "Unknown subscription status: {other:?}"
            ))),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionRequest {
    #[serde(default)]
    pub reference_id: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub level: Option<SubscriptionLevel>,
}

#[derive(Debug, Serialize)]
pub struct SubscriptionResponse {
    pub status: bool,
    pub subscription: Option<Subscription>,
}

#[derive(Debug, Serialize)]
pub struct SubscriptionListResponse {
    pub status: bool,
    pub subscriptions: Vec<Subscription>,
}

/// POST /subscription: Create or delete the caller's subscription.
#[tracing::instrument(skip_all, fields(user_id = %user_id))]
pub async fn update<S: OrderStore + SubscriptionStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    AuthUser(user_id): AuthUser,
    payload: Result<Json<SubscriptionRequest>, JsonRejection>,
) -> Result<Json<SubscriptionResponse>, ApiError> {
    let Json(req) = payload?;
    if req.reference_id.trim().is_empty() {
        return Err(ApiError::BadRequest("referenceId is required".to_string()));
    }

    let subscription = match req.status.parse::<SubscriptionCommand>()? {
        SubscriptionCommand::Create => {
            state
                .subscriptions
                .create(&user_id, &ReferenceId::new(req.reference_id), req.level)
                .await?
        }
        SubscriptionCommand::Delete => state.subscriptions.delete(&user_id).await?,
    };

    Ok(Json(SubscriptionResponse {
        status: true,
        subscription: Some(subscription),
    }))
}

/// GET /subscription: The caller's live subscription, or null.
pub async fn status<S: OrderStore + SubscriptionStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<SubscriptionResponse>, ApiError> {
    let subscription = state.subscriptions.status(&user_id).await?;
    Ok(Json(SubscriptionResponse {
        status: true,
        subscription,
    }))
}

/// GET /subscriptions: Every subscription the caller ever held.
pub async fn list<S: OrderStore + SubscriptionStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<SubscriptionListResponse>, ApiError> {
    let subscriptions = state.subscriptions.list(&user_id).await?;
    Ok(Json(SubscriptionListResponse {
        status: true,
        subscriptions,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_command() {
        assert_eq!(
            "CREATE".parse::<SubscriptionCommand>().unwrap(),
            SubscriptionCommand::Create
        );
        assert_eq!(
            "DELETE".parse::<SubscriptionCommand>().unwrap(),
            SubscriptionCommand::Delete
        );

        let err = "PAUSE".parse::<SubscriptionCommand>().unwrap_err();
        assert!(matches!(err, SagaError::Unprocessable(_)));
        assert!("".parse::<SubscriptionCommand>().is_err());
    }
}
