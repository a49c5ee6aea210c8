use async_trait::async_trait;
use common::{OrderId, ReferenceId, UserId};
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::{
    Order, OrderItem, OrderStatus, OrderStoreError, Reservation, Result, SagaStep, StatusChange,
    StepRecord,
    store::{OrderStore, SubscriptionStore, plan_status_change},
    subscription::{NewSubscription, Subscription, SubscriptionStatus, SubscriptionToggle},
};

const ORDER_COLUMNS: &str = "order_id, user_id, reference_id, status, total_amount, items_count, \
     items, reserved_at, dispatched_at, compensated_at, status_overridden, created_at, updated_at";

const SUBSCRIPTION_COLUMNS: &str =
    "subscription_id, user_id, order_id, level, status, created_at, updated_at, deleted_at";

/// PostgreSQL-backed order store implementation.
#[derive(Clone)]
pub struct PostgresOrderStore {
    pool: PgPool,
}

impl PostgresOrderStore {
    /// Creates a new PostgreSQL order store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    fn row_to_order(row: PgRow) -> Result<Order> {
        let status: String = row.try_get("status")?;
        let items: serde_json::Value = row.try_get("items")?;
        let items_count: i32 = row.try_get("items_count")?;

        Ok(Order {
            order_id: OrderId::from_uuid(row.try_get::<Uuid, _>("order_id")?),
            user_id: UserId::new(row.try_get::<String, _>("user_id")?),
            reference_id: ReferenceId::new(row.try_get::<String, _>("reference_id")?),
            status: status.parse()?,
            total_amount: row.try_get("total_amount")?,
            items_count: u32::try_from(items_count).unwrap_or_default(),
            items: serde_json::from_value::<Vec<OrderItem>>(items)?,
            reserved_at: row.try_get("reserved_at")?,
            dispatched_at: row.try_get("dispatched_at")?,
            compensated_at: row.try_get("compensated_at")?,
            status_overridden: row.try_get("status_overridden")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn row_to_subscription(row: PgRow) -> Result<Subscription> {
        let level: String = row.try_get("level")?;
        let status: String = row.try_get("status")?;

        Ok(Subscription {
            subscription_id: row.try_get("subscription_id")?,
            user_id: UserId::new(row.try_get::<String, _>("user_id")?),
            order_id: OrderId::from_uuid(row.try_get::<Uuid, _>("order_id")?),
            level: level.parse()?,
            status: status.parse()?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            deleted_at: row.try_get("deleted_at")?,
        })
    }

    /// Applies a status under a row lock so concurrent deliveries serialize.
    async fn apply_status(
        &self,
        order_id: OrderId,
        user_id: Option<&UserId>,
        status: OrderStatus,
    ) -> Result<StatusChange> {
        let mut tx = self.pool.begin().await?;

        let current: Option<String> = sqlx::query_scalar(
            r#"
            SELECT status FROM orders
            WHERE order_id = $1 AND ($2::TEXT IS NULL OR user_id = $2)
            FOR UPDATE
            "#,
        )
        .bind(order_id.as_uuid())
        .bind(user_id.map(UserId::as_str))
        .fetch_optional(&mut *tx)
        .await?;

        let current: OrderStatus = current
            .ok_or(OrderStoreError::OrderNotFound(order_id))?
            .parse()?;

        let change = plan_status_change(order_id, current, status)?;
        if change.is_modified() {
            let overridden = matches!(change, StatusChange::Overridden { .. });
            sqlx::query(
                r#"
                UPDATE orders
                SET status = $2, updated_at = NOW(), status_overridden = status_overridden OR $3
                WHERE order_id = $1
                "#,
            )
            .bind(order_id.as_uuid())
            .bind(status.as_str())
            .bind(overridden)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(change)
    }

    async fn order_exists(&self, order_id: OrderId) -> Result<bool> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM orders WHERE order_id = $1)")
                .bind(order_id.as_uuid())
                .fetch_one(&self.pool)
                .await?;
        Ok(exists)
    }
}

#[async_trait]
impl OrderStore for PostgresOrderStore {
    #[tracing::instrument(skip(self))]
    async fn create(&self, user_id: &UserId, reference_id: &ReferenceId) -> Result<Order> {
        let order = Order::new(user_id.clone(), reference_id.clone());

        let row = sqlx::query(&format!(
            r#"
            INSERT INTO orders (order_id, user_id, reference_id, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $5)
            RETURNING {ORDER_COLUMNS}
            "#
        ))
        .bind(order.order_id.as_uuid())
        .bind(user_id.as_str())
        .bind(reference_id.as_str())
        .bind(order.status.as_str())
        .bind(order.created_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.constraint() == Some("unique_user_reference")
            {
                return OrderStoreError::Conflict {
                    user_id: user_id.clone(),
                    reference_id: reference_id.clone(),
                };
            }
            OrderStoreError::Database(e)
        })?;

        Self::row_to_order(row)
    }

    #[tracing::instrument(skip(self))]
    async fn update_status(
        &self,
        order_id: OrderId,
        user_id: &UserId,
        status: OrderStatus,
    ) -> Result<StatusChange> {
        self.apply_status(order_id, Some(user_id), status).await
    }

    #[tracing::instrument(skip(self))]
    async fn update_status_by_order(
        &self,
        order_id: OrderId,
        status: OrderStatus,
    ) -> Result<StatusChange> {
        self.apply_status(order_id, None, status).await
    }

    async fn get_order(&self, order_id: OrderId, user_id: &UserId) -> Result<Option<Order>> {
        let row = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE order_id = $1 AND user_id = $2"
        ))
        .bind(order_id.as_uuid())
        .bind(user_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_order).transpose()
    }

    async fn get_order_by_reference(
        &self,
        reference_id: &ReferenceId,
        user_id: &UserId,
    ) -> Result<Option<Order>> {
        let row = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE reference_id = $1 AND user_id = $2"
        ))
        .bind(reference_id.as_str())
        .bind(user_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_order).transpose()
    }

    async fn get_order_by_id(&self, order_id: OrderId) -> Result<Option<Order>> {
        let row = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE order_id = $1"
        ))
        .bind(order_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_order).transpose()
    }

    async fn list_orders(
        &self,
        user_id: &UserId,
        status: Option<OrderStatus>,
    ) -> Result<Vec<Order>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {ORDER_COLUMNS} FROM orders
            WHERE user_id = $1 AND ($2::TEXT IS NULL OR status = $2)
            ORDER BY created_at DESC
            "#
        ))
        .bind(user_id.as_str())
        .bind(status.map(|s| s.as_str()))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_order).collect()
    }

    #[tracing::instrument(skip(self, reservation))]
    async fn attach_reservation(&self, order_id: OrderId, reservation: Reservation) -> Result<()> {
        let items_count = i32::try_from(reservation.items_count()).unwrap_or(i32::MAX);
        let items = serde_json::to_value(&reservation.items)?;

        let result = sqlx::query(
            r#"
            UPDATE orders SET total_amount = $2, items_count = $3, items = $4
            WHERE order_id = $1
            "#,
        )
        .bind(order_id.as_uuid())
        .bind(reservation.total_amount)
        .bind(items_count)
        .bind(items)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(OrderStoreError::OrderNotFound(order_id));
        }
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn record_step(&self, order_id: OrderId, step: SagaStep) -> Result<StepRecord> {
        let column = step.column();
        // the row lock orders this update against the compensation claim, so
        // RETURNING sees any claim committed before it
        let compensated: Option<bool> = sqlx::query_scalar(&format!(
            r#"
            UPDATE orders SET {column} = NOW()
            WHERE order_id = $1 AND {column} IS NULL
            RETURNING compensated_at IS NOT NULL
            "#
        ))
        .bind(order_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        match compensated {
            Some(true) if step != SagaStep::Compensated => {
                Ok(StepRecord::RecordedAfterCompensation)
            }
            Some(_) => Ok(StepRecord::Recorded),
            None if self.order_exists(order_id).await? => Ok(StepRecord::AlreadyRecorded),
            None => Err(OrderStoreError::OrderNotFound(order_id)),
        }
    }

    #[tracing::instrument(skip(self))]
    async fn claim_compensation(&self, order_id: OrderId) -> Result<Option<Order>> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE orders SET compensated_at = NOW()
            WHERE order_id = $1 AND compensated_at IS NULL
            RETURNING {ORDER_COLUMNS}
            "#
        ))
        .bind(order_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(Self::row_to_order(row)?)),
            None if self.order_exists(order_id).await? => Ok(None),
            None => Err(OrderStoreError::OrderNotFound(order_id)),
        }
    }
}

#[async_trait]
impl SubscriptionStore for PostgresOrderStore {
    #[tracing::instrument(skip(self))]
    async fn create_subscription(&self, input: NewSubscription) -> Result<Subscription> {
        let subscription = Subscription::new(input);

        let row = sqlx::query(&format!(
            r#"
            INSERT INTO subscriptions (subscription_id, user_id, order_id, level, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $6)
            RETURNING {SUBSCRIPTION_COLUMNS}
            "#
        ))
        .bind(subscription.subscription_id)
        .bind(subscription.user_id.as_str())
        .bind(subscription.order_id.as_uuid())
        .bind(subscription.level.as_str())
        .bind(subscription.status.as_str())
        .bind(subscription.created_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.constraint() == Some("unique_live_subscription")
            {
                return OrderStoreError::SubscriptionExists(subscription.user_id.clone());
            }
            OrderStoreError::Database(e)
        })?;

        Self::row_to_subscription(row)
    }

    async fn get_subscription_status(&self, user_id: &UserId) -> Result<Option<Subscription>> {
        let row = sqlx::query(&format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions WHERE user_id = $1 AND deleted_at IS NULL"
        ))
        .bind(user_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_subscription).transpose()
    }

    async fn list_subscriptions(&self, user_id: &UserId) -> Result<Vec<Subscription>> {
        let rows = sqlx::query(&format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions WHERE user_id = $1 ORDER BY created_at DESC"
        ))
        .bind(user_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_subscription).collect()
    }

    #[tracing::instrument(skip(self))]
    async fn delete_subscription(&self, user_id: &UserId) -> Result<Option<Subscription>> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE subscriptions
            SET deleted_at = NOW(), updated_at = NOW(), status = $2
            WHERE user_id = $1 AND deleted_at IS NULL
            RETURNING {SUBSCRIPTION_COLUMNS}
            "#
        ))
        .bind(user_id.as_str())
        .bind(SubscriptionStatus::Deactivated.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_subscription).transpose()
    }

    #[tracing::instrument(skip(self))]
    async fn set_subscription_status(
        &self,
        user_id: &UserId,
        status: SubscriptionStatus,
    ) -> Result<SubscriptionToggle> {
        let mut tx = self.pool.begin().await?;

        let current: Option<String> = sqlx::query_scalar(
            "SELECT status FROM subscriptions WHERE user_id = $1 AND deleted_at IS NULL FOR UPDATE",
        )
        .bind(user_id.as_str())
        .fetch_optional(&mut *tx)
        .await?;

        let from: SubscriptionStatus = current
            .ok_or_else(|| OrderStoreError::SubscriptionNotFound(user_id.clone()))?
            .parse()?;

        if from == status {
            tx.commit().await?;
            return Ok(SubscriptionToggle::Unchanged);
        }

        sqlx::query(
            "UPDATE subscriptions SET status = $2, updated_at = NOW() WHERE user_id = $1 AND deleted_at IS NULL",
        )
        .bind(user_id.as_str())
        .bind(status.as_str())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(SubscriptionToggle::Applied { from })
    }
}
