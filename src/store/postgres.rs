//! # PostgreSQL Store
//!
//! [`MarketplaceStore`] over PostgreSQL. Each commit runs in one transaction:
//!
//! - tack and offer updates are `UPDATE ... WHERE version = $expected`; zero affected rows
//!   aborts with a conflict
//! - the partial unique index `offers_one_active_per_runner` backs the one-active-offer rule
//! - debits are conditional (`balance + delta >= 0`) so an overdraft aborts the transaction
//! - transitions get the next sort key and take over `most_recent`
//! - tacks named by offer guards or sweeps are locked `FOR UPDATE` before their offers are
//!   read, so a concurrent submission and an acceptance serialize on the tack row without
//!   either bumping its version

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, Transaction};
use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use tracing::{debug, instrument};
use uuid::Uuid;

use super::{next_versions, ChangeSet, CommitReceipt, MarketplaceStore, StoreError, StoreResult};
use crate::config::DatabaseConfig;
use crate::error::{MarketplaceError, MarketplaceResult};
use crate::ledger::{LedgerEntry, LedgerReason};
use crate::membership::MembershipDirectory;
use crate::models::{
    EntityRef, GroupId, Offer, OfferId, OfferType, Review, ReviewId, StatsUpdate, Tack, TackId,
    TackTransition, TackType, UserId, UserStats,
};
use crate::state_machine::{OfferStatus, TackStatus};

pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

const ACTIVE_OFFER_INDEX: &str = "offers_one_active_per_runner";
const REVIEW_KEY: &str = "reviews_tack_reviewer_key";

const TACK_COLUMNS: &str = "id, title, description, price, status, tack_type, allow_counter_offer, \
    auto_accept, estimation_time_seconds, group_id, tacker_id, runner_id, accepted_offer_id, \
    created_at, accepted_time, start_completion_time, completion_time, completion_message, \
    is_paid, is_canceled, is_active, updated_at, version";

const OFFER_COLUMNS: &str = "id, tack_id, runner_id, price, offer_type, status, lifetime_seconds, \
    is_active, created_at, updated_at, version";

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(config: &DatabaseConfig) -> StoreResult<Self> {
        let url = config
            .database_url()
            .ok_or_else(|| StoreError::Database("no database url configured".to_string()))?;
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout())
            .connect(&url)
            .await?;
        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> StoreResult<()> {
        MIGRATOR
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Database(format!("migration failed: {e}")))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn add_member(&self, group_id: GroupId, user_id: UserId) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO group_members (group_id, user_id) VALUES ($1, $2) ON CONFLICT DO NOTHING",
        )
        .bind(group_id.as_uuid())
        .bind(user_id.as_uuid())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Lock the tack row for the rest of the transaction
    async fn lock_tack(
        tx: &mut Transaction<'_, Postgres>,
        tack_id: TackId,
    ) -> StoreResult<Option<Tack>> {
        let query = format!("SELECT {TACK_COLUMNS} FROM tacks WHERE id = $1 FOR UPDATE");
        sqlx::query_as::<_, TackRow>(&query)
            .bind(tack_id.as_uuid())
            .fetch_optional(&mut **tx)
            .await?
            .map(Tack::try_from)
            .transpose()
    }

    async fn open_offers(
        tx: &mut Transaction<'_, Postgres>,
        tack_id: TackId,
    ) -> StoreResult<Vec<Offer>> {
        let query = format!(
            "SELECT {OFFER_COLUMNS} FROM offers WHERE tack_id = $1 AND status = 'created' \
             ORDER BY created_at, id"
        );
        sqlx::query_as::<_, OfferRow>(&query)
            .bind(tack_id.as_uuid())
            .fetch_all(&mut **tx)
            .await?
            .into_iter()
            .map(Offer::try_from)
            .collect()
    }

    async fn write_tack(
        tx: &mut Transaction<'_, Postgres>,
        tack: &Tack,
        expected_version: Option<i64>,
    ) -> StoreResult<()> {
        let entity = EntityRef::Tack(tack.id);
        let sql = match expected_version {
            None => format!(
                "INSERT INTO tacks ({TACK_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, \
                 $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20, $21, $22, $23) \
                 ON CONFLICT (id) DO NOTHING"
            ),
            Some(_) => "UPDATE tacks SET title = $2, description = $3, price = $4, status = $5, \
                 tack_type = $6, allow_counter_offer = $7, auto_accept = $8, \
                 estimation_time_seconds = $9, group_id = $10, tacker_id = $11, runner_id = $12, \
                 accepted_offer_id = $13, created_at = $14, accepted_time = $15, \
                 start_completion_time = $16, completion_time = $17, completion_message = $18, \
                 is_paid = $19, is_canceled = $20, is_active = $21, updated_at = $22, \
                 version = $23 WHERE id = $1 AND version = $24"
                .to_string(),
        };

        let mut query = sqlx::query(&sql)
            .bind(tack.id.as_uuid())
            .bind(&tack.title)
            .bind(&tack.description)
            .bind(tack.price)
            .bind(tack.status.to_string())
            .bind(tack.tack_type.to_string())
            .bind(tack.allow_counter_offer)
            .bind(tack.auto_accept)
            .bind(tack.estimation_time_seconds)
            .bind(tack.group_id.map(|id| id.as_uuid()))
            .bind(tack.tacker_id.as_uuid())
            .bind(tack.runner_id.map(|id| id.as_uuid()))
            .bind(tack.accepted_offer_id.map(|id| id.as_uuid()))
            .bind(tack.created_at)
            .bind(tack.accepted_time)
            .bind(tack.start_completion_time)
            .bind(tack.completion_time)
            .bind(&tack.completion_message)
            .bind(tack.is_paid)
            .bind(tack.is_canceled)
            .bind(tack.is_active)
            .bind(tack.updated_at)
            .bind(tack.version);
        if let Some(expected) = expected_version {
            query = query.bind(expected);
        }
        let result = query.execute(&mut **tx).await?;

        if result.rows_affected() == 1 {
            return Ok(());
        }
        Err(Self::missing_row(tx, "tacks", entity, expected_version).await)
    }

    async fn write_offer(
        tx: &mut Transaction<'_, Postgres>,
        offer: &Offer,
        expected_version: Option<i64>,
    ) -> StoreResult<()> {
        let entity = EntityRef::Offer(offer.id);
        let sql = match expected_version {
            None => format!(
                "INSERT INTO offers ({OFFER_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, \
                 $9, $10, $11) ON CONFLICT (id) DO NOTHING"
            ),
            Some(_) => "UPDATE offers SET tack_id = $2, runner_id = $3, price = $4, \
                 offer_type = $5, status = $6, lifetime_seconds = $7, is_active = $8, \
                 created_at = $9, updated_at = $10, version = $11 \
                 WHERE id = $1 AND version = $12"
                .to_string(),
        };

        let mut query = sqlx::query(&sql)
            .bind(offer.id.as_uuid())
            .bind(offer.tack_id.as_uuid())
            .bind(offer.runner_id.as_uuid())
            .bind(offer.price)
            .bind(offer.offer_type.to_string())
            .bind(offer.status.to_string())
            .bind(offer.lifetime_seconds)
            .bind(offer.is_active)
            .bind(offer.created_at)
            .bind(offer.updated_at)
            .bind(offer.version);
        if let Some(expected) = expected_version {
            query = query.bind(expected);
        }
        let result = query.execute(&mut **tx).await.map_err(|e| {
            if violates(&e, ACTIVE_OFFER_INDEX) {
                StoreError::DuplicateActiveOffer {
                    tack_id: offer.tack_id,
                    runner_id: offer.runner_id,
                }
            } else {
                StoreError::from(e)
            }
        })?;

        if result.rows_affected() == 1 {
            return Ok(());
        }
        Err(Self::missing_row(tx, "offers", entity, expected_version).await)
    }

    /// Explain a write that touched no rows
    async fn missing_row(
        tx: &mut Transaction<'_, Postgres>,
        table: &str,
        entity: EntityRef,
        expected_version: Option<i64>,
    ) -> StoreError {
        if expected_version.is_none() {
            return StoreError::Conflict { entity };
        }
        let query = format!("SELECT EXISTS (SELECT 1 FROM {table} WHERE id = $1)");
        match sqlx::query_scalar::<_, bool>(&query)
            .bind(entity.uuid())
            .fetch_one(&mut **tx)
            .await
        {
            Ok(true) => StoreError::Conflict { entity },
            Ok(false) => StoreError::NotFound { entity },
            Err(e) => StoreError::from(e),
        }
    }

    async fn apply_ledger_entry(
        tx: &mut Transaction<'_, Postgres>,
        entry: &LedgerEntry,
    ) -> StoreResult<()> {
        if entry.is_debit() {
            let updated: Option<i64> = sqlx::query_scalar(
                "UPDATE balances SET balance = balance + $2 \
                 WHERE user_id = $1 AND balance + $2 >= 0 RETURNING balance",
            )
            .bind(entry.user_id.as_uuid())
            .bind(entry.delta)
            .fetch_optional(&mut **tx)
            .await?;

            if updated.is_none() {
                let available: Option<i64> =
                    sqlx::query_scalar("SELECT balance FROM balances WHERE user_id = $1")
                        .bind(entry.user_id.as_uuid())
                        .fetch_optional(&mut **tx)
                        .await?;
                return Err(StoreError::InsufficientFunds {
                    user_id: entry.user_id,
                    required: -entry.delta,
                    available: available.unwrap_or(0),
                });
            }
        } else {
            sqlx::query(
                "INSERT INTO balances (user_id, balance) VALUES ($1, $2) \
                 ON CONFLICT (user_id) DO UPDATE SET balance = balances.balance + EXCLUDED.balance",
            )
            .bind(entry.user_id.as_uuid())
            .bind(entry.delta)
            .execute(&mut **tx)
            .await?;
        }

        sqlx::query(
            "INSERT INTO ledger_entries (id, user_id, delta, reason, tack_id, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(entry.id)
        .bind(entry.user_id.as_uuid())
        .bind(entry.delta)
        .bind(entry.reason.to_string())
        .bind(entry.tack_id.map(|id| id.as_uuid()))
        .bind(entry.created_at)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    async fn append_transitions(
        tx: &mut Transaction<'_, Postgres>,
        tack_id: TackId,
        pending: &[&TackTransition],
    ) -> StoreResult<()> {
        let last_key: i32 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(sort_key), 0) FROM tack_transitions WHERE tack_id = $1",
        )
        .bind(tack_id.as_uuid())
        .fetch_one(&mut **tx)
        .await?;

        sqlx::query(
            "UPDATE tack_transitions SET most_recent = FALSE WHERE tack_id = $1 AND most_recent",
        )
        .bind(tack_id.as_uuid())
        .execute(&mut **tx)
        .await?;

        let last = pending.len().saturating_sub(1);
        for (index, (transition, sort_key)) in pending.iter().zip(last_key + 1..).enumerate() {
            sqlx::query(
                "INSERT INTO tack_transitions \
                 (id, tack_id, from_state, to_state, event, actor_id, metadata, sort_key, \
                  most_recent, created_at) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
            )
            .bind(transition.id)
            .bind(tack_id.as_uuid())
            .bind(&transition.from_state)
            .bind(&transition.to_state)
            .bind(&transition.event)
            .bind(transition.actor_id.map(|id| id.as_uuid()))
            .bind(&transition.metadata)
            .bind(sort_key)
            .bind(index == last)
            .bind(transition.created_at)
            .execute(&mut **tx)
            .await?;
        }
        Ok(())
    }

    async fn apply_stats(
        tx: &mut Transaction<'_, Postgres>,
        update: &StatsUpdate,
    ) -> StoreResult<()> {
        let (as_tacker, as_runner, rating_sum, rating_count) = match update {
            StatsUpdate::CompletedAsTacker(_) => (1i64, 0i64, 0i64, 0i64),
            StatsUpdate::CompletedAsRunner(_) => (0, 1, 0, 0),
            StatsUpdate::Rated { rating, .. } => (0, 0, i64::from(*rating), 1),
        };
        sqlx::query(
            "INSERT INTO user_stats \
             (user_id, tacks_completed_as_tacker, tacks_completed_as_runner, rating_sum, rating_count) \
             VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (user_id) DO UPDATE SET \
             tacks_completed_as_tacker = user_stats.tacks_completed_as_tacker + EXCLUDED.tacks_completed_as_tacker, \
             tacks_completed_as_runner = user_stats.tacks_completed_as_runner + EXCLUDED.tacks_completed_as_runner, \
             rating_sum = user_stats.rating_sum + EXCLUDED.rating_sum, \
             rating_count = user_stats.rating_count + EXCLUDED.rating_count",
        )
        .bind(update.user_id().as_uuid())
        .bind(as_tacker)
        .bind(as_runner)
        .bind(rating_sum)
        .bind(rating_count)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    async fn insert_review(tx: &mut Transaction<'_, Postgres>, review: &Review) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO reviews (id, tack_id, reviewer_id, reviewee_id, rating, description, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(review.id.as_uuid())
        .bind(review.tack_id.as_uuid())
        .bind(review.reviewer_id.as_uuid())
        .bind(review.reviewee_id.as_uuid())
        .bind(review.rating)
        .bind(&review.description)
        .bind(review.created_at)
        .execute(&mut **tx)
        .await
        .map_err(|e| {
            if violates(&e, REVIEW_KEY) {
                StoreError::DuplicateReview {
                    tack_id: review.tack_id,
                    reviewer_id: review.reviewer_id,
                }
            } else {
                StoreError::from(e)
            }
        })?;
        Ok(())
    }
}

fn violates(err: &sqlx::Error, constraint: &str) -> bool {
    match err {
        sqlx::Error::Database(db) => db.constraint() == Some(constraint),
        _ => false,
    }
}

fn parse<T: FromStr<Err = String>>(value: &str) -> StoreResult<T> {
    T::from_str(value).map_err(StoreError::Decode)
}

/// Internal struct for SQL query results
#[derive(sqlx::FromRow)]
struct TackRow {
    id: Uuid,
    title: String,
    description: String,
    price: i64,
    status: String,
    tack_type: String,
    allow_counter_offer: bool,
    auto_accept: bool,
    estimation_time_seconds: Option<i64>,
    group_id: Option<Uuid>,
    tacker_id: Uuid,
    runner_id: Option<Uuid>,
    accepted_offer_id: Option<Uuid>,
    created_at: DateTime<Utc>,
    accepted_time: Option<DateTime<Utc>>,
    start_completion_time: Option<DateTime<Utc>>,
    completion_time: Option<DateTime<Utc>>,
    completion_message: Option<String>,
    is_paid: bool,
    is_canceled: bool,
    is_active: bool,
    updated_at: DateTime<Utc>,
    version: i64,
}

impl TryFrom<TackRow> for Tack {
    type Error = StoreError;

    fn try_from(row: TackRow) -> StoreResult<Self> {
        Ok(Tack {
            id: row.id.into(),
            title: row.title,
            description: row.description,
            price: row.price,
            status: parse::<TackStatus>(&row.status)?,
            tack_type: parse::<TackType>(&row.tack_type)?,
            allow_counter_offer: row.allow_counter_offer,
            auto_accept: row.auto_accept,
            estimation_time_seconds: row.estimation_time_seconds,
            group_id: row.group_id.map(GroupId::from),
            tacker_id: row.tacker_id.into(),
            runner_id: row.runner_id.map(UserId::from),
            accepted_offer_id: row.accepted_offer_id.map(OfferId::from),
            created_at: row.created_at,
            accepted_time: row.accepted_time,
            start_completion_time: row.start_completion_time,
            completion_time: row.completion_time,
            completion_message: row.completion_message,
            is_paid: row.is_paid,
            is_canceled: row.is_canceled,
            is_active: row.is_active,
            updated_at: row.updated_at,
            version: row.version,
        })
    }
}

#[derive(sqlx::FromRow)]
struct OfferRow {
    id: Uuid,
    tack_id: Uuid,
    runner_id: Uuid,
    price: Option<i64>,
    offer_type: String,
    status: String,
    lifetime_seconds: i64,
    is_active: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    version: i64,
}

impl TryFrom<OfferRow> for Offer {
    type Error = StoreError;

    fn try_from(row: OfferRow) -> StoreResult<Self> {
        Ok(Offer {
            id: row.id.into(),
            tack_id: row.tack_id.into(),
            runner_id: row.runner_id.into(),
            price: row.price,
            offer_type: parse::<OfferType>(&row.offer_type)?,
            status: parse::<OfferStatus>(&row.status)?,
            lifetime_seconds: row.lifetime_seconds,
            is_active: row.is_active,
            created_at: row.created_at,
            updated_at: row.updated_at,
            version: row.version,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ReviewRow {
    id: Uuid,
    tack_id: Uuid,
    reviewer_id: Uuid,
    reviewee_id: Uuid,
    rating: i16,
    description: String,
    created_at: DateTime<Utc>,
}

impl From<ReviewRow> for Review {
    fn from(row: ReviewRow) -> Self {
        Review {
            id: ReviewId::from(row.id),
            tack_id: row.tack_id.into(),
            reviewer_id: row.reviewer_id.into(),
            reviewee_id: row.reviewee_id.into(),
            rating: row.rating,
            description: row.description,
            created_at: row.created_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct TransitionRow {
    id: Uuid,
    tack_id: Uuid,
    from_state: Option<String>,
    to_state: String,
    event: String,
    actor_id: Option<Uuid>,
    metadata: Value,
    sort_key: i32,
    most_recent: bool,
    created_at: DateTime<Utc>,
}

impl From<TransitionRow> for TackTransition {
    fn from(row: TransitionRow) -> Self {
        TackTransition {
            id: row.id,
            tack_id: row.tack_id.into(),
            from_state: row.from_state,
            to_state: row.to_state,
            event: row.event,
            actor_id: row.actor_id.map(UserId::from),
            metadata: row.metadata,
            sort_key: row.sort_key,
            most_recent: row.most_recent,
            created_at: row.created_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct LedgerRow {
    id: Uuid,
    user_id: Uuid,
    delta: i64,
    reason: String,
    tack_id: Option<Uuid>,
    created_at: DateTime<Utc>,
}

impl TryFrom<LedgerRow> for LedgerEntry {
    type Error = StoreError;

    fn try_from(row: LedgerRow) -> StoreResult<Self> {
        Ok(LedgerEntry {
            id: row.id,
            user_id: row.user_id.into(),
            delta: row.delta,
            reason: parse::<LedgerReason>(&row.reason)?,
            tack_id: row.tack_id.map(TackId::from),
            created_at: row.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct StatsRow {
    tacks_completed_as_tacker: i64,
    tacks_completed_as_runner: i64,
    rating_sum: i64,
    rating_count: i64,
}

fn limit_param(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

#[async_trait]
impl MarketplaceStore for PgStore {
    async fn get_tack(&self, id: TackId) -> StoreResult<Option<Tack>> {
        let query = format!("SELECT {TACK_COLUMNS} FROM tacks WHERE id = $1");
        sqlx::query_as::<_, TackRow>(&query)
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?
            .map(Tack::try_from)
            .transpose()
    }

    async fn get_offer(&self, id: OfferId) -> StoreResult<Option<Offer>> {
        let query = format!("SELECT {OFFER_COLUMNS} FROM offers WHERE id = $1");
        sqlx::query_as::<_, OfferRow>(&query)
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?
            .map(Offer::try_from)
            .transpose()
    }

    async fn list_offers_for_tack(&self, tack_id: TackId) -> StoreResult<Vec<Offer>> {
        let query = format!(
            "SELECT {OFFER_COLUMNS} FROM offers WHERE tack_id = $1 ORDER BY created_at, id"
        );
        sqlx::query_as::<_, OfferRow>(&query)
            .bind(tack_id.as_uuid())
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(Offer::try_from)
            .collect()
    }

    async fn list_group_tacks(&self, group_id: GroupId) -> StoreResult<Vec<Tack>> {
        let query = format!(
            "SELECT {TACK_COLUMNS} FROM tacks \
             WHERE group_id = $1 AND is_active AND NOT is_canceled \
             AND status IN ('created', 'active') ORDER BY created_at DESC"
        );
        sqlx::query_as::<_, TackRow>(&query)
            .bind(group_id.as_uuid())
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(Tack::try_from)
            .collect()
    }

    async fn list_stale_tacks(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> StoreResult<Vec<Tack>> {
        let query = format!(
            "SELECT {TACK_COLUMNS} FROM tacks t \
             WHERE t.status = 'created' AND t.is_active AND NOT t.is_canceled \
             AND t.updated_at < $1 \
             AND NOT EXISTS (SELECT 1 FROM offers o WHERE o.tack_id = t.id AND o.updated_at >= $1) \
             ORDER BY t.updated_at LIMIT $2"
        );
        sqlx::query_as::<_, TackRow>(&query)
            .bind(cutoff)
            .bind(limit_param(limit))
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(Tack::try_from)
            .collect()
    }

    async fn list_overdue_offers(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> StoreResult<Vec<Offer>> {
        let query = format!(
            "SELECT {OFFER_COLUMNS} FROM offers \
             WHERE status = 'created' AND is_active \
             AND created_at + make_interval(secs => lifetime_seconds) <= $1 \
             ORDER BY created_at + make_interval(secs => lifetime_seconds) LIMIT $2"
        );
        sqlx::query_as::<_, OfferRow>(&query)
            .bind(now)
            .bind(limit_param(limit))
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(Offer::try_from)
            .collect()
    }

    async fn list_reviews_for_tack(&self, tack_id: TackId) -> StoreResult<Vec<Review>> {
        let rows = sqlx::query_as::<_, ReviewRow>(
            "SELECT id, tack_id, reviewer_id, reviewee_id, rating, description, created_at \
             FROM reviews WHERE tack_id = $1 ORDER BY created_at",
        )
        .bind(tack_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Review::from).collect())
    }

    async fn list_transitions(&self, tack_id: TackId) -> StoreResult<Vec<TackTransition>> {
        let rows = sqlx::query_as::<_, TransitionRow>(
            "SELECT id, tack_id, from_state, to_state, event, actor_id, metadata, sort_key, \
             most_recent, created_at FROM tack_transitions WHERE tack_id = $1 ORDER BY sort_key",
        )
        .bind(tack_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(TackTransition::from).collect())
    }

    async fn balance(&self, user_id: UserId) -> StoreResult<i64> {
        let balance: Option<i64> =
            sqlx::query_scalar("SELECT balance FROM balances WHERE user_id = $1")
                .bind(user_id.as_uuid())
                .fetch_optional(&self.pool)
                .await?;
        Ok(balance.unwrap_or(0))
    }

    async fn ledger_entries(&self, user_id: UserId) -> StoreResult<Vec<LedgerEntry>> {
        sqlx::query_as::<_, LedgerRow>(
            "SELECT id, user_id, delta, reason, tack_id, created_at FROM ledger_entries \
             WHERE user_id = $1 ORDER BY created_at, id",
        )
        .bind(user_id.as_uuid())
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(LedgerEntry::try_from)
        .collect()
    }

    async fn user_stats(&self, user_id: UserId) -> StoreResult<UserStats> {
        let row = sqlx::query_as::<_, StatsRow>(
            "SELECT tacks_completed_as_tacker, tacks_completed_as_runner, rating_sum, rating_count \
             FROM user_stats WHERE user_id = $1",
        )
        .bind(user_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        Ok(match row {
            Some(row) => UserStats {
                user_id,
                tacks_completed_as_tacker: row.tacks_completed_as_tacker,
                tacks_completed_as_runner: row.tacks_completed_as_runner,
                rating_sum: row.rating_sum,
                rating_count: row.rating_count,
            },
            None => UserStats::empty(user_id),
        })
    }

    #[instrument(skip(self, changes), fields(tacks = changes.tacks.len(), offers = changes.offers.len()))]
    async fn commit(&self, mut changes: ChangeSet) -> StoreResult<CommitReceipt> {
        let mut tx = self.pool.begin().await?;

        let mut locked: HashMap<TackId, Option<Tack>> = HashMap::new();
        for tack_id in changes.guarded_tacks() {
            let tack = Self::lock_tack(&mut tx, tack_id).await?;
            locked.insert(tack_id, tack);
        }
        for guard in &changes.guards {
            let open: Vec<OfferId> = Self::open_offers(&mut tx, guard.tack_id)
                .await?
                .iter()
                .map(|offer| offer.id)
                .collect();
            let tack = locked.get(&guard.tack_id).and_then(Option::as_ref);
            guard.check(tack, &open)?;
        }
        let sweeps = changes.sweeps.clone();
        let mut swept = Vec::new();
        for sweep in &sweeps {
            let open = Self::open_offers(&mut tx, sweep.tack.id).await?;
            swept.extend(sweep.stage(&mut changes, open)?);
        }

        next_versions(&mut changes);

        for write in &changes.tacks {
            Self::write_tack(&mut tx, &write.tack, write.expected_version).await?;
        }
        // deactivations first so a replacement offer never trips the active-offer index
        let (updates, inserts): (Vec<_>, Vec<_>) = changes
            .offers
            .iter()
            .partition(|write| write.expected_version.is_some());
        for write in updates.into_iter().chain(inserts) {
            Self::write_offer(&mut tx, &write.offer, write.expected_version).await?;
        }
        for review in &changes.reviews {
            Self::insert_review(&mut tx, review).await?;
        }

        let mut seen = HashSet::new();
        let tack_ids: Vec<TackId> = changes
            .transitions
            .iter()
            .map(|t| t.tack_id)
            .filter(|id| seen.insert(*id))
            .collect();
        for tack_id in tack_ids {
            let pending: Vec<&TackTransition> = changes
                .transitions
                .iter()
                .filter(|t| t.tack_id == tack_id)
                .collect();
            Self::append_transitions(&mut tx, tack_id, &pending).await?;
        }

        for entry in &changes.ledger {
            Self::apply_ledger_entry(&mut tx, entry).await?;
        }
        for update in &changes.stats {
            Self::apply_stats(&mut tx, update).await?;
        }

        tx.commit().await?;
        debug!("Committed change set");

        Ok(CommitReceipt {
            tacks: changes.tacks.into_iter().map(|w| w.tack).collect(),
            offers: changes.offers.into_iter().map(|w| w.offer).collect(),
            swept,
        })
    }
}

#[async_trait]
impl MembershipDirectory for PgStore {
    async fn is_member(&self, user_id: UserId, group_id: GroupId) -> MarketplaceResult<bool> {
        sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM group_members WHERE group_id = $1 AND user_id = $2)",
        )
        .bind(group_id.as_uuid())
        .bind(user_id.as_uuid())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| MarketplaceError::Database(e.to_string()))
    }
}
