use boardwatch_core::error::AppError;
use boardwatch_core::models::{Candidate, Listing};
use boardwatch_core::traits::{ListingRun, ListingStore};
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Pool, Postgres, Transaction};

const LISTING_COLUMNS: &str = "id, external_id, title, price, volume, length, weight, description, link, removed, first_seen_at, last_seen_at";

/// Repository for the listing catalog in PostgreSQL.
#[derive(Clone)]
pub struct ListingRepository {
    pool: Pool<Postgres>,
}

impl ListingRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get a listing by the source site's id.
    pub async fn get(&self, external_id: i64) -> Result<Option<Listing>, AppError> {
        let row = sqlx::query_as::<_, ListingRow>(&format!(
            "SELECT {LISTING_COLUMNS} FROM listings WHERE external_id = $1"
        ))
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(row.map(Into::into))
    }

    /// Listings newest first. Removed listings are included only when asked.
    pub async fn list(&self, include_removed: bool, limit: usize) -> Result<Vec<Listing>, AppError> {
        let rows = sqlx::query_as::<_, ListingRow>(&format!(
            r#"
            SELECT {LISTING_COLUMNS}
            FROM listings
            WHERE $1 OR removed = FALSE
            ORDER BY first_seen_at DESC, id DESC
            LIMIT $2
            "#
        ))
        .bind(include_removed)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    /// Count listings by removed state.
    pub async fn count(&self, removed: bool) -> Result<i64, AppError> {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM listings WHERE removed = $1")
            .bind(removed)
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)
    }

    /// Check database connectivity.
    pub async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }
}

impl ListingStore for ListingRepository {
    type Run = PgListingRun;

    async fn begin_run(&self) -> Result<PgListingRun, AppError> {
        let tx = self.pool.begin().await.map_err(db_err)?;
        Ok(PgListingRun { tx })
    }
}

/// One run's transaction. Every per-listing statement runs inside its own
/// savepoint, so a failed row does not abort the surrounding transaction.
pub struct PgListingRun {
    tx: Transaction<'static, Postgres>,
}

impl ListingRun for PgListingRun {
    async fn mark_all_removed(&mut self) -> Result<u64, AppError> {
        let result = sqlx::query("UPDATE listings SET removed = TRUE")
            .execute(&mut *self.tx)
            .await
            .map_err(db_err)?;
        Ok(result.rows_affected())
    }

    async fn find_by_external_id(&mut self, external_id: i64) -> Result<Option<Listing>, AppError> {
        let mut savepoint = sqlx::Connection::begin(&mut *self.tx)
            .await
            .map_err(db_err)?;
        let result = sqlx::query_as::<_, ListingRow>(&format!(
            "SELECT {LISTING_COLUMNS} FROM listings WHERE external_id = $1"
        ))
        .bind(external_id)
        .fetch_optional(&mut *savepoint)
        .await;

        let row = settle(savepoint, result).await.map_err(db_err)?;
        Ok(row.map(Into::into))
    }

    async fn insert(&mut self, candidate: &Candidate) -> Result<i64, AppError> {
        let mut savepoint = sqlx::Connection::begin(&mut *self.tx)
            .await
            .map_err(db_err)?;
        let result = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO listings (external_id, title, price, volume, length, weight, description, link)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING id
            "#,
        )
        .bind(candidate.external_id)
        .bind(&candidate.title)
        .bind(candidate.price)
        .bind(candidate.volume)
        .bind(candidate.length)
        .bind(candidate.weight)
        .bind(&candidate.description)
        .bind(&candidate.link)
        .fetch_one(&mut *savepoint)
        .await;

        settle(savepoint, result).await.map_err(|e| {
            let unique = e
                .as_database_error()
                .is_some_and(|d| d.is_unique_violation());
            if unique {
                AppError::ConstraintViolation(format!(
                    "external_id {} already exists",
                    candidate.external_id
                ))
            } else {
                db_err(e)
            }
        })
    }

    async fn update(&mut self, candidate: &Candidate, removed: bool) -> Result<i64, AppError> {
        let mut savepoint = sqlx::Connection::begin(&mut *self.tx)
            .await
            .map_err(db_err)?;
        let result = sqlx::query_scalar::<_, i64>(
            r#"
            UPDATE listings
            SET title = $1, price = $2, volume = $3, length = $4, weight = $5,
                description = $6, link = $7, removed = $8, last_seen_at = NOW()
            WHERE external_id = $9
            RETURNING id
            "#,
        )
        .bind(&candidate.title)
        .bind(candidate.price)
        .bind(candidate.volume)
        .bind(candidate.length)
        .bind(candidate.weight)
        .bind(&candidate.description)
        .bind(&candidate.link)
        .bind(removed)
        .bind(candidate.external_id)
        .fetch_optional(&mut *savepoint)
        .await;

        settle(savepoint, result)
            .await
            .map_err(db_err)?
            .ok_or_else(|| AppError::NotFound(format!("listing {}", candidate.external_id)))
    }

    async fn count_removed(&mut self) -> Result<u64, AppError> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM listings WHERE removed")
            .fetch_one(&mut *self.tx)
            .await
            .map_err(db_err)?;
        Ok(count as u64)
    }

    async fn commit(self) -> Result<(), AppError> {
        self.tx.commit().await.map_err(db_err)
    }

    async fn rollback(self) -> Result<(), AppError> {
        self.tx.rollback().await.map_err(db_err)
    }
}

/// Release the savepoint on success, roll back to it on failure.
async fn settle<T>(
    savepoint: Transaction<'_, Postgres>,
    result: Result<T, sqlx::Error>,
) -> Result<T, sqlx::Error> {
    match result {
        Ok(value) => {
            savepoint.commit().await?;
            Ok(value)
        }
        Err(e) => {
            if let Err(rollback_err) = savepoint.rollback().await {
                tracing::warn!(error = %rollback_err, "Rollback to savepoint failed");
            }
            Err(e)
        }
    }
}

fn db_err(e: sqlx::Error) -> AppError {
    AppError::DatabaseError(e.to_string())
}

// -- Internal row type for sqlx deserialization --

#[derive(sqlx::FromRow)]
struct ListingRow {
    id: i64,
    external_id: i64,
    title: String,
    price: Option<f64>,
    volume: Option<f64>,
    length: Option<f64>,
    weight: Option<f64>,
    description: String,
    link: String,
    removed: bool,
    first_seen_at: DateTime<Utc>,
    last_seen_at: DateTime<Utc>,
}

impl From<ListingRow> for Listing {
    fn from(row: ListingRow) -> Self {
        Listing {
            id: row.id,
            external_id: row.external_id,
            title: row.title,
            price: row.price,
            volume: row.volume,
            length: row.length,
            weight: row.weight,
            description: row.description,
            link: row.link,
            removed: row.removed,
            first_seen_at: row.first_seen_at,
            last_seen_at: row.last_seen_at,
        }
    }
}
