use async_trait::async_trait;
use chrono::{DateTime, Utc};
use microhost_models::{
    ContainerRecord, OrchestratorError, StatusTransition, TransitionAction, TransitionOutcome,
};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::{debug, info, instrument};
use uuid::Uuid;

/// Persistence for desired state and the transition log.
///
/// Desired state follows the runtime: callers write here only after the
/// corresponding runtime mutation has succeeded.
#[async_trait]
pub trait RecordStore: Send + Sync + 'static {
    /// Rejects a second record for the same (user, name) with Conflict.
    async fn save(&self, record: &ContainerRecord) -> Result<Uuid, OrchestratorError>;
    async fn find(
        &self,
        user_id: &str,
        container_name: &str,
    ) -> Result<Option<ContainerRecord>, OrchestratorError>;
    async fn find_by_name(
        &self,
        container_name: &str,
    ) -> Result<Vec<ContainerRecord>, OrchestratorError>;
    /// NotFound when no record matches.
    async fn update_desired_state(
        &self,
        user_id: &str,
        container_name: &str,
        desired_running: bool,
    ) -> Result<(), OrchestratorError>;
    async fn update_image_ref(
        &self,
        user_id: &str,
        container_name: &str,
        image_ref: &str,
    ) -> Result<(), OrchestratorError>;
    /// NotFound when nothing was deleted.
    async fn delete(&self, user_id: &str, container_name: &str) -> Result<(), OrchestratorError>;
    async fn list_by_user(&self, user_id: &str) -> Result<Vec<ContainerRecord>, OrchestratorError>;
    async fn list_all(&self) -> Result<Vec<ContainerRecord>, OrchestratorError>;
    async fn record_transition(&self, entry: &StatusTransition) -> Result<i64, OrchestratorError>;
    /// Most recent first.
    async fn history_for_container(
        &self,
        container_name: &str,
        limit: u32,
    ) -> Result<Vec<StatusTransition>, OrchestratorError>;
    /// Most recent first.
    async fn history_for_user(
        &self,
        user_id: &str,
        limit: u32,
    ) -> Result<Vec<StatusTransition>, OrchestratorError>;
    /// One user's entries for one name, most recent first. `limit` counts
    /// only that user's entries.
    async fn history_for_user_container(
        &self,
        user_id: &str,
        container_name: &str,
        limit: u32,
    ) -> Result<Vec<StatusTransition>, OrchestratorError>;
}

pub struct SqliteRecordStore {
    pool: SqlitePool,
    max_history_per_container: u32,
}

impl SqliteRecordStore {
    pub fn new(pool: SqlitePool, max_history_per_container: u32) -> Self {
        Self {
            pool,
            max_history_per_container,
        }
    }

    /// Opens (creating if needed) the database at `db_url` and runs migrations.
    pub async fn connect(
        db_url: &str,
        max_history_per_container: u32,
    ) -> Result<Self, OrchestratorError> {
        let options = SqliteConnectOptions::from_str(db_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let store = Self::new(pool, max_history_per_container);
        store.migrate().await?;
        info!("Record store ready at {}", db_url);
        Ok(store)
    }

    /// Single-connection in-memory database, for tests and dry runs.
    pub async fn in_memory(max_history_per_container: u32) -> Result<Self, OrchestratorError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;

        let store = Self::new(pool, max_history_per_container);
        store.migrate().await?;
        Ok(store)
    }

    pub async fn migrate(&self) -> Result<(), OrchestratorError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| OrchestratorError::Store {
                reason: format!("migration failed: {e}"),
            })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn record_from_row(row: &SqliteRow) -> Result<ContainerRecord, OrchestratorError> {
    let record_id: String = row.try_get("record_id")?;
    Ok(ContainerRecord {
        record_id: Uuid::parse_str(&record_id).map_err(|e| OrchestratorError::Store {
            reason: format!("corrupt record id {record_id}: {e}"),
        })?,
        user_id: row.try_get("user_id")?,
        container_name: row.try_get("container_name")?,
        image_ref: row.try_get("image_ref")?,
        desired_running: row.try_get("desired_running")?,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
        updated_at: row.try_get::<DateTime<Utc>, _>("updated_at")?,
    })
}

fn transition_from_row(row: &SqliteRow) -> Result<StatusTransition, OrchestratorError> {
    let action: String = row.try_get("action")?;
    let outcome: String = row.try_get("outcome")?;
    let outcome = match outcome.as_str() {
        "success" => TransitionOutcome::Success,
        _ => TransitionOutcome::Failure {
            error: row
                .try_get::<Option<String>, _>("error")?
                .unwrap_or_default(),
        },
    };

    Ok(StatusTransition {
        id: Some(row.try_get("id")?),
        user_id: row.try_get("user_id")?,
        container_name: row.try_get("container_name")?,
        action: TransitionAction::from_str(&action)
            .map_err(|reason| OrchestratorError::Store { reason })?,
        previous_desired: row.try_get("previous_desired")?,
        next_desired: row.try_get("next_desired")?,
        outcome,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
    })
}

const RECORD_COLUMNS: &str =
    "record_id, user_id, container_name, image_ref, desired_running, created_at, updated_at";

const HISTORY_COLUMNS: &str = "id, user_id, container_name, action, previous_desired, next_desired, outcome, error, created_at";

#[async_trait]
impl RecordStore for SqliteRecordStore {
    #[instrument(skip(self, record), fields(user_id = %record.user_id, container_name = %record.container_name))]
    async fn save(&self, record: &ContainerRecord) -> Result<Uuid, OrchestratorError> {
        let result = sqlx::query(
            r#"
            INSERT INTO containers (
                record_id, user_id, container_name, image_ref, desired_running, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(record.record_id.to_string())
        .bind(&record.user_id)
        .bind(&record.container_name)
        .bind(&record.image_ref)
        .bind(record.desired_running)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(record.record_id),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                Err(OrchestratorError::conflict(format!(
                    "record for container {} already exists",
                    record.container_name
                )))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn find(
        &self,
        user_id: &str,
        container_name: &str,
    ) -> Result<Option<ContainerRecord>, OrchestratorError> {
        let query = format!(
            "SELECT {RECORD_COLUMNS} FROM containers WHERE user_id = ? AND container_name = ?"
        );
        let row = sqlx::query(&query)
            .bind(user_id)
            .bind(container_name)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(record_from_row).transpose()
    }

    async fn find_by_name(
        &self,
        container_name: &str,
    ) -> Result<Vec<ContainerRecord>, OrchestratorError> {
        let query = format!(
            "SELECT {RECORD_COLUMNS} FROM containers WHERE container_name = ? ORDER BY created_at"
        );
        let rows = sqlx::query(&query)
            .bind(container_name)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(record_from_row).collect()
    }

    #[instrument(skip(self))]
    async fn update_desired_state(
        &self,
        user_id: &str,
        container_name: &str,
        desired_running: bool,
    ) -> Result<(), OrchestratorError> {
        let result = sqlx::query(
            "UPDATE containers SET desired_running = ?, updated_at = ? WHERE user_id = ? AND container_name = ?",
        )
        .bind(desired_running)
        .bind(Utc::now())
        .bind(user_id)
        .bind(container_name)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(OrchestratorError::record_not_found(container_name));
        }
        Ok(())
    }

    async fn update_image_ref(
        &self,
        user_id: &str,
        container_name: &str,
        image_ref: &str,
    ) -> Result<(), OrchestratorError> {
        let result = sqlx::query(
            "UPDATE containers SET image_ref = ?, updated_at = ? WHERE user_id = ? AND container_name = ?",
        )
        .bind(image_ref)
        .bind(Utc::now())
        .bind(user_id)
        .bind(container_name)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(OrchestratorError::record_not_found(container_name));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete(&self, user_id: &str, container_name: &str) -> Result<(), OrchestratorError> {
        let result = sqlx::query("DELETE FROM containers WHERE user_id = ? AND container_name = ?")
            .bind(user_id)
            .bind(container_name)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(OrchestratorError::record_not_found(container_name));
        }
        Ok(())
    }

    async fn list_by_user(&self, user_id: &str) -> Result<Vec<ContainerRecord>, OrchestratorError> {
        let query = format!(
            "SELECT {RECORD_COLUMNS} FROM containers WHERE user_id = ? ORDER BY container_name"
        );
        let rows = sqlx::query(&query)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(record_from_row).collect()
    }

    async fn list_all(&self) -> Result<Vec<ContainerRecord>, OrchestratorError> {
        let query = format!("SELECT {RECORD_COLUMNS} FROM containers ORDER BY created_at");
        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;

        rows.iter().map(record_from_row).collect()
    }

    async fn record_transition(&self, entry: &StatusTransition) -> Result<i64, OrchestratorError> {
        let (outcome, error) = match &entry.outcome {
            TransitionOutcome::Success => ("success", None),
            TransitionOutcome::Failure { error } => ("failure", Some(error.as_str())),
        };

        let mut tx = self.pool.begin().await?;

        let id = sqlx::query(
            r#"
            INSERT INTO history (
                user_id, container_name, action, previous_desired, next_desired, outcome, error, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&entry.user_id)
        .bind(&entry.container_name)
        .bind(entry.action.as_str())
        .bind(entry.previous_desired)
        .bind(entry.next_desired)
        .bind(outcome)
        .bind(error)
        .bind(entry.created_at)
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();

        let pruned = sqlx::query(
            r#"
            DELETE FROM history
            WHERE container_name = ?
              AND id NOT IN (
                SELECT id FROM history WHERE container_name = ? ORDER BY id DESC LIMIT ?
              )
            "#,
        )
        .bind(&entry.container_name)
        .bind(&entry.container_name)
        .bind(self.max_history_per_container as i64)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        tx.commit().await?;

        if pruned > 0 {
            debug!(
                "Pruned {} history entries for {}",
                pruned, entry.container_name
            );
        }
        Ok(id)
    }

    async fn history_for_container(
        &self,
        container_name: &str,
        limit: u32,
    ) -> Result<Vec<StatusTransition>, OrchestratorError> {
        let query = format!(
            "SELECT {HISTORY_COLUMNS} FROM history WHERE container_name = ? ORDER BY id DESC LIMIT ?"
        );
        let rows = sqlx::query(&query)
            .bind(container_name)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(transition_from_row).collect()
    }

    async fn history_for_user(
        &self,
        user_id: &str,
        limit: u32,
    ) -> Result<Vec<StatusTransition>, OrchestratorError> {
        let query = format!(
            "SELECT {HISTORY_COLUMNS} FROM history WHERE user_id = ? ORDER BY id DESC LIMIT ?"
        );
        let rows = sqlx::query(&query)
            .bind(user_id)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(transition_from_row).collect()
    }

    async fn history_for_user_container(
        &self,
        user_id: &str,
        container_name: &str,
        limit: u32,
    ) -> Result<Vec<StatusTransition>, OrchestratorError> {
        let query = format!(
            "SELECT {HISTORY_COLUMNS} FROM history WHERE user_id = ? AND container_name = ? ORDER BY id DESC LIMIT ?"
        );
        let rows = sqlx::query(&query)
            .bind(user_id)
            .bind(container_name)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(transition_from_row).collect()
    }
}
