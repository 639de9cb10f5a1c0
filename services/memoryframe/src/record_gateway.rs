use crate::config::DatabaseConfig;
use crate::error::{FrameError, FrameResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::FromRow;
use tracing::{debug, info, instrument};
use uuid::Uuid;

#[cfg(test)]
use mockall::automock;

/// A stored memory frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Frame {
    /// Identifier assigned by the store
    pub id: i64,
    /// Owner, taken from the session at creation
    pub user_id: Uuid,
    pub title: String,
    pub description: String,
    /// Public URL of the photo asset
    pub photo_url: String,
    /// Public URL of the video asset
    pub video_url: String,
    /// When the record was created
    pub created_at: DateTime<Utc>,
}

/// Row written by [`FrameRecords::insert`]
#[derive(Debug, Clone, PartialEq)]
pub struct NewFrameRecord {
    pub user_id: Uuid,
    pub title: String,
    pub description: String,
    pub photo_url: String,
    pub video_url: String,
}

/// Row insert and query against the frames table
#[cfg_attr(test, automock)]
#[async_trait]
pub trait FrameRecords: Send + Sync {
    /// Append one row and return it as stored
    async fn insert(&self, record: NewFrameRecord) -> FrameResult<Frame>;

    /// Frames owned by `user_id`, newest first
    async fn list_by_user(&self, user_id: Uuid) -> FrameResult<Vec<Frame>>;

    /// Exactly one frame, or `NotFound`
    async fn get_by_id(&self, id: &str) -> FrameResult<Frame>;
}

/// Frame records in PostgreSQL
pub struct PgFrameStore {
    pool: PgPool,
}

impl PgFrameStore {
    /// Create a new store with connection pool
    pub async fn new(config: &DatabaseConfig) -> FrameResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.connect_timeout())
            .idle_timeout(Some(config.idle_timeout()))
            .connect(&config.url)
            .await?;

        info!("Connected to PostgreSQL database");

        Ok(Self { pool })
    }

    /// Wrap an existing pool
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run database migrations
    pub async fn run_migrations(&self) -> FrameResult<()> {
        info!("Running database migrations");

        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(FrameError::persistence)?;

        info!("Database migrations completed");
        Ok(())
    }

    /// Get the connection pool (for health checks)
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl FrameRecords for PgFrameStore {
    #[instrument(skip(self, record), fields(user_id = %record.user_id))]
    async fn insert(&self, record: NewFrameRecord) -> FrameResult<Frame> {
        let frame = sqlx::query_as::<_, Frame>(
            r#"
            INSERT INTO memory_frames (
                user_id, title, description, photo_url, video_url
            ) VALUES (
                $1, $2, $3, $4, $5
            )
            RETURNING id, user_id, title, description, photo_url, video_url, created_at
            "#,
        )
        .bind(record.user_id)
        .bind(&record.title)
        .bind(&record.description)
        .bind(&record.photo_url)
        .bind(&record.video_url)
        .fetch_one(&self.pool)
        .await?;

        debug!(frame_id = frame.id, "Frame record inserted");

        Ok(frame)
    }

    #[instrument(skip(self))]
    async fn list_by_user(&self, user_id: Uuid) -> FrameResult<Vec<Frame>> {
        let frames = sqlx::query_as::<_, Frame>(
            r#"
            SELECT id, user_id, title, description, photo_url, video_url, created_at
            FROM memory_frames
            WHERE user_id = $1
            ORDER BY created_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(frames)
    }

    #[instrument(skip(self))]
    async fn get_by_id(&self, id: &str) -> FrameResult<Frame> {
        // Identity column: anything that is not an integer names no row.
        let Ok(frame_id) = id.parse::<i64>() else {
            debug!("Identifier is not a frame id");
            return Err(FrameError::not_found(id));
        };

        let mut frames = sqlx::query_as::<_, Frame>(
            r#"
            SELECT id, user_id, title, description, photo_url, video_url, created_at
            FROM memory_frames
            WHERE id = $1
            LIMIT 2
            "#,
        )
        .bind(frame_id)
        .fetch_all(&self.pool)
        .await?;

        single_frame(id, &mut frames)
    }
}

/// Enforce exactly-one semantics on a by-id query result
fn single_frame(id: &str, frames: &mut Vec<Frame>) -> FrameResult<Frame> {
    match frames.len() {
        0 => Err(FrameError::not_found(id)),
        1 => Ok(frames.remove(0)),
        n => Err(FrameError::persistence(DuplicateFrameId {
            id: id.to_string(),
            rows: n,
        })),
    }
}

/// More than one row matched a frame id
#[derive(Debug, thiserror::Error)]
#[error("{rows} rows share frame id {id}")]
pub struct DuplicateFrameId {
    pub id: String,
    pub rows: usize,
}
