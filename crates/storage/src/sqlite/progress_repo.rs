use async_trait::async_trait;
use sqlx::Row;
use trust_core::model::{CourseId, UserId, UserProgress};

use super::SqliteRepository;
use super::mapping::{
    conn, encode_completed, encode_step_data, map_progress_row, ser, version_from_i64,
    version_to_i64,
};
use crate::repository::{ProgressRepository, StorageError};

struct ProgressColumns {
    user_id: String,
    course_id: String,
    current_step: i64,
    completed_steps: String,
    step_data: String,
    is_complete: bool,
    updated_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl ProgressColumns {
    fn encode(progress: &UserProgress) -> Result<Self, StorageError> {
        Ok(Self {
            user_id: progress.user_id().to_string(),
            course_id: progress.course_id().as_str().to_owned(),
            current_step: i64::from(progress.current_step().value()),
            completed_steps: encode_completed(progress.completed_steps())?,
            step_data: encode_step_data(progress.step_data())?,
            is_complete: progress.is_complete(),
            updated_at: progress.updated_at(),
        })
    }
}

fn returned_version(row: &sqlx::sqlite::SqliteRow) -> Result<u64, StorageError> {
    version_from_i64(row.try_get::<i64, _>("version").map_err(ser)?)
}

#[async_trait]
impl ProgressRepository for SqliteRepository {
    async fn get_progress(
        &self,
        user_id: UserId,
        course_id: &CourseId,
    ) -> Result<Option<UserProgress>, StorageError> {
        let row = sqlx::query(
            r"
                SELECT
                    user_id, course_id, current_step, completed_steps,
                    step_data, is_complete, version, updated_at
                FROM user_progress
                WHERE user_id = ?1 AND course_id = ?2
            ",
        )
        .bind(user_id.to_string())
        .bind(course_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(conn)?;

        row.as_ref().map(map_progress_row).transpose()
    }

    async fn upsert_progress(&self, progress: &UserProgress) -> Result<u64, StorageError> {
        let cols = ProgressColumns::encode(progress)?;
        let row = sqlx::query(
            r"
                INSERT INTO user_progress (
                    user_id, course_id, current_step, completed_steps,
                    step_data, is_complete, version, updated_at
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1, ?7)
                ON CONFLICT(user_id, course_id) DO UPDATE SET
                    current_step = excluded.current_step,
                    completed_steps = excluded.completed_steps,
                    step_data = excluded.step_data,
                    is_complete = excluded.is_complete,
                    version = user_progress.version + 1,
                    updated_at = excluded.updated_at
                RETURNING version
            ",
        )
        .bind(cols.user_id)
        .bind(cols.course_id)
        .bind(cols.current_step)
        .bind(cols.completed_steps)
        .bind(cols.step_data)
        .bind(cols.is_complete)
        .bind(cols.updated_at)
        .fetch_one(&self.pool)
        .await
        .map_err(conn)?;

        returned_version(&row)
    }

    async fn update_progress_if_version(
        &self,
        progress: &UserProgress,
    ) -> Result<u64, StorageError> {
        let cols = ProgressColumns::encode(progress)?;
        let row = if progress.version() == 0 {
            sqlx::query(
                r"
                    INSERT INTO user_progress (
                        user_id, course_id, current_step, completed_steps,
                        step_data, is_complete, version, updated_at
                    )
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1, ?7)
                    ON CONFLICT(user_id, course_id) DO NOTHING
                    RETURNING version
                ",
            )
            .bind(cols.user_id)
            .bind(cols.course_id)
            .bind(cols.current_step)
            .bind(cols.completed_steps)
            .bind(cols.step_data)
            .bind(cols.is_complete)
            .bind(cols.updated_at)
            .fetch_optional(&self.pool)
            .await
            .map_err(conn)?
        } else {
            sqlx::query(
                r"
                    UPDATE user_progress SET
                        current_step = ?3,
                        completed_steps = ?4,
                        step_data = ?5,
                        is_complete = ?6,
                        version = version + 1,
                        updated_at = ?7
                    WHERE user_id = ?1 AND course_id = ?2 AND version = ?8
                    RETURNING version
                ",
            )
            .bind(cols.user_id)
            .bind(cols.course_id)
            .bind(cols.current_step)
            .bind(cols.completed_steps)
            .bind(cols.step_data)
            .bind(cols.is_complete)
            .bind(cols.updated_at)
            .bind(version_to_i64(progress.version())?)
            .fetch_optional(&self.pool)
            .await
            .map_err(conn)?
        };

        match row {
            Some(row) => returned_version(&row),
            None => {
                tracing::debug!(
                    user_id = %progress.user_id(),
                    course_id = %progress.course_id(),
                    expected = progress.version(),
                    "conditional progress write lost the race"
                );
                Err(StorageError::Conflict)
            }
        }
    }
}
