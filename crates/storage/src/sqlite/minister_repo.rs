use async_trait::async_trait;
use trust_core::model::{MinisterStatus, UserId};

use super::SqliteRepository;
use super::mapping::{conn, map_minister_row};
use crate::repository::{MinisterDirectory, MinisterProfileRepository, StorageError};

#[async_trait]
impl MinisterDirectory for SqliteRepository {
    async fn minister_status(
        &self,
        user_id: UserId,
    ) -> Result<Option<MinisterStatus>, StorageError> {
        let row = sqlx::query(
            r"
                SELECT is_minister, minister_name, certificate_url
                FROM minister_profiles
                WHERE user_id = ?1
            ",
        )
        .bind(user_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(conn)?;

        row.as_ref().map(map_minister_row).transpose()
    }
}

#[async_trait]
impl MinisterProfileRepository for SqliteRepository {
    async fn save_minister_status(
        &self,
        user_id: UserId,
        status: &MinisterStatus,
    ) -> Result<(), StorageError> {
        sqlx::query(
            r"
                INSERT INTO minister_profiles (user_id, is_minister, minister_name, certificate_url)
                VALUES (?1, ?2, ?3, ?4)
                ON CONFLICT(user_id) DO UPDATE SET
                    is_minister = excluded.is_minister,
                    minister_name = excluded.minister_name,
                    certificate_url = excluded.certificate_url
            ",
        )
        .bind(user_id.to_string())
        .bind(status.is_minister)
        .bind(status.minister_name.as_deref())
        .bind(status.certificate_url.as_ref().map(url::Url::as_str))
        .execute(&self.pool)
        .await
        .map_err(conn)?;

        Ok(())
    }
}
