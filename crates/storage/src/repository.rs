use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use trust_core::model::{CourseId, MinisterStatus, UserId, UserProgress};

/// Errors surfaced by storage adapters.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    #[error("not found")]
    NotFound,

    #[error("conflict")]
    Conflict,

    #[error("connection error: {0}")]
    Connection(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Repository contract for per-(user, course) progress rows.
#[async_trait]
pub trait ProgressRepository: Send + Sync {
    /// Fetch the row for a user and course.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the row cannot be read or decoded. A missing
    /// row is `Ok(None)`.
    async fn get_progress(
        &self,
        user_id: UserId,
        course_id: &CourseId,
    ) -> Result<Option<UserProgress>, StorageError>;

    /// Insert or wholesale-replace the row keyed on (user, course).
    ///
    /// The caller's `version` is ignored; the stored version is bumped and
    /// returned.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the row cannot be stored.
    async fn upsert_progress(&self, progress: &UserProgress) -> Result<u64, StorageError>;

    /// Replace the row only if the stored version equals `progress.version()`.
    ///
    /// Version 0 means the row must not exist yet.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Conflict` when the stored version differs, or
    /// other storage errors.
    async fn update_progress_if_version(&self, progress: &UserProgress)
    -> Result<u64, StorageError>;
}

/// Read-only lookup of minister verification by user.
#[async_trait]
pub trait MinisterDirectory: Send + Sync {
    /// # Errors
    ///
    /// Returns `StorageError` if the lookup fails. No record is `Ok(None)`.
    async fn minister_status(&self, user_id: UserId)
    -> Result<Option<MinisterStatus>, StorageError>;
}

/// Write side of the minister profile table, used by admin tooling.
#[async_trait]
pub trait MinisterProfileRepository: Send + Sync {
    /// # Errors
    ///
    /// Returns `StorageError` if the profile cannot be stored.
    async fn save_minister_status(
        &self,
        user_id: UserId,
        status: &MinisterStatus,
    ) -> Result<(), StorageError>;
}

type ProgressKey = (UserId, CourseId);

/// Simple in-memory repository implementation for testing and prototyping.
#[derive(Clone, Default)]
pub struct InMemoryRepository {
    progress: Arc<Mutex<HashMap<ProgressKey, UserProgress>>>,
    ministers: Arc<Mutex<HashMap<UserId, MinisterStatus>>>,
}

impl InMemoryRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn store(
        &self,
        progress: &UserProgress,
        expected: Option<u64>,
    ) -> Result<u64, StorageError> {
        let mut guard = self
            .progress
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        let key = (progress.user_id(), progress.course_id().clone());
        let stored = guard.get(&key).map_or(0, UserProgress::version);
        if let Some(expected) = expected {
            if expected != stored {
                return Err(StorageError::Conflict);
            }
        }
        let version = stored + 1;
        let mut row = progress.clone();
        row.set_version(version);
        guard.insert(key, row);
        Ok(version)
    }
}

#[async_trait]
impl ProgressRepository for InMemoryRepository {
    async fn get_progress(
        &self,
        user_id: UserId,
        course_id: &CourseId,
    ) -> Result<Option<UserProgress>, StorageError> {
        let guard = self
            .progress
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(guard.get(&(user_id, course_id.clone())).cloned())
    }

    async fn upsert_progress(&self, progress: &UserProgress) -> Result<u64, StorageError> {
        self.store(progress, None)
    }

    async fn update_progress_if_version(
        &self,
        progress: &UserProgress,
    ) -> Result<u64, StorageError> {
        self.store(progress, Some(progress.version()))
    }
}

#[async_trait]
impl MinisterDirectory for InMemoryRepository {
    async fn minister_status(
        &self,
        user_id: UserId,
    ) -> Result<Option<MinisterStatus>, StorageError> {
        let guard = self
            .ministers
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(guard.get(&user_id).cloned())
    }
}

#[async_trait]
impl MinisterProfileRepository for InMemoryRepository {
    async fn save_minister_status(
        &self,
        user_id: UserId,
        status: &MinisterStatus,
    ) -> Result<(), StorageError> {
        let mut guard = self
            .ministers
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        guard.insert(user_id, status.clone());
        Ok(())
    }
}

/// Aggregates repositories behind trait objects for easy backend swapping.
#[derive(Clone)]
pub struct Storage {
    pub progress: Arc<dyn ProgressRepository>,
    pub minister_directory: Arc<dyn MinisterDirectory>,
    pub minister_profiles: Arc<dyn MinisterProfileRepository>,
}

impl Storage {
    #[must_use]
    pub fn in_memory() -> Self {
        let repo = InMemoryRepository::new();
        let progress: Arc<dyn ProgressRepository> = Arc::new(repo.clone());
        let minister_directory: Arc<dyn MinisterDirectory> = Arc::new(repo.clone());
        let minister_profiles: Arc<dyn MinisterProfileRepository> = Arc::new(repo);
        Self {
            progress,
            minister_directory,
            minister_profiles,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use trust_core::model::{StepKey, StepNumber};

    fn row() -> UserProgress {
        UserProgress::new(UserId::random(), CourseId::new("trust-formation").unwrap())
    }

    #[tokio::test]
    async fn upsert_bumps_version_and_replaces_row() {
        let repo = InMemoryRepository::new();
        let mut progress = row();
        assert_eq!(repo.upsert_progress(&progress).await.unwrap(), 1);

        progress.complete_step(StepNumber::FIRST);
        progress.set_step_data(StepKey::new("identity").unwrap(), json!({"fullName": "Jane"}));
        assert_eq!(repo.upsert_progress(&progress).await.unwrap(), 2);

        let fetched = repo
            .get_progress(progress.user_id(), progress.course_id())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fetched.version(), 2);
        assert_eq!(fetched.current_step(), StepNumber::new(2).unwrap());
        assert_eq!(fetched.step_data().len(), 1);
    }

    #[tokio::test]
    async fn conditional_update_rejects_stale_version() {
        let repo = InMemoryRepository::new();
        let mut progress = row();
        let v1 = repo.update_progress_if_version(&progress).await.unwrap();
        assert_eq!(v1, 1);

        // second insert-if-absent with version 0 is stale
        assert!(matches!(
            repo.update_progress_if_version(&progress).await,
            Err(StorageError::Conflict)
        ));

        progress.set_version(v1);
        assert_eq!(repo.update_progress_if_version(&progress).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn minister_profiles_round_trip() {
        let repo = InMemoryRepository::new();
        let user = UserId::random();
        assert!(repo.minister_status(user).await.unwrap().is_none());

        let status = MinisterStatus::verified("Rev. Jane", None);
        repo.save_minister_status(user, &status).await.unwrap();
        assert_eq!(repo.minister_status(user).await.unwrap(), Some(status));
    }
}
