use std::sync::Arc;

use storage::repository::{MinisterDirectory, MinisterProfileRepository, Storage};
use trust_core::model::{CourseConfig, CourseId, UserId};

use crate::Clock;
use crate::error::AppServicesError;
use crate::minister::{MinisterStatusService, RpcMinisterConfig, RpcMinisterDirectory};
use crate::notify::Notifier;
use crate::progress::{ControllerDeps, ControllerSettings, ProgressController};
use crate::workflow::WorkflowEngine;

/// Knobs the entry point passes when assembling services.
#[derive(Clone, Debug, Default)]
pub struct ServiceOptions {
    pub clock: Clock,
    pub settings: ControllerSettings,
    pub courses: Vec<CourseConfig>,
    /// When set, minister status is read over HTTP instead of from storage.
    pub minister_rpc: Option<RpcMinisterConfig>,
}

/// Assembles app-facing services. Built once by the entry point and passed
/// down; nothing here is a global.
#[derive(Clone)]
pub struct AppServices {
    storage: Storage,
    ministers: Arc<MinisterStatusService>,
    notifier: Arc<dyn Notifier>,
    clock: Clock,
    settings: ControllerSettings,
    courses: Vec<CourseConfig>,
}

impl AppServices {
    /// Build services backed by `SQLite` storage.
    ///
    /// # Errors
    ///
    /// Returns `AppServicesError` if storage initialization fails or the
    /// minister RPC endpoint is invalid.
    pub async fn new_sqlite(
        db_url: &str,
        options: ServiceOptions,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self, AppServicesError> {
        let storage = Storage::sqlite(db_url).await?;
        Self::new(storage, options, notifier)
    }

    /// Build services over an already-constructed storage.
    ///
    /// # Errors
    ///
    /// Returns `AppServicesError::MinisterRpc` if the RPC endpoint is invalid.
    pub fn new(
        storage: Storage,
        options: ServiceOptions,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self, AppServicesError> {
        let directory: Arc<dyn MinisterDirectory> = match options.minister_rpc {
            Some(config) => Arc::new(RpcMinisterDirectory::new(config)?),
            None => Arc::clone(&storage.minister_directory),
        };

        Ok(Self {
            storage,
            ministers: Arc::new(MinisterStatusService::new(directory)),
            notifier,
            clock: options.clock,
            settings: options.settings,
            courses: options.courses,
        })
    }

    /// Configured course by id.
    ///
    /// # Errors
    ///
    /// Returns `AppServicesError::UnknownCourse` if no course has that id.
    pub fn course(&self, course_id: &CourseId) -> Result<&CourseConfig, AppServicesError> {
        self.courses
            .iter()
            .find(|course| course.id() == course_id)
            .ok_or_else(|| AppServicesError::UnknownCourse(course_id.to_string()))
    }

    #[must_use]
    pub fn courses(&self) -> &[CourseConfig] {
        &self.courses
    }

    /// # Errors
    ///
    /// Returns `AppServicesError::UnknownCourse` if no course has that id.
    pub fn workflow(&self, course_id: &CourseId) -> Result<WorkflowEngine, AppServicesError> {
        self.course(course_id).cloned().map(WorkflowEngine::new)
    }

    /// A fresh controller for one user in one course.
    ///
    /// # Errors
    ///
    /// Returns `AppServicesError::UnknownCourse` if no course has that id.
    pub fn controller(
        &self,
        user_id: UserId,
        course_id: &CourseId,
    ) -> Result<ProgressController, AppServicesError> {
        let total_steps = self.course(course_id)?.total_steps();
        Ok(ProgressController::new(
            user_id,
            course_id.clone(),
            total_steps,
            self.controller_deps(),
        ))
    }

    #[must_use]
    pub fn controller_deps(&self) -> ControllerDeps {
        ControllerDeps {
            repo: Arc::clone(&self.storage.progress),
            ministers: Arc::clone(&self.ministers),
            notifier: Arc::clone(&self.notifier),
            clock: self.clock,
            settings: self.settings,
        }
    }

    #[must_use]
    pub fn ministers(&self) -> Arc<MinisterStatusService> {
        Arc::clone(&self.ministers)
    }

    #[must_use]
    pub fn minister_profiles(&self) -> Arc<dyn MinisterProfileRepository> {
        Arc::clone(&self.storage.minister_profiles)
    }
}
