use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use storage::repository::{ProgressRepository, StorageError};
use tokio::task::JoinHandle;
use trust_core::Clock;
use trust_core::model::{CourseId, MinisterStatus, StepKey, StepNumber, UserId, UserProgress};

use super::step::StepHandle;
use crate::error::ProgressServiceError;
use crate::minister::MinisterStatusService;
use crate::notify::{Notice, Notifier};

/// Quiet period before a debounced save is written.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(1000);

/// How writes reconcile with rows changed by other sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConcurrencyMode {
    /// Whole-row upsert; a concurrent session's changes are overwritten.
    #[default]
    LastWriterWins,
    /// Conditional write on the row version; stale writes are rejected.
    Versioned,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerSettings {
    pub debounce: Duration,
    pub concurrency: ConcurrencyMode,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            debounce: DEFAULT_DEBOUNCE,
            concurrency: ConcurrencyMode::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveMode {
    /// Coalesce with other debounced saves; write after the quiet period.
    Debounced,
    /// Cancel any pending debounced save and write before returning.
    Immediate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    /// A debounced write is pending.
    Scheduled,
    /// The row was written; `version` is the store's new row version.
    Persisted { version: u64 },
    /// Another write was in flight, so this one was skipped.
    Dropped,
}

/// Progress row plus the minister projection shown beside it.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressSnapshot {
    pub progress: UserProgress,
    pub minister: MinisterStatus,
}

/// Collaborators shared by every controller an app builds.
#[derive(Clone)]
pub struct ControllerDeps {
    pub repo: Arc<dyn ProgressRepository>,
    pub ministers: Arc<MinisterStatusService>,
    pub notifier: Arc<dyn Notifier>,
    pub clock: Clock,
    pub settings: ControllerSettings,
}

#[derive(Default)]
struct State {
    progress: Option<UserProgress>,
    minister: MinisterStatus,
}

/// Result the debounce timer hands back; `None` when the controller was gone.
type TimerResult = Option<Result<SaveOutcome, ProgressServiceError>>;

struct PendingSave {
    timer: JoinHandle<TimerResult>,
    fired: Arc<AtomicBool>,
}

struct Shared {
    user_id: UserId,
    course_id: CourseId,
    total_steps: u32,
    deps: ControllerDeps,
    state: Mutex<State>,
    in_flight: Arc<AtomicBool>,
    pending: Mutex<Option<PendingSave>>,
}

/// Clears the in-flight flag when the write finishes or is abandoned.
struct InFlightGuard(Arc<AtomicBool>);

impl InFlightGuard {
    fn acquire(flag: &Arc<AtomicBool>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(Arc::clone(flag)))
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

async fn write_row(
    repo: &dyn ProgressRepository,
    mode: ConcurrencyMode,
    row: &UserProgress,
) -> Result<u64, StorageError> {
    match mode {
        ConcurrencyMode::LastWriterWins => repo.upsert_progress(row).await,
        ConcurrencyMode::Versioned => repo.update_progress_if_version(row).await,
    }
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn pending(&self) -> MutexGuard<'_, Option<PendingSave>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn cancel_pending(&self) {
        if let Some(pending) = self.pending().take() {
            pending.timer.abort();
        }
    }

    /// Applies the result of a write to the in-memory row and reports failures.
    fn finish(
        &self,
        row: &UserProgress,
        result: Result<u64, StorageError>,
    ) -> Result<SaveOutcome, ProgressServiceError> {
        match result {
            Ok(version) => {
                if let Some(current) = self.state().progress.as_mut() {
                    if current.is_same_row(row) {
                        current.set_version(version);
                    }
                }
                tracing::debug!(
                    user_id = %self.user_id,
                    course_id = %self.course_id,
                    version,
                    current_step = %row.current_step(),
                    "progress saved"
                );
                Ok(SaveOutcome::Persisted { version })
            }
            Err(StorageError::Conflict) => {
                tracing::warn!(
                    user_id = %self.user_id,
                    course_id = %self.course_id,
                    expected = row.version(),
                    "progress changed in another session"
                );
                self.deps.notifier.notify(Notice::error(
                    "Your progress was changed in another window. Reload to continue.",
                ));
                Err(StorageError::Conflict.into())
            }
            Err(err) => {
                tracing::error!(
                    user_id = %self.user_id,
                    course_id = %self.course_id,
                    error = %err,
                    "progress save failed"
                );
                self.deps
                    .notifier
                    .notify(Notice::error(format!("Could not save your progress: {err}")));
                Err(err.into())
            }
        }
    }

    async fn write_now(&self, row: UserProgress) -> Result<SaveOutcome, ProgressServiceError> {
        let Some(_guard) = InFlightGuard::acquire(&self.in_flight) else {
            tracing::warn!(
                user_id = %self.user_id,
                course_id = %self.course_id,
                "save dropped: another write is in flight"
            );
            return Ok(SaveOutcome::Dropped);
        };
        let result = write_row(self.deps.repo.as_ref(), self.deps.settings.concurrency, &row).await;
        self.finish(&row, result)
    }
}

/// Owns one user's place in one course and mediates every read and write of
/// the stored progress row.
///
/// Dropping the controller cancels a pending debounced save. A write that has
/// already started runs to completion and its result is discarded.
pub struct ProgressController {
    shared: Arc<Shared>,
}

impl ProgressController {
    #[must_use]
    pub fn new(user_id: UserId, course_id: CourseId, total_steps: u32, deps: ControllerDeps) -> Self {
        Self {
            shared: Arc::new(Shared {
                user_id,
                course_id,
                total_steps,
                deps,
                state: Mutex::new(State::default()),
                in_flight: Arc::new(AtomicBool::new(false)),
                pending: Mutex::new(None),
            }),
        }
    }

    #[must_use]
    pub fn user_id(&self) -> UserId {
        self.shared.user_id
    }

    #[must_use]
    pub fn course_id(&self) -> &CourseId {
        &self.shared.course_id
    }

    #[must_use]
    pub fn total_steps(&self) -> u32 {
        self.shared.total_steps
    }

    /// Fetch the stored row, or build the default one if none exists yet.
    ///
    /// The default row is not written until the first save. On failure the
    /// in-memory progress becomes unknown (`None`) and the user is notified.
    ///
    /// # Errors
    ///
    /// Returns `ProgressServiceError::Storage` if the row cannot be read.
    pub async fn load_progress(&self) -> Result<ProgressSnapshot, ProgressServiceError> {
        let shared = &self.shared;
        let progress = match shared
            .deps
            .repo
            .get_progress(shared.user_id, &shared.course_id)
            .await
        {
            Ok(Some(row)) => row,
            Ok(None) => {
                tracing::debug!(
                    user_id = %shared.user_id,
                    course_id = %shared.course_id,
                    "no stored progress; starting at step 1"
                );
                UserProgress::new(shared.user_id, shared.course_id.clone())
            }
            Err(err) => {
                shared.state().progress = None;
                tracing::error!(
                    user_id = %shared.user_id,
                    course_id = %shared.course_id,
                    error = %err,
                    "progress load failed"
                );
                shared
                    .deps
                    .notifier
                    .notify(Notice::error(format!("Could not load your progress: {err}")));
                return Err(err.into());
            }
        };

        let minister = shared.deps.ministers.status(shared.user_id).await;

        let mut state = shared.state();
        state.progress = Some(progress.clone());
        state.minister = minister.clone();
        Ok(ProgressSnapshot { progress, minister })
    }

    /// Persist `row` as this session's progress.
    ///
    /// The in-memory row is replaced immediately in both modes. The row
    /// version is owned by the controller: `row` takes the version of the
    /// last write this session made.
    ///
    /// # Errors
    ///
    /// Immediate saves return `ProgressServiceError::Storage` when the write
    /// fails; the in-memory row is kept. Debounced saves report failures
    /// through the notifier only.
    pub async fn save_progress(
        &self,
        mut row: UserProgress,
        mode: SaveMode,
    ) -> Result<SaveOutcome, ProgressServiceError> {
        row.touch(self.shared.deps.clock.now());
        {
            let mut state = self.shared.state();
            if let Some(current) = state.progress.as_ref().filter(|p| p.is_same_row(&row)) {
                row.set_version(current.version());
            }
            state.progress = Some(row.clone());
        }

        match mode {
            SaveMode::Debounced => {
                self.schedule(row);
                Ok(SaveOutcome::Scheduled)
            }
            SaveMode::Immediate => {
                self.shared.cancel_pending();
                self.shared.write_now(row).await
            }
        }
    }

    /// Shorthand for `save_progress(row, SaveMode::Debounced)`.
    ///
    /// # Errors
    ///
    /// See [`ProgressController::save_progress`].
    pub async fn save_debounced(
        &self,
        row: UserProgress,
    ) -> Result<SaveOutcome, ProgressServiceError> {
        self.save_progress(row, SaveMode::Debounced).await
    }

    /// Shorthand for `save_progress(row, SaveMode::Immediate)`.
    ///
    /// # Errors
    ///
    /// See [`ProgressController::save_progress`].
    pub async fn save_now(&self, row: UserProgress) -> Result<SaveOutcome, ProgressServiceError> {
        self.save_progress(row, SaveMode::Immediate).await
    }

    /// Replace the data stored under `key` and schedule a debounced save.
    ///
    /// # Errors
    ///
    /// Returns `ProgressServiceError::NotLoaded` before a successful load.
    pub async fn save_step_data(
        &self,
        key: StepKey,
        value: Value,
    ) -> Result<SaveOutcome, ProgressServiceError> {
        let row = self.update(|progress| {
            progress.set_step_data(key, value);
        })?;
        self.save_progress(row, SaveMode::Debounced).await
    }

    /// Step data held in memory under `key`.
    #[must_use]
    pub fn get_step_data(&self, key: &StepKey) -> Option<Value> {
        self.shared
            .state()
            .progress
            .as_ref()
            .and_then(|p| p.step_data().get(key).cloned())
    }

    /// Complete `step` (default: the current step), move to the step after it
    /// and save immediately.
    ///
    /// # Errors
    ///
    /// Returns `ProgressServiceError::NotLoaded` before a successful load, or
    /// storage errors from the write.
    pub async fn complete_step(
        &self,
        step: Option<StepNumber>,
    ) -> Result<SaveOutcome, ProgressServiceError> {
        let row = self.update(|progress| {
            let step = step.unwrap_or_else(|| progress.current_step());
            progress.complete_step(step);
        })?;
        tracing::info!(
            user_id = %self.shared.user_id,
            course_id = %self.shared.course_id,
            current_step = %row.current_step(),
            "step completed"
        );
        self.save_progress(row, SaveMode::Immediate).await
    }

    /// Move to `step` and save immediately.
    ///
    /// Accessibility is not checked here; callers gate navigation with
    /// [`ProgressController::is_step_accessible`].
    ///
    /// # Errors
    ///
    /// Returns `ProgressServiceError::NotLoaded` before a successful load, or
    /// storage errors from the write.
    pub async fn go_to_step(&self, step: StepNumber) -> Result<SaveOutcome, ProgressServiceError> {
        let row = self.update(|progress| progress.go_to_step(step))?;
        self.save_progress(row, SaveMode::Immediate).await
    }

    /// Move back one step (never below step 1) and save immediately.
    ///
    /// # Errors
    ///
    /// Returns `ProgressServiceError::NotLoaded` before a successful load, or
    /// storage errors from the write.
    pub async fn previous_step(&self) -> Result<SaveOutcome, ProgressServiceError> {
        let row = self.update(|progress| {
            progress.step_back();
        })?;
        self.save_progress(row, SaveMode::Immediate).await
    }

    /// Mark the whole course finished and save immediately.
    ///
    /// # Errors
    ///
    /// Returns `ProgressServiceError::NotLoaded` before a successful load, or
    /// storage errors from the write.
    pub async fn mark_course_complete(&self) -> Result<SaveOutcome, ProgressServiceError> {
        let row = self.update(UserProgress::mark_complete)?;
        tracing::info!(
            user_id = %self.shared.user_id,
            course_id = %self.shared.course_id,
            "course completed"
        );
        self.save_progress(row, SaveMode::Immediate).await
    }

    /// Write a pending debounced save now.
    ///
    /// Returns `Ok(None)` when no debounced save was scheduled since the last
    /// flush or immediate save. If the timer already fired, waits for it and
    /// returns its outcome, which is `SaveOutcome::Dropped` when another write
    /// was in flight at that moment.
    ///
    /// # Errors
    ///
    /// Returns storage errors from the write.
    pub async fn flush(&self) -> Result<Option<SaveOutcome>, ProgressServiceError> {
        let Some(pending) = self.shared.pending().take() else {
            return Ok(None);
        };
        if pending.fired.load(Ordering::Acquire) || pending.timer.is_finished() {
            return match pending.timer.await {
                Ok(Some(result)) => result.map(Some),
                Ok(None) | Err(_) => Ok(None),
            };
        }

        pending.timer.abort();
        let row = self
            .shared
            .state()
            .progress
            .clone()
            .ok_or(ProgressServiceError::NotLoaded)?;
        self.shared.write_now(row).await.map(Some)
    }

    /// `None` while progress is unknown (not loaded or the load failed).
    #[must_use]
    pub fn is_step_accessible(&self, step: StepNumber) -> Option<bool> {
        self.shared
            .state()
            .progress
            .as_ref()
            .map(|p| p.is_step_accessible(step))
    }

    /// Whole-percent completion against the course's step count.
    #[must_use]
    pub fn completion_percentage(&self) -> Option<u32> {
        self.shared
            .state()
            .progress
            .as_ref()
            .map(|p| p.completion_percentage(self.shared.total_steps))
    }

    #[must_use]
    pub fn progress(&self) -> Option<UserProgress> {
        self.shared.state().progress.clone()
    }

    #[must_use]
    pub fn current_step(&self) -> Option<StepNumber> {
        self.shared
            .state()
            .progress
            .as_ref()
            .map(UserProgress::current_step)
    }

    #[must_use]
    pub fn minister_status(&self) -> MinisterStatus {
        self.shared.state().minister.clone()
    }

    /// Callback surface for the step mounted at `number`, storing under `key`.
    #[must_use]
    pub fn step(&self, number: StepNumber, key: StepKey) -> StepHandle<'_> {
        StepHandle::new(self, number, key)
    }

    /// Whether a debounced save is waiting for its quiet period to end.
    #[must_use]
    pub fn has_pending_save(&self) -> bool {
        self.shared
            .pending()
            .as_ref()
            .is_some_and(|p| !p.timer.is_finished() && !p.fired.load(Ordering::Acquire))
    }

    /// Mutates the in-memory row without saving.
    pub(crate) fn update(
        &self,
        apply: impl FnOnce(&mut UserProgress),
    ) -> Result<UserProgress, ProgressServiceError> {
        let mut state = self.shared.state();
        let progress = state
            .progress
            .as_mut()
            .ok_or(ProgressServiceError::NotLoaded)?;
        apply(progress);
        Ok(progress.clone())
    }

    fn schedule(&self, row: UserProgress) {
        let weak = Arc::downgrade(&self.shared);
        let delay = self.shared.deps.settings.debounce;
        let fired = Arc::new(AtomicBool::new(false));
        let fired_flag = Arc::clone(&fired);

        let timer = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let shared = weak.upgrade()?;
            fired_flag.store(true, Ordering::Release);

            let Some(guard) = InFlightGuard::acquire(&shared.in_flight) else {
                tracing::warn!(
                    user_id = %shared.user_id,
                    course_id = %shared.course_id,
                    "debounced save dropped: another write is in flight"
                );
                shared.deps.notifier.notify(Notice::warning(
                    "Some recent changes were not saved yet. They will be saved with your next change.",
                ));
                return Some(Ok(SaveOutcome::Dropped));
            };
            // the in-memory row carries edits and the version of writes that
            // finished after this save was scheduled
            let row = shared
                .state()
                .progress
                .clone()
                .filter(|current| current.is_same_row(&row))
                .unwrap_or(row);
            let repo = Arc::clone(&shared.deps.repo);
            let mode = shared.deps.settings.concurrency;
            let owner = Arc::downgrade(&shared);
            drop(shared);

            // detached so cancelling the timer cannot abort a started write
            let write = tokio::spawn(async move {
                let _guard = guard;
                let result = write_row(repo.as_ref(), mode, &row).await;
                match owner.upgrade() {
                    Some(shared) => Some(shared.finish(&row, result)),
                    None => {
                        tracing::debug!("controller dropped before save completed; result discarded");
                        None
                    }
                }
            });
            write.await.ok().flatten()
        });

        let previous = self.shared.pending().replace(PendingSave { timer, fired });
        if let Some(previous) = previous {
            previous.timer.abort();
        }
        tracing::debug!(
            user_id = %self.shared.user_id,
            course_id = %self.shared.course_id,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "debounced save scheduled"
        );
    }
}

impl Drop for ProgressController {
    fn drop(&mut self) {
        self.shared.cancel_pending();
    }
}
