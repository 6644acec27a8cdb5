use trust_core::model::{CourseConfig, StepDefinition, StepNumber, UserProgress};

use crate::error::{ProgressServiceError, WorkflowError};
use crate::progress::{ProgressController, SaveOutcome, StepHandle};

/// Display state of one step in the course outline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    Current,
    Completed,
    Available,
    Locked,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepOverview<'a> {
    pub number: StepNumber,
    pub definition: &'a StepDefinition,
    pub status: StepStatus,
}

/// Picks the step to present from a course's step list and gates navigation.
#[derive(Debug, Clone)]
pub struct WorkflowEngine {
    course: CourseConfig,
}

impl WorkflowEngine {
    #[must_use]
    pub fn new(course: CourseConfig) -> Self {
        Self { course }
    }

    #[must_use]
    pub fn course(&self) -> &CourseConfig {
        &self.course
    }

    /// The step to mount for `progress`, or `None` once past the last step.
    #[must_use]
    pub fn current<'a>(&'a self, progress: &UserProgress) -> Option<&'a StepDefinition> {
        self.course.step(progress.current_step())
    }

    /// Every step of the course with its status for `progress`.
    #[must_use]
    pub fn overview<'a>(&'a self, progress: &UserProgress) -> Vec<StepOverview<'a>> {
        self.course
            .steps()
            .iter()
            .zip(1u32..)
            .filter_map(|(definition, n)| {
                let number = StepNumber::new(n).ok()?;
                let status = if number == progress.current_step() {
                    StepStatus::Current
                } else if progress.is_step_completed(number) {
                    StepStatus::Completed
                } else if progress.is_step_accessible(number) {
                    StepStatus::Available
                } else {
                    StepStatus::Locked
                };
                Some(StepOverview {
                    number,
                    definition,
                    status,
                })
            })
            .collect()
    }

    /// Navigate to `step` if it exists and is unlocked.
    ///
    /// # Errors
    ///
    /// Returns `WorkflowError::OutOfRange` or `WorkflowError::StepLocked` for
    /// rejected targets, or the controller's error from the save.
    pub async fn navigate(
        &self,
        controller: &ProgressController,
        step: StepNumber,
    ) -> Result<SaveOutcome, WorkflowError> {
        self.check(controller, step)?;
        Ok(controller.go_to_step(step).await?)
    }

    /// Step handle for `step`, keyed by the course's key for that position.
    ///
    /// # Errors
    ///
    /// Returns `WorkflowError::OutOfRange` or `WorkflowError::StepLocked` for
    /// rejected targets.
    pub fn open<'c>(
        &self,
        controller: &'c ProgressController,
        step: StepNumber,
    ) -> Result<StepHandle<'c>, WorkflowError> {
        let definition = self.check(controller, step)?;
        Ok(controller.step(step, definition.key.clone()))
    }

    fn check(
        &self,
        controller: &ProgressController,
        step: StepNumber,
    ) -> Result<&StepDefinition, WorkflowError> {
        if controller.course_id() != self.course.id() {
            return Err(WorkflowError::CourseMismatch {
                expected: self.course.id().to_string(),
                actual: controller.course_id().to_string(),
            });
        }
        let definition = self.course.step(step).ok_or(WorkflowError::OutOfRange {
            step,
            total: self.course.total_steps(),
        })?;
        match controller.is_step_accessible(step) {
            None => Err(ProgressServiceError::NotLoaded.into()),
            Some(false) => Err(WorkflowError::StepLocked(step)),
            Some(true) => Ok(definition),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trust_core::model::{CourseId, UserId};

    fn n(v: u32) -> StepNumber {
        StepNumber::new(v).unwrap()
    }

    #[test]
    fn current_step_maps_to_course_definition() {
        let engine = WorkflowEngine::new(CourseConfig::trust_formation());
        let mut progress = UserProgress::new(UserId::random(), engine.course().id().clone());
        assert_eq!(engine.current(&progress).unwrap().key.as_str(), "identity");

        progress.complete_step(n(1));
        assert_eq!(
            engine.current(&progress).unwrap().key.as_str(),
            "trust-configuration"
        );

        progress.go_to_step(n(6));
        assert!(engine.current(&progress).is_none());
    }

    #[test]
    fn overview_marks_current_completed_available_and_locked() {
        let engine = WorkflowEngine::new(CourseConfig::trust_formation());
        let mut progress = UserProgress::new(
            UserId::random(),
            CourseId::new("trust-formation").unwrap(),
        );
        progress.complete_step(n(1));
        progress.complete_step(n(2));
        progress.go_to_step(n(1));

        let statuses: Vec<StepStatus> = engine
            .overview(&progress)
            .into_iter()
            .map(|s| s.status)
            .collect();
        assert_eq!(
            statuses,
            vec![
                StepStatus::Current,
                StepStatus::Completed,
                StepStatus::Available,
                StepStatus::Locked,
                StepStatus::Locked,
            ]
        );
    }
}
