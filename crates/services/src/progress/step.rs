use serde::de::DeserializeOwned;
use serde_json::Value;
use trust_core::model::{StepKey, StepNumber};

use super::controller::{ProgressController, SaveOutcome};
use crate::error::ProgressServiceError;

/// Callbacks a mounted step uses to read and persist its own data.
///
/// The step validates its fields; the controller stores whatever it is given.
pub struct StepHandle<'a> {
    controller: &'a ProgressController,
    number: StepNumber,
    key: StepKey,
}

impl<'a> StepHandle<'a> {
    pub(crate) fn new(controller: &'a ProgressController, number: StepNumber, key: StepKey) -> Self {
        Self {
            controller,
            number,
            key,
        }
    }

    #[must_use]
    pub fn number(&self) -> StepNumber {
        self.number
    }

    #[must_use]
    pub fn key(&self) -> &StepKey {
        &self.key
    }

    /// Previously stored data for this step, used to repopulate the form.
    #[must_use]
    pub fn data(&self) -> Option<Value> {
        self.controller.get_step_data(&self.key)
    }

    /// Stored data decoded into the step's own form type.
    ///
    /// # Errors
    ///
    /// Returns `ProgressServiceError::NotLoaded` before a load, or
    /// `ProgressServiceError::Progress` if the stored shape does not match `T`.
    pub fn data_as<T: DeserializeOwned>(&self) -> Result<Option<T>, ProgressServiceError> {
        let progress = self
            .controller
            .progress()
            .ok_or(ProgressServiceError::NotLoaded)?;
        Ok(progress.step_data().get_as(&self.key)?)
    }

    /// Continuous autosave while the user edits; does not complete the step.
    ///
    /// # Errors
    ///
    /// Returns `ProgressServiceError::NotLoaded` before a load.
    pub async fn autosave(&self, value: Value) -> Result<SaveOutcome, ProgressServiceError> {
        self.controller.save_step_data(self.key.clone(), value).await
    }

    /// Store the submitted data, complete this step and save immediately.
    ///
    /// # Errors
    ///
    /// Returns `ProgressServiceError::NotLoaded` before a load, or storage
    /// errors from the write.
    pub async fn next(&self, value: Value) -> Result<SaveOutcome, ProgressServiceError> {
        let key = self.key.clone();
        self.controller.update(|progress| {
            progress.set_step_data(key, value);
        })?;
        self.controller.complete_step(Some(self.number)).await
    }

    /// Go back one step without re-checking accessibility.
    ///
    /// # Errors
    ///
    /// Returns `ProgressServiceError::NotLoaded` before a load, or storage
    /// errors from the write.
    pub async fn prev(&self) -> Result<SaveOutcome, ProgressServiceError> {
        self.controller.previous_step().await
    }
}
