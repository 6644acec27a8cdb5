use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::model::ids::{CourseId, StepKey, StepNumber, UserId};

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ProgressError {
    #[error("step data for `{key}` does not match the expected shape: {reason}")]
    StepDataShape { key: String, reason: String },

    #[error("step data must be a JSON object")]
    StepDataNotObject,

    #[error("invalid persisted progress: {0}")]
    InvalidPersistedState(String),
}

//
// ─── STEP DATA ─────────────────────────────────────────────────────────────────
//

/// Per-step data blobs keyed by step key.
///
/// Values are opaque JSON; each step owns the shape of its own entry and reads
/// it back through [`StepData::get_as`].
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StepData(BTreeMap<StepKey, Value>);

impl StepData {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds step data from a JSON object, e.g. a stored `step_data` column.
    ///
    /// # Errors
    ///
    /// Returns `ProgressError::StepDataNotObject` for non-object values and
    /// `ProgressError::InvalidPersistedState` for blank keys.
    pub fn from_json(value: Value) -> Result<Self, ProgressError> {
        let Value::Object(map) = value else {
            return Err(ProgressError::StepDataNotObject);
        };
        let mut out = BTreeMap::new();
        for (key, value) in map {
            let key = StepKey::new(key)
                .map_err(|e| ProgressError::InvalidPersistedState(e.to_string()))?;
            out.insert(key, value);
        }
        Ok(Self(out))
    }

    #[must_use]
    pub fn to_json(&self) -> Value {
        Value::Object(
            self.0
                .iter()
                .map(|(k, v)| (k.as_str().to_owned(), v.clone()))
                .collect(),
        )
    }

    #[must_use]
    pub fn get(&self, key: &StepKey) -> Option<&Value> {
        self.0.get(key)
    }

    /// Decodes the blob stored under `key` into a typed form.
    ///
    /// # Errors
    ///
    /// Returns `ProgressError::StepDataShape` if the stored value does not
    /// deserialize into `T`.
    pub fn get_as<T: DeserializeOwned>(&self, key: &StepKey) -> Result<Option<T>, ProgressError> {
        self.0
            .get(key)
            .map(|value| {
                serde_json::from_value(value.clone()).map_err(|e| ProgressError::StepDataShape {
                    key: key.to_string(),
                    reason: e.to_string(),
                })
            })
            .transpose()
    }

    /// Replaces the whole value under `key`, returning the previous one.
    pub fn insert(&mut self, key: StepKey, value: Value) -> Option<Value> {
        self.0.insert(key, value)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &StepKey> {
        self.0.keys()
    }
}

//
// ─── PROGRESS ROW ──────────────────────────────────────────────────────────────
//

/// A user's position and collected data within one course.
///
/// Step `n` is accessible when `n == 1` or step `n - 1` has been completed.
/// Completed steps are never removed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserProgress {
    user_id: UserId,
    course_id: CourseId,
    current_step: StepNumber,
    completed_steps: BTreeSet<StepNumber>,
    step_data: StepData,
    is_complete: bool,
    version: u64,
    updated_at: Option<DateTime<Utc>>,
}

impl UserProgress {
    /// The row a user gets before anything has been stored: step 1, nothing
    /// completed, no data.
    #[must_use]
    pub fn new(user_id: UserId, course_id: CourseId) -> Self {
        Self {
            user_id,
            course_id,
            current_step: StepNumber::FIRST,
            completed_steps: BTreeSet::new(),
            step_data: StepData::new(),
            is_complete: false,
            version: 0,
            updated_at: None,
        }
    }

    /// Rebuilds a row read back from storage.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn from_persisted(
        user_id: UserId,
        course_id: CourseId,
        current_step: StepNumber,
        completed_steps: BTreeSet<StepNumber>,
        step_data: StepData,
        is_complete: bool,
        version: u64,
        updated_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            user_id,
            course_id,
            current_step,
            completed_steps,
            step_data,
            is_complete,
            version,
            updated_at,
        }
    }

    // Accessors

    #[must_use]
    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    #[must_use]
    pub fn course_id(&self) -> &CourseId {
        &self.course_id
    }

    #[must_use]
    pub fn current_step(&self) -> StepNumber {
        self.current_step
    }

    #[must_use]
    pub fn completed_steps(&self) -> &BTreeSet<StepNumber> {
        &self.completed_steps
    }

    #[must_use]
    pub fn step_data(&self) -> &StepData {
        &self.step_data
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.is_complete
    }

    /// Store-assigned row version; 0 until the first successful write.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.version
    }

    #[must_use]
    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    #[must_use]
    pub fn is_persisted(&self) -> bool {
        self.version > 0
    }

    #[must_use]
    pub fn is_same_row(&self, other: &UserProgress) -> bool {
        self.user_id == other.user_id && self.course_id == other.course_id
    }

    // Queries

    #[must_use]
    pub fn is_step_accessible(&self, step: StepNumber) -> bool {
        match step.prev() {
            None => true,
            Some(prev) => self.completed_steps.contains(&prev),
        }
    }

    #[must_use]
    pub fn is_step_completed(&self, step: StepNumber) -> bool {
        self.completed_steps.contains(&step)
    }

    /// Share of `total_steps` completed, in whole percent (half rounds up).
    ///
    /// `total_steps` comes from the course configuration, so a row holding
    /// steps beyond it can report more than 100.
    #[must_use]
    pub fn completion_percentage(&self, total_steps: u32) -> u32 {
        if total_steps == 0 {
            return 0;
        }
        let completed = u64::try_from(self.completed_steps.len()).unwrap_or(u64::MAX);
        let total = u64::from(total_steps);
        let pct = (completed.saturating_mul(200) + total) / (2 * total);
        u32::try_from(pct).unwrap_or(u32::MAX)
    }

    // Transitions

    /// Marks `step` completed and moves to the step after it.
    ///
    /// Returns `false` when the step was already completed.
    pub fn complete_step(&mut self, step: StepNumber) -> bool {
        let inserted = self.completed_steps.insert(step);
        self.current_step = step.next();
        inserted
    }

    /// Jumps to `step` without checking accessibility.
    pub fn go_to_step(&mut self, step: StepNumber) {
        self.current_step = step;
    }

    /// Moves back one step, staying on step 1 at the start.
    pub fn step_back(&mut self) -> StepNumber {
        if let Some(prev) = self.current_step.prev() {
            self.current_step = prev;
        }
        self.current_step
    }

    /// Replaces the data blob under `key`.
    pub fn set_step_data(&mut self, key: StepKey, value: Value) -> Option<Value> {
        self.step_data.insert(key, value)
    }

    pub fn mark_complete(&mut self) {
        self.is_complete = true;
    }

    pub fn touch(&mut self, at: DateTime<Utc>) {
        self.updated_at = Some(at);
    }

    /// Records the version the store assigned on the last write.
    pub fn set_version(&mut self, version: u64) {
        self.version = version;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn step(n: u32) -> StepNumber {
        StepNumber::new(n).unwrap()
    }

    fn key(k: &str) -> StepKey {
        StepKey::new(k).unwrap()
    }

    fn fresh() -> UserProgress {
        UserProgress::new(UserId::random(), CourseId::new("trust-formation").unwrap())
    }

    #[test]
    fn default_row_starts_at_step_one() {
        let progress = fresh();
        assert_eq!(progress.current_step(), StepNumber::FIRST);
        assert!(progress.completed_steps().is_empty());
        assert!(progress.step_data().is_empty());
        assert!(!progress.is_complete());
        assert!(!progress.is_persisted());
    }

    #[test]
    fn accessibility_follows_previous_completion() {
        let mut progress = fresh();
        assert!(progress.is_step_accessible(step(1)));
        for n in 2..=6 {
            assert!(!progress.is_step_accessible(step(n)));
        }

        progress.complete_step(step(1));
        progress.complete_step(step(3));
        assert!(progress.is_step_accessible(step(1)));
        assert!(progress.is_step_accessible(step(2)));
        assert!(!progress.is_step_accessible(step(3)));
        assert!(progress.is_step_accessible(step(4)));
        assert!(!progress.is_step_accessible(step(5)));
    }

    #[test]
    fn complete_step_is_idempotent_and_advances() {
        let mut progress = fresh();
        assert!(progress.complete_step(step(2)));
        assert!(!progress.complete_step(step(2)));
        assert_eq!(progress.completed_steps().len(), 1);
        assert_eq!(progress.current_step(), step(3));
    }

    #[test]
    fn go_to_step_and_back_never_drop_completed() {
        let mut progress = fresh();
        progress.complete_step(step(1));
        progress.go_to_step(step(5));
        assert_eq!(progress.current_step(), step(5));
        assert_eq!(progress.step_back(), step(4));
        progress.go_to_step(step(1));
        assert_eq!(progress.step_back(), step(1));
        assert!(progress.is_step_completed(step(1)));
    }

    #[test]
    fn completion_percentage_rounds_half_up() {
        let mut progress = fresh();
        assert_eq!(progress.completion_percentage(5), 0);
        progress.complete_step(step(1));
        assert_eq!(progress.completion_percentage(8), 13);
        assert_eq!(progress.completion_percentage(3), 33);
        progress.complete_step(step(2));
        assert_eq!(progress.completion_percentage(3), 67);
        assert_eq!(progress.completion_percentage(0), 0);
    }

    #[test]
    fn step_data_replaces_whole_value() {
        let mut progress = fresh();
        progress.set_step_data(key("identity"), json!({"fullName": "Jane", "city": "Reno"}));
        progress.set_step_data(key("identity"), json!({"fullName": "Jane Doe"}));
        assert_eq!(
            progress.step_data().get(&key("identity")),
            Some(&json!({"fullName": "Jane Doe"}))
        );
    }

    #[test]
    fn typed_step_data_reports_shape_errors() {
        #[derive(Debug, Deserialize, PartialEq)]
        #[serde(rename_all = "camelCase")]
        struct Identity {
            full_name: String,
        }

        let mut data = StepData::new();
        data.insert(key("identity"), json!({"fullName": "Jane"}));
        data.insert(key("trust"), json!(42));

        let identity: Option<Identity> = data.get_as(&key("identity")).unwrap();
        assert_eq!(identity.unwrap().full_name, "Jane");
        assert!(data.get_as::<Identity>(&key("missing")).unwrap().is_none());
        assert!(matches!(
            data.get_as::<Identity>(&key("trust")),
            Err(ProgressError::StepDataShape { .. })
        ));
    }

    #[test]
    fn step_data_json_requires_object() {
        assert_eq!(
            StepData::from_json(json!([1, 2])),
            Err(ProgressError::StepDataNotObject)
        );
        let data = StepData::from_json(json!({"identity": {"fullName": "Jane"}})).unwrap();
        assert_eq!(data.to_json(), json!({"identity": {"fullName": "Jane"}}));
    }
}
