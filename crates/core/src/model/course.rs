use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::ids::{CourseId, StepKey, StepNumber};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum CourseConfigError {
    #[error("course `{0}` has no steps")]
    NoSteps(String),

    #[error("course `{course}` repeats step key `{key}`")]
    DuplicateStepKey { course: String, key: String },

    #[error("course `{course}` has a step with an empty title")]
    EmptyStepTitle { course: String },

    #[error("course title cannot be empty")]
    EmptyTitle,
}

/// One entry in a course's ordered step list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepDefinition {
    pub key: StepKey,
    pub title: String,
}

/// Unvalidated shape of a course as written in configuration files.
#[derive(Debug, Clone, Deserialize)]
pub struct CourseConfigDraft {
    pub id: CourseId,
    pub title: String,
    pub steps: Vec<StepDefinition>,
}

/// Ordered step list for a course.
///
/// Step numbers are positions in `steps`, starting at 1.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "CourseConfigDraft")]
pub struct CourseConfig {
    id: CourseId,
    title: String,
    steps: Vec<StepDefinition>,
}

impl CourseConfigDraft {
    /// Validate the draft into a usable course.
    ///
    /// # Errors
    ///
    /// Returns `CourseConfigError` for empty titles, an empty step list or
    /// duplicate step keys.
    pub fn validate(self) -> Result<CourseConfig, CourseConfigError> {
        let title = self.title.trim().to_owned();
        if title.is_empty() {
            return Err(CourseConfigError::EmptyTitle);
        }
        if self.steps.is_empty() {
            return Err(CourseConfigError::NoSteps(self.id.to_string()));
        }

        let mut seen = HashSet::new();
        for step in &self.steps {
            if step.title.trim().is_empty() {
                return Err(CourseConfigError::EmptyStepTitle {
                    course: self.id.to_string(),
                });
            }
            if !seen.insert(step.key.clone()) {
                return Err(CourseConfigError::DuplicateStepKey {
                    course: self.id.to_string(),
                    key: step.key.to_string(),
                });
            }
        }

        Ok(CourseConfig {
            id: self.id,
            title,
            steps: self.steps,
        })
    }
}

impl TryFrom<CourseConfigDraft> for CourseConfig {
    type Error = CourseConfigError;

    fn try_from(draft: CourseConfigDraft) -> Result<Self, Self::Error> {
        draft.validate()
    }
}

impl CourseConfig {
    /// The five-step trust formation workflow.
    ///
    /// # Panics
    ///
    /// Never in practice; the built-in keys and titles are non-blank.
    #[must_use]
    pub fn trust_formation() -> Self {
        let steps = [
            ("identity", "Identity"),
            ("trust-configuration", "Trust configuration"),
            ("document-assembly", "Document assembly"),
            ("signatures", "Signatures"),
            ("review", "Review"),
        ]
        .into_iter()
        .map(|(key, title)| StepDefinition {
            key: StepKey::new(key).expect("built-in step key"),
            title: title.to_owned(),
        })
        .collect();

        Self {
            id: CourseId::new("trust-formation").expect("built-in course id"),
            title: "Trust formation".to_owned(),
            steps,
        }
    }

    #[must_use]
    pub fn id(&self) -> &CourseId {
        &self.id
    }

    #[must_use]
    pub fn title(&self) -> &str {
        &self.title
    }

    #[must_use]
    pub fn steps(&self) -> &[StepDefinition] {
        &self.steps
    }

    #[must_use]
    pub fn total_steps(&self) -> u32 {
        u32::try_from(self.steps.len()).unwrap_or(u32::MAX)
    }

    /// The definition at one-based position `step`.
    #[must_use]
    pub fn step(&self, step: StepNumber) -> Option<&StepDefinition> {
        let index = usize::try_from(step.value() - 1).ok()?;
        self.steps.get(index)
    }

    #[must_use]
    pub fn number_of(&self, key: &StepKey) -> Option<StepNumber> {
        let index = self.steps.iter().position(|s| &s.key == key)?;
        u32::try_from(index + 1).ok().and_then(|n| StepNumber::new(n).ok())
    }
}
