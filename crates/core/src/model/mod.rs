mod course;
mod ids;
mod minister;
mod progress;

pub use course::{CourseConfig, CourseConfigDraft, CourseConfigError, StepDefinition};
pub use ids::{CourseId, ParseIdError, StepKey, StepNumber, UserId};
pub use minister::MinisterStatus;
pub use progress::{ProgressError, StepData, UserProgress};
