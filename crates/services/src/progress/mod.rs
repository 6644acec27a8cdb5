mod controller;
mod step;

pub use controller::{
    ConcurrencyMode, ControllerDeps, ControllerSettings, DEFAULT_DEBOUNCE, ProgressController,
    ProgressSnapshot, SaveMode, SaveOutcome,
};
pub use step::StepHandle;
