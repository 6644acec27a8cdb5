#![forbid(unsafe_code)]

pub mod app_services;
pub mod error;
pub mod minister;
pub mod notify;
pub mod progress;
pub mod workflow;

pub use trust_core::Clock;

pub use app_services::{AppServices, ServiceOptions};
pub use error::{AppServicesError, MinisterRpcError, ProgressServiceError, WorkflowError};
pub use minister::{MinisterStatusService, RpcMinisterConfig, RpcMinisterDirectory};
pub use notify::{CollectingNotifier, LogNotifier, Notice, NoticeLevel, Notifier};
pub use progress::{
    ConcurrencyMode, ControllerDeps, ControllerSettings, ProgressController, ProgressSnapshot,
    SaveMode, SaveOutcome, StepHandle,
};
pub use workflow::{StepOverview, StepStatus, WorkflowEngine};
