//! CLI command definitions and subcommands

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use trust_core::model::{CourseId, StepKey, StepNumber, UserId};
use url::Url;

/// trustflow - step-by-step progress through the trust formation course
#[derive(Debug, Parser)]
#[command(name = "trustflow", version, about = "Track and resume progress through the trust formation workflow")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Database URL; overrides the config file and TRUSTFLOW_DB_URL
    #[arg(long, global = true, value_name = "URL")]
    pub db: Option<String>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(short = 'l', long = "log-level", global = true)]
    pub log_level: Option<String>,

    /// Send user notices to the log instead of printing them after the command
    #[arg(long, global = true)]
    pub log_notices: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Whose progress, in which course.
#[derive(Debug, Clone, Args)]
pub struct Target {
    /// User id (UUID)
    #[arg(short, long)]
    pub user: UserId,

    /// Course id
    #[arg(long, default_value = "trust-formation")]
    pub course: CourseId,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Show the current step, completed steps and minister status
    Status {
        #[command(flatten)]
        target: Target,

        /// Print the stored row as JSON
        #[arg(long)]
        json: bool,
    },

    /// Store form data for a step without completing it
    SaveStep {
        #[command(flatten)]
        target: Target,

        /// Step data key, usually the step's key
        key: StepKey,

        /// JSON object with the form fields
        #[arg(value_name = "JSON")]
        data: String,
    },

    /// Complete a step (default: the current one) and advance
    Complete {
        #[command(flatten)]
        target: Target,

        #[arg(short, long)]
        step: Option<StepNumber>,

        /// Form data to store under the step's key before completing
        #[arg(long, value_name = "JSON")]
        data: Option<String>,
    },

    /// Jump to an unlocked step
    Goto {
        #[command(flatten)]
        target: Target,

        step: StepNumber,
    },

    /// Go back one step
    Back {
        #[command(flatten)]
        target: Target,
    },

    /// Mark the course as finished
    Finish {
        #[command(flatten)]
        target: Target,
    },

    /// Manage minister verification records
    Minister {
        #[command(subcommand)]
        command: MinisterCommand,
    },
}

#[derive(Debug, Subcommand)]
pub enum MinisterCommand {
    /// Record a user's minister verification
    Set {
        #[arg(short, long)]
        user: UserId,

        /// Name shown on documents
        #[arg(long, required_unless_present = "revoke")]
        name: Option<String>,

        #[arg(long, value_name = "URL")]
        certificate_url: Option<Url>,

        /// Store the user as not verified
        #[arg(long, conflicts_with_all = ["name", "certificate_url"])]
        revoke: bool,
    },

    /// Show a user's minister status as the workflow sees it
    Show {
        #[arg(short, long)]
        user: UserId,
    },
}
