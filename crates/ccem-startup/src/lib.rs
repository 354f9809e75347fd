//! Startup orchestration for CCEM hosts.
//!
//! Critical steps run in order behind the splash surface; once they finish the
//! host enters its shell and background steps are spawned as an owned task set.

pub mod context;
pub mod error;
pub mod operation;
pub mod pipeline;
pub mod services;
pub mod splash;

pub use context::StartupContext;
pub use error::StartupError;
pub use operation::{StartupAction, StartupOperation};
pub use pipeline::{
    BackgroundOutcome, BackgroundStatus, BackgroundTasks, PipelinePhase, StartupPipeline,
    StartupPipelineBuilder, StartupPipelineOptions,
};
pub use services::ServiceRegistry;
pub use splash::{ShellHandoff, SplashHost};
