//! Process-creation layer used by the capture supervisor

pub mod builder;
pub mod error;
pub mod runner;

pub use builder::ProcessCommandBuilder;
pub use error::ProcessError;
pub use runner::{
    exit_code, OutputPipe, ProcessCommand, ProcessLauncher, RunningProcess, TokioProcessLauncher,
};
