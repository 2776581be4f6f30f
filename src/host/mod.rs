//! Host module for process execution and file permissions

pub mod command_runner;
pub mod logger;
pub mod permissions;
pub mod stream;

pub use command_runner::{
    run_executable, split_arguments, CommandError, ErrorPolicy, LineJoin, ProcessRunner, RunOptions,
    RunOutput,
};
pub use logger::{LineLogger, TracingLogger};
pub use permissions::{chmod_arguments, enable_executable_permissions, DEFAULT_SHELL};
