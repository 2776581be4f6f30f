//! process-helpers - run external executables and capture their output
//!
//! - [`run_executable`] spawns a process with a single argument line,
//!   collects stdout and stderr line by line and optionally fails on the
//!   first non-blank stderr line
//! - [`enable_executable_permissions`] runs `chmod +x` on Unix and does
//!   nothing elsewhere
//!
//! ```no_run
//! use process_helpers::{enable_executable_permissions, run_executable};
//!
//! # fn main() -> process_helpers::Result<()> {
//! enable_executable_permissions("./tools/helper")?;
//! let (output, _error) = run_executable("./tools/helper", "--version", true)?.into_parts();
//! println!("{}", output);
//! # Ok(())
//! # }
//! ```

pub mod host;
pub mod logging;

pub use host::command_runner::Result;
pub use host::{
    enable_executable_permissions, run_executable, CommandError, ErrorPolicy, LineJoin, LineLogger,
    ProcessRunner, RunOptions, RunOutput, TracingLogger,
};
