//! Command-line interface definitions and handlers

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use process_helpers::host::DEFAULT_SHELL;
use process_helpers::{CommandError, LineJoin, ProcessRunner, RunOptions};

/// Process exit codes
pub mod exit_codes {
    pub const SUCCESS: i32 = 0;
    pub const UNEXPECTED_FAILURE: i32 = 1;
    pub const LAUNCH_FAILED: i32 = 2;
    pub const STDERR_OUTPUT: i32 = 3;
    pub const INVALID_ARGUMENTS: i32 = 4;
}

#[derive(Parser, Debug)]
#[command(
    name = "process-helpers",
    version,
    about = "Run executables with captured output, or mark files executable"
)]
pub struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON
    #[arg(long = "json-output", global = true)]
    pub json_output: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run an executable and capture its stdout and stderr
    Run(RunArgs),
    /// Add execute permission to a file (does nothing off Unix)
    Chmod(ChmodArgs),
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Executable path or name
    pub file: String,

    /// Argument line passed to the executable, e.g. "-c 'echo hi'"
    #[arg(default_value = "", allow_hyphen_values = true)]
    pub arguments: String,

    /// Fail on the first non-blank stderr line
    #[arg(long)]
    pub throw_on_error: bool,

    /// How captured lines are joined
    #[arg(long, value_enum, default_value_t = JoinArg::Concat)]
    pub join: JoinArg,

    /// Working directory for the child
    #[arg(long)]
    pub cwd: Option<PathBuf>,

    /// Extra environment variable, KEY=VALUE (repeatable)
    #[arg(long = "env", value_parser = parse_env_pair)]
    pub env: Vec<(String, String)>,

    /// Text written to the child's stdin
    #[arg(long)]
    pub stdin: Option<String>,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
}

#[derive(Args, Debug)]
pub struct ChmodArgs {
    /// File to mark executable
    pub path: PathBuf,

    /// Shell used to run chmod
    #[arg(long, env = "PROCESS_HELPERS_SHELL", default_value = DEFAULT_SHELL)]
    pub shell: PathBuf,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum JoinArg {
    /// No separator between lines
    Concat,
    /// One line per captured line
    Newline,
}

impl From<JoinArg> for LineJoin {
    fn from(join: JoinArg) -> Self {
        match join {
            JoinArg::Concat => LineJoin::Concatenate,
            JoinArg::Newline => LineJoin::Newline,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

fn parse_env_pair(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got '{}'", s)),
    }
}

/// Handle `process-helpers run`
pub fn run(args: RunArgs) -> anyhow::Result<()> {
    let runner = args
        .env
        .iter()
        .fold(ProcessRunner::new(), |runner, (k, v)| runner.with_env(k, v));

    let options = RunOptions {
        error_policy: process_helpers::ErrorPolicy::from_throw_on_error(args.throw_on_error),
        join: args.join.into(),
        working_directory: args.cwd,
        stdin: args.stdin,
    };

    let result = runner.run(&args.file, &args.arguments, &options)?;

    match args.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&result)?),
        OutputFormat::Text => {
            if !result.output.is_empty() {
                println!("{}", result.output);
            }
            if !result.error.is_empty() {
                eprintln!("{}", result.error);
            }
        }
    }

    Ok(())
}

/// Handle `process-helpers chmod`
pub fn chmod(args: ChmodArgs) -> anyhow::Result<()> {
    ProcessRunner::new()
        .with_shell(args.shell)
        .enable_executable_permissions(&args.path)?;
    Ok(())
}

/// Map an error to the exit code reported by the binary
pub fn exit_code_for(e: &anyhow::Error) -> i32 {
    match e.downcast_ref::<CommandError>() {
        Some(CommandError::LaunchFailed { .. }) => exit_codes::LAUNCH_FAILED,
        Some(CommandError::StderrOutput { .. }) => exit_codes::STDERR_OUTPUT,
        Some(CommandError::InvalidArguments { .. }) => exit_codes::INVALID_ARGUMENTS,
        _ => exit_codes::UNEXPECTED_FAILURE,
    }
}
