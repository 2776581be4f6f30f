//! Command Runner
//!
//! Runs an executable with a single pre-formatted argument line and captures
//! its stdout and stderr line by line. Each stream is read on its own thread;
//! the calling thread collects lines, logs them and applies the stderr
//! policy while the child is still running.

use crossbeam_channel::Receiver;
use serde::Serialize;
use std::collections::HashMap;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::Arc;
use std::thread::JoinHandle;
use thiserror::Error;

use super::logger::{LineLogger, TracingLogger};
use super::permissions::DEFAULT_SHELL;
use super::stream::{spawn_reader, Stream, StreamEvent};

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x08000000;

/// Result type for command runner operations
pub type Result<T> = std::result::Result<T, CommandError>;

/// What to do when the child writes to stderr
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorPolicy {
    /// Fail on the first stderr line that is not blank
    Throw,
    /// Log stderr lines and keep going
    #[default]
    Log,
}

impl ErrorPolicy {
    pub fn from_throw_on_error(throw_on_error: bool) -> Self {
        if throw_on_error {
            ErrorPolicy::Throw
        } else {
            ErrorPolicy::Log
        }
    }
}

/// How captured lines are joined into the output text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LineJoin {
    /// Append lines with no separator
    #[default]
    Concatenate,
    /// Separate lines with `\n`
    Newline,
}

/// Per-run options
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Stderr policy
    pub error_policy: ErrorPolicy,
    /// Join used for both captured streams
    pub join: LineJoin,
    /// Working directory for the child
    pub working_directory: Option<PathBuf>,
    /// Text written to the child's stdin before it is closed
    pub stdin: Option<String>,
}

impl RunOptions {
    pub fn throw_on_error(throw_on_error: bool) -> Self {
        Self {
            error_policy: ErrorPolicy::from_throw_on_error(throw_on_error),
            ..Self::default()
        }
    }
}

/// Captured output of a finished child process
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunOutput {
    /// Accumulated stdout lines
    pub output: String,
    /// Accumulated stderr lines
    pub error: String,
    /// Exit code, `None` if the child was terminated by a signal
    pub exit_code: Option<i32>,
}

impl RunOutput {
    /// Split into `(output, error)`
    pub fn into_parts(self) -> (String, String) {
        (self.output, self.error)
    }
}

/// Command runner errors
#[derive(Debug, Error)]
pub enum CommandError {
    /// The child wrote a non-blank stderr line under [`ErrorPolicy::Throw`]
    #[error("Error received while running {file_path} {arguments}: {line}")]
    StderrOutput {
        file_path: String,
        arguments: String,
        line: String,
    },

    /// The process could not be started
    #[error("Failed to launch {file_path}: {source}")]
    LaunchFailed {
        file_path: String,
        #[source]
        source: io::Error,
    },

    /// The argument line could not be split into arguments
    #[error("Invalid argument line '{arguments}': {reason}")]
    InvalidArguments { arguments: String, reason: String },

    /// IO error while talking to the child
    #[error("IO error while {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },
}

impl CommandError {
    fn io(context: impl Into<String>, source: io::Error) -> Self {
        CommandError::Io {
            context: context.into(),
            source,
        }
    }
}

/// Appends lines to a string using a [`LineJoin`]
#[derive(Debug)]
struct Accumulator {
    text: String,
    lines: usize,
    join: LineJoin,
}

impl Accumulator {
    fn new(join: LineJoin) -> Self {
        Self {
            text: String::new(),
            lines: 0,
            join,
        }
    }

    fn push(&mut self, line: &str) {
        if self.join == LineJoin::Newline && self.lines > 0 {
            self.text.push('\n');
        }
        self.text.push_str(line);
        self.lines += 1;
    }

    fn into_text(self) -> String {
        self.text
    }
}

/// Runs external executables and captures their output
pub struct ProcessRunner {
    /// Environment variables to add
    env_additions: HashMap<String, String>,
    /// Receives every captured line
    logger: Arc<dyn LineLogger>,
    /// Shell used by the permission setter
    shell: PathBuf,
}

impl ProcessRunner {
    pub fn new() -> Self {
        Self {
            env_additions: HashMap::new(),
            logger: Arc::new(TracingLogger),
            shell: PathBuf::from(DEFAULT_SHELL),
        }
    }

    /// Add an environment variable
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env_additions.insert(key.into(), value.into());
        self
    }

    /// Replace the line logger
    pub fn with_logger(mut self, logger: impl LineLogger + 'static) -> Self {
        self.logger = Arc::new(logger);
        self
    }

    /// Replace the shell used to run `chmod`
    pub fn with_shell(mut self, shell: impl Into<PathBuf>) -> Self {
        self.shell = shell.into();
        self
    }

    pub fn shell(&self) -> &Path {
        &self.shell
    }

    /// Run `file_path` with `arguments` and wait for it to exit.
    ///
    /// With `throw_on_error`, the first non-blank stderr line fails the call
    /// and the child is killed.
    pub fn run_executable(
        &self,
        file_path: &str,
        arguments: &str,
        throw_on_error: bool,
    ) -> Result<RunOutput> {
        self.run(file_path, arguments, &RunOptions::throw_on_error(throw_on_error))
    }

    /// Run a command with explicit options
    pub fn run(&self, file_path: &str, arguments: &str, options: &RunOptions) -> Result<RunOutput> {
        let mut cmd = self.build_command(file_path, arguments, options)?;

        tracing::debug!("Running {} {}", file_path, arguments);
        let mut child = cmd.spawn().map_err(|source| CommandError::LaunchFailed {
            file_path: file_path.to_string(),
            source,
        })?;

        match self.supervise(&mut child, file_path, arguments, options) {
            Ok(result) => {
                tracing::debug!("{} exited with code {:?}", file_path, result.exit_code);
                Ok(result)
            }
            Err(e) => {
                stop_child(&mut child);
                Err(e)
            }
        }
    }

    fn build_command(&self, file_path: &str, arguments: &str, options: &RunOptions) -> Result<Command> {
        let mut cmd = Command::new(file_path);
        apply_arguments(&mut cmd, arguments)?;

        if let Some(dir) = &options.working_directory {
            cmd.current_dir(dir);
        }

        for (k, v) in &self.env_additions {
            cmd.env(k, v);
        }

        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            cmd.creation_flags(CREATE_NO_WINDOW);
        }

        Ok(cmd)
    }

    /// Collect output from a running child until both pipes close, then reap it
    fn supervise(
        &self,
        child: &mut Child,
        file_path: &str,
        arguments: &str,
        options: &RunOptions,
    ) -> Result<RunOutput> {
        let (events, readers) = start_readers(child)?;

        let writer = match child.stdin.take() {
            Some(stdin) => feed_stdin(stdin, options.stdin.clone())?,
            None => None,
        };

        let (output, error) = self.collect(&events, file_path, arguments, options)?;

        for handle in readers.into_iter().chain(writer) {
            let _ = handle.join();
        }

        let status = child
            .wait()
            .map_err(|e| CommandError::io(format!("waiting for {}", file_path), e))?;

        Ok(RunOutput {
            output,
            error,
            exit_code: status.code(),
        })
    }

    /// Consume reader events until both streams have closed
    fn collect(
        &self,
        events: &Receiver<StreamEvent>,
        file_path: &str,
        arguments: &str,
        options: &RunOptions,
    ) -> Result<(String, String)> {
        let mut output = Accumulator::new(options.join);
        let mut error = Accumulator::new(options.join);
        let mut open_streams = 2;

        while open_streams > 0 {
            let event = events.recv().map_err(|_| {
                CommandError::io(
                    format!("reading output of {}", file_path),
                    io::Error::other("stream reader exited unexpectedly"),
                )
            })?;

            match event {
                StreamEvent::Line(Stream::Stdout, line) => {
                    self.logger.info(&line);
                    output.push(&line);
                }
                StreamEvent::Line(Stream::Stderr, line) => {
                    if options.error_policy == ErrorPolicy::Throw && !line.trim().is_empty() {
                        return Err(CommandError::StderrOutput {
                            file_path: file_path.to_string(),
                            arguments: arguments.to_string(),
                            line,
                        });
                    }
                    self.logger.error(&line);
                    error.push(&line);
                }
                StreamEvent::Failed(stream, source) => {
                    return Err(CommandError::io(
                        format!("reading {} of {}", stream, file_path),
                        source,
                    ));
                }
                StreamEvent::Closed(_) => open_streams -= 1,
            }
        }

        Ok((output.into_text(), error.into_text()))
    }
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self::new()
    }
}

/// Run an executable with the default runner. See [`ProcessRunner::run_executable`].
pub fn run_executable(file_path: &str, arguments: &str, throw_on_error: bool) -> Result<RunOutput> {
    ProcessRunner::new().run_executable(file_path, arguments, throw_on_error)
}

/// Split an argument line into arguments using POSIX shell quoting rules
pub fn split_arguments(arguments: &str) -> Result<Vec<String>> {
    shell_words::split(arguments).map_err(|e| CommandError::InvalidArguments {
        arguments: arguments.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(not(windows))]
fn apply_arguments(cmd: &mut Command, arguments: &str) -> Result<()> {
    cmd.args(split_arguments(arguments)?);
    Ok(())
}

#[cfg(windows)]
fn apply_arguments(cmd: &mut Command, arguments: &str) -> Result<()> {
    use std::os::windows::process::CommandExt;
    // Windows takes the argument line as-is
    if !arguments.is_empty() {
        cmd.raw_arg(arguments);
    }
    Ok(())
}

fn start_readers(child: &mut Child) -> Result<(Receiver<StreamEvent>, Vec<JoinHandle<()>>)> {
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| CommandError::io("capturing stdout", io::Error::other("stdout not piped")))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| CommandError::io("capturing stderr", io::Error::other("stderr not piped")))?;

    let (tx, rx) = crossbeam_channel::unbounded();
    let readers = vec![
        spawn_reader(Stream::Stdout, stdout, tx.clone())
            .map_err(|e| CommandError::io("starting stdout reader", e))?,
        spawn_reader(Stream::Stderr, stderr, tx)
            .map_err(|e| CommandError::io("starting stderr reader", e))?,
    ];

    Ok((rx, readers))
}

/// Write the optional payload on its own thread, then close stdin.
///
/// Without a payload stdin is closed right away and no thread is started.
fn feed_stdin(mut stdin: ChildStdin, input: Option<String>) -> Result<Option<JoinHandle<()>>> {
    let Some(text) = input else {
        return Ok(None);
    };

    let writer = std::thread::Builder::new()
        .name("stdin-writer".to_string())
        .spawn(move || {
            if let Err(e) = stdin.write_all(text.as_bytes()).and_then(|_| stdin.flush()) {
                tracing::debug!("Child stopped reading stdin: {}", e);
            }
        })
        .map_err(|e| CommandError::io("starting stdin writer", e))?;

    Ok(Some(writer))
}

/// Kill and reap a child that is no longer being supervised
fn stop_child(child: &mut Child) {
    if let Err(e) = child.kill() {
        tracing::debug!("Failed to kill child {}: {}", child.id(), e);
    }
    let _ = child.wait();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::logger::testing::{Logged, RecordingLogger};

    #[test]
    fn test_run_options_default() {
        let opts = RunOptions::default();
        assert_eq!(opts.error_policy, ErrorPolicy::Log);
        assert_eq!(opts.join, LineJoin::Concatenate);
        assert!(opts.working_directory.is_none());
        assert!(opts.stdin.is_none());
    }

    #[test]
    fn test_error_policy_from_flag() {
        assert_eq!(ErrorPolicy::from_throw_on_error(true), ErrorPolicy::Throw);
        assert_eq!(ErrorPolicy::from_throw_on_error(false), ErrorPolicy::Log);
        assert_eq!(RunOptions::throw_on_error(true).error_policy, ErrorPolicy::Throw);
    }

    #[test]
    fn test_accumulator_concatenates() {
        let mut acc = Accumulator::new(LineJoin::Concatenate);
        acc.push("a");
        acc.push("");
        acc.push("b");
        assert_eq!(acc.into_text(), "ab");
    }

    #[test]
    fn test_accumulator_newline_join() {
        let mut acc = Accumulator::new(LineJoin::Newline);
        acc.push("a");
        acc.push("");
        acc.push("b");
        assert_eq!(acc.into_text(), "a\n\nb");
    }

    #[test]
    fn test_split_arguments() {
        assert!(split_arguments("").unwrap().is_empty());
        assert_eq!(
            split_arguments(r#"-c "chmod +x '/tmp/a b'""#).unwrap(),
            vec!["-c", "chmod +x '/tmp/a b'"]
        );
        assert!(matches!(
            split_arguments("\"unterminated"),
            Err(CommandError::InvalidArguments { .. })
        ));
    }

    #[test]
    fn test_error_display() {
        let err = CommandError::StderrOutput {
            file_path: "/bin/tool".to_string(),
            arguments: "--flag".to_string(),
            line: "bad thing".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Error received while running /bin/tool --flag: bad thing"
        );

        let err = CommandError::LaunchFailed {
            file_path: "missing".to_string(),
            source: io::Error::from(io::ErrorKind::NotFound),
        };
        assert!(err.to_string().contains("missing"));
    }

    #[test]
    fn test_run_output_into_parts() {
        let out = RunOutput {
            output: "o".to_string(),
            error: "e".to_string(),
            exit_code: Some(0),
        };
        assert_eq!(out.into_parts(), ("o".to_string(), "e".to_string()));
    }

    #[test]
    fn test_missing_binary_is_launch_failure() {
        let result = run_executable("definitely-not-a-real-binary-7f3a", "", false);
        assert!(matches!(result, Err(CommandError::LaunchFailed { .. })));
    }

    #[cfg(unix)]
    mod unix {
        use super::*;
        use std::time::{Duration, Instant};

        fn recording_runner() -> (ProcessRunner, Arc<RecordingLogger>) {
            let logger = Arc::new(RecordingLogger::default());
            let runner = ProcessRunner::new().with_logger(logger.clone());
            (runner, logger)
        }

        #[test]
        fn test_echo_hello() {
            let result = run_executable("/bin/echo", "hello", false).unwrap();
            assert_eq!(result.output, "hello");
            assert_eq!(result.error, "");
            assert_eq!(result.exit_code, Some(0));
        }

        #[test]
        fn test_stdout_lines_concatenated_and_logged() {
            let (runner, logger) = recording_runner();
            let result = runner
                .run_executable("/bin/sh", "-c \"echo a; echo b; echo c\"", true)
                .unwrap();

            assert_eq!(result.output, "abc");
            assert_eq!(result.error, "");
            assert_eq!(
                logger.entries(),
                vec![
                    Logged::Info("a".to_string()),
                    Logged::Info("b".to_string()),
                    Logged::Info("c".to_string()),
                ]
            );
        }

        #[test]
        fn test_newline_join() {
            let options = RunOptions {
                join: LineJoin::Newline,
                ..RunOptions::default()
            };
            let result = ProcessRunner::new()
                .run("/bin/sh", "-c \"echo a; echo b; echo c 1>&2; echo d 1>&2\"", &options)
                .unwrap();

            assert_eq!(result.output, "a\nb");
            assert_eq!(result.error, "c\nd");
        }

        #[test]
        fn test_stderr_throws() {
            let arguments = "-c \"echo err 1>&2\"";
            let err = run_executable("/bin/sh", arguments, true).unwrap_err();

            match &err {
                CommandError::StderrOutput {
                    file_path,
                    arguments: args,
                    line,
                } => {
                    assert_eq!(file_path, "/bin/sh");
                    assert_eq!(args, arguments);
                    assert_eq!(line, "err");
                }
                other => panic!("expected StderrOutput, got {:?}", other),
            }

            let message = err.to_string();
            assert!(message.contains("/bin/sh"));
            assert!(message.contains(arguments));
            assert!(message.contains("err"));
        }

        #[test]
        fn test_offending_line_is_not_logged() {
            let (runner, logger) = recording_runner();
            let result = runner.run_executable("/bin/sh", "-c \"echo boom 1>&2\"", true);

            assert!(result.is_err());
            assert!(!logger.entries().contains(&Logged::Error("boom".to_string())));
        }

        #[test]
        fn test_blank_stderr_logged_before_fault() {
            let (runner, logger) = recording_runner();
            let result = runner.run_executable(
                "/bin/sh",
                r#"-c "echo partial; printf '  \n' 1>&2; echo fatal 1>&2""#,
                true,
            );

            match result {
                Err(CommandError::StderrOutput { line, .. }) => assert_eq!(line, "fatal"),
                other => panic!("expected StderrOutput, got {:?}", other),
            }

            let entries = logger.entries();
            assert!(entries.contains(&Logged::Error("  ".to_string())));
            assert!(!entries.contains(&Logged::Error("fatal".to_string())));
        }

        #[test]
        fn test_blank_stderr_does_not_throw() {
            let (runner, logger) = recording_runner();
            let result = runner
                .run_executable("/bin/sh", r#"-c "printf '\n   \n\t\n' 1>&2""#, true)
                .unwrap();

            assert_eq!(result.output, "");
            assert_eq!(result.error, "   \t");
            assert_eq!(
                logger.entries(),
                vec![
                    Logged::Error(String::new()),
                    Logged::Error("   ".to_string()),
                    Logged::Error("\t".to_string()),
                ]
            );
        }

        #[test]
        fn test_log_policy_returns_both_streams() {
            let (runner, logger) = recording_runner();
            let result = runner
                .run_executable("/bin/sh", "-c \"echo out; echo err 1>&2; exit 4\"", false)
                .unwrap();

            assert_eq!(result.output, "out");
            assert_eq!(result.error, "err");
            assert_eq!(result.exit_code, Some(4));

            let entries = logger.entries();
            assert!(entries.contains(&Logged::Info("out".to_string())));
            assert!(entries.contains(&Logged::Error("err".to_string())));
        }

        #[test]
        fn test_fault_does_not_wait_for_exit() {
            let start = Instant::now();
            let result = run_executable("/bin/sh", "-c \"echo boom 1>&2; exec sleep 30\"", true);

            assert!(matches!(result, Err(CommandError::StderrOutput { .. })));
            assert!(start.elapsed() < Duration::from_secs(10));
        }

        #[test]
        fn test_fault_not_blocked_by_unread_stdin() {
            let options = RunOptions {
                error_policy: ErrorPolicy::Throw,
                stdin: Some("x".repeat(1 << 20)),
                ..RunOptions::default()
            };

            let start = Instant::now();
            let result = ProcessRunner::new().run(
                "/bin/sh",
                "-c \"echo boom 1>&2; exec sleep 30\"",
                &options,
            );

            assert!(matches!(result, Err(CommandError::StderrOutput { .. })));
            assert!(start.elapsed() < Duration::from_secs(10));
        }

        #[test]
        fn test_large_stdin_payload_round_trips() {
            let payload = format!("{}\n", "y".repeat(1 << 20));
            let options = RunOptions {
                stdin: Some(payload),
                ..RunOptions::default()
            };
            let result = ProcessRunner::new().run("/bin/cat", "", &options).unwrap();
            assert_eq!(result.output.len(), 1 << 20);
        }

        #[test]
        fn test_large_interleaved_output_does_not_deadlock() {
            let script = "-c \"i=0; while [ $i -lt 5000 ]; do echo o$i; echo e$i 1>&2; i=$((i+1)); done\"";
            let result = run_executable("/bin/sh", script, false).unwrap();

            assert!(result.output.starts_with("o0o1o2"));
            assert!(result.output.ends_with("o4999"));
            assert!(result.error.starts_with("e0e1e2"));
            assert!(result.error.ends_with("e4999"));
        }

        #[test]
        fn test_stdin_payload() {
            let options = RunOptions {
                stdin: Some("x\ny\n".to_string()),
                ..RunOptions::default()
            };
            let result = ProcessRunner::new().run("/bin/cat", "", &options).unwrap();
            assert_eq!(result.output, "xy");
        }

        #[test]
        fn test_stdin_closed_without_payload() {
            let result = run_executable("/bin/cat", "", true).unwrap();
            assert_eq!(result.output, "");
            assert_eq!(result.exit_code, Some(0));
        }

        #[test]
        fn test_working_directory() {
            let dir = tempfile::tempdir().unwrap();
            let options = RunOptions {
                working_directory: Some(dir.path().to_path_buf()),
                ..RunOptions::default()
            };
            let result = ProcessRunner::new().run("/bin/sh", "-c pwd", &options).unwrap();

            assert_eq!(
                std::fs::canonicalize(&result.output).unwrap(),
                std::fs::canonicalize(dir.path()).unwrap()
            );
        }

        #[test]
        fn test_env_additions() {
            let runner = ProcessRunner::new().with_env("GREETING", "hi there");
            let result = runner
                .run_executable("/bin/sh", r#"-c 'printf %s "$GREETING"'"#, true)
                .unwrap();
            assert_eq!(result.output, "hi there");
        }

        #[test]
        fn test_invalid_arguments_are_rejected_before_spawn() {
            let result = run_executable("/bin/echo", "'unterminated", false);
            assert!(matches!(result, Err(CommandError::InvalidArguments { .. })));
        }
    }
}
