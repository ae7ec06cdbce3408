// Copyright (c) The rendertest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Running the commands of a test script.
//!
//! Each line of a script is one command. Commands run in the test's working directory with a
//! fully specified environment; stdout and stderr are merged and captured line by line. A watchdog
//! interrupts commands that exceed their timeout, then kills them after a grace period.

use camino::Utf8Path;
use crossbeam_channel::RecvTimeoutError;
use duct::{ReaderHandle, cmd};
use indexmap::IndexMap;
use rendertest_metadata::TestStatus;
use std::{
    io::{self, BufRead, BufReader, Write},
    process::ExitStatus,
    time::Duration,
};
use tracing::{debug, warn};

/// Marks a script line that runs through the system shell.
pub const SHELL_MARKER: char = '$';

/// The renderer command that receives suite-wide extra parameters.
pub const RENDERER_COMMAND: &str = "kick";

/// The exit code conventions of the platform a command ran on.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ExitAbi {
    /// Signals show up as negative codes, or codes above 128 when reported by a shell.
    Posix,

    /// Fatal exceptions show up as NTSTATUS codes of error severity.
    Windows,
}

impl ExitAbi {
    /// The conventions of the host platform.
    pub const HOST: ExitAbi = if cfg!(windows) {
        ExitAbi::Windows
    } else {
        ExitAbi::Posix
    };
}

/// Maps the result of a command to a status.
///
/// `code` is the exit code, or the negated signal number for a process killed by a signal.
pub fn classify_exit(timed_out: bool, code: i64, abi: ExitAbi) -> TestStatus {
    if timed_out {
        return TestStatus::TimedOut;
    }
    if code == 0 {
        return TestStatus::Ok;
    }
    let crashed = match abi {
        ExitAbi::Posix => !(0..=128).contains(&code),
        // Exit codes are 32-bit unsigned values on Windows.
        ExitAbi::Windows => (code as u32) >= 0xC000_0000,
    };
    if crashed {
        TestStatus::Crashed
    } else {
        TestStatus::Failed
    }
}

fn exit_code(status: &ExitStatus) -> i64 {
    if let Some(code) = status.code() {
        return i64::from(code);
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return -i64::from(signal);
        }
    }
    -1
}

/// Options that rewrite script lines into the commands that are executed.
#[derive(Clone, Debug)]
pub struct CommandContext<'a> {
    /// The interpreter placed in front of `.py` commands.
    pub python: &'a Utf8Path,

    /// Extra parameters appended to renderer commands.
    pub kick_params: Option<&'a str>,

    /// The exit code conventions, which also decide how commands are spelled.
    pub abi: ExitAbi,
}

/// A script line, ready to execute.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PreparedCommand {
    /// The command line as logged.
    pub display: String,

    /// The program and its arguments.
    pub argv: Vec<String>,
}

impl PreparedCommand {
    /// Rewrites a script line.
    ///
    /// * A leading `$` runs the rest of the line through the shell. On Windows every command
    ///   runs through the shell.
    /// * A leading `./` is dropped on Windows.
    /// * `.py` commands are run with the Python interpreter.
    /// * `kick` commands get the suite's extra parameters appended.
    pub fn new(line: &str, cx: &CommandContext<'_>) -> Result<Self, shell_words::ParseError> {
        let (mut command, use_shell) = match line.strip_prefix(SHELL_MARKER) {
            Some(rest) => (rest.trim_start().to_owned(), true),
            None => (line.to_owned(), cx.abi == ExitAbi::Windows),
        };
        if cx.abi == ExitAbi::Windows {
            if let Some(rest) = command.strip_prefix("./") {
                command = rest.to_owned();
            }
        }

        let program = command.split_whitespace().next().unwrap_or_default();
        if program.ends_with(".py") {
            command = format!("{} {command}", cx.python);
        } else if program == RENDERER_COMMAND {
            if let Some(kick_params) = cx.kick_params.filter(|p| !p.trim().is_empty()) {
                command = format!("{command} {kick_params}");
            }
        }

        let argv = if use_shell {
            match cx.abi {
                ExitAbi::Windows => vec!["cmd".to_owned(), "/C".to_owned(), command.clone()],
                ExitAbi::Posix => vec!["sh".to_owned(), "-c".to_owned(), command.clone()],
            }
        } else {
            shell_words::split(&command)?
        };

        Ok(Self {
            display: command,
            argv,
        })
    }
}

/// Where and how commands run.
#[derive(Clone, Debug)]
pub struct ExecOptions<'a> {
    /// The working directory.
    pub cwd: &'a Utf8Path,

    /// The complete environment of the command.
    pub env: &'a IndexMap<String, String>,

    /// Interrupt the command after this long.
    pub timeout: Option<Duration>,

    /// Kill the command if it hasn't exited this long after being interrupted.
    pub grace_period: Duration,

    /// Echo output lines to stdout as they are read.
    pub echo: bool,
}

/// The result of running a command.
#[derive(Clone, Debug)]
pub struct CommandOutcome {
    /// The classified result.
    pub status: TestStatus,

    /// Combined stdout and stderr, one entry per line.
    pub output: Vec<String>,
}

/// Runs `argv` to completion, applying the timeout in `opts`.
///
/// Commands that can't be started are reported as failed, with the error as output.
pub fn run_command(argv: &[String], opts: &ExecOptions<'_>) -> CommandOutcome {
    let Some((program, args)) = argv.split_first() else {
        return CommandOutcome {
            status: TestStatus::Failed,
            output: vec!["empty command".to_owned()],
        };
    };
    debug!(cwd = %opts.cwd, "executing {}", argv.join(" "));

    let expression = cmd(program, args)
        .dir(opts.cwd.as_std_path())
        .full_env(opts.env)
        .stderr_to_stdout()
        .unchecked();
    // Run each command in its own process group, so that a timeout reaches every process it
    // started.
    #[cfg(unix)]
    let expression = expression.before_spawn(|command| {
        use std::os::unix::process::CommandExt;
        command.process_group(0);
        Ok(())
    });

    let handle = match expression.reader() {
        Ok(handle) => handle,
        Err(error) => {
            warn!("failed to start `{program}`: {error}");
            return CommandOutcome {
                status: TestStatus::Failed,
                output: vec![format!("failed to start `{program}`: {error}")],
            };
        }
    };

    let (timed_out, output) = std::thread::scope(|s| {
        let handle = &handle;
        let (done_sender, done_receiver) = crossbeam_channel::bounded::<()>(1);

        // The output is read on a separate thread so that this one can keep track of the timeout.
        let reader = s.spawn(move || {
            let output = read_lines(handle, opts.echo);
            // We don't care if the receiver got the message or not.
            let _ = done_sender.send(());
            output
        });

        let mut timed_out = false;
        if let Some(timeout) = opts.timeout {
            if let Err(RecvTimeoutError::Timeout) = done_receiver.recv_timeout(timeout) {
                timed_out = true;
                warn!("command timed out after {timeout:?}, interrupting it");
                signal_group(handle, Termination::Interrupt);
                if let Err(RecvTimeoutError::Timeout) =
                    done_receiver.recv_timeout(opts.grace_period)
                {
                    debug!("command still running after the grace period, killing it");
                    signal_group(handle, Termination::Kill);
                    if let Err(error) = handle.kill() {
                        warn!("failed to kill timed out command: {error}");
                    }
                }
            }
        }

        let output = match reader.join() {
            Ok(output) => output,
            Err(panic) => std::panic::resume_unwind(panic),
        };
        (timed_out, output)
    });

    let code = match handle.try_wait() {
        Ok(Some(process_output)) => exit_code(&process_output.status),
        Ok(None) => {
            warn!("`{program}` closed its output but is still running");
            -1
        }
        Err(error) => {
            warn!("failed to wait for `{program}`: {error}");
            -1
        }
    };

    CommandOutcome {
        status: classify_exit(timed_out, code, ExitAbi::HOST),
        output,
    }
}

fn read_lines(handle: &ReaderHandle, echo: bool) -> Vec<String> {
    let mut reader = BufReader::new(handle);
    let mut lines = Vec::new();
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) => break,
            Ok(_) => {
                // Output may contain arbitrary bytes.
                let line = String::from_utf8_lossy(&buf);
                let line = line.trim_end_matches(['\n', '\r']).to_owned();
                if echo {
                    let _ = writeln!(io::stdout().lock(), "{line}");
                }
                lines.push(line);
            }
            Err(error) if error.kind() == io::ErrorKind::Interrupted => continue,
            Err(error) => {
                lines.push(format!("error reading command output: {error}"));
                break;
            }
        }
    }
    lines
}

#[derive(Copy, Clone, Debug)]
enum Termination {
    Interrupt,
    Kill,
}

fn signal_group(handle: &ReaderHandle, termination: Termination) {
    cfg_if::cfg_if! {
        if #[cfg(unix)] {
            use nix::{sys::signal::{Signal, killpg}, unistd::Pid};

            let signal = match termination {
                Termination::Interrupt => Signal::SIGINT,
                Termination::Kill => Signal::SIGKILL,
            };
            // Each command leads its own process group.
            for pid in handle.pids() {
                if let Err(error) = killpg(Pid::from_raw(pid as i32), signal) {
                    debug!("failed to send {signal} to process group {pid}: {error}");
                }
            }
        } else {
            // Processes without a console can't be interrupted: the grace period runs out and
            // the command is killed through its handle.
            let _ = (handle, termination);
        }
    }
}
